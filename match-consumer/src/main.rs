use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use envconfig::Envconfig;
use rdkafka::consumer::ConsumerContext;
use tokio::signal;
use tokio::sync::watch;

use match_common::kafka::auth::MskIamTokenProvider;
use match_common::kafka::{KafkaContext, OAuthContext};
use match_common::logging::setup_tracing;
use match_common::metrics::{health_routes, serve, setup_metrics_recorder, setup_metrics_routes};
use match_common::store::{self, EventStore};
use match_consumer::config::Config;
use match_consumer::consumer::ConsumerLoop;

const CLIENT_NAME: &str = "match-consumer";

async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
    let _ = shutdown.send(true);
}

fn consumer<C: ConsumerContext + 'static>(
    config: &Config,
    context: C,
    store: Arc<dyn EventStore>,
) -> anyhow::Result<ConsumerLoop<C>> {
    ConsumerLoop::new(
        &config.kafka,
        &config.kafka_consumer_group,
        context,
        store,
        config.batch_settings(),
    )
    .context("failed to create kafka consumer")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().expect("Invalid configuration:");
    setup_tracing(config.log_format);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(shutdown_signal(shutdown_tx));

    let mut app: Router = health_routes();
    if config.export_prometheus {
        app = setup_metrics_routes(app, setup_metrics_recorder()?);
    }
    let mut server_shutdown = shutdown_rx.clone();
    let address = config.address.to_string();
    let server = tokio::spawn(async move {
        serve(app, &address, async move {
            let _ = server_shutdown.changed().await;
        })
        .await
    });

    let store = store::from_config(&config.store, &config.aws).await;

    if config.kafka.kafka_sasl_oauthbearer {
        let tokens = MskIamTokenProvider::from_env(&config.aws.aws_region).await?;
        let context = OAuthContext::new(CLIENT_NAME, Arc::new(tokens));
        consumer(&config, context, store)?.run(shutdown_rx).await?;
    } else {
        let context = KafkaContext::new(CLIENT_NAME);
        consumer(&config, context, store)?.run(shutdown_rx).await?;
    }

    server.await??;
    Ok(())
}
