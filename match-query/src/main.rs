use envconfig::Envconfig;
use tokio::signal;

use match_common::logging::setup_tracing;
use match_common::metrics::{serve, setup_metrics_recorder};
use match_common::store;
use match_query::config::Config;
use match_query::router::router;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().expect("Invalid configuration:");
    setup_tracing(config.log_format);

    let metrics = if config.export_prometheus {
        Some(setup_metrics_recorder()?)
    } else {
        None
    };
    let store = store::from_config(&config.store, &config.aws).await;

    tracing::info!("listening on {}", config.address);
    serve(router(store, metrics), &config.address.to_string(), shutdown()).await?;

    Ok(())
}
