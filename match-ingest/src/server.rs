use std::future::Future;
use std::sync::Arc;

use match_common::kafka::auth::MskIamTokenProvider;
use match_common::kafka::{KafkaContext, OAuthContext};
use match_common::metrics::setup_metrics_recorder;
use tracing::info;

use crate::config::Config;
use crate::router::router;
use crate::sinks::kafka::KafkaSink;
use crate::sinks::print::PrintSink;

const CLIENT_NAME: &str = "match-ingest";

pub async fn serve<F>(config: Config, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics = if config.export_prometheus {
        Some(setup_metrics_recorder()?)
    } else {
        None
    };

    let app = if config.print_sink {
        router(PrintSink::default(), config.max_body_size, metrics)
    } else if config.kafka.kafka_sasl_oauthbearer {
        let tokens = MskIamTokenProvider::from_env(&config.aws.aws_region).await?;
        let context = OAuthContext::new(CLIENT_NAME, Arc::new(tokens));
        router(
            KafkaSink::new(config.kafka.clone(), context),
            config.max_body_size,
            metrics,
        )
    } else {
        let context = KafkaContext::new(CLIENT_NAME);
        router(
            KafkaSink::new(config.kafka.clone(), context),
            config.max_body_size,
            metrics,
        )
    };

    info!("listening on {}", config.address);
    match_common::metrics::serve(app, &config.address.to_string(), shutdown).await?;

    Ok(())
}
