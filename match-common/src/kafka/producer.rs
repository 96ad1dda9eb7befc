use std::time::Duration;

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord};
use rdkafka::ClientContext;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::KafkaConfig;
use crate::kafka::client_config;

/// Where the broker stored an acknowledged record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to produce to kafka: {0}")]
    Rejected(KafkaError),
    #[error("no acknowledgement from kafka within {0:?}")]
    Timeout(Duration),
}

pub fn create_kafka_producer<C: ClientContext + 'static>(
    config: &KafkaConfig,
    context: C,
) -> Result<FutureProducer<C>, KafkaError> {
    let mut client_config = client_config(config);
    client_config
        .set("partitioner", "murmur2_random") // Same placement as the Java and Python clients
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set("compression.codec", &config.kafka_compression_codec);

    debug!("rdkafka configuration: {:?}", client_config);
    client_config.create_with_context(context)
}

/// Serialize `payload` as JSON, append it to `topic` under `key` and wait at
/// most `timeout` for the broker acknowledgement. Never retries: once the
/// wait is over, delivery is indeterminate and the caller decides.
pub async fn publish_keyed<T, C>(
    producer: &FutureProducer<C>,
    topic: &str,
    key: &str,
    payload: &T,
    timeout: Duration,
) -> Result<Delivery, PublishError>
where
    T: Serialize,
    C: ClientContext + 'static,
{
    let payload = serde_json::to_string(payload)?;

    let ack = producer
        .send_result(FutureRecord {
            topic,
            payload: Some(&payload),
            partition: None,
            key: Some(key),
            timestamp: None,
            headers: None,
        })
        .map_err(|(e, _)| {
            error!("failed to enqueue event: {}", e);
            PublishError::Rejected(e)
        })?;

    wait_for_ack(ack, timeout).await
}

async fn wait_for_ack(ack: DeliveryFuture, timeout: Duration) -> Result<Delivery, PublishError> {
    match tokio::time::timeout(timeout, ack).await {
        Err(_) => {
            error!("no acknowledgement from kafka before publish timeout");
            Err(PublishError::Timeout(timeout))
        }
        // Cancelled due to timeout while retrying
        Ok(Err(_)) => Err(PublishError::Timeout(timeout)),
        Ok(Ok(Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut), _)))) => {
            error!("kafka message timed out while retrying");
            Err(PublishError::Timeout(timeout))
        }
        Ok(Ok(Err((err, _)))) => {
            error!("failed to produce to kafka: {}", err);
            Err(PublishError::Rejected(err))
        }
        Ok(Ok(Ok((partition, offset)))) => Ok(Delivery { partition, offset }),
    }
}
