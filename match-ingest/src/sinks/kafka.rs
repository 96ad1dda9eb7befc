use async_trait::async_trait;
use match_common::config::KafkaConfig;
use match_common::event::MatchEvent;
use match_common::kafka::admin::{ensure_topic, KafkaTopicAdmin, TopicSpec};
use match_common::kafka::producer::{create_kafka_producer, publish_keyed};
use rdkafka::producer::FutureProducer;
use rdkafka::ClientContext;
use tokio::sync::OnceCell;
use tracing::{info, instrument};

use crate::api::IngestError;
use crate::sinks::{EventSink, PublishAck};

/// Publishes to the events topic. The connection is set up on first use:
/// the topic is provisioned once, then the producer is kept for the process
/// lifetime. A failed setup is retried from scratch by the next request.
pub struct KafkaSink<C: ClientContext + Clone + 'static> {
    config: KafkaConfig,
    context: C,
    producer: OnceCell<FutureProducer<C>>,
}

impl<C: ClientContext + Clone + 'static> KafkaSink<C> {
    pub fn new(config: KafkaConfig, context: C) -> Self {
        Self {
            config,
            context,
            producer: OnceCell::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.producer.initialized()
    }

    async fn producer(&self) -> Result<&FutureProducer<C>, IngestError> {
        self.producer
            .get_or_try_init(|| async {
                info!("connecting to Kafka brokers at {}...", self.config.kafka_hosts);

                let admin = KafkaTopicAdmin::new(&self.config, self.context.clone())
                    .map_err(|e| IngestError::DependencyUnavailable(e.to_string()))?;
                let outcome = ensure_topic(&admin, &TopicSpec::from_config(&self.config)).await?;
                info!(
                    topic = %self.config.kafka_topic,
                    outcome = outcome.as_str(),
                    "topic provisioned"
                );

                create_kafka_producer(&self.config, self.context.clone())
                    .map_err(|e| IngestError::DependencyUnavailable(e.to_string()))
            })
            .await
    }
}

#[async_trait]
impl<C: ClientContext + Clone + 'static> EventSink for KafkaSink<C> {
    #[instrument(skip_all, fields(match_id = %event.match_id))]
    async fn publish(&self, event: &MatchEvent) -> Result<PublishAck, IngestError> {
        let producer = self.producer().await?;

        let delivery = publish_keyed(
            producer,
            &self.config.kafka_topic,
            event.partition_key(),
            event,
            self.config.publish_timeout(),
        )
        .await?;

        info!(
            "event published to {} partition {} offset {}",
            self.config.kafka_topic, delivery.partition, delivery.offset
        );

        Ok(PublishAck {
            topic: self.config.kafka_topic.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
        })
    }
}
