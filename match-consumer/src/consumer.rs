use std::sync::Arc;
use std::time::Duration;

use match_common::config::KafkaConfig;
use match_common::kafka::client_config;
use match_common::retry::RetryPolicy;
use match_common::store::EventStore;
use metrics::counter;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::batch::{handle_batch, BatchOutcome, LogRecord, RecordBatch, WritePolicy};

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

#[derive(Clone, Copy, Debug)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub write_policy: WritePolicy,
    /// Pause before a failed batch is read again.
    pub redelivery: RetryPolicy,
}

/// Reads the events topic in batches and hands each one to
/// [`handle_batch`]. Offsets are committed only once a batch is
/// acknowledged; a batch that needs redelivery is rewound so that the very
/// same records come back next.
pub struct ConsumerLoop<C: ConsumerContext + 'static> {
    consumer: StreamConsumer<C>,
    topic: String,
    store: Arc<dyn EventStore>,
    settings: BatchSettings,
}

impl<C: ConsumerContext + 'static> ConsumerLoop<C> {
    pub fn new(
        config: &KafkaConfig,
        group_id: &str,
        context: C,
        store: Arc<dyn EventStore>,
        settings: BatchSettings,
    ) -> Result<Self, ConsumerError> {
        let mut client_config = client_config(config);
        client_config
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest");

        let consumer: StreamConsumer<C> = client_config.create_with_context(context)?;
        consumer.subscribe(&[config.kafka_topic.as_str()])?;

        Ok(Self {
            consumer,
            topic: config.kafka_topic.clone(),
            store,
            settings,
        })
    }

    /// Consume until `shutdown` flips or its sender is dropped. Records read
    /// but not yet committed at that point are read again by the next
    /// consumer of the group.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        info!(topic = %self.topic, "starting batch consumption");
        let mut failures: u32 = 0;

        loop {
            let batch = tokio::select! {
                _ = shutdown.changed() => break,
                batch = self.collect_batch() => batch?,
            };
            if batch.is_empty() {
                continue;
            }

            match handle_batch(self.store.as_ref(), &batch, self.settings.write_policy).await {
                BatchOutcome::Acknowledged { written } => {
                    debug!(written, "batch acknowledged");
                    self.commit(&batch);
                    failures = 0;
                }
                BatchOutcome::RequiresRedelivery { reason, lost } => {
                    self.rewind(&batch)?;

                    let backoff = self.settings.redelivery.time_until_next_retry(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        %reason,
                        lost,
                        attempt = failures,
                        "batch will be redelivered in {:?}",
                        backoff
                    );

                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(backoff) => {}
                    }
                }
            }
        }

        info!("batch consumer shut down");
        Ok(())
    }

    /// Collect up to `batch_size` records, waiting at most `batch_timeout`.
    async fn collect_batch(&self) -> Result<RecordBatch, ConsumerError> {
        let mut batch = RecordBatch::new();
        let mut collected = 0;
        let mut kafka_errors = 0;

        let deadline = sleep(self.settings.batch_timeout);
        tokio::pin!(deadline);

        while collected < self.settings.batch_size {
            tokio::select! {
                _ = &mut deadline => break,
                message = self.consumer.recv() => match message {
                    Ok(message) => {
                        batch.entry(message.partition()).or_default().push(LogRecord {
                            partition: message.partition(),
                            offset: message.offset(),
                            value: message.payload().map(<[u8]>::to_vec),
                        });
                        collected += 1;
                        kafka_errors = 0;
                    }
                    Err(err) => {
                        kafka_errors += 1;
                        handle_kafka_error(err, kafka_errors).await?;
                    }
                }
            }
        }

        Ok(batch)
    }

    fn commit(&self, batch: &RecordBatch) {
        let mut list = TopicPartitionList::new();
        for (partition, records) in batch {
            if let Some(last) = records.last() {
                if let Err(err) =
                    list.add_partition_offset(&self.topic, *partition, Offset::Offset(last.offset + 1))
                {
                    warn!(partition, "could not track offset: {}", err);
                }
            }
        }

        // A failed commit only means the batch gets written again
        if let Err(err) = self.consumer.commit(&list, CommitMode::Sync) {
            warn!("failed to commit offsets: {}", err);
            counter!("match_consumer_commit_failures_total").increment(1);
        }
    }

    /// Seek every partition of the batch back to its first record.
    fn rewind(&self, batch: &RecordBatch) -> Result<(), ConsumerError> {
        for (partition, records) in batch {
            if let Some(first) = records.first() {
                self.consumer.seek(
                    &self.topic,
                    *partition,
                    Offset::Offset(first.offset),
                    Duration::from_secs(5),
                )?;
            }
        }

        Ok(())
    }
}

/// Log and count a consumer error. Returns the error when consumption cannot
/// go on, after sleeping a little for the transient ones.
async fn handle_kafka_error(err: KafkaError, current_count: u64) -> Result<(), ConsumerError> {
    match &err {
        KafkaError::MessageConsumption(RDKafkaErrorCode::PartitionEOF) => {
            counter!("match_consumer_kafka_errors_total", "error" => "partition_eof").increment(1);
            Ok(())
        }
        KafkaError::MessageConsumption(code) => {
            warn!("kafka consumer error: {code:?}");
            counter!("match_consumer_kafka_errors_total", "error" => "consumer").increment(1);
            sleep(Duration::from_millis(100 * current_count.min(10))).await;
            Ok(())
        }
        KafkaError::Global(RDKafkaErrorCode::Authentication) => {
            error!("authentication failed: {}", err);
            counter!("match_consumer_kafka_errors_total", "error" => "authentication").increment(1);
            Err(err.into())
        }
        KafkaError::Global(code) => {
            warn!("global kafka error: {code:?}");
            counter!("match_consumer_kafka_errors_total", "error" => "global").increment(1);
            sleep(Duration::from_millis(500 * current_count.min(6))).await;
            Ok(())
        }
        KafkaError::MessageConsumptionFatal(_) | KafkaError::Canceled => {
            error!("fatal kafka consumer error: {}", err);
            counter!("match_consumer_kafka_errors_total", "error" => "fatal").increment(1);
            Err(err.into())
        }
        _ => {
            error!("unexpected kafka error: {}", err);
            counter!("match_consumer_kafka_errors_total", "error" => "unexpected").increment(1);
            sleep(Duration::from_millis(100 * current_count.min(10))).await;
            Ok(())
        }
    }
}
