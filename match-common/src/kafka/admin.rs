//! # Topic provisioning
//!
//! Makes sure the events topic exists before anything is published to it.
//! The check-then-create sequence is not atomic: when several producers race
//! to create the same topic, "already exists" is a successful outcome for
//! whoever loses.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::util::Timeout;
use rdkafka::ClientContext;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::KafkaConfig;
use crate::kafka::client_config;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

impl TopicSpec {
    pub fn from_config(config: &KafkaConfig) -> Self {
        Self {
            name: config.kafka_topic.clone(),
            partitions: config.kafka_topic_partitions,
            replication_factor: config.kafka_topic_replication_factor,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The pre-check found the topic.
    Existing,
    /// We created it.
    Created,
    /// Someone else created it between our pre-check and our create call.
    CreatedConcurrently,
}

impl ProvisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionOutcome::Existing => "existing",
            ProvisionOutcome::Created => "created",
            ProvisionOutcome::CreatedConcurrently => "created_concurrently",
        }
    }
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("kafka admin error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("topic {topic} could not be created: {code}")]
    Rejected {
        topic: String,
        code: RDKafkaErrorCode,
    },
    #[error("topic admin unavailable: {0}")]
    Unavailable(String),
}

/// The subset of cluster administration the provisioner needs.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Number of partitions of an existing topic, `None` if it does not exist.
    async fn partition_count(&self, topic: &str) -> Result<Option<usize>, ProvisionError>;

    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome, ProvisionError>;
}

/// Ensure the topic exists. Safe to call concurrently from many processes.
#[instrument(skip_all, fields(topic = %spec.name))]
pub async fn ensure_topic<A>(
    admin: &A,
    spec: &TopicSpec,
) -> Result<ProvisionOutcome, ProvisionError>
where
    A: TopicAdmin + ?Sized,
{
    let result = provision(admin, spec).await;

    let outcome = match &result {
        Ok(outcome) => outcome.as_str(),
        Err(_) => "failed",
    };
    counter!("match_topic_provisioned_total", "outcome" => outcome).increment(1);

    result
}

async fn provision<A>(admin: &A, spec: &TopicSpec) -> Result<ProvisionOutcome, ProvisionError>
where
    A: TopicAdmin + ?Sized,
{
    if let Some(partitions) = admin.partition_count(&spec.name).await? {
        if partitions < spec.partitions.max(0) as usize {
            warn!(
                partitions,
                wanted = spec.partitions,
                "topic exists with fewer partitions than configured"
            );
        }
        return Ok(ProvisionOutcome::Existing);
    }

    match admin.create_topic(spec).await? {
        CreateOutcome::Created => {
            info!(
                partitions = spec.partitions,
                replication_factor = spec.replication_factor,
                "created topic"
            );
            Ok(ProvisionOutcome::Created)
        }
        CreateOutcome::AlreadyExists => {
            info!("topic was created concurrently");
            Ok(ProvisionOutcome::CreatedConcurrently)
        }
    }
}

pub struct KafkaTopicAdmin<C: ClientContext + 'static> {
    client: Arc<AdminClient<C>>,
    timeout: Duration,
}

impl<C: ClientContext + 'static> KafkaTopicAdmin<C> {
    pub fn new(config: &KafkaConfig, context: C) -> Result<Self, KafkaError> {
        let client: AdminClient<C> = client_config(config).create_with_context(context)?;

        Ok(Self {
            client: Arc::new(client),
            timeout: config.admin_timeout(),
        })
    }
}

#[async_trait]
impl<C: ClientContext + 'static> TopicAdmin for KafkaTopicAdmin<C> {
    async fn partition_count(&self, topic: &str) -> Result<Option<usize>, ProvisionError> {
        let client = self.client.clone();
        let timeout = self.timeout;
        let topic = topic.to_owned();

        // Metadata requests block, keep them off the async workers. Asking for
        // every topic avoids the broker auto-creating the one we look for.
        tokio::task::spawn_blocking(move || {
            let metadata = client
                .inner()
                .fetch_metadata(None, Timeout::After(timeout))?;

            Ok::<_, ProvisionError>(
                metadata
                    .topics()
                    .iter()
                    .find(|t| t.name() == topic)
                    .map(|t| t.partitions().len()),
            )
        })
        .await
        .map_err(|e| ProvisionError::Unavailable(e.to_string()))?
    }

    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome, ProvisionError> {
        let new_topic = NewTopic::new(
            &spec.name,
            spec.partitions,
            TopicReplication::Fixed(spec.replication_factor),
        );
        let opts = AdminOptions::new().operation_timeout(Some(self.timeout));

        let results = self.client.create_topics(&[new_topic], &opts).await?;

        for result in results {
            match result {
                Ok(_) => {}
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Ok(CreateOutcome::AlreadyExists)
                }
                Err((topic, code)) => return Err(ProvisionError::Rejected { topic, code }),
            }
        }

        Ok(CreateOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use envconfig::Envconfig;
    use rdkafka::mocking::MockCluster;
    use tokio::sync::Barrier;

    use super::*;
    use crate::kafka::KafkaContext;

    /// In-memory cluster. Every pre-check waits at the barrier, so concurrent
    /// callers all see the topic missing before any of them creates it.
    struct RacingAdmin {
        topics: Mutex<HashMap<String, usize>>,
        barrier: Barrier,
        creates: Mutex<usize>,
    }

    impl RacingAdmin {
        fn new(callers: usize) -> Self {
            Self {
                topics: Mutex::new(HashMap::new()),
                barrier: Barrier::new(callers),
                creates: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl TopicAdmin for RacingAdmin {
        async fn partition_count(&self, topic: &str) -> Result<Option<usize>, ProvisionError> {
            let found = self.topics.lock().unwrap().get(topic).copied();
            self.barrier.wait().await;
            Ok(found)
        }

        async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome, ProvisionError> {
            *self.creates.lock().unwrap() += 1;
            let mut topics = self.topics.lock().unwrap();
            if topics.contains_key(&spec.name) {
                return Ok(CreateOutcome::AlreadyExists);
            }
            topics.insert(spec.name.clone(), spec.partitions as usize);
            Ok(CreateOutcome::Created)
        }
    }

    struct BrokenAdmin;

    #[async_trait]
    impl TopicAdmin for BrokenAdmin {
        async fn partition_count(&self, _: &str) -> Result<Option<usize>, ProvisionError> {
            Ok(None)
        }

        async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome, ProvisionError> {
            Err(ProvisionError::Rejected {
                topic: spec.name.clone(),
                code: RDKafkaErrorCode::TopicAuthorizationFailed,
            })
        }
    }

    fn spec() -> TopicSpec {
        TopicSpec {
            name: "football-events".to_owned(),
            partitions: 3,
            replication_factor: 2,
        }
    }

    #[tokio::test]
    async fn concurrent_provisioning_creates_one_topic() {
        let admin = RacingAdmin::new(2);
        let spec = spec();

        let (first, second) = tokio::join!(ensure_topic(&admin, &spec), ensure_topic(&admin, &spec));

        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| o.as_str());
        assert_eq!(
            outcomes,
            vec![ProvisionOutcome::Created, ProvisionOutcome::CreatedConcurrently]
        );
        assert_eq!(*admin.creates.lock().unwrap(), 2);
        assert_eq!(admin.topics.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn existing_topic_is_not_recreated() {
        let admin = RacingAdmin::new(1);
        admin
            .topics
            .lock()
            .unwrap()
            .insert("football-events".to_owned(), 3);

        let outcome = ensure_topic(&admin, &spec()).await.unwrap();

        assert_eq!(outcome, ProvisionOutcome::Existing);
        assert_eq!(*admin.creates.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn unrelated_failures_are_fatal() {
        let err = ensure_topic(&BrokenAdmin, &spec()).await.unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Rejected {
                code: RDKafkaErrorCode::TopicAuthorizationFailed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn kafka_admin_sees_existing_topic() {
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        cluster
            .create_topic("football-events", 3, 1)
            .expect("failed to create topic");

        let config = KafkaConfig::init_from_hashmap(&HashMap::from([(
            "KAFKA_HOSTS".to_owned(),
            cluster.bootstrap_servers(),
        )]))
        .unwrap();
        let admin = KafkaTopicAdmin::new(&config, KafkaContext::new("test")).unwrap();

        assert_eq!(
            admin.partition_count("football-events").await.unwrap(),
            Some(3)
        );
        assert_eq!(admin.partition_count("missing").await.unwrap(), None);
        assert_eq!(
            ensure_topic(&admin, &TopicSpec::from_config(&config))
                .await
                .unwrap(),
            ProvisionOutcome::Existing
        );
    }
}
