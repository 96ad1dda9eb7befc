use std::time::Duration;

use envconfig::Envconfig;

use crate::retry::RetryPolicy;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "football-events")]
    pub kafka_topic: String,

    #[envconfig(default = "")]
    pub kafka_client_id: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // Authenticate with short-lived OAUTHBEARER tokens (MSK IAM)
    #[envconfig(default = "false")]
    pub kafka_sasl_oauthbearer: bool,

    #[envconfig(default = "3")]
    pub kafka_topic_partitions: i32,

    #[envconfig(default = "2")]
    pub kafka_topic_replication_factor: i32,

    #[envconfig(default = "5")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "30000")]
    pub kafka_message_timeout_ms: u32, // Time before librdkafka stops retrying a message

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "10000")]
    pub kafka_publish_timeout_ms: u64, // How long a submission waits for the broker ack

    #[envconfig(default = "10000")]
    pub kafka_admin_timeout_ms: u64,
}

impl KafkaConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_publish_timeout_ms)
    }

    pub fn admin_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_admin_timeout_ms)
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct AwsConfig {
    #[envconfig(from = "AWS_REGION", default = "eu-central-1")]
    pub aws_region: String,

    // Points the store at a local DynamoDB (localstack, dynamodb-local)
    pub dynamodb_endpoint: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StoreBackend {
    DynamoDb,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "dynamodb" => Ok(StoreBackend::DynamoDb),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Unknown store backend: {s}")),
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct StoreConfig {
    #[envconfig(default = "dynamodb")]
    pub store_backend: StoreBackend,

    #[envconfig(default = "football-events")]
    pub dynamodb_table: String,

    #[envconfig(default = "5")]
    pub store_max_attempts: u32,

    #[envconfig(default = "50")]
    pub store_retry_initial_ms: u64,

    #[envconfig(default = "2000")]
    pub store_retry_maximum_ms: u64,
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            2,
            Duration::from_millis(self.store_retry_initial_ms),
            Some(Duration::from_millis(self.store_retry_maximum_ms)),
            self.store_max_attempts,
        )
    }
}
