use std::net::SocketAddr;
use std::time::Duration;

use envconfig::Envconfig;
use match_common::config::{AwsConfig, KafkaConfig, StoreConfig};
use match_common::logging::LogFormat;
use match_common::retry::RetryPolicy;

use crate::batch::WritePolicy;
use crate::consumer::BatchSettings;

#[derive(Envconfig, Clone)]
pub struct Config {
    // Probes and metrics only
    #[envconfig(default = "127.0.0.1:3301")]
    pub address: SocketAddr,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "text")]
    pub log_format: LogFormat,

    #[envconfig(default = "match-consumer")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "100")]
    pub batch_size: usize,

    #[envconfig(default = "1000")]
    pub batch_timeout_ms: u64,

    #[envconfig(default = "all_or_nothing")]
    pub write_policy: WritePolicy,

    #[envconfig(default = "500")]
    pub redelivery_backoff_initial_ms: u64,

    #[envconfig(default = "30000")]
    pub redelivery_backoff_maximum_ms: u64,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub aws: AwsConfig,

    #[envconfig(nested = true)]
    pub store: StoreConfig,
}

impl Config {
    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            batch_size: self.batch_size.max(1),
            batch_timeout: Duration::from_millis(self.batch_timeout_ms),
            write_policy: self.write_policy,
            // Redeliveries never give up, only the pause between them grows
            redelivery: RetryPolicy::new(
                2,
                Duration::from_millis(self.redelivery_backoff_initial_ms),
                Some(Duration::from_millis(self.redelivery_backoff_maximum_ms)),
                u32::MAX,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_to_all_or_nothing() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();
        let settings = config.batch_settings();

        assert_eq!(settings.write_policy, WritePolicy::AllOrNothing);
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.batch_timeout, Duration::from_secs(1));
        assert_eq!(
            settings.redelivery.time_until_next_retry(0),
            Duration::from_millis(500)
        );
        assert_eq!(
            settings.redelivery.time_until_next_retry(20),
            Duration::from_secs(30)
        );
        assert_eq!(config.kafka_consumer_group, "match-consumer");
    }

    #[test]
    fn write_policy_from_env() {
        let config = Config::init_from_hashmap(&HashMap::from([(
            "WRITE_POLICY".to_owned(),
            "write_survivors".to_owned(),
        )]))
        .unwrap();

        assert_eq!(config.write_policy, WritePolicy::WriteSurvivors);
    }
}
