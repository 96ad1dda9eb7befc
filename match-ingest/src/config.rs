use std::net::SocketAddr;

use envconfig::Envconfig;
use match_common::config::{AwsConfig, KafkaConfig};
use match_common::logging::LogFormat;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "text")]
    pub log_format: LogFormat,

    #[envconfig(default = "1048576")]
    pub max_body_size: usize,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub aws: AwsConfig,
}
