use std::net::SocketAddr;

use envconfig::Envconfig;
use match_common::config::{AwsConfig, StoreConfig};
use match_common::logging::LogFormat;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3002")]
    pub address: SocketAddr,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "text")]
    pub log_format: LogFormat,

    #[envconfig(nested = true)]
    pub aws: AwsConfig,

    #[envconfig(nested = true)]
    pub store: StoreConfig,
}
