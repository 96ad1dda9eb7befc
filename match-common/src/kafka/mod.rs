pub mod admin;
pub mod auth;
pub mod producer;

use std::sync::Arc;
use std::time::SystemTime;

use metrics::{counter, gauge};
use rdkafka::client::OAuthToken;
use rdkafka::consumer::ConsumerContext;
use rdkafka::ClientConfig;
use tracing::{debug, warn};

use crate::config::KafkaConfig;
use crate::kafka::auth::TokenProvider;

/// Client context for plaintext and TLS connections. Exports librdkafka
/// statistics as gauges labelled with the owning service.
#[derive(Clone)]
pub struct KafkaContext {
    client: &'static str,
}

impl KafkaContext {
    pub fn new(client: &'static str) -> Self {
        Self { client }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        record_stats(self.client, stats);
    }
}

/// Client context for OAUTHBEARER connections: librdkafka asks the
/// [`TokenProvider`] for a token on connection setup and again before the
/// current one expires. A provider failure fails the connection attempt.
///
/// Only usable when `sasl.mechanism` is OAUTHBEARER, librdkafka refuses to
/// create the client otherwise.
#[derive(Clone)]
pub struct OAuthContext {
    client: &'static str,
    tokens: Arc<dyn TokenProvider>,
}

impl OAuthContext {
    pub fn new(client: &'static str, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { client, tokens }
    }
}

impl rdkafka::ClientContext for OAuthContext {
    const ENABLE_REFRESH_OAUTH_TOKEN: bool = true;

    fn stats(&self, stats: rdkafka::Statistics) {
        record_stats(self.client, stats);
    }

    fn generate_oauth_token(
        &self,
        _oauthbearer_config: Option<&str>,
    ) -> Result<OAuthToken, Box<dyn std::error::Error>> {
        let token = self.tokens.fetch_token().map_err(|e| {
            warn!(client = self.client, "failed to fetch broker token: {}", e);
            counter!("match_kafka_token_failures_total", "client" => self.client).increment(1);
            e
        })?;
        debug!(client = self.client, principal = %token.principal, "refreshed broker token");

        Ok(OAuthToken {
            lifetime_ms: token.expires_at_ms(SystemTime::now()),
            principal_name: token.principal,
            token: token.value,
        })
    }
}

fn record_stats(client: &'static str, stats: rdkafka::Statistics) {
    gauge!("match_kafka_callback_queue_depth", "client" => client).set(stats.replyq as f64);
    gauge!("match_kafka_producer_queue_depth", "client" => client).set(stats.msg_cnt as f64);
    gauge!("match_kafka_producer_queue_depth_limit", "client" => client)
        .set(stats.msg_max as f64);

    for (_, stats) in stats.brokers {
        let id_string = format!("{}", stats.nodeid);
        if let Some(rtt) = stats.rtt {
            gauge!(
                "match_kafka_rtt_latency_us",
                "quantile" => "p50",
                "broker" => id_string.clone()
            )
            .set(rtt.p50 as f64);
            gauge!(
                "match_kafka_rtt_latency_us",
                "quantile" => "p99",
                "broker" => id_string.clone()
            )
            .set(rtt.p99 as f64);
        }
        counter!(
            "match_kafka_broker_request_timeouts",
            "broker" => id_string
        )
        .absolute(stats.req_timeouts);
    }
}

impl ConsumerContext for KafkaContext {}
impl ConsumerContext for OAuthContext {}

/// Connection settings common to every client talking to the log.
pub fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000");

    if !config.kafka_client_id.is_empty() {
        client_config.set("client.id", &config.kafka_client_id);
    }

    match (config.kafka_tls, config.kafka_sasl_oauthbearer) {
        (true, true) => {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanism", "OAUTHBEARER");
        }
        (false, true) => {
            client_config
                .set("security.protocol", "SASL_PLAINTEXT")
                .set("sasl.mechanism", "OAUTHBEARER");
        }
        (true, false) => {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        (false, false) => {}
    }

    client_config
}
