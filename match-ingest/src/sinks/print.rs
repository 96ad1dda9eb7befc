use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use match_common::event::MatchEvent;
use metrics::counter;
use tracing::info;

use crate::api::IngestError;
use crate::sinks::{EventSink, PublishAck};

/// Logs events instead of publishing them. Only meant for local runs.
#[derive(Default)]
pub struct PrintSink {
    offset: AtomicI64,
}

#[async_trait]
impl EventSink for PrintSink {
    async fn publish(&self, event: &MatchEvent) -> Result<PublishAck, IngestError> {
        info!("single event: {:?}", event);
        counter!("match_events_printed_total").increment(1);

        Ok(PublishAck {
            topic: "stdout".to_owned(),
            partition: 0,
            offset: self.offset.fetch_add(1, Ordering::Relaxed),
        })
    }
}
