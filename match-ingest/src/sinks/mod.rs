use async_trait::async_trait;
use match_common::event::MatchEvent;

use crate::api::IngestError;

pub mod kafka;
pub mod print;

/// Where the log stored an acknowledged event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishAck {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one event keyed by its `match_id`, returning once the log
    /// acknowledged it.
    async fn publish(&self, event: &MatchEvent) -> Result<PublishAck, IngestError>;
}
