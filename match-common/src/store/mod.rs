//! Persistence of enriched events.
//!
//! Items are keyed by (`match_id`, `event_timestamp`), so writing an event
//! again overwrites it. A secondary index on (`match_id`,
//! `event_type_timestamp`) serves per-type lookups through a
//! `"{event_type}#"` prefix query.
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{AwsConfig, StoreBackend, StoreConfig};
use crate::event::StoredEvent;

pub mod attributes;
pub mod dynamodb;
pub mod memory;

pub use dynamodb::DynamoEventStore;
pub use memory::MemoryEventStore;

/// Name of the secondary index sorted by `event_type_timestamp`.
pub const EVENT_TYPE_INDEX: &str = "EventTypeTimestampIndex";

/// Largest number of items accepted by one bulk write call.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store operation failed: {0}")]
    OperationFailed(String),
    #[error("stored item could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Write every event, returning how many were stored. Transient failures
    /// are retried internally; whatever still fails is left out of the count.
    async fn put_batch(&self, events: &[StoredEvent]) -> Result<usize, StoreError>;

    /// All events of a match, sorted by `event_timestamp`.
    async fn events_for_match(&self, match_id: &str) -> Result<Vec<StoredEvent>, StoreError>;

    /// Events of one type for a match, sorted by `event_timestamp`.
    async fn events_for_match_by_type(
        &self,
        match_id: &str,
        event_type: &str,
    ) -> Result<Vec<StoredEvent>, StoreError>;
}

pub async fn from_config(store: &StoreConfig, aws: &AwsConfig) -> Arc<dyn EventStore> {
    match store.store_backend {
        StoreBackend::DynamoDb => Arc::new(DynamoEventStore::from_config(store, aws).await),
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store, events will not survive a restart");
            Arc::new(MemoryEventStore::default())
        }
    }
}
