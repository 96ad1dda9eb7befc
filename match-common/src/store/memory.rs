use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::event::{composite_key_prefix, StoredEvent};
use crate::store::{EventStore, StoreError};

/// Ordered in-process store with the same key and overwrite semantics as
/// the DynamoDB table. Used for local runs and tests.
#[derive(Default)]
pub struct MemoryEventStore {
    items: Mutex<BTreeMap<(String, String), StoredEvent>>,
    write_limit: Option<usize>,
    failure: Option<StoreError>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store at most `limit` events per bulk write, dropping the rest.
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    /// Fail every operation with `error`.
    pub fn failing(mut self, error: StoreError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, match_id: &str, event_timestamp: &str) -> Option<StoredEvent> {
        self.lock()
            .get(&(match_id.to_owned(), event_timestamp.to_owned()))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), StoredEvent>> {
        // A panic while holding the lock cannot leave the map half-written
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self) -> Result<(), StoreError> {
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn scan_match(&self, match_id: &str) -> Vec<StoredEvent> {
        self.lock()
            .range((match_id.to_owned(), String::new())..)
            .take_while(|((id, _), _)| id == match_id)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn put_batch(&self, events: &[StoredEvent]) -> Result<usize, StoreError> {
        self.check()?;

        let accepted = match self.write_limit {
            Some(limit) => &events[..events.len().min(limit)],
            None => events,
        };

        let mut items = self.lock();
        for event in accepted {
            items.insert(
                (event.match_id.clone(), event.event_timestamp.clone()),
                event.clone(),
            );
        }

        Ok(accepted.len())
    }

    async fn events_for_match(&self, match_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        self.check()?;
        Ok(self.scan_match(match_id))
    }

    async fn events_for_match_by_type(
        &self,
        match_id: &str,
        event_type: &str,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.check()?;

        let prefix = composite_key_prefix(event_type);
        let mut events: Vec<_> = self
            .scan_match(match_id)
            .into_iter()
            .filter(|event| event.event_type_timestamp.starts_with(&prefix))
            .collect();
        events.sort_by(|a, b| a.event_type_timestamp.cmp(&b.event_type_timestamp));

        Ok(events)
    }
}
