use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::batch_write_item::BatchWriteItemError;
use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
use aws_sdk_dynamodb::Client;
use metrics::counter;
use tracing::{error, instrument, warn};

use crate::config::{AwsConfig, StoreConfig};
use crate::event::{composite_key_prefix, StoredEvent};
use crate::retry::RetryPolicy;
use crate::store::attributes::{from_item, to_item, Item};
use crate::store::{EventStore, StoreError, EVENT_TYPE_INDEX, MAX_BATCH_WRITE_ITEMS};

type ItemKey = (String, String);

pub struct DynamoEventStore {
    client: Client,
    table: String,
    retry: RetryPolicy,
}

impl DynamoEventStore {
    pub fn new(client: Client, table: &str, retry: RetryPolicy) -> Self {
        Self {
            client,
            table: table.to_owned(),
            retry,
        }
    }

    pub async fn from_config(store: &StoreConfig, aws: &AwsConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(aws.aws_region.clone()));
        if let Some(endpoint) = &aws.dynamodb_endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        Self::new(
            Client::new(&sdk_config),
            &store.dynamodb_table,
            store.retry_policy(),
        )
    }

    /// Write one chunk, retrying unprocessed items. Returns the requests that
    /// could not be written.
    async fn write_chunk(&self, mut pending: Vec<WriteRequest>) -> Vec<WriteRequest> {
        let mut attempt = 0;

        loop {
            let result = self
                .client
                .batch_write_item()
                .request_items(&self.table, pending.clone())
                .send()
                .await;

            match result {
                Ok(output) => {
                    pending = output
                        .unprocessed_items
                        .and_then(|mut unprocessed| unprocessed.remove(&self.table))
                        .unwrap_or_default();
                    if pending.is_empty() {
                        return pending;
                    }
                }
                Err(err) if is_retryable(&err) => {
                    warn!("transient bulk write failure: {}", DisplayErrorContext(&err));
                }
                Err(err) => {
                    error!("bulk write failed: {}", DisplayErrorContext(&err));
                    return pending;
                }
            }

            if !self.retry.should_retry(attempt) {
                error!(
                    unwritten = pending.len(),
                    attempts = self.retry.max_attempts(),
                    "giving up on bulk write chunk"
                );
                return pending;
            }
            counter!("match_store_chunk_retries_total").increment(1);
            tokio::time::sleep(self.retry.time_until_next_retry(attempt)).await;
            attempt += 1;
        }
    }

    async fn query(
        &self,
        index: Option<&str>,
        condition: &str,
        values: HashMap<String, AttributeValue>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let mut events = Vec::new();
        let mut start_key = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(&self.table)
                .set_index_name(index.map(str::to_owned))
                .key_condition_expression(condition)
                .set_expression_attribute_values(Some(values.clone()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| StoreError::OperationFailed(DisplayErrorContext(&e).to_string()))?;

            for item in output.items.unwrap_or_default() {
                events.push(from_item(&item)?);
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => return Ok(events),
            }
        }
    }
}

fn is_retryable<R>(err: &SdkError<BatchWriteItemError, R>) -> bool {
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
        SdkError::ServiceError(context) => matches!(
            context.err(),
            BatchWriteItemError::ProvisionedThroughputExceededException(_)
                | BatchWriteItemError::RequestLimitExceeded(_)
                | BatchWriteItemError::InternalServerError(_)
        ),
        _ => false,
    }
}

/// A bulk write rejects two requests for the same key, so only the last
/// occurrence of each key is sent. Returns the items to write and how many
/// input events each key stands for.
fn dedupe_by_key(events: &[StoredEvent]) -> (Vec<&StoredEvent>, HashMap<ItemKey, usize>) {
    let mut weights: HashMap<ItemKey, usize> = HashMap::new();
    let mut last_seen: HashMap<ItemKey, usize> = HashMap::new();

    for (index, event) in events.iter().enumerate() {
        let key = (event.match_id.clone(), event.event_timestamp.clone());
        *weights.entry(key.clone()).or_default() += 1;
        last_seen.insert(key, index);
    }

    let unique = events
        .iter()
        .enumerate()
        .filter(|(index, event)| {
            last_seen.get(&(event.match_id.clone(), event.event_timestamp.clone())) == Some(index)
        })
        .map(|(_, event)| event)
        .collect();

    (unique, weights)
}

fn request_key(request: &WriteRequest) -> Option<ItemKey> {
    let item = &request.put_request.as_ref()?.item;
    let match_id = item.get("match_id")?.as_s().ok()?;
    let event_timestamp = item.get("event_timestamp")?.as_s().ok()?;
    Some((match_id.clone(), event_timestamp.clone()))
}

fn write_request(item: Item) -> Result<WriteRequest, StoreError> {
    let put = PutRequest::builder()
        .set_item(Some(item))
        .build()
        .map_err(|e| StoreError::OperationFailed(e.to_string()))?;

    Ok(WriteRequest::builder().put_request(put).build())
}

#[async_trait]
impl EventStore for DynamoEventStore {
    #[instrument(skip_all, fields(events = events.len()))]
    async fn put_batch(&self, events: &[StoredEvent]) -> Result<usize, StoreError> {
        let (unique, weights) = dedupe_by_key(events);
        let mut failed: HashSet<ItemKey> = HashSet::new();

        for chunk in unique.chunks(MAX_BATCH_WRITE_ITEMS) {
            let mut requests = Vec::with_capacity(chunk.len());
            for event in chunk {
                match to_item(event).and_then(write_request) {
                    Ok(request) => requests.push(request),
                    Err(e) => {
                        error!("could not build store item: {}", e);
                        failed.insert((event.match_id.clone(), event.event_timestamp.clone()));
                    }
                }
            }
            if requests.is_empty() {
                continue;
            }

            for request in self.write_chunk(requests).await {
                if let Some(key) = request_key(&request) {
                    failed.insert(key);
                }
            }
        }

        let written: usize = weights
            .iter()
            .filter(|(key, _)| !failed.contains(*key))
            .map(|(_, weight)| weight)
            .sum();

        Ok(written)
    }

    async fn events_for_match(&self, match_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        self.query(
            None,
            "match_id = :match_id",
            HashMap::from([(
                ":match_id".to_owned(),
                AttributeValue::S(match_id.to_owned()),
            )]),
        )
        .await
    }

    async fn events_for_match_by_type(
        &self,
        match_id: &str,
        event_type: &str,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.query(
            Some(EVENT_TYPE_INDEX),
            "match_id = :match_id AND begins_with(event_type_timestamp, :prefix)",
            HashMap::from([
                (
                    ":match_id".to_owned(),
                    AttributeValue::S(match_id.to_owned()),
                ),
                (
                    ":prefix".to_owned(),
                    AttributeValue::S(composite_key_prefix(event_type)),
                ),
            ]),
        )
        .await
    }
}
