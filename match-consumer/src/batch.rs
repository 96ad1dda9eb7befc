//! Turns one batch of log records into one bulk store write.
//!
//! The store is overwrite-idempotent on (`match_id`, `event_timestamp`), so
//! the only failure signal needed is "redeliver everything": re-writing the
//! records that did make it is harmless.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use match_common::event::{EnrichError, MatchEvent, StoredEvent};
use match_common::store::EventStore;
use metrics::counter;
use thiserror::Error;
use tracing::{error, instrument, warn};

pub type PartitionId = i32;

/// A record as read from the log, before decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub partition: PartitionId,
    pub offset: i64,
    pub value: Option<Vec<u8>>,
}

/// Records grouped by partition, each group in arrival order.
pub type RecordBatch = BTreeMap<PartitionId, Vec<LogRecord>>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WritePolicy {
    /// Any undecodable record cancels the write of the whole batch.
    #[default]
    AllOrNothing,
    /// Write every record that could be decoded, then ask for redelivery if
    /// anything was lost.
    WriteSurvivors,
}

impl FromStr for WritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "all_or_nothing" => Ok(WritePolicy::AllOrNothing),
            "write_survivors" => Ok(WritePolicy::WriteSurvivors),
            _ => Err(format!("Unknown write policy: {s}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossReason {
    /// Some records could not be decoded or enriched.
    RecordLoss,
    /// The store accepted fewer events than it was given.
    PartialWriteFailure,
    /// The store call failed outright.
    StoreUnavailable,
}

impl LossReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossReason::RecordLoss => "record_loss",
            LossReason::PartialWriteFailure => "partial_write_failure",
            LossReason::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for LossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    Acknowledged { written: usize },
    /// `lost` counts the received records that were not persisted.
    RequiresRedelivery { reason: LossReason, lost: usize },
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("record has no value")]
    Empty,
    #[error("record is not a valid event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event cannot be stored: {0}")]
    Enrich(#[from] EnrichError),
}

impl DecodeError {
    fn reason(&self) -> &'static str {
        match self {
            DecodeError::Empty => "empty",
            DecodeError::Json(_) => "decode",
            DecodeError::Enrich(_) => "enrich",
        }
    }
}

pub fn decode(record: &LogRecord) -> Result<StoredEvent, DecodeError> {
    let value = record.value.as_deref().ok_or(DecodeError::Empty)?;
    let event: MatchEvent = serde_json::from_slice(value)?;

    Ok(event.enrich()?)
}

/// Decode, enrich and write one batch. The outcome compares what was written
/// with everything that was received, dropped records included.
#[instrument(skip_all, fields(partitions = batch.len(), records))]
pub async fn handle_batch(
    store: &dyn EventStore,
    batch: &RecordBatch,
    policy: WritePolicy,
) -> BatchOutcome {
    let received: usize = batch.values().map(Vec::len).sum();
    tracing::Span::current().record("records", received);
    counter!("match_consumer_records_received_total").increment(received as u64);

    let mut events = Vec::with_capacity(received);
    let mut dropped = 0;
    for records in batch.values() {
        for record in records {
            match decode(record) {
                Ok(event) => events.push(event),
                Err(err) => {
                    warn!(
                        partition = record.partition,
                        offset = record.offset,
                        "dropping record: {}",
                        err
                    );
                    counter!("match_consumer_records_dropped_total", "reason" => err.reason())
                        .increment(1);
                    dropped += 1;
                }
            }
        }
    }

    let outcome = if dropped > 0 && policy == WritePolicy::AllOrNothing {
        BatchOutcome::RequiresRedelivery {
            reason: LossReason::RecordLoss,
            lost: received,
        }
    } else {
        write(store, &events, received, dropped).await
    };

    let label = match outcome {
        BatchOutcome::Acknowledged { .. } => "acknowledged",
        BatchOutcome::RequiresRedelivery { .. } => "redelivery",
    };
    counter!("match_consumer_batches_total", "outcome" => label).increment(1);

    outcome
}

async fn write(
    store: &dyn EventStore,
    events: &[StoredEvent],
    received: usize,
    dropped: usize,
) -> BatchOutcome {
    let written = if events.is_empty() {
        0
    } else {
        match store.put_batch(events).await {
            Ok(written) => written,
            Err(err) => {
                error!("failed to write batch: {}", err);
                return BatchOutcome::RequiresRedelivery {
                    reason: LossReason::StoreUnavailable,
                    lost: received,
                };
            }
        }
    };
    counter!("match_consumer_records_written_total").increment(written as u64);

    if written >= received {
        return BatchOutcome::Acknowledged { written };
    }

    let reason = if dropped > 0 {
        LossReason::RecordLoss
    } else {
        LossReason::PartialWriteFailure
    };

    BatchOutcome::RequiresRedelivery {
        reason,
        lost: received - written,
    }
}
