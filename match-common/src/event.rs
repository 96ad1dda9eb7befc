//! # Event
//!
//! The match event as submitted by clients and carried on the log, and the
//! enriched form that gets persisted. Enrichment derives the season bucket,
//! the storage sort key and the composite `{event_type}#{event_timestamp}`
//! index key.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// Season reported when the event timestamp cannot be parsed.
pub const UNKNOWN_SEASON: &str = "unknown";

/// Separator between the event type and the timestamp in the composite index key.
pub const COMPOSITE_KEY_SEPARATOR: char = '#';

/// Fields computed during enrichment. Client supplied values for these are dropped.
pub const DERIVED_FIELDS: [&str; 2] = ["season", "event_type_timestamp"];

/// A match event as published on the log.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct MatchEvent {
    pub match_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Explicit override of the storage sort key, defaults to `timestamp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    /// Top-level fields outside the fixed contract, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An enriched event, ready to be written to the store.
///
/// (`match_id`, `event_timestamp`) is the storage key: writing the same key
/// twice overwrites the first item.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct StoredEvent {
    pub match_id: String,
    pub event_timestamp: String,
    pub event_type_timestamp: String,
    pub season: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnrichError {
    #[error("event has an empty match_id")]
    MissingMatchId,
    #[error("event has an empty event_type")]
    MissingEventType,
    #[error("event carries neither event_timestamp nor timestamp")]
    MissingTimestamp,
}

/// Derive the season an event belongs to. Seasons run from August to July,
/// so `2023-07-31` is in `2022/2023` and `2023-08-01` in `2023/2024`.
///
/// Unparsable timestamps yield [`UNKNOWN_SEASON`] rather than an error.
pub fn derive_season(timestamp: &str) -> String {
    match parse_year_month(timestamp) {
        Some((year, month)) if month < 8 => format!("{}/{}", year - 1, year),
        Some((year, _)) => format!("{}/{}", year, year + 1),
        None => {
            tracing::warn!(timestamp, "could not derive season from timestamp");
            UNKNOWN_SEASON.to_owned()
        }
    }
}

/// Year and month as written in the timestamp, in its own offset.
fn parse_year_month(timestamp: &str) -> Option<(i32, u8)> {
    let date = if let Ok(datetime) = OffsetDateTime::parse(timestamp, &Rfc3339) {
        datetime.date()
    } else if let Ok(datetime) = OffsetDateTime::parse(timestamp, &Iso8601::DEFAULT) {
        datetime.date()
    } else if let Ok(datetime) = PrimitiveDateTime::parse(timestamp, &Iso8601::DEFAULT) {
        datetime.date()
    } else {
        Date::parse(timestamp, format_description!("[year]-[month]-[day]")).ok()?
    };

    Some((date.year(), u8::from(date.month())))
}

/// Build the composite index key for an event type and its sort key.
pub fn composite_key(event_type: &str, event_timestamp: &str) -> String {
    format!("{event_type}{COMPOSITE_KEY_SEPARATOR}{event_timestamp}")
}

/// Prefix matching every composite key of an event type.
pub fn composite_key_prefix(event_type: &str) -> String {
    format!("{event_type}{COMPOSITE_KEY_SEPARATOR}")
}

impl MatchEvent {
    /// Key used to route the event to a log partition.
    pub fn partition_key(&self) -> &str {
        &self.match_id
    }

    /// Storage sort key: the explicit `event_timestamp`, else `timestamp`.
    fn sort_key(&self) -> Option<&str> {
        [&self.event_timestamp, &self.timestamp]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|ts| !ts.is_empty())
    }

    /// Check that [`MatchEvent::enrich`] will accept this event.
    pub fn ensure_storable(&self) -> Result<(), EnrichError> {
        if self.match_id.is_empty() {
            return Err(EnrichError::MissingMatchId);
        }
        if self.event_type.is_empty() {
            return Err(EnrichError::MissingEventType);
        }
        if self.sort_key().is_none() {
            return Err(EnrichError::MissingTimestamp);
        }
        Ok(())
    }

    /// Derive the storage fields. Client supplied derived fields are never
    /// trusted: season and the composite key are always recomputed.
    pub fn enrich(mut self) -> Result<StoredEvent, EnrichError> {
        self.ensure_storable()?;

        let season = derive_season(self.timestamp.as_deref().unwrap_or_default());
        let event_timestamp = self
            .sort_key()
            .map(str::to_owned)
            .ok_or(EnrichError::MissingTimestamp)?;

        for field in DERIVED_FIELDS {
            self.extra.remove(field);
        }

        Ok(StoredEvent {
            event_type_timestamp: composite_key(&self.event_type, &event_timestamp),
            match_id: self.match_id,
            event_timestamp,
            season,
            event_type: self.event_type,
            event_id: self.event_id,
            player_id: self.player_id,
            team_id: self.team_id,
            timestamp: self.timestamp,
            details: self.details,
            extra: self.extra,
        })
    }
}
