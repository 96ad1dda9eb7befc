use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::Json;
use bytes::Bytes;
use match_common::event::MatchEvent;
use match_common::schema::{EventSchema, ValidationError};
use metrics::counter;
use serde_json::Value;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::api::{IngestError, SubmitResponse, PUBLISHED_MESSAGE};
use crate::router;
use crate::sinks::EventSink;

/// Validate one raw submission, give it an `event_id` if it has none, and
/// publish it keyed by `match_id`.
///
/// Nothing is retried here: a timeout leaves the delivery indeterminate and
/// the client decides whether to submit again.
pub async fn submit(
    sink: &dyn EventSink,
    schema: &EventSchema,
    body: &[u8],
) -> Result<SubmitResponse, IngestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(IngestError::MissingBody);
    }

    let mut candidate: Value = serde_json::from_slice(body)?;
    schema.validate(&candidate)?;

    let fields = candidate
        .as_object_mut()
        .ok_or(ValidationError::NotAnObject)?;

    match fields.get("match_id").and_then(Value::as_str) {
        Some(match_id) if !match_id.is_empty() => {}
        _ => return Err(IngestError::MissingMatchId),
    }

    let event_id = match fields.get("event_id").and_then(Value::as_str) {
        Some(event_id) if !event_id.is_empty() => event_id.to_owned(),
        _ => {
            let generated = Uuid::new_v4().to_string();
            fields.insert("event_id".to_owned(), Value::String(generated.clone()));
            generated
        }
    };

    let event: MatchEvent = serde_json::from_value(candidate)?;
    // Anything published here must be storable, or it blocks its partition.
    event.ensure_storable()?;
    tracing::Span::current().record("match_id", event.match_id.as_str());
    tracing::Span::current().record("event_id", event_id.as_str());

    let ack = sink.publish(&event).await?;
    tracing::debug!(
        topic = %ack.topic,
        partition = ack.partition,
        offset = ack.offset,
        "submission acknowledged"
    );

    Ok(SubmitResponse {
        message: PUBLISHED_MESSAGE.to_owned(),
        event_id,
    })
}

#[instrument(skip_all, fields(match_id, event_id))]
pub async fn event(
    state: State<router::State>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<SubmitResponse>, IngestError> {
    let result = match body {
        Ok(body) => submit(state.sink.as_ref(), &state.schema, &body).await,
        Err(rejection) => Err(rejection.into()),
    };

    match result {
        Ok(response) => {
            counter!("match_events_submitted_total", "outcome" => "published").increment(1);
            Ok(Json(response))
        }
        Err(err) => {
            counter!("match_events_submitted_total", "outcome" => err.kind()).increment(1);
            if err.is_client_error() {
                warn!("rejected submission: {}", err);
            } else {
                error!("failed to publish submission: {}", err);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use match_common::event::EnrichError;

    use super::*;
    use crate::sinks::PublishAck;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<MatchEvent>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, event: &MatchEvent) -> Result<PublishAck, IngestError> {
            let mut events = self.events.lock().unwrap();
            events.push(event.clone());
            Ok(PublishAck {
                topic: "football-events".to_owned(),
                partition: 0,
                offset: events.len() as i64 - 1,
            })
        }
    }

    async fn submit_json(sink: &RecordingSink, body: Value) -> Result<SubmitResponse, IngestError> {
        submit(sink, &EventSchema::default(), body.to_string().as_bytes()).await
    }

    #[tokio::test]
    async fn generates_an_event_id() {
        let sink = RecordingSink::default();

        let response = submit_json(
            &sink,
            json!({
                "match_id": "m1",
                "event_type": "goal",
                "player_id": "p1",
                "team_id": "t1",
                "timestamp": "2023-08-15T14:30:00Z"
            }),
        )
        .await
        .expect("submission failed");

        assert_eq!(response.message, PUBLISHED_MESSAGE);
        assert!(Uuid::parse_str(&response.event_id).is_ok());

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id.as_deref(), Some(response.event_id.as_str()));
        assert_eq!(events[0].partition_key(), "m1");
    }

    #[tokio::test]
    async fn keeps_a_client_event_id() {
        let sink = RecordingSink::default();

        let response = submit_json(
            &sink,
            json!({
                "match_id": "m1",
                "event_type": "card",
                "event_id": "evt-1",
                "timestamp": "2023-08-15T14:35:00Z"
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.event_id, "evt-1");
    }

    #[tokio::test]
    async fn null_event_id_is_replaced() {
        let sink = RecordingSink::default();

        let response = submit_json(
            &sink,
            json!({
                "match_id": "m1",
                "event_type": "card",
                "event_id": null,
                "timestamp": "2023-08-15T14:35:00Z"
            }),
        )
        .await
        .unwrap();

        assert!(Uuid::parse_str(&response.event_id).is_ok());
    }

    #[tokio::test]
    async fn client_errors_publish_nothing() {
        let sink = RecordingSink::default();
        let schema = EventSchema::default();

        assert!(matches!(
            submit(&sink, &schema, b"").await,
            Err(IngestError::MissingBody)
        ));
        assert!(matches!(
            submit(&sink, &schema, b"{not json").await,
            Err(IngestError::MalformedBody(_))
        ));
        assert!(matches!(
            submit_json(&sink, json!({"match_id": "m1"})).await,
            Err(IngestError::InvalidFormat(_))
        ));
        assert!(matches!(
            submit_json(&sink, json!({"match_id": "m1", "event_type": 7})).await,
            Err(IngestError::InvalidFormat(_))
        ));
        assert!(matches!(
            submit_json(&sink, json!({"event_type": "goal"})).await,
            Err(IngestError::MissingMatchId)
        ));
        assert!(matches!(
            submit_json(&sink, json!({"match_id": "", "event_type": "goal"})).await,
            Err(IngestError::MissingMatchId)
        ));
        assert!(matches!(
            submit_json(
                &sink,
                json!({"match_id": "m1", "event_type": "", "timestamp": "2023-08-15T14:30:00Z"})
            )
            .await,
            Err(IngestError::Unstorable(EnrichError::MissingEventType))
        ));
        assert!(matches!(
            submit_json(&sink, json!({"match_id": "m1", "event_type": "goal"})).await,
            Err(IngestError::Unstorable(EnrichError::MissingTimestamp))
        ));
        assert!(matches!(
            submit_json(
                &sink,
                json!({"match_id": "m1", "event_type": "goal", "timestamp": ""})
            )
            .await,
            Err(IngestError::Unstorable(EnrichError::MissingTimestamp))
        ));

        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_fields_are_published() {
        let sink = RecordingSink::default();

        submit_json(
            &sink,
            json!({
                "match_id": "m1",
                "event_type": "goal",
                "timestamp": "2023-08-15T14:30:00Z",
                "venue": "home",
                "attendance": 52000
            }),
        )
        .await
        .unwrap();

        let events = sink.events.lock().unwrap();
        let published = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(published["venue"], json!("home"));
        assert_eq!(published["attendance"], json!(52000));
    }

    #[tokio::test]
    async fn accepted_submissions_can_be_stored() {
        let sink = RecordingSink::default();
        let accepted = [
            json!({"match_id": "m1", "event_type": "goal", "timestamp": "2023-08-15T14:30:00Z"}),
            json!({"match_id": "m1", "event_type": "pass", "event_timestamp": "2023-08-15T14:31:00.5Z"}),
            json!({"match_id": "m1", "event_type": "card", "timestamp": "half-time", "venue": "away"}),
        ];

        for body in accepted {
            submit_json(&sink, body).await.unwrap();
        }

        // Decode the way the consumer does: from the serialized log value.
        for event in sink.events.lock().unwrap().iter() {
            let value = serde_json::to_vec(event).unwrap();
            let decoded: MatchEvent = serde_json::from_slice(&value).unwrap();
            let stored = decoded.enrich().expect("accepted event must be storable");
            assert_eq!(stored.match_id, "m1");
        }
    }
}
