use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use match_common::metrics::{health_routes, setup_metrics_routes, track_metrics};
use match_common::store::EventStore;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

use crate::api::{MatchEvents, MatchGoals, MatchPasses, QueryError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
}

pub fn router(store: Arc<dyn EventStore>, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/matches/:match_id", get(match_events))
        .route("/matches/:match_id/goals", get(match_goals))
        .route("/matches/:match_id/passes", get(match_passes))
        .with_state(AppState { store })
        .merge(health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics));

    match metrics {
        Some(handle) => setup_metrics_routes(router, handle),
        None => router,
    }
}

#[instrument(skip_all, fields(match_id = %match_id))]
async fn match_events(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> Result<Json<MatchEvents>, QueryError> {
    counter!("match_query_requests_total", "route" => "events").increment(1);

    let events = state
        .store
        .events_for_match(&match_id)
        .await
        .inspect_err(|e| error!("failed to get match events: {}", e))?;
    info!("found {} events for match {}", events.len(), match_id);

    Ok(Json(MatchEvents {
        event_count: events.len(),
        match_id,
        events,
    }))
}

#[instrument(skip_all, fields(match_id = %match_id))]
async fn match_goals(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> Result<Json<MatchGoals>, QueryError> {
    counter!("match_query_requests_total", "route" => "goals").increment(1);

    let goals = state
        .store
        .events_for_match_by_type(&match_id, "goal")
        .await
        .inspect_err(|e| error!("failed to get match goals: {}", e))?;
    info!("found {} goals for match {}", goals.len(), match_id);

    Ok(Json(MatchGoals {
        total_goals: goals.len(),
        match_id,
        goals,
    }))
}

#[instrument(skip_all, fields(match_id = %match_id))]
async fn match_passes(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> Result<Json<MatchPasses>, QueryError> {
    counter!("match_query_requests_total", "route" => "passes").increment(1);

    let passes = state
        .store
        .events_for_match_by_type(&match_id, "pass")
        .await
        .inspect_err(|e| error!("failed to get match passes: {}", e))?;
    info!("found {} passes for match {}", passes.len(), match_id);

    Ok(Json(MatchPasses {
        total_passes: passes.len(),
        match_id,
        passes,
    }))
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use match_common::event::MatchEvent;
    use match_common::store::{MemoryEventStore, StoreError};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    async fn seeded_store() -> Arc<MemoryEventStore> {
        let store = Arc::new(MemoryEventStore::new());
        let events: Vec<_> = [
            ("m1", "pass", "2023-08-15T14:40:00Z"),
            ("m1", "goal", "2023-08-15T14:30:00Z"),
            ("m1", "pass", "2023-08-15T14:20:00Z"),
            ("m2", "goal", "2023-08-15T15:00:00Z"),
        ]
        .into_iter()
        .map(|(match_id, event_type, timestamp)| {
            MatchEvent {
                match_id: match_id.to_owned(),
                event_type: event_type.to_owned(),
                timestamp: Some(timestamp.to_owned()),
                ..Default::default()
            }
            .enrich()
            .unwrap()
        })
        .collect();
        store.put_batch(&events).await.unwrap();
        store
    }

    async fn get(store: Arc<dyn EventStore>, uri: &str) -> (StatusCode, Value) {
        let response = router(store, None)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn match_events_are_chronological() {
        let (status, body) = get(seeded_store().await, "/matches/m1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["match_id"], "m1");
        assert_eq!(body["event_count"], 3);
        let timestamps: Vec<_> = body["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event_timestamp"].as_str().unwrap())
            .collect();
        assert_eq!(
            timestamps,
            vec![
                "2023-08-15T14:20:00Z",
                "2023-08-15T14:30:00Z",
                "2023-08-15T14:40:00Z"
            ]
        );
    }

    #[tokio::test]
    async fn goals_and_passes_are_filtered_by_type() {
        let store = seeded_store().await;

        let (status, goals) = get(store.clone(), "/matches/m1/goals").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(goals["total_goals"], 1);
        assert_eq!(
            goals["goals"][0]["event_type_timestamp"],
            "goal#2023-08-15T14:30:00Z"
        );

        let (status, passes) = get(store, "/matches/m1/passes").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(passes["total_passes"], 2);
        assert_eq!(passes["passes"][0]["event_timestamp"], "2023-08-15T14:20:00Z");
    }

    #[tokio::test]
    async fn unknown_match_is_empty() {
        let (status, body) = get(seeded_store().await, "/matches/m3/goals").await;

        assert_eq!(status, StatusCode::OK);
        assert_json_eq!(
            body,
            json!({"match_id": "m3", "total_goals": 0, "goals": []})
        );
    }

    #[tokio::test]
    async fn store_errors_are_500() {
        let store = Arc::new(
            MemoryEventStore::new().failing(StoreError::OperationFailed("table missing".to_owned())),
        );

        let (status, body) = get(store, "/matches/m1").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_json_eq!(
            body,
            json!({"error": "store operation failed: table missing"})
        );
    }
}
