use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use match_common::event::StoredEvent;
use match_common::store::StoreError;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct MatchEvents {
    pub match_id: String,
    pub event_count: usize,
    pub events: Vec<StoredEvent>,
}

#[derive(Debug, Serialize)]
pub struct MatchGoals {
    pub match_id: String,
    pub total_goals: usize,
    pub goals: Vec<StoredEvent>,
}

#[derive(Debug, Serialize)]
pub struct MatchPasses {
    pub match_id: String,
    pub total_passes: usize,
    pub passes: Vec<StoredEvent>,
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
