use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use match_common::event::EnrichError;
use match_common::kafka::admin::ProvisionError;
use match_common::kafka::producer::PublishError;
use match_common::schema::ValidationError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PUBLISHED_MESSAGE: &str = "Event published successfully";

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SubmitResponse {
    pub message: String,
    pub event_id: String,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("request has no body")]
    MissingBody,
    #[error("request body exceeds the size limit")]
    PayloadTooLarge,
    #[error("failed to read request body: {0}")]
    UnreadableBody(String),
    #[error("failed to parse request: {0}")]
    MalformedBody(#[from] serde_json::Error),
    #[error("event does not match the schema: {0}")]
    InvalidFormat(#[from] ValidationError),
    #[error("event submitted without a match_id")]
    MissingMatchId,
    #[error("event cannot be stored: {0}")]
    Unstorable(#[from] EnrichError),

    #[error("log unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("no acknowledgement from the log before timeout")]
    PublishTimeout,
    #[error("log rejected the event: {0}")]
    PublishRejected(String),
}

impl IngestError {
    /// Label for the submission outcome metric.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::MissingBody => "missing_body",
            IngestError::PayloadTooLarge => "payload_too_large",
            IngestError::UnreadableBody(_) => "unreadable_body",
            IngestError::MalformedBody(_) => "malformed_body",
            IngestError::InvalidFormat(_) => "invalid_format",
            IngestError::MissingMatchId => "missing_match_id",
            IngestError::Unstorable(_) => "unstorable",
            IngestError::DependencyUnavailable(_) => "dependency_unavailable",
            IngestError::PublishTimeout => "publish_timeout",
            IngestError::PublishRejected(_) => "publish_rejected",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::MissingBody
                | IngestError::PayloadTooLarge
                | IngestError::UnreadableBody(_)
                | IngestError::MalformedBody(_)
                | IngestError::InvalidFormat(_)
                | IngestError::MissingMatchId
                | IngestError::Unstorable(_)
        )
    }
}

impl From<BytesRejection> for IngestError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            IngestError::PayloadTooLarge
        } else {
            IngestError::UnreadableBody(rejection.body_text())
        }
    }
}

impl From<ProvisionError> for IngestError {
    fn from(err: ProvisionError) -> Self {
        IngestError::DependencyUnavailable(err.to_string())
    }
}

impl From<PublishError> for IngestError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Timeout(_) => IngestError::PublishTimeout,
            PublishError::Rejected(e) => IngestError::PublishRejected(e.to_string()),
            PublishError::Serialization(e) => IngestError::PublishRejected(e.to_string()),
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let (status, message, error) = match &self {
            IngestError::MissingBody => (
                StatusCode::BAD_REQUEST,
                "Missing request body".to_owned(),
                None,
            ),
            IngestError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large".to_owned(),
                None,
            ),
            IngestError::UnreadableBody(e) => (
                StatusCode::BAD_REQUEST,
                "Malformed request body".to_owned(),
                Some(e.clone()),
            ),
            IngestError::MalformedBody(e) => (
                StatusCode::BAD_REQUEST,
                "Malformed request body".to_owned(),
                Some(e.to_string()),
            ),
            IngestError::InvalidFormat(e) => (
                StatusCode::BAD_REQUEST,
                "Invalid event format".to_owned(),
                Some(e.to_string()),
            ),
            IngestError::Unstorable(e) => (
                StatusCode::BAD_REQUEST,
                "Invalid event format".to_owned(),
                Some(e.to_string()),
            ),
            IngestError::MissingMatchId => (
                StatusCode::BAD_REQUEST,
                "match_id is required".to_owned(),
                None,
            ),

            IngestError::DependencyUnavailable(_)
            | IngestError::PublishTimeout
            | IngestError::PublishRejected(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error publishing event: {self}"),
                None,
            ),
        };

        (status, Json(ErrorResponse { message, error })).into_response()
    }
}
