use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use match_common::metrics::{health_routes, setup_metrics_routes, track_metrics};
use match_common::schema::EventSchema;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::{sinks, submit};

#[derive(Clone)]
pub struct State {
    pub sink: Arc<dyn sinks::EventSink>,
    pub schema: EventSchema,
}

pub fn router<S: sinks::EventSink + 'static>(
    sink: S,
    max_body_size: usize,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let state = State {
        sink: Arc::new(sink),
        schema: EventSchema::default(),
    };

    let router = Router::new()
        .route("/events", post(submit::event))
        .layer(DefaultBodyLimit::max(max_body_size))
        .with_state(state)
        .merge(health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics));

    // The recorder is process-wide, tests build routers without one
    match metrics {
        Some(handle) => setup_metrics_routes(router, handle),
        None => router,
    }
}
