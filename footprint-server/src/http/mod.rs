//! HTTP server module

mod records;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    middleware::from_fn_with_state,
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::middleware::attribution_middleware;

pub use records::{ApiError, Document, ErrorResponse};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status of the server
    pub status: String,
    /// Server version
    pub version: String,
    /// Seconds since server started
    pub uptime_seconds: i64,
    /// Events published on the bus so far
    pub events_published: u64,
    /// Broadcast instance id, when broadcast is enabled
    pub instance_id: Option<String>,
}

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        events_published: state.pipeline.bus().current_seq(),
        instance_id: state.pipeline.instance_id().map(str::to_string),
    })
}

/// Create the HTTP router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    let interceptor = state.interceptor.clone();

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/records/:key",
            get(records::get_record)
                .post(records::create_record)
                .put(records::update_record),
        )
        .layer(from_fn_with_state(interceptor, attribution_middleware))
        .with_state(state)
}
