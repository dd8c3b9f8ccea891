//! Records API handlers
//!
//! A minimal keyed document API. Its only job is to give the attribution
//! middleware and the hooked store a real operation to wrap.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use footprint_core::{AttributionField, AuditedRecord, StoreError, WriteKind};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::AppState;

/// A stored JSON document with audit fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    pub body: serde_json::Value,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl Document {
    pub fn new(key: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            body,
            created_at: None,
            updated_at: None,
            created_by: None,
            updated_by: None,
        }
    }
}

impl AuditedRecord for Document {
    fn touch(&mut self, kind: WriteKind, now: DateTime<Utc>) {
        if kind == WriteKind::Insert {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }

    fn attribution_slot(&mut self, field: AttributionField) -> Option<&mut Option<String>> {
        match field {
            AttributionField::CreatedBy => Some(&mut self.created_by),
            AttributionField::UpdatedBy => Some(&mut self.updated_by),
        }
    }

    fn created_at_slot(&mut self) -> Option<&mut Option<DateTime<Utc>>> {
        Some(&mut self.created_at)
    }
}

/// Error body returned by the records API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Store errors mapped to HTTP responses
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::Serialization(_) | StoreError::Backend(_) => {
                error!(error = %self.0, "Records store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Create a document
pub async fn create_record(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    let document = state.records.insert(&key, Document::new(&key, body)).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// Replace the body of an existing document
pub async fn update_record(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<Document>, ApiError> {
    let mut document = state
        .records
        .get(&key)
        .await?
        .ok_or_else(|| StoreError::NotFound(key.clone()))?;
    document.body = body;

    Ok(Json(state.records.update(&key, document).await?))
}

/// Fetch a document
pub async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Document>, ApiError> {
    state
        .records
        .get(&key)
        .await?
        .map(Json)
        .ok_or_else(|| StoreError::NotFound(key).into())
}
