//! Shared application state

use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use footprint_core::{
    AttributionInterceptor, MemoryRecordStore, PersistenceAttributionHook, RecordStore,
};

use crate::http::Document;
use crate::middleware::HeaderActorExtractor;
use crate::pipeline::AuditPipeline;

/// State shared by every request handler
pub struct AppState {
    /// The running audit pipeline
    pub pipeline: Arc<AuditPipeline>,
    /// Store behind the records API
    pub records: Arc<dyn RecordStore<Document>>,
    /// Wraps every request in an attribution scope
    pub interceptor: AttributionInterceptor<HeaderMap>,
    /// When the server was started
    started_at: DateTime<Utc>,
}

impl AppState {
    /// Create state around `pipeline`, with an in-memory records store
    /// that stamps attribution on every write.
    pub fn new(pipeline: Arc<AuditPipeline>, extractor: HeaderActorExtractor) -> Self {
        let mut records = MemoryRecordStore::new();
        records.register_hook(Arc::new(PersistenceAttributionHook::new()));
        Self::with_records(pipeline, extractor, Arc::new(records))
    }

    /// Create state with a custom records store
    pub fn with_records(
        pipeline: Arc<AuditPipeline>,
        extractor: HeaderActorExtractor,
        records: Arc<dyn RecordStore<Document>>,
    ) -> Self {
        let interceptor = AttributionInterceptor::new(Arc::new(extractor), pipeline.bus());
        Self {
            pipeline,
            records,
            interceptor,
            started_at: Utc::now(),
        }
    }

    /// Seconds since the server started
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
