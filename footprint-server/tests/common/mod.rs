//! Shared test utilities for footprint-server integration tests

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use footprint_core::{ActivityRecord, MemoryRecordStore, PersistenceAttributionHook};
use footprint_server::{AppState, AuditPipeline, HeaderActorExtractor, create_router};

/// A test server plus handles on what it writes
pub struct Harness {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub activity: Arc<MemoryRecordStore<ActivityRecord>>,
}

/// Creates a test server whose activity trail lands in an inspectable store
#[allow(dead_code)]
pub async fn create_test_server() -> Harness {
    let mut activity = MemoryRecordStore::new();
    activity.register_hook(Arc::new(PersistenceAttributionHook::new()));
    let activity = Arc::new(activity);

    let pipeline = AuditPipeline::builder()
        .activity_store(activity.clone())
        .start()
        .await
        .unwrap();
    let state = Arc::new(AppState::new(
        Arc::new(pipeline),
        HeaderActorExtractor::default(),
    ));
    let server = TestServer::new(create_router(Arc::clone(&state))).unwrap();

    Harness {
        server,
        state,
        activity,
    }
}

/// Waits until the activity store holds `count` records
#[allow(dead_code)]
pub async fn wait_for_activity(activity: &MemoryRecordStore<ActivityRecord>, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while activity.len().await < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("activity records were not written in time");
}
