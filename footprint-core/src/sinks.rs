//! Multi-sink activity consumer.
//!
//! [`MultiSinkConsumer`] takes every event off the bus and writes it to the
//! primary record store and, when one is configured, to a search index.
//! The two writes run concurrently and fail independently. Nothing here
//! returns an error to the caller: failures become log records and a
//! [`SinkReport`].

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::config::{PeerEventPolicy, SinkConfig};
use crate::context::{AttributionContext, ContextPropagator};
use crate::error::IndexError;
use crate::events::{ActivityEvent, DeliveryHandler, EventBus, EventDelivery, spawn_subscriber};
use crate::store::{AttributionField, AuditedRecord, RecordStore, WriteKind};

/// Source of "now" for index destination naming.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wall-clock [`Clock`].
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Index destination for a write happening at `at`: `{prefix}-YYYY-MM-DD` (UTC).
pub fn index_destination(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{prefix}-{}", at.format("%Y-%m-%d"))
}

/// Secondary, searchable document index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index_document(
        &self,
        destination: &str,
        document: &serde_json::Value,
    ) -> Result<(), IndexError>;
}

/// An activity event as persisted in the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: Uuid,
    pub actor_id: String,
    pub resource_path: String,
    pub verb: String,
    pub duration_ms: f64,
    pub occurred_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl ActivityRecord {
    /// The store key of this record.
    pub fn key(&self) -> String {
        self.id.to_string()
    }
}

impl From<&ActivityEvent> for ActivityRecord {
    fn from(event: &ActivityEvent) -> Self {
        Self {
            id: Uuid::now_v7(),
            actor_id: event.actor_id.clone(),
            resource_path: event.resource_path.clone(),
            verb: event.verb.clone(),
            duration_ms: event.duration_ms,
            occurred_at: event.occurred_at,
            created_at: None,
            updated_at: None,
            created_by: None,
            updated_by: None,
        }
    }
}

impl AuditedRecord for ActivityRecord {
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

/// Document sent to the search index: the event plus the server write time.
pub fn index_document(event: &ActivityEvent, now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "actorId": event.actor_id,
        "resourcePath": event.resource_path,
        "verb": event.verb,
        "durationMs": event.duration_ms,
        "occurredAt": event.occurred_at,
        "@timestamp": now,
    })
}

/// Result of one sink write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    Written,
    Failed(String),
    /// The sink is not configured.
    NotConfigured,
    /// The event was not written anywhere (duplicate or filtered).
    Skipped,
}

impl SinkOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written)
    }
}

/// Per-sink outcomes for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub primary: SinkOutcome,
    pub index: SinkOutcome,
}

impl SinkReport {
    fn skipped() -> Self {
        Self {
            primary: SinkOutcome::Skipped,
            index: SinkOutcome::Skipped,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.primary == SinkOutcome::Skipped
    }
}

type DedupKey = (String, String, DateTime<Utc>);

/// Bounded memory of recently handled events.
struct DedupWindow {
    capacity: usize,
    seen: HashSet<DedupKey>,
    order: VecDeque<DedupKey>,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    fn contains(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    /// Remember `key`, evicting the oldest key when the window is full.
    fn remember(&mut self, key: DedupKey) {
        if self.capacity == 0 || self.seen.contains(&key) {
            return;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
    }
}

struct IndexSink {
    index: Arc<dyn SearchIndex>,
    prefix: String,
}

/// Writes bus events to the primary store and the optional search index.
pub struct MultiSinkConsumer {
    primary: Arc<dyn RecordStore<ActivityRecord>>,
    index: Option<IndexSink>,
    config: SinkConfig,
    clock: Clock,
    dedup: Mutex<DedupWindow>,
}

impl fmt::Debug for MultiSinkConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiSinkConsumer")
            .field("index_prefix", &self.index.as_ref().map(|i| &i.prefix))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MultiSinkConsumer {
    pub fn new(primary: Arc<dyn RecordStore<ActivityRecord>>, config: SinkConfig) -> Self {
        Self {
            primary,
            index: None,
            dedup: Mutex::new(DedupWindow::new(config.dedup_window)),
            config,
            clock: system_clock(),
        }
    }

    /// Also write every event to `index` under `{prefix}-YYYY-MM-DD`.
    #[must_use]
    pub fn with_index(mut self, index: Arc<dyn SearchIndex>, prefix: impl Into<String>) -> Self {
        self.index = Some(IndexSink {
            index,
            prefix: prefix.into(),
        });
        self
    }

    /// Replace the clock used for index destination naming.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Write one delivery to every configured sink.
    pub async fn handle(&self, delivery: &EventDelivery) -> SinkReport {
        let event = &delivery.event;

        if !delivery.origin.is_local() && self.config.peer_events == PeerEventPolicy::OriginOnly {
            trace!(origin = ?delivery.origin, "Peer event left to its origin instance");
            return SinkReport::skipped();
        }

        let key = event.dedup_key();
        let seen = self
            .dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key);
        if seen {
            debug!(
                actor_id = %event.actor_id,
                resource_path = %event.resource_path,
                "Duplicate activity event skipped"
            );
            return SinkReport::skipped();
        }

        let (primary, index) = tokio::join!(self.write_primary(event), self.write_index(event));

        // A redelivery may retry an event no sink accepted.
        if primary.is_written() || index.is_written() {
            self.dedup
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remember(key);
        }
        SinkReport { primary, index }
    }

    async fn write_primary(&self, event: &ActivityEvent) -> SinkOutcome {
        let record = ActivityRecord::from(event);
        let key = record.key();
        let scope = AttributionContext::with_actor(event.actor_id.clone());

        match ContextPropagator::run_with(scope, self.primary.insert(&key, record)).await {
            Ok(_) => {
                trace!(sink = "primary", key = %key, "Activity record written");
                SinkOutcome::Written
            }
            Err(e) => {
                error!(
                    sink = "primary",
                    actor_id = %event.actor_id,
                    resource_path = %event.resource_path,
                    verb = %event.verb,
                    error = %e,
                    "Failed to write activity record"
                );
                SinkOutcome::Failed(e.to_string())
            }
        }
    }

    async fn write_index(&self, event: &ActivityEvent) -> SinkOutcome {
        let Some(sink) = &self.index else {
            return SinkOutcome::NotConfigured;
        };

        let now = (self.clock)();
        let destination = index_destination(&sink.prefix, now);
        let document = index_document(event, now);

        match sink.index.index_document(&destination, &document).await {
            Ok(()) => {
                trace!(sink = "index", destination = %destination, "Activity document indexed");
                SinkOutcome::Written
            }
            Err(e) => {
                warn!(
                    sink = "index",
                    destination = %destination,
                    actor_id = %event.actor_id,
                    resource_path = %event.resource_path,
                    error = %e,
                    "Failed to index activity document"
                );
                SinkOutcome::Failed(e.to_string())
            }
        }
    }

    /// Consume `bus` on a background task until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, bus: &dyn EventBus, shutdown: CancellationToken) -> JoinHandle<()> {
        let handler: DeliveryHandler = Arc::new(move |delivery| {
            let consumer = Arc::clone(&self);
            Box::pin(async move {
                consumer.handle(&delivery).await;
            })
        });
        spawn_subscriber(bus, "multi-sink", handler, shutdown)
    }
}
