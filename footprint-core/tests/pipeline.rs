//! End-to-end tests for the attribution and activity pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use footprint_core::{
    ActivityRecord, AttributionField, AttributionInterceptor, AuditedRecord, BroadcastChannel,
    ContextPropagator, EventBus, IndexError, MemoryBroker, MemoryEventBus, MemoryRecordStore,
    MultiSinkConsumer, Operation, PersistenceAttributionHook, RecordStore, SearchIndex, SinkConfig,
    WriteKind,
};
use tokio_util::sync::CancellationToken;

type Request = HashMap<&'static str, &'static str>;

#[derive(Debug, Clone, Default)]
struct Order {
    total: u32,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    created_by: Option<String>,
    updated_by: Option<String>,
}

impl AuditedRecord for Order {
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

struct DownIndex;

#[async_trait]
impl SearchIndex for DownIndex {
    async fn index_document(&self, _: &str, _: &serde_json::Value) -> Result<(), IndexError> {
        Err(IndexError::Unreachable("connection refused".into()))
    }
}

/// One running instance: bus, hooked domain store, activity store, consumer.
struct Node {
    bus: Arc<MemoryEventBus>,
    orders: Arc<MemoryRecordStore<Order>>,
    activity: Arc<MemoryRecordStore<ActivityRecord>>,
    interceptor: AttributionInterceptor<Request>,
}

fn hooked<R: AuditedRecord + Clone + 'static>() -> Arc<MemoryRecordStore<R>> {
    let mut store = MemoryRecordStore::new();
    store.register_hook(Arc::new(PersistenceAttributionHook::new()));
    Arc::new(store)
}

async fn node(broker: Option<(&MemoryBroker, &str)>, shutdown: &CancellationToken) -> Node {
    let bus = Arc::new(MemoryEventBus::new(256));
    let orders = hooked::<Order>();
    let activity = hooked::<ActivityRecord>();

    let consumer = Arc::new(
        MultiSinkConsumer::new(activity.clone(), SinkConfig::default())
            .with_index(Arc::new(DownIndex), "activity"),
    );
    consumer.spawn(bus.as_ref(), shutdown.clone());

    if let Some((broker, id)) = broker {
        let channel = BroadcastChannel::new(Arc::new(broker.clone()), "activity", id);
        channel.spawn_forwarder(bus.as_ref(), shutdown.clone());
        channel
            .spawn_receiver(bus.clone(), shutdown.clone())
            .await
            .unwrap();
    }

    let extractor = |request: &Request| request.get("actor").map(|a| a.to_string());
    let interceptor = AttributionInterceptor::new(Arc::new(extractor), bus.clone() as Arc<dyn EventBus>);

    Node {
        bus,
        orders,
        activity,
        interceptor,
    }
}

async fn wait_for_records(store: &MemoryRecordStore<ActivityRecord>, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while store.len().await < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("activity records were not written in time");
}

#[tokio::test]
async fn request_is_attributed_in_store_and_activity_trail() {
    let shutdown = CancellationToken::new();
    let node = node(None, &shutdown).await;
    let request: Request = HashMap::from([("actor", "u1")]);

    let created = node
        .interceptor
        .intercept(&request, Operation::new("/orders/7", "POST"), async {
            node.orders.insert("7", Order::default()).await
        })
        .await
        .unwrap();
    assert_eq!(created.created_by.as_deref(), Some("u1"));

    let other: Request = HashMap::from([("actor", "u2")]);
    let updated = node
        .interceptor
        .intercept(&other, Operation::new("/orders/7", "PUT"), async {
            let mut order = node.orders.get("7").await?.unwrap_or_default();
            order.total = 99;
            node.orders.update("7", order).await
        })
        .await
        .unwrap();
    assert_eq!(updated.created_by.as_deref(), Some("u1"));
    assert_eq!(updated.updated_by.as_deref(), Some("u2"));

    // GET produces nothing; the failing index does not block the primary store.
    node.interceptor
        .intercept(&request, Operation::new("/orders/7", "GET"), async {})
        .await;

    wait_for_records(&node.activity, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut trail = node.activity.all().await;
    trail.sort_by_key(|r| r.occurred_at);
    assert_eq!(trail.len(), 2);
    assert_eq!((trail[0].actor_id.as_str(), trail[0].verb.as_str()), ("u1", "POST"));
    assert_eq!((trail[1].actor_id.as_str(), trail[1].verb.as_str()), ("u2", "PUT"));
    assert_eq!(trail[1].created_by.as_deref(), Some("u2"));

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_see_each_others_actor() {
    let shutdown = CancellationToken::new();
    let node = Arc::new(node(None, &shutdown).await);

    let mut handles = Vec::new();
    for i in 0..50 {
        let node = Arc::clone(&node);
        let actor = if i % 2 == 0 { "A" } else { "B" };
        handles.push(tokio::spawn(async move {
            let request: Request = HashMap::from([("actor", actor)]);
            let key = format!("order-{i}");
            let written = node
                .interceptor
                .intercept(&request, Operation::new(format!("/orders/{i}"), "POST"), async {
                    tokio::task::yield_now().await;
                    let seen = ContextPropagator::current_actor_id();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    let order = node.orders.insert(&key, Order::default()).await.unwrap();
                    (seen, order)
                })
                .await;
            (actor, written)
        }));
    }

    for handle in handles {
        let (actor, (seen, order)) = handle.await.unwrap();
        assert_eq!(seen.as_deref(), Some(actor));
        assert_eq!(order.created_by.as_deref(), Some(actor));
    }

    wait_for_records(&node.activity, 50).await;
    shutdown.cancel();
}

#[tokio::test]
async fn peers_consolidate_each_others_activity() {
    let broker = MemoryBroker::default();
    let shutdown = CancellationToken::new();
    let a = node(Some((&broker, "node-a")), &shutdown).await;
    let b = node(Some((&broker, "node-b")), &shutdown).await;

    let request: Request = HashMap::from([("actor", "u1")]);
    a.interceptor
        .intercept(&request, Operation::new("/orders/7", "PUT"), async {})
        .await;
    b.interceptor
        .intercept(&request, Operation::new("/orders/8", "DELETE"), async {})
        .await;

    wait_for_records(&a.activity, 2).await;
    wait_for_records(&b.activity, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Each side holds its own event plus its peer's, and nothing twice.
    assert_eq!(a.activity.len().await, 2);
    assert_eq!(b.activity.len().await, 2);
    assert_eq!(broker.published_count(), 2);
    assert_eq!(a.bus.current_seq(), 2);

    shutdown.cancel();
}
