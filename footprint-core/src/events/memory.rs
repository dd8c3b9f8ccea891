//! In-memory EventBus implementation
//!
//! MemoryEventBus hands every event to a bounded broadcast channel. No
//! history is kept: subscribers only see events published after they
//! subscribed.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::trace;

use super::ActivityEvent;
use super::bus::{EventBus, EventDelivery, EventOrigin, EventSeq};

/// In-memory implementation of EventBus
pub struct MemoryEventBus {
    /// Next sequence number to assign
    next_seq: AtomicU64,
    /// Broadcast channel for live subscribers
    tx: broadcast::Sender<EventDelivery>,
}

impl MemoryEventBus {
    /// Create a new MemoryEventBus with the given per-subscriber capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            next_seq: AtomicU64::new(0),
            tx,
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBus for MemoryEventBus {
    fn publish_from(&self, event: ActivityEvent, origin: EventOrigin) -> EventSeq {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        // Ignore if no receivers
        let receivers = self
            .tx
            .send(EventDelivery { seq, origin, event })
            .unwrap_or(0);
        trace!(seq, receivers, "Published activity event");

        seq
    }

    fn subscribe(&self) -> broadcast::Receiver<EventDelivery> {
        self.tx.subscribe()
    }

    fn current_seq(&self) -> EventSeq {
        self.next_seq.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::events::bus::{DeliveryHandler, spawn_subscriber};

    fn event(actor: &str, path: &str) -> ActivityEvent {
        ActivityEvent {
            actor_id: actor.to_string(),
            resource_path: path.to_string(),
            verb: "POST".to_string(),
            duration_ms: 1.0,
            occurred_at: Utc::now(),
        }
    }

    // ==================== Publish Tests ====================

    #[test]
    fn publish_returns_increasing_sequence_numbers() {
        let bus = MemoryEventBus::new(16);
        assert_eq!(bus.publish(event("u1", "/a")), 0);
        assert_eq!(bus.publish(event("u1", "/b")), 1);
        assert_eq!(bus.publish(event("u1", "/c")), 2);
        assert_eq!(bus.current_seq(), 3);
    }

    #[test]
    fn publish_without_subscribers_does_not_fail() {
        let bus = MemoryEventBus::new(16);
        bus.publish(event("u1", "/a"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    // ==================== Subscribe Tests ====================

    #[tokio::test]
    async fn subscriber_receives_events_in_publish_order() {
        let bus = MemoryEventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(event("u1", "/first"));
        bus.publish(event("u1", "/second"));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.event.resource_path, "/first");
        assert_eq!(second.event.resource_path, "/second");
        assert!(first.seq < second.seq);
        assert_eq!(first.origin, EventOrigin::Local);
    }

    #[tokio::test]
    async fn every_subscriber_receives_every_event() {
        let bus = MemoryEventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(event("u1", "/a"));

        assert_eq!(rx1.recv().await.unwrap().event.resource_path, "/a");
        assert_eq!(rx2.recv().await.unwrap().event.resource_path, "/a");
    }

    #[tokio::test]
    async fn publish_from_keeps_peer_origin() {
        let bus = MemoryEventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish_from(event("u1", "/a"), EventOrigin::Peer("node-b".into()));

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.origin, EventOrigin::Peer("node-b".into()));
        assert!(!delivery.origin.is_local());
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_events() {
        let bus = MemoryEventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.publish(event("u1", &format!("/{i}")));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap().event.resource_path, "/3");
        assert_eq!(rx.recv().await.unwrap().event.resource_path, "/4");
    }

    // ==================== Handler Subscription Tests ====================

    #[tokio::test]
    async fn spawned_subscriber_handles_each_event_once_in_order() {
        let bus = MemoryEventBus::new(64);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let shutdown = CancellationToken::new();

        let handler: DeliveryHandler = {
            let seen = Arc::clone(&seen);
            Arc::new(move |delivery| {
                let seen = Arc::clone(&seen);
                Box::pin(async move {
                    seen.lock().await.push(delivery.event.resource_path);
                })
            })
        };
        let handle = spawn_subscriber(&bus, "test", handler, shutdown.clone());

        for i in 0..10 {
            bus.publish(event("u1", &format!("/{i}")));
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.lock().await.len() < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let expected: Vec<String> = (0..10).map(|i| format!("/{i}")).collect();
        assert_eq!(*seen.lock().await, expected);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_handles_events_already_queued() {
        let bus = MemoryEventBus::new(1024);
        let handled = Arc::new(Mutex::new(0usize));
        let shutdown = CancellationToken::new();

        let handler: DeliveryHandler = {
            let handled = Arc::clone(&handled);
            Arc::new(move |_delivery| {
                let handled = Arc::clone(&handled);
                Box::pin(async move {
                    tokio::task::yield_now().await;
                    *handled.lock().await += 1;
                })
            })
        };
        let handle = spawn_subscriber(&bus, "test", handler, shutdown.clone());

        for i in 0..200 {
            bus.publish(event("u1", &format!("/{i}")));
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(*handled.lock().await, 200);
    }

    #[tokio::test]
    async fn concurrent_publishers_get_unique_sequence_numbers() {
        let bus = Arc::new(MemoryEventBus::new(1000));
        let mut handles = vec![];

        for i in 0..10 {
            let bus = Arc::clone(&bus);
            handles.push(tokio::spawn(async move {
                (0..10)
                    .map(|j| bus.publish(event("u1", &format!("/{i}/{j}"))))
                    .collect::<Vec<_>>()
            }));
        }

        let mut seqs = Vec::new();
        for handle in handles {
            seqs.extend(handle.await.unwrap());
        }
        seqs.sort_unstable();
        seqs.dedup();

        assert_eq!(seqs.len(), 100);
        assert_eq!(bus.current_seq(), 100);
    }
}
