//! EventBus trait definition
//!
//! The bus is a single-topic, in-process fan-out of [`ActivityEvent`]s.
//! Publishing never waits for subscribers: every subscriber owns a bounded
//! receiver and processes deliveries on its own task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ActivityEvent;

/// Sequence number for events (monotonically increasing per bus)
pub type EventSeq = u64;

/// Where a delivered event was built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventOrigin {
    /// Built by a unit of work in this process.
    Local,
    /// Received from the peer instance with this id.
    Peer(String),
}

impl EventOrigin {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

/// An event as seen by bus subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDelivery {
    pub seq: EventSeq,
    pub origin: EventOrigin,
    pub event: ActivityEvent,
}

/// Event bus for publishing and subscribing to ActivityEvents
pub trait EventBus: Send + Sync {
    /// Publish a locally built event, returns its sequence number
    fn publish(&self, event: ActivityEvent) -> EventSeq {
        self.publish_from(event, EventOrigin::Local)
    }

    /// Publish an event with an explicit origin
    fn publish_from(&self, event: ActivityEvent, origin: EventOrigin) -> EventSeq;

    /// Subscribe to all events from now (live stream)
    fn subscribe(&self) -> broadcast::Receiver<EventDelivery>;

    /// Current sequence number (high water mark)
    fn current_seq(&self) -> EventSeq;
}

/// Async handler invoked once per delivery.
pub type DeliveryHandler =
    Arc<dyn Fn(EventDelivery) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Register `handler` on `bus` and drive it from a background task.
///
/// Deliveries are handled one at a time, so a handler sees the events of
/// any single publisher in publish order. A subscriber that falls more than
/// the bus capacity behind loses the oldest deliveries; the loss is logged
/// and the subscriber carries on. On shutdown, deliveries already queued
/// for the subscriber are handled before the task ends.
pub fn spawn_subscriber(
    bus: &dyn EventBus,
    name: impl Into<String>,
    handler: DeliveryHandler,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    let name = name.into();

    tokio::spawn(async move {
        info!(subscriber = %name, "Event subscriber started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(subscriber = %name, "Event subscriber received shutdown signal");
                    drain(&mut rx, &handler, &name).await;
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(delivery) => handler(delivery).await,
                        Err(broadcast::error::RecvError::Lagged(count)) => {
                            warn!(subscriber = %name, dropped = count, "Subscriber lagged, oldest events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!(subscriber = %name, "Event bus channel closed");
                            break;
                        }
                    }
                }
            }
        }

        info!(subscriber = %name, "Event subscriber stopped");
    })
}

/// Handle everything already queued on `rx` without waiting for more.
async fn drain(
    rx: &mut broadcast::Receiver<EventDelivery>,
    handler: &DeliveryHandler,
    name: &str,
) {
    let mut handled = 0usize;
    let mut dropped = 0u64;

    loop {
        match rx.try_recv() {
            Ok(delivery) => {
                handler(delivery).await;
                handled += 1;
            }
            Err(broadcast::error::TryRecvError::Lagged(count)) => dropped += count,
            Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
                break;
            }
        }
    }

    if dropped > 0 {
        warn!(subscriber = %name, handled, dropped, "Drained subscriber on shutdown, oldest events dropped");
    } else if handled > 0 {
        info!(subscriber = %name, handled, "Drained queued events on shutdown");
    }
}
