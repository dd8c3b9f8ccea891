//! Cross-instance replication of activity events.
//!
//! Each instance forwards the events it built itself to a shared broker
//! channel and re-injects events built by other instances into its local
//! bus. Messages carry the sending instance id, which is how a receiver
//! recognises (and drops) its own messages, and deliveries carry an
//! [`EventOrigin`], which is how the forwarder avoids re-sending events it
//! received from peers.

use std::sync::Arc;
use std::time::Duration;

use footprint_iggy::Broker;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::BroadcastConfig;
use crate::error::BroadcastError;
use crate::events::{ActivityEvent, DeliveryHandler, EventBus, EventOrigin, spawn_subscriber};

/// Pause after a failed receive before trying again.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Payload sent on the broadcast channel.
///
/// The event fields are inlined next to the sender id:
/// `{"origin": "...", "actorId": "...", "resourcePath": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub origin: String,
    #[serde(flatten)]
    pub event: ActivityEvent,
}

/// One instance's endpoint on the shared broadcast channel.
#[derive(Clone)]
pub struct BroadcastChannel {
    broker: Arc<dyn Broker>,
    channel: String,
    instance_id: String,
}

impl BroadcastChannel {
    pub fn new(
        broker: Arc<dyn Broker>,
        channel: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            channel: channel.into(),
            instance_id: instance_id.into(),
        }
    }

    pub fn from_config(broker: Arc<dyn Broker>, config: &BroadcastConfig) -> Self {
        Self::new(broker, config.channel.clone(), config.instance_id.clone())
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Send one locally built event to peers.
    pub async fn publish(&self, event: &ActivityEvent) -> Result<(), BroadcastError> {
        let message = BroadcastMessage {
            origin: self.instance_id.clone(),
            event: event.clone(),
        };
        let payload = serde_json::to_vec(&message)?;
        self.broker.publish(&self.channel, payload).await?;
        trace!(channel = %self.channel, resource_path = %event.resource_path, "Broadcast activity event");
        Ok(())
    }

    /// Decode an inbound payload; `None` for this instance's own messages.
    pub fn decode(&self, payload: &[u8]) -> Result<Option<BroadcastMessage>, BroadcastError> {
        let message: BroadcastMessage = serde_json::from_slice(payload)?;
        if message.origin == self.instance_id {
            return Ok(None);
        }
        Ok(Some(message))
    }

    /// Forward every locally built event on `bus` to the channel.
    ///
    /// Publish failures are logged and the event is dropped; local delivery
    /// is never affected.
    pub fn spawn_forwarder(&self, bus: &dyn EventBus, shutdown: CancellationToken) -> JoinHandle<()> {
        let endpoint = self.clone();
        let handler: DeliveryHandler = Arc::new(move |delivery| {
            let endpoint = endpoint.clone();
            Box::pin(async move {
                if !delivery.origin.is_local() {
                    return;
                }
                if let Err(e) = endpoint.publish(&delivery.event).await {
                    warn!(
                        channel = %endpoint.channel,
                        seq = delivery.seq,
                        error = %e,
                        "Broadcast publish failed, event not replicated"
                    );
                }
            })
        });

        spawn_subscriber(bus, format!("broadcast-forwarder:{}", self.channel), handler, shutdown)
    }

    /// Subscribe to the channel and republish peer events onto `bus`.
    ///
    /// Opening the subscription is the only fallible step; once running,
    /// malformed messages and receive errors are logged and skipped.
    pub async fn spawn_receiver(
        &self,
        bus: Arc<dyn EventBus>,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>, BroadcastError> {
        let mut subscription = self.broker.subscribe(&self.channel).await?;
        let endpoint = self.clone();

        Ok(tokio::spawn(async move {
            info!(channel = %endpoint.channel, instance_id = %endpoint.instance_id, "Broadcast receiver started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!(channel = %endpoint.channel, "Broadcast receiver received shutdown signal");
                        break;
                    }
                    result = subscription.next_message() => {
                        match result {
                            Ok(Some(payload)) => endpoint.accept(bus.as_ref(), &payload),
                            Ok(None) => {
                                warn!(channel = %endpoint.channel, "Broadcast channel closed");
                                break;
                            }
                            Err(e) => {
                                warn!(channel = %endpoint.channel, error = %e, "Broadcast receive failed");
                                tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                            }
                        }
                    }
                }
            }

            info!(channel = %endpoint.channel, "Broadcast receiver stopped");
        }))
    }

    fn accept(&self, bus: &dyn EventBus, payload: &[u8]) {
        match self.decode(payload) {
            Ok(Some(message)) => {
                trace!(channel = %self.channel, origin = %message.origin, "Received peer activity event");
                bus.publish_from(message.event, EventOrigin::Peer(message.origin));
            }
            Ok(None) => trace!(channel = %self.channel, "Skipping own broadcast message"),
            Err(e) => warn!(channel = %self.channel, error = %e, "Dropping malformed broadcast message"),
        }
    }
}
