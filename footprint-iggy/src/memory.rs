//! In-process Broker implementation.
//!
//! Every [`MemoryBroker`] clone shares the same channels, so two footprint
//! pipelines holding clones of one broker behave like two instances talking
//! through a real server. Useful for testing and for single-node setups.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::traits::{Broker, Subscription};

/// Default per-channel buffer.
const DEFAULT_CAPACITY: usize = 1024;

/// In-memory implementation of Broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
    available: AtomicBool,
    published: AtomicU64,
}

impl MemoryBroker {
    /// Create a broker whose channels buffer up to `capacity` messages per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
                available: AtomicBool::new(true),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate the broker going down or coming back.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Number of payloads accepted so far across all channels.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Unavailable { retry_in_ms: 0 })
        }
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        if let Some(tx) = self.inner.channels.read().await.get(channel) {
            return tx.clone();
        }

        self.inner
            .channels
            .write()
            .await
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_available()?;

        let tx = self.sender(channel).await;
        // No subscribers is not an error for a pub/sub channel
        let receivers = tx.send(payload).unwrap_or(0);
        self.inner.published.fetch_add(1, Ordering::SeqCst);
        trace!(channel, receivers, "Published to memory channel");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        self.ensure_available()?;

        let rx = self.sender(channel).await.subscribe();
        Ok(Box::new(MemorySubscription {
            channel: channel.to_string(),
            rx,
        }))
    }
}

/// Receiver side of a memory channel.
struct MemorySubscription {
    channel: String,
    rx: broadcast::Receiver<Vec<u8>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Ok(Some(payload)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Memory subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }

    fn channel(&self) -> &str {
        &self.channel
    }
}
