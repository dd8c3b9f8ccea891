//! Core traits for broadcast transport.

use async_trait::async_trait;

/// Publishes payloads to named channels and opens receivers on them.
///
/// Delivery is at-least-once with no ordering guarantee across publishers.
/// An unreachable broker is reported as [`crate::Error::Unavailable`] so
/// callers can treat it as a soft failure.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Send one payload on `channel`.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> crate::Result<()>;

    /// Open a dedicated receiver on `channel`.
    ///
    /// The subscription only sees messages published after it was opened.
    async fn subscribe(&self, channel: &str) -> crate::Result<Box<dyn Subscription>>;
}

/// A receiver bound to a single channel.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next payload.
    ///
    /// Returns `Ok(None)` once the channel is closed for good.
    async fn next_message(&mut self) -> crate::Result<Option<Vec<u8>>>;

    /// The channel this subscription reads from.
    fn channel(&self) -> &str;
}
