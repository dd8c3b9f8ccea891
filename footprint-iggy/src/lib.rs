//! Broadcast transport for footprint.
//!
//! This crate carries serialized activity events between footprint
//! instances. It only moves bytes on named channels; deciding what goes on
//! the wire and what to do with inbound messages is left to the caller.
//!
//! # Key Types
//!
//! - [`Broker`] - Trait for publishing to and subscribing on named channels
//! - [`Subscription`] - A dedicated receiver on one channel
//! - [`IggyBroker`] - Iggy-backed implementation of Broker
//! - [`MemoryBroker`] - In-process implementation for tests and single-node setups
//! - [`Backoff`] - Capped exponential backoff used on reconnect

pub mod backoff;
pub mod config;
pub mod error;
pub mod iggy_broker;
pub mod memory;
pub mod traits;

// Re-exports
pub use backoff::Backoff;
pub use config::BrokerConfig;
pub use error::{Error, Result};
pub use iggy_broker::IggyBroker;
pub use memory::MemoryBroker;
pub use traits::{Broker, Subscription};
