//! footprint-core - attribution and activity trail pipeline
//!
//! This crate ties the identity of whoever started a unit of work to the
//! writes that unit of work performs, and records every mutating operation
//! as an [`ActivityEvent`] delivered to independent sinks.
//!
//! - [`context`]: task-local [`AttributionContext`] and [`ContextPropagator`]
//! - [`intercept`]: [`AttributionInterceptor`] wrapping one unit of work
//! - [`store`] / [`hooks`]: keyed record store with pre-write hooks and the
//!   [`PersistenceAttributionHook`] that stamps `created_by` / `updated_by`
//! - [`events`]: [`ActivityEvent`], its builder, and the in-process [`EventBus`]
//! - [`broadcast`]: [`BroadcastChannel`] replicating events between instances
//! - [`sinks`]: [`MultiSinkConsumer`] writing to the primary store and search index

pub mod broadcast;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod hooks;
pub mod intercept;
pub mod sinks;
pub mod store;

pub use broadcast::{BroadcastChannel, BroadcastMessage};
pub use config::{BroadcastConfig, BusConfig, IndexConfig, PeerEventPolicy, SinkConfig};
pub use context::{ACTOR_ID, AttributionContext, ContextId, ContextPropagator};
pub use error::{BroadcastError, ContextError, IndexError, StampError, StoreError};
pub use events::{
    ANONYMOUS_ACTOR, ActivityEvent, ActivityEventBuilder, DeliveryHandler, EventBus,
    EventDelivery, EventOrigin, EventSeq, MemoryEventBus, READ_ONLY_VERB, is_audited_verb,
    spawn_subscriber,
};
pub use hooks::PersistenceAttributionHook;
pub use intercept::{ActorExtractor, AttributionInterceptor, Operation};
pub use sinks::{
    ActivityRecord, Clock, MultiSinkConsumer, SearchIndex, SinkOutcome, SinkReport,
    index_destination,
};
pub use store::{
    AttributionField, AuditedRecord, MemoryRecordStore, PreWriteHook, RecordStore, WriteHooks,
    WriteKind,
};

// Re-export broker types so hosts only need one dependency
pub use footprint_iggy::{Broker, BrokerConfig, IggyBroker, MemoryBroker};
