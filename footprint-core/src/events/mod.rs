//! Activity events and the in-process event bus

pub mod bus;
pub mod memory;
pub mod types;

// Re-export key types for convenience
pub use bus::{DeliveryHandler, EventBus, EventDelivery, EventOrigin, EventSeq, spawn_subscriber};
pub use memory::MemoryEventBus;
pub use types::{
    ANONYMOUS_ACTOR, ActivityEvent, ActivityEventBuilder, READ_ONLY_VERB, is_audited_verb,
};
