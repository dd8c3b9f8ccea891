//! Error types for footprint-core
//!
//! Only [`ContextError`] and [`StoreError`] ever reach application code.
//! The rest are produced inside the audit pipeline and end up as log
//! records; they never propagate back into the unit of work.

use thiserror::Error;

/// Errors from attribution context manipulation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The actor of a unit of work can only be replaced by a nested run-as scope
    #[error("actor already bound to '{current}', refusing to rebind to '{requested}'")]
    ActorAlreadyBound { current: String, requested: String },
}

/// Errors from keyed record stores
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Reasons the attribution hook refuses to stamp an actor id
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StampError {
    #[error("actor id is empty")]
    EmptyActor,

    #[error("actor id is {len} characters, limit is {max}")]
    ActorTooLong { len: usize, max: usize },

    #[error("actor id contains control characters")]
    ControlCharacters,
}

/// Errors from the secondary search index
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index unreachable: {0}")]
    Unreachable(String),

    #[error("index rejected document with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the cross-instance broadcast channel
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("broker error: {0}")]
    Broker(#[from] footprint_iggy::Error),

    #[error("malformed broadcast message: {0}")]
    Malformed(#[from] serde_json::Error),
}
