//! Attribution context propagation.
//!
//! An [`AttributionContext`] is a small key/value scope tied to one unit of
//! work. [`ContextPropagator`] makes it visible to every `.await` point of
//! that unit of work through a tokio task-local, so a storage hook running
//! deep inside a handler can still find out who the actor is without the
//! actor being passed down explicitly.
//!
//! Task-locals are not inherited by `tokio::spawn`; background work that
//! should stay attributed goes through [`ContextPropagator::spawn`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::task::JoinHandle;
use tracing::trace;
use uuid::Uuid;

use crate::error::ContextError;

/// Attribute key holding the actor id.
pub const ACTOR_ID: &str = "actorId";

tokio::task_local! {
    static ACTIVE: AttributionContext;
}

/// Opaque identifier of one context instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key/value scope for one unit of work.
///
/// Cloning yields another handle to the same scope, not a copy: a value set
/// through one handle is visible through all of them.
#[derive(Clone)]
pub struct AttributionContext {
    inner: Arc<Inner>,
}

struct Inner {
    id: ContextId,
    attributes: RwLock<HashMap<String, String>>,
}

impl AttributionContext {
    /// Create an empty context with a fresh id.
    pub fn new() -> Self {
        Self::from_attributes(HashMap::new())
    }

    /// Create a context that already carries `actor_id`.
    pub fn with_actor(actor_id: impl Into<String>) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert(ACTOR_ID.to_string(), actor_id.into());
        Self::from_attributes(attributes)
    }

    fn from_attributes(attributes: HashMap<String, String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ContextId::new(),
                attributes: RwLock::new(attributes),
            }),
        }
    }

    /// The id of this context.
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Read an attribute.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner
            .attributes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Set an attribute.
    ///
    /// The actor id is write-once: setting it again to a different value
    /// fails. Use [`ContextPropagator::run_as`] to act as someone else.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Result<(), ContextError> {
        let key = key.into();
        let value = value.into();
        let mut attributes = self
            .inner
            .attributes
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if key == ACTOR_ID
            && let Some(current) = attributes.get(ACTOR_ID)
            && *current != value
        {
            return Err(ContextError::ActorAlreadyBound {
                current: current.clone(),
                requested: value,
            });
        }

        attributes.insert(key, value);
        Ok(())
    }

    /// The actor id, if one was resolved for this unit of work.
    pub fn actor_id(&self) -> Option<String> {
        self.get(ACTOR_ID)
    }

    /// Bind the actor id (write-once, see [`AttributionContext::set`]).
    pub fn set_actor_id(&self, actor_id: impl Into<String>) -> Result<(), ContextError> {
        self.set(ACTOR_ID, actor_id)
    }

    /// Snapshot of all attributes.
    pub fn attributes(&self) -> HashMap<String, String> {
        self.inner
            .attributes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// New, independent context that keeps this one's attributes but acts
    /// as `actor_id`.
    pub fn derive_for(&self, actor_id: impl Into<String>) -> Self {
        let mut attributes = self.attributes();
        attributes.insert(ACTOR_ID.to_string(), actor_id.into());
        Self::from_attributes(attributes)
    }
}

impl Default for AttributionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AttributionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributionContext")
            .field("id", &self.inner.id)
            .field("attributes", &self.attributes())
            .finish()
    }
}

/// Creates, activates and reads attribution contexts.
pub struct ContextPropagator;

impl ContextPropagator {
    /// Start a new context for a unit of work.
    ///
    /// The context becomes active once handed to [`ContextPropagator::run_with`].
    pub fn begin() -> AttributionContext {
        let context = AttributionContext::new();
        trace!(context_id = %context.id(), "Began attribution context");
        context
    }

    /// The context active for the calling task, if any.
    pub fn current() -> Option<AttributionContext> {
        ACTIVE.try_with(Clone::clone).ok()
    }

    /// Shortcut for the active context's actor id.
    pub fn current_actor_id() -> Option<String> {
        ACTIVE.try_with(AttributionContext::actor_id).ok().flatten()
    }

    /// Run `work` with `context` active across all of its await points.
    ///
    /// Whatever was active before (or nothing) is active again once `work`
    /// completes.
    pub async fn run_with<F>(context: AttributionContext, work: F) -> F::Output
    where
        F: Future,
    {
        ACTIVE.scope(context, work).await
    }

    /// Synchronous counterpart of [`ContextPropagator::run_with`].
    pub fn sync_run_with<F, R>(context: AttributionContext, work: F) -> R
    where
        F: FnOnce() -> R,
    {
        ACTIVE.sync_scope(context, work)
    }

    /// Run `work` in a nested scope acting as `actor_id`.
    ///
    /// Other attributes of the enclosing context are carried over; the
    /// enclosing context itself is left untouched.
    pub async fn run_as<F>(actor_id: impl Into<String>, work: F) -> F::Output
    where
        F: Future,
    {
        let context = match Self::current() {
            Some(outer) => outer.derive_for(actor_id),
            None => AttributionContext::with_actor(actor_id),
        };
        Self::run_with(context, work).await
    }

    /// Spawn a task that inherits the current context.
    pub fn spawn<F>(work: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match Self::current() {
            Some(context) => tokio::spawn(ACTIVE.scope(context, work)),
            None => tokio::spawn(work),
        }
    }
}
