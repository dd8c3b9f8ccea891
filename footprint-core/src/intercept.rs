//! Boundary wrapper that attributes and records one unit of work.
//!
//! The host transport calls [`AttributionInterceptor::intercept`] around
//! every inbound operation. The interceptor resolves the actor through a
//! pluggable [`ActorExtractor`], runs the operation inside its own
//! attribution scope and, once the operation completes, publishes an
//! [`ActivityEvent`](crate::ActivityEvent) for it on the bus.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::context::{AttributionContext, ContextPropagator};
use crate::events::{ActivityEventBuilder, EventBus};

/// Resolves the actor of an inbound request.
///
/// Called exactly once per unit of work. Returning `None` is valid; the
/// work then runs unattributed and its event is recorded as anonymous.
pub trait ActorExtractor<R: ?Sized>: Send + Sync {
    fn extract_actor_id(&self, request: &R) -> Option<String>;
}

impl<R, F> ActorExtractor<R> for F
where
    R: ?Sized,
    F: Fn(&R) -> Option<String> + Send + Sync,
{
    fn extract_actor_id(&self, request: &R) -> Option<String> {
        self(request)
    }
}

/// What a unit of work does, as seen from the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub resource_path: String,
    pub verb: String,
}

impl Operation {
    pub fn new(resource_path: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            resource_path: resource_path.into(),
            verb: verb.into(),
        }
    }
}

/// Opens an attribution scope per unit of work and records its activity.
pub struct AttributionInterceptor<R: ?Sized> {
    extractor: Arc<dyn ActorExtractor<R>>,
    bus: Arc<dyn EventBus>,
}

impl<R: ?Sized> Clone for AttributionInterceptor<R> {
    fn clone(&self) -> Self {
        Self {
            extractor: Arc::clone(&self.extractor),
            bus: Arc::clone(&self.bus),
        }
    }
}

impl<R: ?Sized> fmt::Debug for AttributionInterceptor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributionInterceptor")
            .field("bus_seq", &self.bus.current_seq())
            .finish_non_exhaustive()
    }
}

impl<R: ?Sized> AttributionInterceptor<R> {
    pub fn new(extractor: Arc<dyn ActorExtractor<R>>, bus: Arc<dyn EventBus>) -> Self {
        Self { extractor, bus }
    }

    /// The bus events are published on.
    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// Start a context for `request`, carrying its actor if one resolves.
    pub fn begin(&self, request: &R) -> AttributionContext {
        let context = ContextPropagator::begin();
        if let Some(actor_id) = self.extractor.extract_actor_id(request)
            && let Err(e) = context.set_actor_id(actor_id)
        {
            warn!(context_id = %context.id(), error = %e, "Could not bind actor to new context");
        }
        context
    }

    /// Run `work` with `context` active and record it once it completes.
    ///
    /// The event is built whether the work's output is a success or an
    /// error. If the returned future is dropped before `work` completes,
    /// nothing is recorded.
    pub async fn run<F>(&self, context: AttributionContext, operation: Operation, work: F) -> F::Output
    where
        F: Future,
    {
        let builder = ActivityEventBuilder::start(operation.resource_path, &operation.verb);
        let output = ContextPropagator::run_with(context.clone(), work).await;

        // Read the actor at completion so that work which authenticated
        // itself mid-flight is still attributed.
        match builder.actor(context.actor_id()).finish() {
            Some(event) => {
                debug!(
                    actor_id = %event.actor_id,
                    resource_path = %event.resource_path,
                    verb = %event.verb,
                    duration_ms = event.duration_ms,
                    "Recording activity"
                );
                self.bus.publish(event);
            }
            None => trace!(verb = %operation.verb, "Read-only operation, no activity recorded"),
        }

        output
    }

    /// [`begin`](Self::begin) then [`run`](Self::run).
    pub async fn intercept<F>(&self, request: &R, operation: Operation, work: F) -> F::Output
    where
        F: Future,
    {
        let context = self.begin(request);
        self.run(context, operation, work).await
    }
}
