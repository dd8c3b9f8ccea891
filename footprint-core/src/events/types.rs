//! Activity event types

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Actor recorded when no actor was resolved for a unit of work.
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// The retrieval verb. Operations with this verb are never audited.
pub const READ_ONLY_VERB: &str = "GET";

/// Whether operations with `verb` produce activity events.
pub fn is_audited_verb(verb: &str) -> bool {
    !verb.trim().eq_ignore_ascii_case(READ_ONLY_VERB)
}

/// One completed mutating operation.
///
/// Serialized as `{actorId, resourcePath, verb, durationMs, occurredAt}`
/// with `occurredAt` as an RFC 3339 timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub actor_id: String,
    pub resource_path: String,
    pub verb: String,
    pub duration_ms: f64,
    pub occurred_at: DateTime<Utc>,
}

impl ActivityEvent {
    /// Whether the actor could not be resolved.
    pub fn is_anonymous(&self) -> bool {
        self.actor_id == ANONYMOUS_ACTOR
    }

    /// Key used to recognise redelivered copies of the same event.
    pub fn dedup_key(&self) -> (String, String, DateTime<Utc>) {
        (
            self.actor_id.clone(),
            self.resource_path.clone(),
            self.occurred_at,
        )
    }
}

/// Builds an [`ActivityEvent`] for one unit of work.
///
/// Created when the unit of work starts so that the measured duration
/// covers everything it does, including nested work.
#[derive(Debug, Clone)]
pub struct ActivityEventBuilder {
    resource_path: String,
    verb: String,
    actor_id: Option<String>,
    started: Instant,
}

impl ActivityEventBuilder {
    /// Start timing an operation on `resource_path` with `verb`.
    pub fn start(resource_path: impl Into<String>, verb: impl AsRef<str>) -> Self {
        Self {
            resource_path: resource_path.into(),
            verb: verb.as_ref().trim().to_ascii_uppercase(),
            actor_id: None,
            started: Instant::now(),
        }
    }

    /// Set the resolved actor (absent means anonymous).
    #[must_use]
    pub fn actor(mut self, actor_id: Option<String>) -> Self {
        self.actor_id = actor_id.filter(|a| !a.is_empty());
        self
    }

    /// The normalised verb.
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Whether [`ActivityEventBuilder::finish`] will produce an event.
    pub fn is_audited(&self) -> bool {
        is_audited_verb(&self.verb)
    }

    /// Finish using the wall-clock time elapsed since [`ActivityEventBuilder::start`].
    ///
    /// Returns `None` for read-only operations.
    pub fn finish(self) -> Option<ActivityEvent> {
        let elapsed = self.started.elapsed();
        self.finish_with_elapsed(elapsed)
    }

    /// Finish with an explicitly measured duration.
    pub fn finish_with_elapsed(self, elapsed: Duration) -> Option<ActivityEvent> {
        if !self.is_audited() {
            return None;
        }

        Some(ActivityEvent {
            actor_id: self
                .actor_id
                .unwrap_or_else(|| ANONYMOUS_ACTOR.to_string()),
            resource_path: self.resource_path,
            verb: self.verb,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            occurred_at: Utc::now(),
        })
    }
}
