//! Pre-write hook that stamps the acting identity onto records.

use tracing::{trace, warn};

use crate::context::ContextPropagator;
use crate::error::StampError;
use crate::store::{AttributionField, AuditedRecord, PreWriteHook, WriteKind};

/// Longest actor id the hook will stamp.
pub const MAX_ACTOR_LEN: usize = 255;

/// Stamps `created_by` / `updated_by` from the active attribution context.
///
/// Inserts stamp both fields, updates only `updated_by`; fields the record
/// does not declare are skipped. With no active context or no actor the
/// hook does nothing. An actor id that fails validation is logged and the
/// record is written unstamped.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistenceAttributionHook;

impl PersistenceAttributionHook {
    pub const NAME: &'static str = "attribution";

    pub fn new() -> Self {
        Self
    }

    fn validate(actor_id: &str) -> Result<(), StampError> {
        if actor_id.trim().is_empty() {
            return Err(StampError::EmptyActor);
        }
        let len = actor_id.chars().count();
        if len > MAX_ACTOR_LEN {
            return Err(StampError::ActorTooLong {
                len,
                max: MAX_ACTOR_LEN,
            });
        }
        if actor_id.chars().any(char::is_control) {
            return Err(StampError::ControlCharacters);
        }
        Ok(())
    }

    /// Stamp `record` as written by `actor_id`.
    pub fn stamp(
        &self,
        kind: WriteKind,
        record: &mut dyn AuditedRecord,
        actor_id: &str,
    ) -> Result<usize, StampError> {
        Self::validate(actor_id)?;

        let mut stamped = 0;
        for field in AttributionField::stamped_on(kind) {
            if let Some(slot) = record.attribution_slot(*field) {
                *slot = Some(actor_id.to_string());
                stamped += 1;
            }
        }
        Ok(stamped)
    }
}

impl PreWriteHook for PersistenceAttributionHook {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn before_write(&self, kind: WriteKind, record: &mut dyn AuditedRecord) {
        let Some(actor_id) = ContextPropagator::current_actor_id() else {
            trace!(%kind, "No actor in scope, leaving attribution fields untouched");
            return;
        };

        match self.stamp(kind, record, &actor_id) {
            Ok(fields) => trace!(%kind, actor_id = %actor_id, fields, "Stamped attribution"),
            Err(e) => warn!(%kind, error = %e, "Attribution stamping failed, writing unstamped"),
        }
    }
}
