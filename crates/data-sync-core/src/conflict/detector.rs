// File: src/conflict/detector.rs
//
// Deterministic conflict detection between an incoming payload and the
// currently stored snapshot

use super::ConflictKind;
use crate::payload::Payload;

/// Inputs to one detection pass.
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    pub incoming: &'a Payload,
    pub incoming_version: i64,
    pub stored: Option<&'a Payload>,
    pub stored_version: Option<i64>,
    /// Per-entity-type fields whose divergence is a data inconsistency
    pub critical_fields: &'a [String],
}

/// Stateless detector; purely local computation with no suspension points.
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    /// Two writes closer than this window count as concurrent
    pub concurrent_window_ms: i64,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self {
            concurrent_window_ms: 1000,
        }
    }
}

impl ConflictDetector {
    /// Detect the conflict kind between the incoming payload and the stored
    /// snapshot, or `None` when the write is safe to apply.
    ///
    /// Checks run in precedence order: stale version, concurrent update,
    /// critical-field divergence, key-set mismatch.
    pub fn detect(&self, ctx: &DetectionContext<'_>) -> Option<ConflictKind> {
        let stored = ctx.stored?;

        // Re-applying an identical snapshot is idempotent, never a conflict
        if ctx.incoming == stored {
            return None;
        }

        if let Some(stored_version) = ctx.stored_version {
            if ctx.incoming_version < stored_version {
                return Some(ConflictKind::Version);
            }
        }

        if let (Some(incoming_at), Some(stored_at)) =
            (ctx.incoming.updated_at(), stored.updated_at())
        {
            let delta_ms = (incoming_at - stored_at).num_milliseconds().abs();
            if delta_ms < self.concurrent_window_ms {
                return Some(ConflictKind::ConcurrentUpdate);
            }
        }

        for field in ctx.critical_fields {
            let incoming_value = ctx.incoming.get(field);
            let stored_value = stored.get(field);
            if incoming_value.is_some() && stored_value.is_some() && incoming_value != stored_value
            {
                return Some(ConflictKind::DataInconsistency);
            }
        }

        if ctx.incoming.keys() != stored.keys() {
            return Some(ConflictKind::SchemaMismatch);
        }

        None
    }
}
