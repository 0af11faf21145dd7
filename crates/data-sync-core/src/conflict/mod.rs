// File: src/conflict/mod.rs
//
// Conflict detection and resolution for concurrent entity mutations
// A ConflictRecord is created at detection and mutated only through its
// lifecycle methods until it reaches a terminal state

pub mod detector;
pub mod resolver;

pub use detector::{ConflictDetector, DetectionContext};
pub use resolver::{ConflictResolver, ConflictResolverBuilder, CustomResolver, ResolutionOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::Payload;

/// Kind of divergence detected between two record snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Version,
    ConcurrentUpdate,
    DataInconsistency,
    SchemaMismatch,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::Version => "version",
            ConflictKind::ConcurrentUpdate => "concurrent_update",
            ConflictKind::DataInconsistency => "data_inconsistency",
            ConflictKind::SchemaMismatch => "schema_mismatch",
        }
    }
}

impl std::str::FromStr for ConflictKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "version" => Ok(ConflictKind::Version),
            "concurrent_update" => Ok(ConflictKind::ConcurrentUpdate),
            "data_inconsistency" => Ok(ConflictKind::DataInconsistency),
            "schema_mismatch" => Ok(ConflictKind::SchemaMismatch),
            other => Err(format!("unknown conflict kind: {}", other)),
        }
    }
}

/// Named resolution strategy applied to a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    LastWriteWins,
    FirstWriteWins,
    Merge,
    Manual,
    Custom,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::LastWriteWins => "last_write_wins",
            ResolutionStrategy::FirstWriteWins => "first_write_wins",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Manual => "manual",
            ResolutionStrategy::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_write_wins" => Ok(ResolutionStrategy::LastWriteWins),
            "first_write_wins" => Ok(ResolutionStrategy::FirstWriteWins),
            "merge" => Ok(ResolutionStrategy::Merge),
            "manual" => Ok(ResolutionStrategy::Manual),
            "custom" => Ok(ResolutionStrategy::Custom),
            other => Err(format!("unknown resolution strategy: {}", other)),
        }
    }
}

/// Lifecycle state of a conflict record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictState {
    Detected,
    Resolving,
    Resolved,
    Failed,
}

impl ConflictState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictState::Detected => "detected",
            ConflictState::Resolving => "resolving",
            ConflictState::Resolved => "resolved",
            ConflictState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConflictState::Resolved | ConflictState::Failed)
    }
}

impl std::str::FromStr for ConflictState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detected" => Ok(ConflictState::Detected),
            "resolving" => Ok(ConflictState::Resolving),
            "resolved" => Ok(ConflictState::Resolved),
            "failed" => Ok(ConflictState::Failed),
            other => Err(format!("unknown conflict state: {}", other)),
        }
    }
}

/// Durable record of one detected conflict and its resolution.
///
/// Snapshot `a` is the stored state, snapshot `b` the incoming candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    /// Event whose processing surfaced the conflict
    pub event_id: Option<Uuid>,
    pub kind: ConflictKind,
    pub strategy: ResolutionStrategy,
    pub state: ConflictState,
    pub snapshot_a: Payload,
    pub snapshot_b: Payload,
    pub resolved_payload: Option<Payload>,
    pub reason: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub participating_sources: Vec<String>,
}

impl ConflictRecord {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        kind: ConflictKind,
        strategy: ResolutionStrategy,
        snapshot_a: Payload,
        snapshot_b: Payload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            event_id: None,
            kind,
            strategy,
            state: ConflictState::Detected,
            snapshot_a,
            snapshot_b,
            resolved_payload: None,
            reason: None,
            detected_at: Utc::now(),
            resolved_at: None,
            participating_sources: Vec::new(),
        }
    }

    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.participating_sources = sources;
        self
    }

    /// Transition detected -> resolving.
    pub fn begin_resolution(&mut self) {
        if self.state == ConflictState::Detected {
            self.state = ConflictState::Resolving;
        }
    }

    /// Terminal transition to resolved with the effective payload.
    pub fn mark_resolved(&mut self, payload: Payload) {
        self.state = ConflictState::Resolved;
        self.resolved_payload = Some(payload);
        self.resolved_at = Some(Utc::now());
    }

    /// Terminal transition to failed with the failure reason.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.state = ConflictState::Failed;
        self.reason = Some(reason.into());
        self.resolved_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_reaches_resolved() {
        let mut record = ConflictRecord::new(
            "product",
            "p-1",
            ConflictKind::ConcurrentUpdate,
            ResolutionStrategy::LastWriteWins,
            Payload::new(),
            Payload::new(),
        );
        assert_eq!(record.state, ConflictState::Detected);

        record.begin_resolution();
        assert_eq!(record.state, ConflictState::Resolving);

        record.mark_resolved(Payload::new());
        assert_eq!(record.state, ConflictState::Resolved);
        assert!(record.state.is_terminal());
        assert!(record.resolved_at.unwrap() >= record.detected_at);
    }

    #[test]
    fn failed_record_carries_reason() {
        let mut record = ConflictRecord::new(
            "product",
            "p-1",
            ConflictKind::SchemaMismatch,
            ResolutionStrategy::Manual,
            Payload::new(),
            Payload::new(),
        );
        record.begin_resolution();
        record.mark_failed("manual resolution required");
        assert_eq!(record.state, ConflictState::Failed);
        assert_eq!(
            record.reason.as_deref(),
            Some("manual resolution required")
        );
    }
}
