// File: src/store/mod.rs
//
// Persisted state of the synchronization engine: sync events, conflict
// records, replication cursors, and integrity checks
// Four stores, each behind an async trait with PostgreSQL and in-memory
// implementations

pub mod memory;
pub mod postgres;

pub use memory::{
    InMemoryCheckStore, InMemoryConflictStore, InMemoryCursorStore, InMemoryEventStore,
};
pub use postgres::{
    PgPool, PostgresCheckStore, PostgresConflictStore, PostgresCursorStore, PostgresEventStore,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use data_sync_core::adapter::SyncEventKind;
use data_sync_core::config::ReplicationConfig;
use data_sync_core::conflict::ConflictRecord;
use data_sync_core::error::{SyncError, SyncResult};
use data_sync_core::payload::Payload;

/// Versions pack a millisecond wall clock and a per-entity sequence:
/// `version = wall_clock_ms * VERSION_SEQUENCE_SPAN + sequence`.
/// The span must exceed the largest plausible per-entity burst within one
/// millisecond.
pub const VERSION_SEQUENCE_SPAN: i64 = 1000;

/// Compute the version for the next event of an entity.
///
/// The result is clamped above the previous version so monotonicity
/// survives wall-clock steps.
pub fn next_version(now: DateTime<Utc>, sequence: i64, previous_version: Option<i64>) -> i64 {
    let candidate = now.timestamp_millis() * VERSION_SEQUENCE_SPAN + sequence;
    match previous_version {
        Some(prev) => candidate.max(prev + 1),
        None => candidate,
    }
}

/// Metadata attached to every sync event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    pub correlation_id: Option<Uuid>,
    pub actor: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub custom: HashMap<String, serde_json::Value>,
}

impl EventMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn add_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Processing status of a sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl SyncEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEventStatus::Pending => "pending",
            SyncEventStatus::Processing => "processing",
            SyncEventStatus::Completed => "completed",
            SyncEventStatus::Failed => "failed",
            SyncEventStatus::Retrying => "retrying",
        }
    }

    /// Legal transitions: pending -> processing -> {completed, failed,
    /// retrying}; retrying -> processing.
    pub fn can_transition_to(&self, next: SyncEventStatus) -> bool {
        matches!(
            (self, next),
            (SyncEventStatus::Pending, SyncEventStatus::Processing)
                | (SyncEventStatus::Processing, SyncEventStatus::Completed)
                | (SyncEventStatus::Processing, SyncEventStatus::Failed)
                | (SyncEventStatus::Processing, SyncEventStatus::Retrying)
                | (SyncEventStatus::Retrying, SyncEventStatus::Processing)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncEventStatus::Completed | SyncEventStatus::Failed)
    }
}

impl std::str::FromStr for SyncEventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncEventStatus::Pending),
            "processing" => Ok(SyncEventStatus::Processing),
            "completed" => Ok(SyncEventStatus::Completed),
            "failed" => Ok(SyncEventStatus::Failed),
            "retrying" => Ok(SyncEventStatus::Retrying),
            other => Err(format!("unknown event status: {}", other)),
        }
    }
}

/// Durable record of one intended mutation, carrying enough state to be
/// re-applied safely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub kind: SyncEventKind,
    pub source: String,
    pub origin_region: String,
    pub payload: Payload,
    pub previous: Option<Payload>,
    /// Strictly monotonic per (entity_type, entity_id)
    pub version: i64,
    pub sequence: i64,
    pub submitted_at: DateTime<Utc>,
    pub status: SyncEventStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    /// Earliest instant a retrying event may be claimed again
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub metadata: EventMetadata,
}

impl SyncEvent {
    pub fn entity_key(&self) -> (String, String) {
        (self.entity_type.clone(), self.entity_id.clone())
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Submission payload for a new sync event; identity, version, and status
/// are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewSyncEvent {
    pub entity_type: String,
    pub entity_id: String,
    pub kind: SyncEventKind,
    pub source: String,
    pub origin_region: String,
    pub payload: Payload,
    pub previous: Option<Payload>,
    pub max_attempts: i32,
    pub metadata: EventMetadata,
}

impl NewSyncEvent {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        kind: SyncEventKind,
        payload: Payload,
        source: impl Into<String>,
        origin_region: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            kind,
            source: source.into(),
            origin_region: origin_region.into(),
            payload,
            previous: None,
            max_attempts: 3,
            metadata: EventMetadata::default(),
        }
    }

    pub fn with_previous(mut self, previous: Payload) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Event counts by status over a trailing window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed + self.retrying
    }

    /// Share of events that terminated in failure.
    pub fn failure_rate(&self) -> f64 {
        let settled = self.completed + self.failed;
        if settled == 0 {
            0.0
        } else {
            self.failed as f64 / settled as f64
        }
    }
}

/// Append-only log of sync events, versioned per entity.
///
/// The store owns SyncEvents for their entire lifetime; everything else
/// observes them through queries.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a new event, assigning id, version, and sequence inside one
    /// transaction.
    async fn append(&self, event: NewSyncEvent) -> SyncResult<SyncEvent>;

    async fn fetch(&self, event_id: Uuid) -> SyncResult<SyncEvent>;

    /// Claim the next due event and transition it to `Processing`.
    ///
    /// Ordering: kind priority (delete > create > update > bulk-update),
    /// then submitted_at ascending. At most one event per
    /// (entity_type, entity_id) is ever in `Processing`; events whose key is
    /// busy and retrying events whose backoff has not elapsed are skipped.
    async fn claim_next(&self, now: DateTime<Utc>) -> SyncResult<Option<SyncEvent>>;

    async fn list_pending(&self, limit: usize) -> SyncResult<Vec<SyncEvent>>;

    /// Events for an (entity_type, source_region) with version greater than
    /// `min_version`, ascending by version. Feeds replication catch-up.
    async fn list_since(
        &self,
        entity_type: &str,
        source_region: &str,
        min_version: i64,
        limit: usize,
    ) -> SyncResult<Vec<SyncEvent>>;

    /// Transition an event's status, enforcing the status machine.
    async fn update_status(
        &self,
        event_id: Uuid,
        status: SyncEventStatus,
        error: Option<String>,
    ) -> SyncResult<()>;

    /// Record the outcome of one processing attempt: bumps the attempt
    /// counter, transitions the status, and schedules the next attempt for
    /// retrying events.
    async fn record_attempt(
        &self,
        event_id: Uuid,
        status: SyncEventStatus,
        error: Option<String>,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> SyncResult<()>;

    /// Replace an event's payload with the effective resolution outcome.
    async fn replace_payload(&self, event_id: Uuid, payload: Payload) -> SyncResult<()>;

    /// Tag an event's metadata, e.g. marking it superseded by a resolution.
    async fn tag_metadata(&self, event_id: Uuid, key: &str, value: String) -> SyncResult<()>;

    async fn count_by_status(&self, window: Duration) -> SyncResult<StatusCounts>;

    /// Events currently awaiting processing (pending + due retrying).
    async fn count_pending(&self) -> SyncResult<usize>;

    /// Find another event of the same key currently in `Processing`.
    async fn processing_peer(
        &self,
        entity_type: &str,
        entity_id: &str,
        excluding: Uuid,
    ) -> SyncResult<Option<SyncEvent>>;

    /// Most recent completed event for a key, by version.
    async fn latest_completed(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> SyncResult<Option<SyncEvent>>;
}

/// Store of conflict records; mutated only by the conflict resolver path.
#[async_trait]
pub trait ConflictStore: Send + Sync {
    async fn insert(&self, record: &ConflictRecord) -> SyncResult<()>;

    async fn update(&self, record: &ConflictRecord) -> SyncResult<()>;

    async fn fetch(&self, id: Uuid) -> SyncResult<Option<ConflictRecord>>;

    /// Most recent record attached to an event, if any.
    async fn latest_for_event(&self, event_id: Uuid) -> SyncResult<Option<ConflictRecord>>;

    async fn count_since(&self, since: DateTime<Utc>) -> SyncResult<usize>;
}

/// Operational state of a replication cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorState {
    Active,
    Paused,
    Error,
    Syncing,
}

impl CursorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorState::Active => "active",
            CursorState::Paused => "paused",
            CursorState::Error => "error",
            CursorState::Syncing => "syncing",
        }
    }
}

impl std::str::FromStr for CursorState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CursorState::Active),
            "paused" => Ok(CursorState::Paused),
            "error" => Ok(CursorState::Error),
            "syncing" => Ok(CursorState::Syncing),
            other => Err(format!("unknown cursor state: {}", other)),
        }
    }
}

/// Per-(entity_type, source, target) replication progress marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationCursor {
    pub id: Uuid,
    pub entity_type: String,
    pub source_region: String,
    pub target_region: String,
    pub state: CursorState,
    /// Never decreases over the cursor's lifetime
    pub last_replicated_version: i64,
    pub last_replicated_at: Option<DateTime<Utc>>,
    pub pending_count: i64,
    pub failed_count: i64,
    pub lag_seconds: i64,
    /// Snapshot of the replication config at cursor creation
    pub config: ReplicationConfig,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReplicationCursor {
    pub fn new(
        entity_type: impl Into<String>,
        source_region: impl Into<String>,
        target_region: impl Into<String>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            source_region: source_region.into(),
            target_region: target_region.into(),
            state: CursorState::Active,
            last_replicated_version: 0,
            last_replicated_at: None,
            pending_count: 0,
            failed_count: 0,
            lag_seconds: 0,
            config,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Advance after a successful replication; versions never move backwards.
    pub fn advance(&mut self, version: i64, at: DateTime<Utc>) {
        if version > self.last_replicated_version {
            self.last_replicated_version = version;
        }
        self.last_replicated_at = Some(at);
        self.lag_seconds = 0;
        self.last_error = None;
        if self.pending_count > 0 {
            self.pending_count -= 1;
        }
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.failed_count += 1;
        self.state = CursorState::Error;
        self.last_error = Some(error.into());
    }

    /// Elapsed seconds since the most recent successful replication.
    pub fn compute_lag(&self, now: DateTime<Utc>) -> i64 {
        match self.last_replicated_at {
            Some(at) => (now - at).num_seconds().max(0),
            None => (now - self.created_at).num_seconds().max(0),
        }
    }
}

/// Store of replication cursors; the replicator is the exclusive writer.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Insert or update the cursor for its unique
    /// (entity_type, source, target) triple.
    async fn upsert(&self, cursor: &ReplicationCursor) -> SyncResult<()>;

    async fn fetch(
        &self,
        entity_type: &str,
        source_region: &str,
        target_region: &str,
    ) -> SyncResult<Option<ReplicationCursor>>;

    async fn list(&self, entity_type: Option<&str>) -> SyncResult<Vec<ReplicationCursor>>;
}

/// Kind of integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Consistency,
    Completeness,
    ReferentialIntegrity,
    SchemaValidation,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Consistency => "consistency",
            CheckKind::Completeness => "completeness",
            CheckKind::ReferentialIntegrity => "referential_integrity",
            CheckKind::SchemaValidation => "schema_validation",
        }
    }
}

impl std::str::FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consistency" => Ok(CheckKind::Consistency),
            "completeness" => Ok(CheckKind::Completeness),
            "referential_integrity" => Ok(CheckKind::ReferentialIntegrity),
            "schema_validation" => Ok(CheckKind::SchemaValidation),
            other => Err(format!("unknown check kind: {}", other)),
        }
    }
}

/// Status of an integrity check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Running,
    Passed,
    Failed,
    Warning,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Running => "running",
            CheckStatus::Passed => "passed",
            CheckStatus::Failed => "failed",
            CheckStatus::Warning => "warning",
        }
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(CheckStatus::Running),
            "passed" => Ok(CheckStatus::Passed),
            "failed" => Ok(CheckStatus::Failed),
            "warning" => Ok(CheckStatus::Warning),
            other => Err(format!("unknown check status: {}", other)),
        }
    }
}

/// One per-record discrepancy surfaced by a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckFinding {
    pub entity_id: String,
    pub field_path: String,
    pub value_a: Option<serde_json::Value>,
    pub value_b: Option<serde_json::Value>,
    pub source_a: String,
    pub source_b: String,
}

/// Result record of one integrity check run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityCheck {
    pub id: Uuid,
    pub entity_type: String,
    pub kind: CheckKind,
    pub sources: Vec<String>,
    pub status: CheckStatus,
    pub records_checked: i64,
    pub inconsistencies_found: i64,
    pub findings: Vec<CheckFinding>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl IntegrityCheck {
    pub fn start(entity_type: impl Into<String>, kind: CheckKind, sources: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            kind,
            sources,
            status: CheckStatus::Running,
            records_checked: 0,
            inconsistencies_found: 0,
            findings: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
        }
    }

    /// Finish the run; `finished_at >= started_at` and the duration is their
    /// difference.
    pub fn finish(&mut self, status: CheckStatus) {
        let finished = Utc::now().max(self.started_at);
        self.status = status;
        self.finished_at = Some(finished);
        self.duration_ms = Some((finished - self.started_at).num_milliseconds());
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }
}

/// Store of integrity check results.
#[async_trait]
pub trait CheckStore: Send + Sync {
    async fn insert(&self, check: &IntegrityCheck) -> SyncResult<()>;

    async fn update(&self, check: &IntegrityCheck) -> SyncResult<()>;

    async fn list_recent(
        &self,
        entity_type: Option<&str>,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<IntegrityCheck>>;
}

/// Validate a status transition, producing the engine error on violation.
pub(crate) fn check_transition(
    event_id: Uuid,
    from: SyncEventStatus,
    to: SyncEventStatus,
) -> SyncResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(SyncError::InvalidTransition {
            event_id,
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn version_packs_clock_and_sequence() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let v = next_version(now, 1, None);
        assert_eq!(v, 1_700_000_000_000 * VERSION_SEQUENCE_SPAN + 1);
    }

    #[test]
    fn version_never_regresses_under_clock_steps() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let prev = next_version(now, 5, None);
        // Clock stepped backwards by a second
        let earlier = Utc.timestamp_millis_opt(1_699_999_999_000).unwrap();
        let v = next_version(earlier, 6, Some(prev));
        assert!(v > prev);
    }

    #[test]
    fn status_machine_accepts_only_legal_transitions() {
        use SyncEventStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Retrying));
    }

    #[test]
    fn cursor_advance_is_monotonic() {
        let mut cursor =
            ReplicationCursor::new("product", "region-a", "region-b", ReplicationConfig::default());
        let now = Utc::now();
        cursor.advance(500, now);
        assert_eq!(cursor.last_replicated_version, 500);
        cursor.advance(300, now);
        assert_eq!(cursor.last_replicated_version, 500);
        cursor.advance(700, now);
        assert_eq!(cursor.last_replicated_version, 700);
    }

    #[test]
    fn cursor_failure_moves_to_error_without_advancing() {
        let mut cursor =
            ReplicationCursor::new("product", "region-a", "region-b", ReplicationConfig::default());
        cursor.advance(100, Utc::now());
        cursor.record_failure("target rejected message");
        assert_eq!(cursor.state, CursorState::Error);
        assert_eq!(cursor.last_replicated_version, 100);
        assert_eq!(cursor.failed_count, 1);
    }

    #[test]
    fn check_duration_is_non_negative() {
        let mut check = IntegrityCheck::start("user", CheckKind::Consistency, vec![]);
        check.finish(CheckStatus::Passed);
        assert!(check.finished_at.unwrap() >= check.started_at);
        assert!(check.duration_ms.unwrap() >= 0);
    }

    #[test]
    fn failure_rate_ignores_unsettled_events() {
        let counts = StatusCounts {
            pending: 10,
            processing: 2,
            completed: 90,
            failed: 10,
            retrying: 3,
        };
        assert!((counts.failure_rate() - 0.1).abs() < f64::EPSILON);
        assert_eq!(StatusCounts::default().failure_rate(), 0.0);
    }
}
