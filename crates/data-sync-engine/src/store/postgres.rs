// File: src/store/postgres.rs
//
// PostgreSQL-backed implementations of the four sync stores
// Version assignment happens inside the append transaction; the claim query
// serializes per-entity processing with a NOT EXISTS guard

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use data_sync_core::conflict::{ConflictKind, ConflictRecord, ConflictState, ResolutionStrategy};
use data_sync_core::error::{SyncError, SyncResult};
use data_sync_core::payload::Payload;

pub use crate::db::PgPool;
use crate::db::schema::{conflict_records, integrity_checks, replication_cursors, sync_events};

use super::{
    next_version, CheckFinding, CheckStore, ConflictStore, CursorStore, EventMetadata, EventStore,
    IntegrityCheck, NewSyncEvent, ReplicationCursor, StatusCounts, SyncEvent, SyncEventStatus,
};

/// Error carrier inside diesel transactions; collapses back into
/// [`SyncError`] at the store boundary.
#[derive(Debug)]
enum TxError {
    Diesel(diesel::result::Error),
    Sync(SyncError),
}

impl From<diesel::result::Error> for TxError {
    fn from(e: diesel::result::Error) -> Self {
        TxError::Diesel(e)
    }
}

impl From<SyncError> for TxError {
    fn from(e: SyncError) -> Self {
        TxError::Sync(e)
    }
}

impl From<TxError> for SyncError {
    fn from(e: TxError) -> Self {
        match e {
            TxError::Diesel(e) => SyncError::DatabaseError {
                message: e.to_string(),
            },
            TxError::Sync(e) => e,
        }
    }
}

fn db_err(context: &str, e: impl std::fmt::Display) -> SyncError {
    SyncError::DatabaseError {
        message: format!("{}: {}", context, e),
    }
}

fn serde_err(context: &str, e: impl std::fmt::Display) -> SyncError {
    SyncError::SerializationError {
        message: format!("{}: {}", context, e),
    }
}

type PooledPg =
    diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<diesel::PgConnection>>;

fn get_connection(pool: &PgPool) -> SyncResult<PooledPg> {
    pool.get()
        .map_err(|e| db_err("Failed to get database connection", e))
}

// ================================
// Event store
// ================================

#[derive(Debug, Clone, Queryable, QueryableByName, Insertable, Selectable)]
#[diesel(table_name = sync_events)]
struct SyncEventRecord {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub kind: String,
    pub source: String,
    pub origin_region: String,
    pub payload: Value,
    pub previous: Option<Value>,
    pub version: i64,
    pub sequence: i64,
    pub submitted_at: DateTime<Utc>,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

impl SyncEventRecord {
    fn from_event(event: &SyncEvent) -> SyncResult<Self> {
        Ok(Self {
            id: event.id,
            entity_type: event.entity_type.clone(),
            entity_id: event.entity_id.clone(),
            kind: event.kind.as_str().to_string(),
            source: event.source.clone(),
            origin_region: event.origin_region.clone(),
            payload: serde_json::to_value(&event.payload)
                .map_err(|e| serde_err("Failed to serialize event payload", e))?,
            previous: event
                .previous
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| serde_err("Failed to serialize previous snapshot", e))?,
            version: event.version,
            sequence: event.sequence,
            submitted_at: event.submitted_at,
            status: event.status.as_str().to_string(),
            attempts: event.attempts,
            max_attempts: event.max_attempts,
            last_error: event.last_error.clone(),
            next_attempt_at: event.next_attempt_at,
            metadata: serde_json::to_value(&event.metadata)
                .map_err(|e| serde_err("Failed to serialize event metadata", e))?,
        })
    }

    fn into_event(self) -> SyncResult<SyncEvent> {
        Ok(SyncEvent {
            id: self.id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            kind: self
                .kind
                .parse()
                .map_err(|e| serde_err("Failed to parse event kind", e))?,
            source: self.source,
            origin_region: self.origin_region,
            payload: serde_json::from_value(self.payload)
                .map_err(|e| serde_err("Failed to deserialize event payload", e))?,
            previous: self
                .previous
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| serde_err("Failed to deserialize previous snapshot", e))?,
            version: self.version,
            sequence: self.sequence,
            submitted_at: self.submitted_at,
            status: self
                .status
                .parse()
                .map_err(|e| serde_err("Failed to parse event status", e))?,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            last_error: self.last_error,
            next_attempt_at: self.next_attempt_at,
            metadata: serde_json::from_value(self.metadata)
                .map_err(|e| serde_err("Failed to deserialize event metadata", e))?,
        })
    }
}

/// PostgreSQL implementation of the event store.
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn fetch_record(conn: &mut PgConnection, event_id: Uuid) -> Result<SyncEventRecord, TxError> {
        sync_events::table
            .filter(sync_events::id.eq(event_id))
            .first::<SyncEventRecord>(conn)
            .optional()?
            .ok_or(TxError::Sync(SyncError::EventNotFound { event_id }))
    }

    fn current_status(record: &SyncEventRecord) -> Result<SyncEventStatus, TxError> {
        record
            .status
            .parse::<SyncEventStatus>()
            .map_err(|e| TxError::Sync(serde_err("Failed to parse event status", e)))
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, event: NewSyncEvent) -> SyncResult<SyncEvent> {
        let mut conn = get_connection(&self.pool)?;
        let now = Utc::now();

        let stored = conn
            .transaction::<SyncEvent, TxError, _>(|conn| {
                let (max_sequence, max_version): (Option<i64>, Option<i64>) = sync_events::table
                    .filter(sync_events::entity_type.eq(&event.entity_type))
                    .filter(sync_events::entity_id.eq(&event.entity_id))
                    .select((
                        diesel::dsl::max(sync_events::sequence),
                        diesel::dsl::max(sync_events::version),
                    ))
                    .first(conn)?;

                let sequence = max_sequence.unwrap_or(0) + 1;
                let version = next_version(now, sequence, max_version);

                let stored = SyncEvent {
                    id: Uuid::new_v4(),
                    entity_type: event.entity_type.clone(),
                    entity_id: event.entity_id.clone(),
                    kind: event.kind,
                    source: event.source.clone(),
                    origin_region: event.origin_region.clone(),
                    payload: event.payload.clone(),
                    previous: event.previous.clone(),
                    version,
                    sequence,
                    submitted_at: now,
                    status: SyncEventStatus::Pending,
                    attempts: 0,
                    max_attempts: event.max_attempts,
                    last_error: None,
                    next_attempt_at: None,
                    metadata: event.metadata.clone(),
                };

                let record = SyncEventRecord::from_event(&stored)?;
                diesel::insert_into(sync_events::table)
                    .values(&record)
                    .execute(conn)?;

                Ok(stored)
            })
            .map_err(SyncError::from)?;

        Ok(stored)
    }

    async fn fetch(&self, event_id: Uuid) -> SyncResult<SyncEvent> {
        let mut conn = get_connection(&self.pool)?;
        let record: Option<SyncEventRecord> = sync_events::table
            .filter(sync_events::id.eq(event_id))
            .first(&mut conn)
            .optional()
            .map_err(|e| db_err("Failed to load event", e))?;
        record
            .ok_or(SyncError::EventNotFound { event_id })?
            .into_event()
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> SyncResult<Option<SyncEvent>> {
        let mut conn = get_connection(&self.pool)?;

        // Single statement so concurrent workers cannot claim two events of
        // the same entity key: the inner select skips keys with a processing
        // row and locked candidates.
        let claimed: Option<SyncEventRecord> = diesel::sql_query(
            r#"
            UPDATE sync_events SET status = 'processing'
            WHERE id = (
                SELECT e.id FROM sync_events e
                WHERE (
                        e.status = 'pending'
                        OR (e.status = 'retrying'
                            AND (e.next_attempt_at IS NULL OR e.next_attempt_at <= $1))
                      )
                  AND NOT EXISTS (
                        SELECT 1 FROM sync_events p
                        WHERE p.status = 'processing'
                          AND p.entity_type = e.entity_type
                          AND p.entity_id = e.entity_id
                  )
                ORDER BY CASE e.kind
                             WHEN 'delete' THEN 0
                             WHEN 'create' THEN 1
                             WHEN 'update' THEN 2
                             ELSE 3
                         END,
                         e.submitted_at ASC,
                         e.version ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind::<diesel::sql_types::Timestamptz, _>(now)
        .get_result(&mut conn)
        .optional()
        .map_err(|e| db_err("Failed to claim next event", e))?;

        claimed.map(SyncEventRecord::into_event).transpose()
    }

    async fn list_pending(&self, limit: usize) -> SyncResult<Vec<SyncEvent>> {
        let mut conn = get_connection(&self.pool)?;
        let records: Vec<SyncEventRecord> = sync_events::table
            .filter(sync_events::status.eq(SyncEventStatus::Pending.as_str()))
            .order(sync_events::submitted_at.asc())
            .limit(limit as i64)
            .load(&mut conn)
            .map_err(|e| db_err("Failed to list pending events", e))?;
        records
            .into_iter()
            .map(SyncEventRecord::into_event)
            .collect()
    }

    async fn list_since(
        &self,
        entity_type: &str,
        source_region: &str,
        min_version: i64,
        limit: usize,
    ) -> SyncResult<Vec<SyncEvent>> {
        let mut conn = get_connection(&self.pool)?;
        let records: Vec<SyncEventRecord> = sync_events::table
            .filter(sync_events::status.eq(SyncEventStatus::Completed.as_str()))
            .filter(sync_events::entity_type.eq(entity_type))
            .filter(sync_events::origin_region.eq(source_region))
            .filter(sync_events::version.gt(min_version))
            .order(sync_events::version.asc())
            .limit(limit as i64)
            .load(&mut conn)
            .map_err(|e| db_err("Failed to list events since version", e))?;
        records
            .into_iter()
            .map(SyncEventRecord::into_event)
            .collect()
    }

    async fn update_status(
        &self,
        event_id: Uuid,
        status: SyncEventStatus,
        error: Option<String>,
    ) -> SyncResult<()> {
        let mut conn = get_connection(&self.pool)?;
        conn.transaction::<(), TxError, _>(|conn| {
            let record = Self::fetch_record(conn, event_id)?;
            let current = Self::current_status(&record)?;
            super::check_transition(event_id, current, status).map_err(TxError::Sync)?;

            if let Some(message) = error {
                diesel::update(sync_events::table.filter(sync_events::id.eq(event_id)))
                    .set((
                        sync_events::status.eq(status.as_str()),
                        sync_events::last_error.eq(Some(message)),
                    ))
                    .execute(conn)?;
            } else {
                diesel::update(sync_events::table.filter(sync_events::id.eq(event_id)))
                    .set(sync_events::status.eq(status.as_str()))
                    .execute(conn)?;
            }
            Ok(())
        })
        .map_err(SyncError::from)
    }

    async fn record_attempt(
        &self,
        event_id: Uuid,
        status: SyncEventStatus,
        error: Option<String>,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> SyncResult<()> {
        let mut conn = get_connection(&self.pool)?;
        conn.transaction::<(), TxError, _>(|conn| {
            let record = Self::fetch_record(conn, event_id)?;
            let current = Self::current_status(&record)?;
            super::check_transition(event_id, current, status).map_err(TxError::Sync)?;

            diesel::update(sync_events::table.filter(sync_events::id.eq(event_id)))
                .set((
                    sync_events::status.eq(status.as_str()),
                    sync_events::attempts.eq(record.attempts + 1),
                    sync_events::last_error.eq(error),
                    sync_events::next_attempt_at.eq(next_attempt_at),
                ))
                .execute(conn)?;
            Ok(())
        })
        .map_err(SyncError::from)
    }

    async fn replace_payload(&self, event_id: Uuid, payload: Payload) -> SyncResult<()> {
        let mut conn = get_connection(&self.pool)?;
        let value = serde_json::to_value(&payload)
            .map_err(|e| serde_err("Failed to serialize payload", e))?;
        let updated = diesel::update(sync_events::table.filter(sync_events::id.eq(event_id)))
            .set(sync_events::payload.eq(value))
            .execute(&mut conn)
            .map_err(|e| db_err("Failed to replace event payload", e))?;
        if updated == 0 {
            return Err(SyncError::EventNotFound { event_id });
        }
        Ok(())
    }

    async fn tag_metadata(&self, event_id: Uuid, key: &str, value: String) -> SyncResult<()> {
        let mut conn = get_connection(&self.pool)?;
        conn.transaction::<(), TxError, _>(|conn| {
            let record = Self::fetch_record(conn, event_id)?;
            let mut metadata: EventMetadata = serde_json::from_value(record.metadata)
                .map_err(|e| TxError::Sync(serde_err("Failed to deserialize metadata", e)))?;
            metadata.tags.insert(key.to_string(), value);
            let metadata = serde_json::to_value(&metadata)
                .map_err(|e| TxError::Sync(serde_err("Failed to serialize metadata", e)))?;
            diesel::update(sync_events::table.filter(sync_events::id.eq(event_id)))
                .set(sync_events::metadata.eq(metadata))
                .execute(conn)?;
            Ok(())
        })
        .map_err(SyncError::from)
    }

    async fn count_by_status(&self, window: Duration) -> SyncResult<StatusCounts> {
        let mut conn = get_connection(&self.pool)?;
        let cutoff = Utc::now() - window;
        let rows: Vec<(String, i64)> = sync_events::table
            .filter(sync_events::submitted_at.ge(cutoff))
            .group_by(sync_events::status)
            .select((sync_events::status, diesel::dsl::count_star()))
            .load(&mut conn)
            .map_err(|e| db_err("Failed to count events by status", e))?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status.parse::<SyncEventStatus>() {
                Ok(SyncEventStatus::Pending) => counts.pending = count as usize,
                Ok(SyncEventStatus::Processing) => counts.processing = count as usize,
                Ok(SyncEventStatus::Completed) => counts.completed = count as usize,
                Ok(SyncEventStatus::Failed) => counts.failed = count as usize,
                Ok(SyncEventStatus::Retrying) => counts.retrying = count as usize,
                Err(_) => {}
            }
        }
        Ok(counts)
    }

    async fn count_pending(&self) -> SyncResult<usize> {
        let mut conn = get_connection(&self.pool)?;
        let count: i64 = sync_events::table
            .filter(sync_events::status.eq_any(vec![
                SyncEventStatus::Pending.as_str(),
                SyncEventStatus::Retrying.as_str(),
            ]))
            .count()
            .get_result(&mut conn)
            .map_err(|e| db_err("Failed to count pending events", e))?;
        Ok(count as usize)
    }

    async fn processing_peer(
        &self,
        entity_type: &str,
        entity_id: &str,
        excluding: Uuid,
    ) -> SyncResult<Option<SyncEvent>> {
        let mut conn = get_connection(&self.pool)?;
        let record: Option<SyncEventRecord> = sync_events::table
            .filter(sync_events::status.eq(SyncEventStatus::Processing.as_str()))
            .filter(sync_events::entity_type.eq(entity_type))
            .filter(sync_events::entity_id.eq(entity_id))
            .filter(sync_events::id.ne(excluding))
            .first(&mut conn)
            .optional()
            .map_err(|e| db_err("Failed to probe for processing peer", e))?;
        record.map(SyncEventRecord::into_event).transpose()
    }

    async fn latest_completed(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> SyncResult<Option<SyncEvent>> {
        let mut conn = get_connection(&self.pool)?;
        let record: Option<SyncEventRecord> = sync_events::table
            .filter(sync_events::status.eq(SyncEventStatus::Completed.as_str()))
            .filter(sync_events::entity_type.eq(entity_type))
            .filter(sync_events::entity_id.eq(entity_id))
            .order(sync_events::version.desc())
            .first(&mut conn)
            .optional()
            .map_err(|e| db_err("Failed to load latest completed event", e))?;
        record.map(SyncEventRecord::into_event).transpose()
    }
}

// ================================
// Conflict store
// ================================

#[derive(Debug, Clone, Queryable, Insertable, Selectable)]
#[diesel(table_name = conflict_records)]
struct ConflictRecordRow {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub event_id: Option<Uuid>,
    pub kind: String,
    pub strategy: String,
    pub state: String,
    pub snapshot_a: Value,
    pub snapshot_b: Value,
    pub resolved_payload: Option<Value>,
    pub reason: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub participating_sources: Value,
}

impl ConflictRecordRow {
    fn from_record(record: &ConflictRecord) -> SyncResult<Self> {
        Ok(Self {
            id: record.id,
            entity_type: record.entity_type.clone(),
            entity_id: record.entity_id.clone(),
            event_id: record.event_id,
            kind: record.kind.as_str().to_string(),
            strategy: record.strategy.as_str().to_string(),
            state: record.state.as_str().to_string(),
            snapshot_a: serde_json::to_value(&record.snapshot_a)
                .map_err(|e| serde_err("Failed to serialize snapshot a", e))?,
            snapshot_b: serde_json::to_value(&record.snapshot_b)
                .map_err(|e| serde_err("Failed to serialize snapshot b", e))?,
            resolved_payload: record
                .resolved_payload
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| serde_err("Failed to serialize resolved payload", e))?,
            reason: record.reason.clone(),
            detected_at: record.detected_at,
            resolved_at: record.resolved_at,
            participating_sources: serde_json::to_value(&record.participating_sources)
                .map_err(|e| serde_err("Failed to serialize participating sources", e))?,
        })
    }

    fn into_record(self) -> SyncResult<ConflictRecord> {
        let kind: ConflictKind = self
            .kind
            .parse()
            .map_err(|e| serde_err("Failed to parse conflict kind", e))?;
        let strategy: ResolutionStrategy = self
            .strategy
            .parse()
            .map_err(|e| serde_err("Failed to parse resolution strategy", e))?;
        let state: ConflictState = self
            .state
            .parse()
            .map_err(|e| serde_err("Failed to parse conflict state", e))?;

        Ok(ConflictRecord {
            id: self.id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            event_id: self.event_id,
            kind,
            strategy,
            state,
            snapshot_a: serde_json::from_value(self.snapshot_a)
                .map_err(|e| serde_err("Failed to deserialize snapshot a", e))?,
            snapshot_b: serde_json::from_value(self.snapshot_b)
                .map_err(|e| serde_err("Failed to deserialize snapshot b", e))?,
            resolved_payload: self
                .resolved_payload
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| serde_err("Failed to deserialize resolved payload", e))?,
            reason: self.reason,
            detected_at: self.detected_at,
            resolved_at: self.resolved_at,
            participating_sources: serde_json::from_value(self.participating_sources)
                .map_err(|e| serde_err("Failed to deserialize participating sources", e))?,
        })
    }
}

/// PostgreSQL implementation of the conflict record store.
pub struct PostgresConflictStore {
    pool: PgPool,
}

impl PostgresConflictStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConflictStore for PostgresConflictStore {
    async fn insert(&self, record: &ConflictRecord) -> SyncResult<()> {
        let mut conn = get_connection(&self.pool)?;
        let row = ConflictRecordRow::from_record(record)?;
        diesel::insert_into(conflict_records::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| db_err("Failed to insert conflict record", e))?;
        Ok(())
    }

    async fn update(&self, record: &ConflictRecord) -> SyncResult<()> {
        let mut conn = get_connection(&self.pool)?;
        let row = ConflictRecordRow::from_record(record)?;
        diesel::update(conflict_records::table.filter(conflict_records::id.eq(record.id)))
            .set((
                conflict_records::state.eq(row.state),
                conflict_records::resolved_payload.eq(row.resolved_payload),
                conflict_records::reason.eq(row.reason),
                conflict_records::resolved_at.eq(row.resolved_at),
            ))
            .execute(&mut conn)
            .map_err(|e| db_err("Failed to update conflict record", e))?;
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> SyncResult<Option<ConflictRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let row: Option<ConflictRecordRow> = conflict_records::table
            .filter(conflict_records::id.eq(id))
            .first(&mut conn)
            .optional()
            .map_err(|e| db_err("Failed to load conflict record", e))?;
        row.map(ConflictRecordRow::into_record).transpose()
    }

    async fn latest_for_event(&self, event_id: Uuid) -> SyncResult<Option<ConflictRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let row: Option<ConflictRecordRow> = conflict_records::table
            .filter(conflict_records::event_id.eq(event_id))
            .order(conflict_records::detected_at.desc())
            .first(&mut conn)
            .optional()
            .map_err(|e| db_err("Failed to load conflict record for event", e))?;
        row.map(ConflictRecordRow::into_record).transpose()
    }

    async fn count_since(&self, since: DateTime<Utc>) -> SyncResult<usize> {
        let mut conn = get_connection(&self.pool)?;
        let count: i64 = conflict_records::table
            .filter(conflict_records::detected_at.ge(since))
            .count()
            .get_result(&mut conn)
            .map_err(|e| db_err("Failed to count conflict records", e))?;
        Ok(count as usize)
    }
}

// ================================
// Cursor store
// ================================

#[derive(Debug, Clone, Queryable, Insertable, Selectable)]
#[diesel(table_name = replication_cursors)]
struct CursorRow {
    pub id: Uuid,
    pub entity_type: String,
    pub source_region: String,
    pub target_region: String,
    pub state: String,
    pub last_replicated_version: i64,
    pub last_replicated_at: Option<DateTime<Utc>>,
    pub pending_count: i64,
    pub failed_count: i64,
    pub lag_seconds: i64,
    pub config: Value,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CursorRow {
    fn from_cursor(cursor: &ReplicationCursor) -> SyncResult<Self> {
        Ok(Self {
            id: cursor.id,
            entity_type: cursor.entity_type.clone(),
            source_region: cursor.source_region.clone(),
            target_region: cursor.target_region.clone(),
            state: cursor.state.as_str().to_string(),
            last_replicated_version: cursor.last_replicated_version,
            last_replicated_at: cursor.last_replicated_at,
            pending_count: cursor.pending_count,
            failed_count: cursor.failed_count,
            lag_seconds: cursor.lag_seconds,
            config: serde_json::to_value(&cursor.config)
                .map_err(|e| serde_err("Failed to serialize cursor config", e))?,
            last_error: cursor.last_error.clone(),
            created_at: cursor.created_at,
        })
    }

    fn into_cursor(self) -> SyncResult<ReplicationCursor> {
        Ok(ReplicationCursor {
            id: self.id,
            entity_type: self.entity_type,
            source_region: self.source_region,
            target_region: self.target_region,
            state: self
                .state
                .parse()
                .map_err(|e| serde_err("Failed to parse cursor state", e))?,
            last_replicated_version: self.last_replicated_version,
            last_replicated_at: self.last_replicated_at,
            pending_count: self.pending_count,
            failed_count: self.failed_count,
            lag_seconds: self.lag_seconds,
            config: serde_json::from_value(self.config)
                .map_err(|e| serde_err("Failed to deserialize cursor config", e))?,
            last_error: self.last_error,
            created_at: self.created_at,
        })
    }
}

/// PostgreSQL implementation of the replication cursor store.
pub struct PostgresCursorStore {
    pool: PgPool,
}

impl PostgresCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for PostgresCursorStore {
    async fn upsert(&self, cursor: &ReplicationCursor) -> SyncResult<()> {
        let mut conn = get_connection(&self.pool)?;
        let row = CursorRow::from_cursor(cursor)?;
        diesel::insert_into(replication_cursors::table)
            .values(&row)
            .on_conflict((
                replication_cursors::entity_type,
                replication_cursors::source_region,
                replication_cursors::target_region,
            ))
            .do_update()
            .set((
                replication_cursors::state.eq(&row.state),
                replication_cursors::last_replicated_version.eq(row.last_replicated_version),
                replication_cursors::last_replicated_at.eq(row.last_replicated_at),
                replication_cursors::pending_count.eq(row.pending_count),
                replication_cursors::failed_count.eq(row.failed_count),
                replication_cursors::lag_seconds.eq(row.lag_seconds),
                replication_cursors::last_error.eq(&row.last_error),
            ))
            .execute(&mut conn)
            .map_err(|e| db_err("Failed to upsert replication cursor", e))?;
        Ok(())
    }

    async fn fetch(
        &self,
        entity_type: &str,
        source_region: &str,
        target_region: &str,
    ) -> SyncResult<Option<ReplicationCursor>> {
        let mut conn = get_connection(&self.pool)?;
        let row: Option<CursorRow> = replication_cursors::table
            .filter(replication_cursors::entity_type.eq(entity_type))
            .filter(replication_cursors::source_region.eq(source_region))
            .filter(replication_cursors::target_region.eq(target_region))
            .first(&mut conn)
            .optional()
            .map_err(|e| db_err("Failed to load replication cursor", e))?;
        row.map(CursorRow::into_cursor).transpose()
    }

    async fn list(&self, entity_type: Option<&str>) -> SyncResult<Vec<ReplicationCursor>> {
        let mut conn = get_connection(&self.pool)?;
        let mut query = replication_cursors::table.into_boxed();
        if let Some(entity_type) = entity_type {
            query = query.filter(replication_cursors::entity_type.eq(entity_type.to_string()));
        }
        let rows: Vec<CursorRow> = query
            .order((
                replication_cursors::entity_type.asc(),
                replication_cursors::source_region.asc(),
                replication_cursors::target_region.asc(),
            ))
            .load(&mut conn)
            .map_err(|e| db_err("Failed to list replication cursors", e))?;
        rows.into_iter().map(CursorRow::into_cursor).collect()
    }
}

// ================================
// Integrity check store
// ================================

#[derive(Debug, Clone, Queryable, Insertable, Selectable)]
#[diesel(table_name = integrity_checks)]
struct CheckRow {
    pub id: Uuid,
    pub entity_type: String,
    pub kind: String,
    pub sources: Value,
    pub status: String,
    pub records_checked: i64,
    pub inconsistencies_found: i64,
    pub findings: Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl CheckRow {
    fn from_check(check: &IntegrityCheck) -> SyncResult<Self> {
        Ok(Self {
            id: check.id,
            entity_type: check.entity_type.clone(),
            kind: check.kind.as_str().to_string(),
            sources: serde_json::to_value(&check.sources)
                .map_err(|e| serde_err("Failed to serialize check sources", e))?,
            status: check.status.as_str().to_string(),
            records_checked: check.records_checked,
            inconsistencies_found: check.inconsistencies_found,
            findings: serde_json::to_value(&check.findings)
                .map_err(|e| serde_err("Failed to serialize check findings", e))?,
            started_at: check.started_at,
            finished_at: check.finished_at,
            duration_ms: check.duration_ms,
        })
    }

    fn into_check(self) -> SyncResult<IntegrityCheck> {
        let findings: Vec<CheckFinding> = serde_json::from_value(self.findings)
            .map_err(|e| serde_err("Failed to deserialize check findings", e))?;
        Ok(IntegrityCheck {
            id: self.id,
            entity_type: self.entity_type,
            kind: self
                .kind
                .parse()
                .map_err(|e| serde_err("Failed to parse check kind", e))?,
            sources: serde_json::from_value(self.sources)
                .map_err(|e| serde_err("Failed to deserialize check sources", e))?,
            status: self
                .status
                .parse()
                .map_err(|e| serde_err("Failed to parse check status", e))?,
            records_checked: self.records_checked,
            inconsistencies_found: self.inconsistencies_found,
            findings,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_ms: self.duration_ms,
        })
    }
}

/// PostgreSQL implementation of the integrity check store.
pub struct PostgresCheckStore {
    pool: PgPool,
}

impl PostgresCheckStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckStore for PostgresCheckStore {
    async fn insert(&self, check: &IntegrityCheck) -> SyncResult<()> {
        let mut conn = get_connection(&self.pool)?;
        let row = CheckRow::from_check(check)?;
        diesel::insert_into(integrity_checks::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| db_err("Failed to insert integrity check", e))?;
        Ok(())
    }

    async fn update(&self, check: &IntegrityCheck) -> SyncResult<()> {
        let mut conn = get_connection(&self.pool)?;
        let row = CheckRow::from_check(check)?;
        diesel::update(integrity_checks::table.filter(integrity_checks::id.eq(check.id)))
            .set((
                integrity_checks::status.eq(row.status),
                integrity_checks::records_checked.eq(row.records_checked),
                integrity_checks::inconsistencies_found.eq(row.inconsistencies_found),
                integrity_checks::findings.eq(row.findings),
                integrity_checks::finished_at.eq(row.finished_at),
                integrity_checks::duration_ms.eq(row.duration_ms),
            ))
            .execute(&mut conn)
            .map_err(|e| db_err("Failed to update integrity check", e))?;
        Ok(())
    }

    async fn list_recent(
        &self,
        entity_type: Option<&str>,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<IntegrityCheck>> {
        let mut conn = get_connection(&self.pool)?;
        let mut query = integrity_checks::table
            .filter(integrity_checks::started_at.ge(since))
            .into_boxed();
        if let Some(entity_type) = entity_type {
            query = query.filter(integrity_checks::entity_type.eq(entity_type.to_string()));
        }
        let rows: Vec<CheckRow> = query
            .order(integrity_checks::started_at.asc())
            .load(&mut conn)
            .map_err(|e| db_err("Failed to list integrity checks", e))?;
        rows.into_iter().map(CheckRow::into_check).collect()
    }
}
