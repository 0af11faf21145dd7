// File: src/store/memory.rs
//
// In-memory store implementations backing tests and embedded deployments
// State lives behind a single async mutex per store; the event store keys a
// processing set to enforce per-entity serialization

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use data_sync_core::conflict::ConflictRecord;
use data_sync_core::error::{SyncError, SyncResult};
use data_sync_core::payload::Payload;

use super::{
    check_transition, next_version, CheckStore, ConflictStore, CursorStore, EventStore,
    IntegrityCheck, NewSyncEvent, ReplicationCursor, StatusCounts, SyncEvent, SyncEventStatus,
};

#[derive(Default)]
struct EventState {
    events: HashMap<Uuid, SyncEvent>,
}

impl EventState {
    fn per_key_maxima(&self, entity_type: &str, entity_id: &str) -> (i64, Option<i64>) {
        let mut max_sequence = 0;
        let mut max_version = None;
        for event in self.events.values() {
            if event.entity_type == entity_type && event.entity_id == entity_id {
                max_sequence = max_sequence.max(event.sequence);
                max_version = Some(max_version.map_or(event.version, |v: i64| v.max(event.version)));
            }
        }
        (max_sequence, max_version)
    }

    fn key_is_processing(&self, entity_type: &str, entity_id: &str) -> bool {
        self.events.values().any(|e| {
            e.status == SyncEventStatus::Processing
                && e.entity_type == entity_type
                && e.entity_id == entity_id
        })
    }
}

/// In-memory append-only event log with per-entity version assignment.
#[derive(Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<EventState>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: NewSyncEvent) -> SyncResult<SyncEvent> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let (max_sequence, max_version) =
            state.per_key_maxima(&event.entity_type, &event.entity_id);
        let sequence = max_sequence + 1;
        let version = next_version(now, sequence, max_version);

        let stored = SyncEvent {
            id: Uuid::new_v4(),
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            kind: event.kind,
            source: event.source,
            origin_region: event.origin_region,
            payload: event.payload,
            previous: event.previous,
            version,
            sequence,
            submitted_at: now,
            status: SyncEventStatus::Pending,
            attempts: 0,
            max_attempts: event.max_attempts,
            last_error: None,
            next_attempt_at: None,
            metadata: event.metadata,
        };
        state.events.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn fetch(&self, event_id: Uuid) -> SyncResult<SyncEvent> {
        let state = self.state.lock().await;
        state
            .events
            .get(&event_id)
            .cloned()
            .ok_or(SyncError::EventNotFound { event_id })
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> SyncResult<Option<SyncEvent>> {
        let mut state = self.state.lock().await;

        let mut candidates: Vec<&SyncEvent> = state
            .events
            .values()
            .filter(|e| match e.status {
                SyncEventStatus::Pending => true,
                SyncEventStatus::Retrying => {
                    e.next_attempt_at.map_or(true, |at| at <= now)
                }
                _ => false,
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.kind
                .priority()
                .cmp(&b.kind.priority())
                .then(a.submitted_at.cmp(&b.submitted_at))
                .then(a.version.cmp(&b.version))
        });

        let chosen = candidates
            .iter()
            .find(|e| !state.key_is_processing(&e.entity_type, &e.entity_id))
            .map(|e| e.id);

        if let Some(id) = chosen {
            let event = state
                .events
                .get_mut(&id)
                .ok_or(SyncError::EventNotFound { event_id: id })?;
            check_transition(id, event.status, SyncEventStatus::Processing)?;
            event.status = SyncEventStatus::Processing;
            return Ok(Some(event.clone()));
        }
        Ok(None)
    }

    async fn list_pending(&self, limit: usize) -> SyncResult<Vec<SyncEvent>> {
        let state = self.state.lock().await;
        let mut pending: Vec<SyncEvent> = state
            .events
            .values()
            .filter(|e| e.status == SyncEventStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.kind
                .priority()
                .cmp(&b.kind.priority())
                .then(a.submitted_at.cmp(&b.submitted_at))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn list_since(
        &self,
        entity_type: &str,
        source_region: &str,
        min_version: i64,
        limit: usize,
    ) -> SyncResult<Vec<SyncEvent>> {
        let state = self.state.lock().await;
        let mut events: Vec<SyncEvent> = state
            .events
            .values()
            .filter(|e| {
                e.status == SyncEventStatus::Completed
                    && e.entity_type == entity_type
                    && e.origin_region == source_region
                    && e.version > min_version
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        events.truncate(limit);
        Ok(events)
    }

    async fn update_status(
        &self,
        event_id: Uuid,
        status: SyncEventStatus,
        error: Option<String>,
    ) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        let event = state
            .events
            .get_mut(&event_id)
            .ok_or(SyncError::EventNotFound { event_id })?;
        check_transition(event_id, event.status, status)?;
        event.status = status;
        if error.is_some() {
            event.last_error = error;
        }
        Ok(())
    }

    async fn record_attempt(
        &self,
        event_id: Uuid,
        status: SyncEventStatus,
        error: Option<String>,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        let event = state
            .events
            .get_mut(&event_id)
            .ok_or(SyncError::EventNotFound { event_id })?;
        check_transition(event_id, event.status, status)?;
        event.attempts += 1;
        event.status = status;
        event.last_error = error;
        event.next_attempt_at = next_attempt_at;
        Ok(())
    }

    async fn replace_payload(&self, event_id: Uuid, payload: Payload) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        let event = state
            .events
            .get_mut(&event_id)
            .ok_or(SyncError::EventNotFound { event_id })?;
        event.payload = payload;
        Ok(())
    }

    async fn tag_metadata(&self, event_id: Uuid, key: &str, value: String) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        let event = state
            .events
            .get_mut(&event_id)
            .ok_or(SyncError::EventNotFound { event_id })?;
        event.metadata.tags.insert(key.to_string(), value);
        Ok(())
    }

    async fn count_by_status(&self, window: Duration) -> SyncResult<StatusCounts> {
        let state = self.state.lock().await;
        let cutoff = Utc::now() - window;
        let mut counts = StatusCounts::default();
        for event in state.events.values() {
            if event.submitted_at < cutoff {
                continue;
            }
            match event.status {
                SyncEventStatus::Pending => counts.pending += 1,
                SyncEventStatus::Processing => counts.processing += 1,
                SyncEventStatus::Completed => counts.completed += 1,
                SyncEventStatus::Failed => counts.failed += 1,
                SyncEventStatus::Retrying => counts.retrying += 1,
            }
        }
        Ok(counts)
    }

    async fn count_pending(&self) -> SyncResult<usize> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .values()
            .filter(|e| {
                matches!(
                    e.status,
                    SyncEventStatus::Pending | SyncEventStatus::Retrying
                )
            })
            .count())
    }

    async fn processing_peer(
        &self,
        entity_type: &str,
        entity_id: &str,
        excluding: Uuid,
    ) -> SyncResult<Option<SyncEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .values()
            .find(|e| {
                e.id != excluding
                    && e.status == SyncEventStatus::Processing
                    && e.entity_type == entity_type
                    && e.entity_id == entity_id
            })
            .cloned())
    }

    async fn latest_completed(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> SyncResult<Option<SyncEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .values()
            .filter(|e| {
                e.status == SyncEventStatus::Completed
                    && e.entity_type == entity_type
                    && e.entity_id == entity_id
            })
            .max_by_key(|e| e.version)
            .cloned())
    }
}

/// In-memory conflict record store.
#[derive(Default)]
pub struct InMemoryConflictStore {
    records: Arc<Mutex<HashMap<Uuid, ConflictRecord>>>,
}

impl InMemoryConflictStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConflictStore for InMemoryConflictStore {
    async fn insert(&self, record: &ConflictRecord) -> SyncResult<()> {
        let mut records = self.records.lock().await;
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &ConflictRecord) -> SyncResult<()> {
        let mut records = self.records.lock().await;
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> SyncResult<Option<ConflictRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(&id).cloned())
    }

    async fn latest_for_event(&self, event_id: Uuid) -> SyncResult<Option<ConflictRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| r.event_id == Some(event_id))
            .max_by_key(|r| r.detected_at)
            .cloned())
    }

    async fn count_since(&self, since: DateTime<Utc>) -> SyncResult<usize> {
        let records = self.records.lock().await;
        Ok(records.values().filter(|r| r.detected_at >= since).count())
    }
}

/// In-memory replication cursor store, unique per
/// (entity_type, source, target).
#[derive(Default)]
pub struct InMemoryCursorStore {
    cursors: Arc<Mutex<HashMap<(String, String, String), ReplicationCursor>>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cursor_key(cursor: &ReplicationCursor) -> (String, String, String) {
    (
        cursor.entity_type.clone(),
        cursor.source_region.clone(),
        cursor.target_region.clone(),
    )
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn upsert(&self, cursor: &ReplicationCursor) -> SyncResult<()> {
        let mut cursors = self.cursors.lock().await;
        cursors.insert(cursor_key(cursor), cursor.clone());
        Ok(())
    }

    async fn fetch(
        &self,
        entity_type: &str,
        source_region: &str,
        target_region: &str,
    ) -> SyncResult<Option<ReplicationCursor>> {
        let cursors = self.cursors.lock().await;
        Ok(cursors
            .get(&(
                entity_type.to_string(),
                source_region.to_string(),
                target_region.to_string(),
            ))
            .cloned())
    }

    async fn list(&self, entity_type: Option<&str>) -> SyncResult<Vec<ReplicationCursor>> {
        let cursors = self.cursors.lock().await;
        let mut result: Vec<ReplicationCursor> = cursors
            .values()
            .filter(|c| entity_type.map_or(true, |t| c.entity_type == t))
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            (&a.entity_type, &a.source_region, &a.target_region)
                .cmp(&(&b.entity_type, &b.source_region, &b.target_region))
        });
        Ok(result)
    }
}

/// In-memory integrity check store.
#[derive(Default)]
pub struct InMemoryCheckStore {
    checks: Arc<Mutex<HashMap<Uuid, IntegrityCheck>>>,
}

impl InMemoryCheckStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckStore for InMemoryCheckStore {
    async fn insert(&self, check: &IntegrityCheck) -> SyncResult<()> {
        let mut checks = self.checks.lock().await;
        checks.insert(check.id, check.clone());
        Ok(())
    }

    async fn update(&self, check: &IntegrityCheck) -> SyncResult<()> {
        let mut checks = self.checks.lock().await;
        checks.insert(check.id, check.clone());
        Ok(())
    }

    async fn list_recent(
        &self,
        entity_type: Option<&str>,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<IntegrityCheck>> {
        let checks = self.checks.lock().await;
        let mut result: Vec<IntegrityCheck> = checks
            .values()
            .filter(|c| c.started_at >= since)
            .filter(|c| entity_type.map_or(true, |t| c.entity_type == t))
            .cloned()
            .collect();
        result.sort_by_key(|c| c.started_at);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_sync_core::adapter::SyncEventKind;
    use data_sync_core::config::ReplicationConfig;
    use data_sync_core::payload::FieldValue;

    fn new_event(entity_id: &str, kind: SyncEventKind) -> NewSyncEvent {
        let mut payload = Payload::new();
        payload.insert("name".to_string(), FieldValue::from("A"));
        NewSyncEvent::new("product", entity_id, kind, payload, "api", "region-a")
    }

    #[tokio::test]
    async fn append_assigns_strictly_monotonic_versions() {
        let store = InMemoryEventStore::new();
        let mut last = 0;
        for _ in 0..5 {
            let event = store
                .append(new_event("p-1", SyncEventKind::Update))
                .await
                .unwrap();
            assert!(event.version > last, "versions must strictly increase");
            last = event.version;
        }
    }

    #[tokio::test]
    async fn sequences_are_per_entity() {
        let store = InMemoryEventStore::new();
        let a1 = store
            .append(new_event("p-1", SyncEventKind::Create))
            .await
            .unwrap();
        let b1 = store
            .append(new_event("p-2", SyncEventKind::Create))
            .await
            .unwrap();
        let a2 = store
            .append(new_event("p-1", SyncEventKind::Update))
            .await
            .unwrap();
        assert_eq!(a1.sequence, 1);
        assert_eq!(b1.sequence, 1);
        assert_eq!(a2.sequence, 2);
    }

    #[tokio::test]
    async fn claim_orders_by_kind_priority() {
        let store = InMemoryEventStore::new();
        store
            .append(new_event("p-1", SyncEventKind::Update))
            .await
            .unwrap();
        store
            .append(new_event("p-2", SyncEventKind::Delete))
            .await
            .unwrap();
        store
            .append(new_event("p-3", SyncEventKind::Create))
            .await
            .unwrap();

        let first = store.claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(first.kind, SyncEventKind::Delete);
        let second = store.claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(second.kind, SyncEventKind::Create);
        let third = store.claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(third.kind, SyncEventKind::Update);
    }

    #[tokio::test]
    async fn only_one_event_per_key_is_processing() {
        let store = InMemoryEventStore::new();
        store
            .append(new_event("p-1", SyncEventKind::Create))
            .await
            .unwrap();
        store
            .append(new_event("p-1", SyncEventKind::Update))
            .await
            .unwrap();

        let first = store.claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(first.entity_id, "p-1");
        // Second event for the same key must wait
        assert!(store.claim_next(Utc::now()).await.unwrap().is_none());

        store
            .update_status(first.id, SyncEventStatus::Completed, None)
            .await
            .unwrap();
        let second = store.claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(second.entity_id, "p-1");
        assert!(second.version > first.version);
    }

    #[tokio::test]
    async fn retrying_event_waits_for_backoff() {
        let store = InMemoryEventStore::new();
        let event = store
            .append(new_event("p-1", SyncEventKind::Create))
            .await
            .unwrap();
        let claimed = store.claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, event.id);

        let due_at = Utc::now() + Duration::seconds(2);
        store
            .record_attempt(
                event.id,
                SyncEventStatus::Retrying,
                Some("timeout".to_string()),
                Some(due_at),
            )
            .await
            .unwrap();

        assert!(store.claim_next(Utc::now()).await.unwrap().is_none());
        let reclaimed = store
            .claim_next(due_at + Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.id, event.id);
        assert_eq!(reclaimed.attempts, 1);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let store = InMemoryEventStore::new();
        let event = store
            .append(new_event("p-1", SyncEventKind::Create))
            .await
            .unwrap();
        let result = store
            .update_status(event.id, SyncEventStatus::Completed, None)
            .await;
        assert!(matches!(result, Err(SyncError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn list_since_returns_completed_events_in_version_order() {
        let store = InMemoryEventStore::new();
        let mut versions = Vec::new();
        for i in 0..3 {
            let event = store
                .append(new_event(&format!("p-{}", i), SyncEventKind::Create))
                .await
                .unwrap();
            let claimed = store.claim_next(Utc::now()).await.unwrap().unwrap();
            store
                .update_status(claimed.id, SyncEventStatus::Completed, None)
                .await
                .unwrap();
            versions.push(event.version);
        }
        let since = store
            .list_since("product", "region-a", 0, 100)
            .await
            .unwrap();
        assert_eq!(since.len(), 3);
        let listed: Vec<i64> = since.iter().map(|e| e.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(listed, sorted);

        let after_first = store
            .list_since("product", "region-a", sorted[0], 100)
            .await
            .unwrap();
        assert_eq!(after_first.len(), 2);
    }

    #[tokio::test]
    async fn cursor_store_is_unique_per_triple() {
        let store = InMemoryCursorStore::new();
        let mut cursor =
            ReplicationCursor::new("product", "region-a", "region-b", ReplicationConfig::default());
        store.upsert(&cursor).await.unwrap();
        cursor.advance(42, Utc::now());
        store.upsert(&cursor).await.unwrap();

        let cursors = store.list(Some("product")).await.unwrap();
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors[0].last_replicated_version, 42);
    }

    #[tokio::test]
    async fn latest_for_event_picks_most_recent_record() {
        use data_sync_core::conflict::{ConflictKind, ResolutionStrategy};

        let store = InMemoryConflictStore::new();
        let event_id = Uuid::new_v4();
        let older = ConflictRecord::new(
            "product",
            "p-1",
            ConflictKind::Version,
            ResolutionStrategy::LastWriteWins,
            Payload::new(),
            Payload::new(),
        )
        .with_event_id(event_id);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = ConflictRecord::new(
            "product",
            "p-1",
            ConflictKind::ConcurrentUpdate,
            ResolutionStrategy::LastWriteWins,
            Payload::new(),
            Payload::new(),
        )
        .with_event_id(event_id);

        store.insert(&older).await.unwrap();
        store.insert(&newer).await.unwrap();

        let latest = store.latest_for_event(event_id).await.unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
    }
}
