// File: src/replication/mod.rs
//
// Cross-region replication: per-event fanout, cursor ownership, ordered
// catch-up, pause/resume, and lag monitoring
// The replicator is the exclusive writer of replication cursors

pub mod transport;

pub use transport::{HttpTransport, InMemoryTransport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use data_sync_core::adapter::SyncEventKind;
use data_sync_core::config::ReplicationConfig;
use data_sync_core::error::{SyncError, SyncResult};
use data_sync_core::payload::Payload;

use crate::store::{CursorState, CursorStore, EventStore, ReplicationCursor, SyncEvent};

/// Catch-up replays at most this many events per store query.
pub const DEFAULT_CATCHUP_BATCH_SIZE: usize = 1000;

/// Cursors lagging more than this many seconds are picked up by the hourly
/// catch-up sweep.
pub const CATCHUP_SWEEP_LAG_SECONDS: i64 = 60;

/// Wire message delivered to a target region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationMessage {
    pub event_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub kind: SyncEventKind,
    pub payload: Payload,
    pub version: i64,
    pub origin_timestamp: DateTime<Utc>,
    pub source_region: String,
    pub target_region: String,
}

impl ReplicationMessage {
    pub fn from_event(event: &SyncEvent, target_region: &str) -> Self {
        Self {
            event_id: event.id,
            entity_type: event.entity_type.clone(),
            entity_id: event.entity_id.clone(),
            kind: event.kind,
            payload: event.payload.clone(),
            version: event.version,
            origin_timestamp: event.submitted_at,
            source_region: event.origin_region.clone(),
            target_region: target_region.to_string(),
        }
    }
}

/// Transport failure; rejection by the target counts as transient.
#[derive(Debug, thiserror::Error, Clone)]
pub enum TransportError {
    #[error("Message rejected by target: {message}")]
    Rejected { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Send timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}

/// Channel to one target region.
#[async_trait::async_trait]
pub trait ReplicationTransport: Send + Sync {
    /// Region this transport delivers to.
    fn region(&self) -> &str;

    /// Deliver one message; resolution of the future is the acknowledgement.
    async fn send(&self, message: ReplicationMessage) -> Result<(), TransportError>;
}

type CursorKey = (String, String, String);

fn cursor_key(entity_type: &str, source_region: &str, target_region: &str) -> CursorKey {
    (
        entity_type.to_string(),
        source_region.to_string(),
        target_region.to_string(),
    )
}

/// Owns replication cursors and drives per-event fanout and catch-up.
pub struct Replicator {
    cursors: Arc<dyn CursorStore>,
    events: Arc<dyn EventStore>,
    transports: HashMap<String, Arc<dyn ReplicationTransport>>,
    catchup_batch_size: usize,
    default_max_lag_seconds: i64,
    /// Cancellation token per cursor; pausing cancels in-flight sends
    inflight: RwLock<HashMap<CursorKey, CancellationToken>>,
}

impl Replicator {
    pub fn new(
        cursors: Arc<dyn CursorStore>,
        events: Arc<dyn EventStore>,
        transports: Vec<Arc<dyn ReplicationTransport>>,
    ) -> Self {
        let transports = transports
            .into_iter()
            .map(|t| (t.region().to_string(), t))
            .collect();
        Self {
            cursors,
            events,
            transports,
            catchup_batch_size: DEFAULT_CATCHUP_BATCH_SIZE,
            default_max_lag_seconds: 300,
            inflight: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_catchup_batch_size(mut self, batch_size: usize) -> Self {
        self.catchup_batch_size = batch_size.max(1);
        self
    }

    pub fn with_default_max_lag(mut self, seconds: i64) -> Self {
        self.default_max_lag_seconds = seconds;
        self
    }

    async fn load_or_create(
        &self,
        entity_type: &str,
        source_region: &str,
        target_region: &str,
        config: &ReplicationConfig,
    ) -> SyncResult<ReplicationCursor> {
        if let Some(cursor) = self
            .cursors
            .fetch(entity_type, source_region, target_region)
            .await?
        {
            return Ok(cursor);
        }
        let cursor =
            ReplicationCursor::new(entity_type, source_region, target_region, config.clone());
        self.cursors.upsert(&cursor).await?;
        Ok(cursor)
    }

    async fn inflight_token(&self, key: &CursorKey) -> CancellationToken {
        let mut inflight = self.inflight.write().await;
        inflight.entry(key.clone()).or_default().clone()
    }

    async fn send_cancellable(
        &self,
        key: &CursorKey,
        transport: &Arc<dyn ReplicationTransport>,
        message: ReplicationMessage,
    ) -> Option<Result<(), TransportError>> {
        let token = self.inflight_token(key).await;
        tokio::select! {
            _ = token.cancelled() => None,
            result = transport.send(message) => Some(result),
        }
    }

    /// Per-event path: publish a completed event to every configured target
    /// region other than the origin. Transport failures move the cursor to
    /// `Error` but never fail the originating event.
    pub async fn replicate_event(
        &self,
        event: &SyncEvent,
        config: &ReplicationConfig,
    ) -> SyncResult<()> {
        if !config.enabled {
            return Ok(());
        }

        for target_region in &config.regions {
            if target_region == &event.origin_region {
                continue;
            }
            let key = cursor_key(&event.entity_type, &event.origin_region, target_region);
            let mut cursor = self
                .load_or_create(
                    &event.entity_type,
                    &event.origin_region,
                    target_region,
                    config,
                )
                .await?;

            if cursor.state == CursorState::Paused {
                cursor.pending_count += 1;
                self.cursors.upsert(&cursor).await?;
                continue;
            }

            let Some(transport) = self.transports.get(target_region) else {
                cursor.record_failure(format!("no transport for region {}", target_region));
                self.cursors.upsert(&cursor).await?;
                warn!(target_region = %target_region, "replication transport missing");
                continue;
            };

            let message = ReplicationMessage::from_event(event, target_region);
            match self.send_cancellable(&key, transport, message).await {
                Some(Ok(())) => {
                    cursor.advance(event.version, Utc::now());
                    cursor.state = CursorState::Active;
                    self.cursors.upsert(&cursor).await?;
                    debug!(
                        entity_type = %event.entity_type,
                        target_region = %target_region,
                        version = event.version,
                        "replicated event"
                    );
                }
                Some(Err(e)) => {
                    cursor.record_failure(e.to_string());
                    cursor.pending_count += 1;
                    self.cursors.upsert(&cursor).await?;
                    warn!(target_region = %target_region, error = %e, "replication send failed");
                }
                None => {
                    // Pause cancelled the in-flight send; catch-up will replay
                    cursor.pending_count += 1;
                    self.cursors.upsert(&cursor).await?;
                }
            }
        }
        Ok(())
    }

    /// Replay missed events in version order; stops at the first failure to
    /// preserve ordering. Returns how many events were replicated.
    pub async fn catch_up(
        &self,
        entity_type: &str,
        source_region: &str,
        target_region: &str,
    ) -> SyncResult<usize> {
        let key = cursor_key(entity_type, source_region, target_region);
        let mut cursor = self
            .cursors
            .fetch(entity_type, source_region, target_region)
            .await?
            .ok_or_else(|| SyncError::CursorNotFound {
                entity_type: entity_type.to_string(),
                source_region: source_region.to_string(),
                target_region: target_region.to_string(),
            })?;

        if cursor.state == CursorState::Paused {
            return Ok(0);
        }
        let Some(transport) = self.transports.get(target_region).cloned() else {
            cursor.record_failure(format!("no transport for region {}", target_region));
            self.cursors.upsert(&cursor).await?;
            return Ok(0);
        };

        cursor.state = CursorState::Syncing;
        self.cursors.upsert(&cursor).await?;

        let mut replicated = 0;
        'outer: loop {
            let batch = self
                .events
                .list_since(
                    entity_type,
                    source_region,
                    cursor.last_replicated_version,
                    self.catchup_batch_size,
                )
                .await?;
            if batch.is_empty() {
                break;
            }

            for event in &batch {
                let message = ReplicationMessage::from_event(event, target_region);
                match self.send_cancellable(&key, &transport, message).await {
                    Some(Ok(())) => {
                        cursor.advance(event.version, Utc::now());
                        cursor.state = CursorState::Syncing;
                        self.cursors.upsert(&cursor).await?;
                        replicated += 1;
                    }
                    Some(Err(e)) => {
                        cursor.record_failure(e.to_string());
                        self.cursors.upsert(&cursor).await?;
                        warn!(
                            entity_type,
                            target_region,
                            error = %e,
                            "catch-up stopped on first failure"
                        );
                        return Ok(replicated);
                    }
                    None => {
                        // Paused mid catch-up
                        break 'outer;
                    }
                }
            }
        }

        // Refetch to observe a pause that raced the final transition
        if let Some(current) = self
            .cursors
            .fetch(entity_type, source_region, target_region)
            .await?
        {
            cursor.state = if current.state == CursorState::Paused {
                CursorState::Paused
            } else {
                CursorState::Active
            };
        } else {
            cursor.state = CursorState::Active;
        }
        self.cursors.upsert(&cursor).await?;
        info!(entity_type, source_region, target_region, replicated, "catch-up finished");
        Ok(replicated)
    }

    /// Halt per-event replication for a cursor and cancel its in-flight
    /// sends.
    pub async fn pause(
        &self,
        entity_type: &str,
        source_region: &str,
        target_region: &str,
        config: &ReplicationConfig,
    ) -> SyncResult<()> {
        let mut cursor = self
            .load_or_create(entity_type, source_region, target_region, config)
            .await?;
        cursor.state = CursorState::Paused;
        self.cursors.upsert(&cursor).await?;

        let key = cursor_key(entity_type, source_region, target_region);
        let mut inflight = self.inflight.write().await;
        if let Some(token) = inflight.remove(&key) {
            token.cancel();
        }
        info!(entity_type, source_region, target_region, "replication paused");
        Ok(())
    }

    /// Reactivate a cursor and immediately trigger catch-up.
    pub async fn resume(
        &self,
        entity_type: &str,
        source_region: &str,
        target_region: &str,
    ) -> SyncResult<usize> {
        let mut cursor = self
            .cursors
            .fetch(entity_type, source_region, target_region)
            .await?
            .ok_or_else(|| SyncError::CursorNotFound {
                entity_type: entity_type.to_string(),
                source_region: source_region.to_string(),
                target_region: target_region.to_string(),
            })?;
        cursor.state = CursorState::Active;
        self.cursors.upsert(&cursor).await?;
        info!(entity_type, source_region, target_region, "replication resumed");

        self.catch_up(entity_type, source_region, target_region).await
    }

    /// Recompute lag for every non-paused cursor; cursors beyond their
    /// configured maximum get their lag persisted and a warning emitted.
    /// Runs every five minutes.
    pub async fn monitor_lag(&self, now: DateTime<Utc>) -> SyncResult<Vec<ReplicationCursor>> {
        let cursors = self.cursors.list(None).await?;
        let mut lagging = Vec::new();

        for mut cursor in cursors {
            if cursor.state == CursorState::Paused {
                continue;
            }
            let lag = cursor.compute_lag(now);
            let max_lag = if cursor.config.max_lag_seconds > 0 {
                cursor.config.max_lag_seconds
            } else {
                self.default_max_lag_seconds
            };
            if lag > max_lag {
                cursor.lag_seconds = lag;
                self.cursors.upsert(&cursor).await?;
                warn!(
                    entity_type = %cursor.entity_type,
                    source_region = %cursor.source_region,
                    target_region = %cursor.target_region,
                    lag_seconds = lag,
                    max_lag_seconds = max_lag,
                    "replication lag exceeds maximum"
                );
                lagging.push(cursor);
            }
        }
        Ok(lagging)
    }

    /// Hourly sweep: catch up every non-paused cursor lagging beyond
    /// [`CATCHUP_SWEEP_LAG_SECONDS`].
    pub async fn sweep_lagging(&self, now: DateTime<Utc>) -> SyncResult<usize> {
        let cursors = self.cursors.list(None).await?;
        let mut replicated = 0;
        for cursor in cursors {
            if cursor.state == CursorState::Paused {
                continue;
            }
            if cursor.compute_lag(now) > CATCHUP_SWEEP_LAG_SECONDS {
                replicated += self
                    .catch_up(
                        &cursor.entity_type,
                        &cursor.source_region,
                        &cursor.target_region,
                    )
                    .await?;
            }
        }
        Ok(replicated)
    }

    /// Snapshot of cursor state for the operational surface.
    pub async fn status(&self, entity_type: Option<&str>) -> SyncResult<Vec<ReplicationCursor>> {
        self.cursors.list(entity_type).await
    }
}
