// File: src/engine/mod.rs
//
// Orchestration of one sync event: conflict resolution, adapter fanout,
// cache invalidation, replication handoff, and the retry state machine

pub mod workers;

pub use workers::EngineWorkers;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use data_sync_core::adapter::{AdapterRegistry, ApplyOp, SyncEventKind};
use data_sync_core::config::{ConfigRegistry, EngineConfig, EntitySyncConfig, EntitySchema};
use data_sync_core::conflict::{
    ConflictDetector, ConflictRecord, ConflictResolver, DetectionContext, ResolutionOutcome,
};
use data_sync_core::error::{ErrorClass, SyncError, SyncResult};
use data_sync_core::payload::Payload;

use crate::cache::CacheInvalidator;
use crate::replication::Replicator;
use crate::store::{
    ConflictStore, EventMetadata, EventStore, NewSyncEvent, SyncEvent, SyncEventStatus,
};

/// Metadata tag carried by events superseded through conflict resolution.
pub const SUPERSEDED_TAG: &str = "superseded_by_conflict";

/// Metadata tag linking an operator retry to the failed original.
pub const RETRY_OF_TAG: &str = "retry_of";

/// Bulk submissions fan out in batches of this size.
pub const BULK_BATCH_SIZE: usize = 100;

/// Exponential backoff with jitter for the next retry attempt.
///
/// `attempt` is the attempt that just failed (1-based): base delay after the
/// first failure, doubled per subsequent failure.
pub fn retry_backoff(attempt: i32, base_ms: u64, factor: f64, jitter_ratio: f64) -> Duration {
    let exponent = (attempt - 1).max(0);
    let raw = base_ms as f64 * factor.powi(exponent);
    let scale = if jitter_ratio > 0.0 {
        1.0 + rand::thread_rng().gen_range(-jitter_ratio..=jitter_ratio)
    } else {
        1.0
    };
    Duration::milliseconds((raw * scale).max(0.0) as i64)
}

/// Terminal result of one processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncOutcome {
    Completed {
        event_id: Uuid,
    },
    Retrying {
        event_id: Uuid,
        next_attempt_at: DateTime<Utc>,
    },
    Failed {
        event_id: Uuid,
        reason: String,
    },
}

impl SyncOutcome {
    pub fn event_id(&self) -> Uuid {
        match self {
            SyncOutcome::Completed { event_id }
            | SyncOutcome::Retrying { event_id, .. }
            | SyncOutcome::Failed { event_id, .. } => *event_id,
        }
    }
}

/// Per-id results of a bulk submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkSyncReport {
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Errors collected while applying one event, split by classification.
#[derive(Debug, Default)]
struct AttemptErrors {
    transient: Vec<String>,
    permanent: Vec<String>,
}

impl AttemptErrors {
    fn push(&mut self, class: ErrorClass, message: String) {
        match class {
            ErrorClass::Transient => self.transient.push(message),
            ErrorClass::Permanent => self.permanent.push(message),
        }
    }

    fn is_empty(&self) -> bool {
        self.transient.is_empty() && self.permanent.is_empty()
    }

    fn joined(&self) -> String {
        self.permanent
            .iter()
            .chain(self.transient.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Orchestrates the full lifecycle of sync events.
pub struct SyncEngine {
    config: EngineConfig,
    configs: Arc<ConfigRegistry>,
    adapters: Arc<AdapterRegistry>,
    detector: ConflictDetector,
    resolver: Arc<ConflictResolver>,
    events: Arc<dyn EventStore>,
    conflicts: Arc<dyn ConflictStore>,
    invalidator: Arc<CacheInvalidator>,
    replicator: Arc<Replicator>,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        configs: Arc<ConfigRegistry>,
        adapters: Arc<AdapterRegistry>,
        resolver: Arc<ConflictResolver>,
        events: Arc<dyn EventStore>,
        conflicts: Arc<dyn ConflictStore>,
        invalidator: Arc<CacheInvalidator>,
        replicator: Arc<Replicator>,
    ) -> Self {
        Self {
            config,
            configs,
            adapters,
            detector: ConflictDetector::default(),
            resolver,
            events,
            conflicts,
            invalidator,
            replicator,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    pub fn conflicts(&self) -> &Arc<dyn ConflictStore> {
        &self.conflicts
    }

    pub fn invalidator(&self) -> &Arc<CacheInvalidator> {
        &self.invalidator
    }

    pub fn replicator(&self) -> &Arc<Replicator> {
        &self.replicator
    }

    /// Accept one event into the log. Returns on acceptance, not completion;
    /// single submissions succeed even when the engine is saturated.
    pub async fn submit(&self, mut event: NewSyncEvent) -> SyncResult<Uuid> {
        event.max_attempts = self.config.max_attempts_per_event;
        let stored = self.events.append(event).await?;
        debug!(event_id = %stored.id, entity_type = %stored.entity_type,
               version = stored.version, "event accepted");
        Ok(stored.id)
    }

    /// Claim and process the next due event.
    pub async fn process_next(&self) -> SyncResult<Option<SyncOutcome>> {
        match self.events.claim_next(Utc::now()).await? {
            Some(event) => Ok(Some(self.process_claimed(event).await?)),
            None => Ok(None),
        }
    }

    /// Process one event by id, driving pending/retrying events into
    /// `Processing` first.
    pub async fn process_event(&self, event_id: Uuid) -> SyncResult<SyncOutcome> {
        let event = self.events.fetch(event_id).await?;
        match event.status {
            SyncEventStatus::Pending | SyncEventStatus::Retrying => {
                self.events
                    .update_status(event_id, SyncEventStatus::Processing, None)
                    .await?;
                let event = self.events.fetch(event_id).await?;
                self.process_claimed(event).await
            }
            SyncEventStatus::Processing => self.process_claimed(event).await,
            terminal => Err(SyncError::InvalidTransition {
                event_id,
                from: terminal.as_str().to_string(),
                to: SyncEventStatus::Processing.as_str().to_string(),
            }),
        }
    }

    /// Drain the queue until empty. Mostly useful for embedded runs and
    /// tests; production deployments run [`EngineWorkers`] instead.
    pub async fn drain(&self) -> SyncResult<Vec<SyncOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.process_next().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Core per-event orchestration. The event must be in `Processing`.
    pub async fn process_claimed(&self, mut event: SyncEvent) -> SyncResult<SyncOutcome> {
        let config = match self.configs.get(&event.entity_type) {
            Ok(config) => config.clone(),
            Err(e) => {
                // No configuration is a permanent failure, no retry
                let reason = e.to_string();
                self.events
                    .record_attempt(event.id, SyncEventStatus::Failed, Some(reason.clone()), None)
                    .await?;
                return Ok(SyncOutcome::Failed {
                    event_id: event.id,
                    reason,
                });
            }
        };

        let deadline_secs = config
            .deadline_seconds
            .unwrap_or(self.config.default_deadline_seconds);
        let deadline = StdDuration::from_secs(deadline_secs);

        let errors = match tokio::time::timeout(deadline, self.run_attempt(&mut event, &config))
            .await
        {
            Ok(Ok(errors)) => errors,
            Ok(Err(e)) => {
                let mut errors = AttemptErrors::default();
                errors.push(e.class(), e.to_string());
                errors
            }
            Err(_) => {
                // In-flight adapter calls are dropped with the attempt future
                let e = SyncError::DeadlineExceeded {
                    deadline_ms: deadline_secs * 1000,
                };
                let mut errors = AttemptErrors::default();
                errors.push(ErrorClass::Transient, e.to_string());
                errors
            }
        };

        self.settle(event, &config, errors).await
    }

    /// Apply the terminal status decision for one attempt.
    async fn settle(
        &self,
        event: SyncEvent,
        config: &EntitySyncConfig,
        errors: AttemptErrors,
    ) -> SyncResult<SyncOutcome> {
        if errors.is_empty() {
            self.events
                .record_attempt(event.id, SyncEventStatus::Completed, None, None)
                .await?;
            info!(event_id = %event.id, entity_type = %event.entity_type,
                  version = event.version, "event completed");

            // Replication failures never fail the originating event
            if config.replication.enabled {
                let completed = self.events.fetch(event.id).await?;
                if let Err(e) = self
                    .replicator
                    .replicate_event(&completed, &config.replication)
                    .await
                {
                    warn!(event_id = %event.id, error = %e, "replication handoff failed");
                }
            }
            return Ok(SyncOutcome::Completed { event_id: event.id });
        }

        let attempts_after = event.attempts + 1;
        if errors.permanent.is_empty() && attempts_after < event.max_attempts {
            let delay = retry_backoff(
                attempts_after,
                self.config.retry_backoff_base_ms,
                self.config.retry_backoff_factor,
                self.config.jitter_ratio,
            );
            let next_attempt_at = Utc::now() + delay;
            self.events
                .record_attempt(
                    event.id,
                    SyncEventStatus::Retrying,
                    Some(errors.joined()),
                    Some(next_attempt_at),
                )
                .await?;
            info!(event_id = %event.id, attempt = attempts_after,
                  delay_ms = delay.num_milliseconds(), "event scheduled for retry");
            return Ok(SyncOutcome::Retrying {
                event_id: event.id,
                next_attempt_at,
            });
        }

        let reason = errors.joined();
        self.events
            .record_attempt(event.id, SyncEventStatus::Failed, Some(reason.clone()), None)
            .await?;
        warn!(event_id = %event.id, attempts = attempts_after, reason = %reason,
              "event failed");
        Ok(SyncOutcome::Failed {
            event_id: event.id,
            reason,
        })
    }

    /// One attempt: conflict handling, schema validation, fanout, cache
    /// invalidation. Collects per-adapter errors instead of short-circuiting.
    async fn run_attempt(
        &self,
        event: &mut SyncEvent,
        config: &EntitySyncConfig,
    ) -> SyncResult<AttemptErrors> {
        let mut errors = AttemptErrors::default();

        if let Err(e) = self.resolve_effective_payload(event, config).await {
            errors.push(e.class(), e.to_string());
            return Ok(errors);
        }

        if event.kind != SyncEventKind::Delete {
            if let Err(e) = validate_schema(&event.entity_type, &event.payload, &config.schema) {
                errors.push(ErrorClass::Permanent, e.to_string());
                return Ok(errors);
            }
        }

        let restricted_targets = target_sources(&event.metadata);
        let mut wrote_any = false;
        for binding in &config.adapters {
            if !binding.write_allowed {
                // Read-only bindings observe fanout, they never receive writes
                continue;
            }
            if let Some(targets) = &restricted_targets {
                if !targets.iter().any(|t| t == &binding.name) {
                    continue;
                }
            }
            let Some(adapter) = self.adapters.get(&binding.name) else {
                errors.push(
                    ErrorClass::Permanent,
                    format!("adapter {} not registered", binding.name),
                );
                continue;
            };
            let op = ApplyOp {
                kind: event.kind,
                entity_type: &event.entity_type,
                entity_id: &event.entity_id,
                payload: &event.payload,
            };
            match adapter.apply(op).await {
                Ok(()) => wrote_any = true,
                Err(e) => {
                    errors.push(e.class(), format!("{}: {}", binding.name, e));
                }
            }
        }

        // Invalidate only when the fanout reached at least one target and
        // nothing failed permanently
        if config.cache.enabled && wrote_any && errors.permanent.is_empty() {
            if let Err(e) = self
                .invalidator
                .invalidate(&event.entity_type, &event.entity_id, &config.cache)
                .await
            {
                errors.push(e.class(), format!("cache invalidation: {}", e));
            } else if event.kind != SyncEventKind::Delete
                && config.cache.warm_ttl_seconds.is_some()
            {
                if let Err(e) = self
                    .invalidator
                    .warm(&event.entity_type, &event.entity_id, &event.payload, &config.cache)
                    .await
                {
                    errors.push(e.class(), format!("cache warm: {}", e));
                }
            }
        }

        Ok(errors)
    }

    /// Determine the payload this attempt applies: a previously resolved
    /// conflict payload when one exists, otherwise run detection against the
    /// stored snapshot and resolve.
    async fn resolve_effective_payload(
        &self,
        event: &mut SyncEvent,
        config: &EntitySyncConfig,
    ) -> SyncResult<()> {
        if event.kind == SyncEventKind::Delete {
            return Ok(());
        }

        // Retried events reuse the outcome of their resolved conflict
        if let Some(record) = self.conflicts.latest_for_event(event.id).await? {
            if let Some(resolved) = record.resolved_payload.clone() {
                event.payload = resolved;
                return Ok(());
            }
            if record.state.is_terminal() {
                return Err(SyncError::ConflictUnresolved {
                    entity_type: event.entity_type.clone(),
                    entity_id: event.entity_id.clone(),
                    reason: record
                        .reason
                        .unwrap_or_else(|| "conflict previously failed".to_string()),
                });
            }
        }

        // Concurrent processing peer takes precedence as the comparison
        // snapshot; otherwise compare against the primary store
        let peer = self
            .events
            .processing_peer(&event.entity_type, &event.entity_id, event.id)
            .await?;
        let latest = self
            .events
            .latest_completed(&event.entity_type, &event.entity_id)
            .await?;

        let (stored, stored_version, stored_source) = match &peer {
            Some(peer) => (
                Some(peer.payload.clone()),
                Some(peer.version),
                peer.source.clone(),
            ),
            None => {
                let snapshot = self.read_primary(event, config).await;
                let source = latest
                    .as_ref()
                    .map(|e| e.source.clone())
                    .unwrap_or_else(|| "primary".to_string());
                (snapshot, latest.as_ref().map(|e| e.version), source)
            }
        };

        let Some(stored) = stored else {
            return Ok(());
        };

        let detected = self.detector.detect(&DetectionContext {
            incoming: &event.payload,
            incoming_version: event.version,
            stored: Some(&stored),
            stored_version,
            critical_fields: &config.critical_fields,
        });

        let Some(kind) = detected else {
            return Ok(());
        };

        let mut record = ConflictRecord::new(
            event.entity_type.clone(),
            event.entity_id.clone(),
            kind,
            config.conflict.strategy,
            stored.clone(),
            event.payload.clone(),
        )
        .with_event_id(event.id)
        .with_sources(vec![stored_source, event.source.clone()]);
        self.conflicts.insert(&record).await?;
        debug!(event_id = %event.id, kind = kind.as_str(), "conflict detected");

        let outcome = self.resolver.resolve(&mut record, &config.conflict);
        self.conflicts.update(&record).await?;

        match outcome {
            ResolutionOutcome::Resolved(payload) => {
                // The losing side of the resolution is recorded as
                // superseded; merge outcomes have no outright loser
                if payload == stored {
                    self.events
                        .tag_metadata(event.id, SUPERSEDED_TAG, record.id.to_string())
                        .await?;
                } else if payload == event.payload {
                    if let Some(previous) = &latest {
                        self.events
                            .tag_metadata(previous.id, SUPERSEDED_TAG, record.id.to_string())
                            .await?;
                    }
                }
                self.events.replace_payload(event.id, payload.clone()).await?;
                event.payload = payload;
                Ok(())
            }
            ResolutionOutcome::Manual => Err(SyncError::ConflictUnresolved {
                entity_type: event.entity_type.clone(),
                entity_id: event.entity_id.clone(),
                reason: "manual resolution required".to_string(),
            }),
            ResolutionOutcome::Failed(reason) => Err(SyncError::ConflictUnresolved {
                entity_type: event.entity_type.clone(),
                entity_id: event.entity_id.clone(),
                reason,
            }),
        }
    }

    /// Read the current snapshot from the primary adapter (first writable
    /// database binding, else the first writable binding).
    async fn read_primary(
        &self,
        event: &SyncEvent,
        config: &EntitySyncConfig,
    ) -> Option<Payload> {
        let binding = config
            .writable_adapters()
            .find(|b| b.kind == data_sync_core::adapter::AdapterKind::Database)
            .or_else(|| config.writable_adapters().next())?;
        let adapter = self.adapters.get(&binding.name)?;
        match adapter.read(&event.entity_type, &event.entity_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(adapter = %binding.name, error = %e,
                      "failed to read stored snapshot for conflict detection");
                None
            }
        }
    }

    /// Re-sync one entity from the primary store through the event path.
    pub async fn sync_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        source_region: &str,
        target_sources: Option<Vec<String>>,
    ) -> SyncResult<SyncOutcome> {
        let config = self.configs.get(entity_type)?.clone();
        let probe = SyncEvent {
            id: Uuid::new_v4(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            kind: SyncEventKind::Update,
            source: "sync".to_string(),
            origin_region: source_region.to_string(),
            payload: Payload::new(),
            previous: None,
            version: 0,
            sequence: 0,
            submitted_at: Utc::now(),
            status: SyncEventStatus::Pending,
            attempts: 0,
            max_attempts: 1,
            last_error: None,
            next_attempt_at: None,
            metadata: EventMetadata::default(),
        };
        let snapshot = self.read_primary(&probe, &config).await;

        let (kind, payload) = match snapshot {
            Some(payload) => (SyncEventKind::Update, payload),
            // Absence propagates as a delete
            None => (SyncEventKind::Delete, Payload::new()),
        };

        let mut metadata = EventMetadata::default().with_actor("sync");
        if let Some(targets) = target_sources {
            metadata.custom.insert(
                "target_sources".to_string(),
                serde_json::Value::Array(
                    targets.into_iter().map(serde_json::Value::String).collect(),
                ),
            );
        }

        let event = NewSyncEvent::new(
            entity_type,
            entity_id,
            kind,
            payload,
            "sync",
            source_region,
        )
        .with_metadata(metadata);
        let event_id = self.submit(event).await?;
        self.process_event(event_id).await
    }

    /// Fan a list of entity ids through the single-event path in batches of
    /// 100. Refused outright when the pending count exceeds the
    /// high-watermark.
    pub async fn bulk_sync(
        &self,
        entity_type: &str,
        entity_ids: &[String],
        source_region: &str,
    ) -> SyncResult<BulkSyncReport> {
        let pending = self.events.count_pending().await?;
        if pending > self.config.pending_high_watermark {
            return Err(SyncError::Saturated {
                pending,
                high_watermark: self.config.pending_high_watermark,
            });
        }

        let mut report = BulkSyncReport::default();
        for batch in entity_ids.chunks(BULK_BATCH_SIZE) {
            for entity_id in batch {
                match self
                    .sync_entity(entity_type, entity_id, source_region, None)
                    .await
                {
                    Ok(SyncOutcome::Completed { .. }) | Ok(SyncOutcome::Retrying { .. }) => {
                        report.successful += 1;
                    }
                    Ok(SyncOutcome::Failed { reason, .. }) => {
                        report.failed += 1;
                        report.errors.push(format!("{}: {}", entity_id, reason));
                    }
                    Err(e) => {
                        report.failed += 1;
                        report.errors.push(format!("{}: {}", entity_id, e));
                    }
                }
            }
        }
        Ok(report)
    }

    /// Operator retry: re-enter a retrying event immediately, or clone a
    /// failed event into a fresh attempt (terminal statuses never move
    /// backwards).
    pub async fn retry_event(&self, event_id: Uuid) -> SyncResult<SyncOutcome> {
        let event = self.events.fetch(event_id).await?;
        match event.status {
            SyncEventStatus::Pending | SyncEventStatus::Retrying => {
                self.process_event(event_id).await
            }
            SyncEventStatus::Failed => {
                let metadata = event
                    .metadata
                    .clone()
                    .add_tag(RETRY_OF_TAG, event_id.to_string());
                let replay = NewSyncEvent::new(
                    event.entity_type.clone(),
                    event.entity_id.clone(),
                    event.kind,
                    event.payload.clone(),
                    event.source.clone(),
                    event.origin_region.clone(),
                )
                .with_metadata(metadata);
                let new_id = self.submit(replay).await?;
                self.process_event(new_id).await
            }
            other => Err(SyncError::InvalidTransition {
                event_id,
                from: other.as_str().to_string(),
                to: SyncEventStatus::Processing.as_str().to_string(),
            }),
        }
    }

    pub async fn list_pending(&self, limit: usize) -> SyncResult<Vec<SyncEvent>> {
        self.events.list_pending(limit).await
    }
}

/// Validate a payload against the configured entity schema.
fn validate_schema(entity_type: &str, payload: &Payload, schema: &EntitySchema) -> SyncResult<()> {
    for field in &schema.required_fields {
        if !payload.contains_key(field) {
            return Err(SyncError::SchemaValidation {
                entity_type: entity_type.to_string(),
                message: format!("missing required field {}", field),
            });
        }
    }
    for (field, expected) in &schema.field_types {
        if let Some(value) = payload.get(field) {
            if value.type_name() != expected.as_str() {
                return Err(SyncError::SchemaValidation {
                    entity_type: entity_type.to_string(),
                    message: format!(
                        "field {} has type {}, expected {}",
                        field,
                        value.type_name(),
                        expected
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Optional fanout restriction carried in event metadata.
fn target_sources(metadata: &EventMetadata) -> Option<Vec<String>> {
    metadata.custom.get("target_sources").and_then(|v| {
        v.as_array().map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect()
        })
    })
}
