// File: src/service.rs
//
// Service facade wiring stores, adapters, cache, replication, auditing,
// and workers into the submitter and operational surfaces

use std::sync::Arc;
use uuid::Uuid;

use data_sync_core::adapter::{AdapterRegistry, SyncEventKind};
use data_sync_core::config::{ConfigRegistry, EngineConfig};
use data_sync_core::conflict::ConflictResolver;
use data_sync_core::error::SyncResult;
use data_sync_core::payload::Payload;

use crate::audit::{AlertHandler, IntegrityAuditor, TracingAlertHandler};
use crate::cache::{
    CacheInvalidator, CacheProvider, InMemoryCacheProvider, InMemoryInvalidationJournal,
    InvalidationJournal, PostgresInvalidationJournal,
};
use crate::db::PgPool;
use crate::engine::{BulkSyncReport, EngineWorkers, SyncEngine, SyncOutcome};
use crate::monitoring::{HealthMonitor, HealthReport};
use crate::replication::{Replicator, ReplicationTransport};
use crate::store::{
    CheckKind, CheckStore, ConflictStore, CursorStore, EventMetadata, EventStore,
    InMemoryCheckStore, InMemoryConflictStore, InMemoryCursorStore, InMemoryEventStore,
    IntegrityCheck, NewSyncEvent, PostgresCheckStore, PostgresConflictStore, PostgresCursorStore,
    PostgresEventStore, ReplicationCursor, SyncEvent,
};

/// Composed data synchronization service.
pub struct DataSyncService {
    engine: Arc<SyncEngine>,
    replicator: Arc<Replicator>,
    auditor: Arc<IntegrityAuditor>,
    invalidator: Arc<CacheInvalidator>,
    health: HealthMonitor,
    configs: Arc<ConfigRegistry>,
}

/// Assembles a [`DataSyncService`] from parts; anything not supplied falls
/// back to the in-memory implementation.
pub struct DataSyncServiceBuilder {
    config: EngineConfig,
    configs: Arc<ConfigRegistry>,
    adapters: Arc<AdapterRegistry>,
    resolver: Arc<ConflictResolver>,
    events: Option<Arc<dyn EventStore>>,
    conflicts: Option<Arc<dyn ConflictStore>>,
    cursors: Option<Arc<dyn CursorStore>>,
    checks: Option<Arc<dyn CheckStore>>,
    providers: Vec<Arc<dyn CacheProvider>>,
    journal: Option<Arc<dyn InvalidationJournal>>,
    transports: Vec<Arc<dyn ReplicationTransport>>,
    alert_handlers: Vec<Arc<dyn AlertHandler>>,
}

impl DataSyncServiceBuilder {
    pub fn new(
        config: EngineConfig,
        configs: Arc<ConfigRegistry>,
        adapters: Arc<AdapterRegistry>,
        resolver: Arc<ConflictResolver>,
    ) -> Self {
        Self {
            config,
            configs,
            adapters,
            resolver,
            events: None,
            conflicts: None,
            cursors: None,
            checks: None,
            providers: Vec::new(),
            journal: None,
            transports: Vec::new(),
            alert_handlers: Vec::new(),
        }
    }

    pub fn with_event_store(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_conflict_store(mut self, conflicts: Arc<dyn ConflictStore>) -> Self {
        self.conflicts = Some(conflicts);
        self
    }

    pub fn with_cursor_store(mut self, cursors: Arc<dyn CursorStore>) -> Self {
        self.cursors = Some(cursors);
        self
    }

    pub fn with_check_store(mut self, checks: Arc<dyn CheckStore>) -> Self {
        self.checks = Some(checks);
        self
    }

    pub fn with_cache_provider(mut self, provider: Arc<dyn CacheProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_invalidation_journal(mut self, journal: Arc<dyn InvalidationJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn ReplicationTransport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn with_alert_handler(mut self, handler: Arc<dyn AlertHandler>) -> Self {
        self.alert_handlers.push(handler);
        self
    }

    pub fn build(self) -> DataSyncService {
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(InMemoryEventStore::new()));
        let conflicts = self
            .conflicts
            .unwrap_or_else(|| Arc::new(InMemoryConflictStore::new()));
        let cursors = self
            .cursors
            .unwrap_or_else(|| Arc::new(InMemoryCursorStore::new()));
        let checks = self
            .checks
            .unwrap_or_else(|| Arc::new(InMemoryCheckStore::new()));
        let journal = self
            .journal
            .unwrap_or_else(|| Arc::new(InMemoryInvalidationJournal::new()));
        let providers = if self.providers.is_empty() {
            vec![Arc::new(InMemoryCacheProvider::new("default")) as Arc<dyn CacheProvider>]
        } else {
            self.providers
        };
        let alert_handlers = if self.alert_handlers.is_empty() {
            vec![Arc::new(TracingAlertHandler) as Arc<dyn AlertHandler>]
        } else {
            self.alert_handlers
        };

        let invalidator = Arc::new(CacheInvalidator::new(providers, journal));
        let replicator = Arc::new(
            Replicator::new(cursors, events.clone(), self.transports)
                .with_catchup_batch_size(self.config.catchup_batch_size)
                .with_default_max_lag(self.config.replication_max_lag_seconds),
        );

        let max_checks = ((self.config.workers as f64 * self.config.integrity_check_share).ceil()
            as usize)
            .max(1);
        let auditor = Arc::new(IntegrityAuditor::new(
            self.configs.clone(),
            self.adapters.clone(),
            checks.clone(),
            events.clone(),
            conflicts.clone(),
            alert_handlers,
            max_checks,
        ));

        let health = HealthMonitor::new(
            events.clone(),
            replicator.clone(),
            checks,
            self.config.pending_high_watermark,
        );

        let engine = Arc::new(SyncEngine::new(
            self.config,
            self.configs.clone(),
            self.adapters,
            self.resolver,
            events,
            conflicts,
            invalidator.clone(),
            replicator.clone(),
        ));

        DataSyncService {
            engine,
            replicator,
            auditor,
            invalidator,
            health,
            configs: self.configs,
        }
    }
}

impl DataSyncService {
    pub fn builder(
        config: EngineConfig,
        configs: Arc<ConfigRegistry>,
        adapters: Arc<AdapterRegistry>,
        resolver: Arc<ConflictResolver>,
    ) -> DataSyncServiceBuilder {
        DataSyncServiceBuilder::new(config, configs, adapters, resolver)
    }

    /// Fully in-memory deployment for tests and embedded runs.
    pub fn in_memory(
        config: EngineConfig,
        configs: Arc<ConfigRegistry>,
        adapters: Arc<AdapterRegistry>,
        resolver: Arc<ConflictResolver>,
    ) -> Self {
        DataSyncServiceBuilder::new(config, configs, adapters, resolver).build()
    }

    /// PostgreSQL-backed deployment: all four stores and the invalidation
    /// journal persist through the pool.
    pub fn postgres(
        pool: PgPool,
        config: EngineConfig,
        configs: Arc<ConfigRegistry>,
        adapters: Arc<AdapterRegistry>,
        resolver: Arc<ConflictResolver>,
    ) -> DataSyncServiceBuilder {
        DataSyncServiceBuilder::new(config, configs, adapters, resolver)
            .with_event_store(Arc::new(PostgresEventStore::new(pool.clone())))
            .with_conflict_store(Arc::new(PostgresConflictStore::new(pool.clone())))
            .with_cursor_store(Arc::new(PostgresCursorStore::new(pool.clone())))
            .with_check_store(Arc::new(PostgresCheckStore::new(pool.clone())))
            .with_invalidation_journal(Arc::new(PostgresInvalidationJournal::new(pool)))
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn replicator(&self) -> &Arc<Replicator> {
        &self.replicator
    }

    pub fn auditor(&self) -> &Arc<IntegrityAuditor> {
        &self.auditor
    }

    pub fn invalidator(&self) -> &Arc<CacheInvalidator> {
        &self.invalidator
    }

    /// Spawn the worker pool and periodic loops.
    pub fn start_workers(&self) -> EngineWorkers {
        EngineWorkers::start(
            self.engine.clone(),
            self.replicator.clone(),
            self.invalidator.clone(),
            self.auditor.clone(),
        )
    }

    // ================================
    // Submitter surface
    // ================================

    /// Accept one mutation; returns the event id on acceptance, not on
    /// completion.
    pub async fn submit_event(
        &self,
        entity_type: &str,
        entity_id: &str,
        kind: SyncEventKind,
        payload: Payload,
        source: &str,
        origin_region: &str,
    ) -> SyncResult<Uuid> {
        self.engine
            .submit(NewSyncEvent::new(
                entity_type,
                entity_id,
                kind,
                payload,
                source,
                origin_region,
            ))
            .await
    }

    /// Accept one mutation with caller-supplied metadata.
    pub async fn submit_event_with_metadata(
        &self,
        entity_type: &str,
        entity_id: &str,
        kind: SyncEventKind,
        payload: Payload,
        source: &str,
        origin_region: &str,
        metadata: EventMetadata,
    ) -> SyncResult<Uuid> {
        self.engine
            .submit(
                NewSyncEvent::new(entity_type, entity_id, kind, payload, source, origin_region)
                    .with_metadata(metadata),
            )
            .await
    }

    pub async fn sync_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        source_region: &str,
        target_sources: Option<Vec<String>>,
    ) -> SyncResult<SyncOutcome> {
        self.engine
            .sync_entity(entity_type, entity_id, source_region, target_sources)
            .await
    }

    pub async fn bulk_sync(
        &self,
        entity_type: &str,
        entity_ids: &[String],
        source_region: &str,
    ) -> SyncResult<BulkSyncReport> {
        self.engine
            .bulk_sync(entity_type, entity_ids, source_region)
            .await
    }

    pub async fn retry_event(&self, event_id: Uuid) -> SyncResult<SyncOutcome> {
        self.engine.retry_event(event_id).await
    }

    pub async fn list_pending(&self, limit: usize) -> SyncResult<Vec<SyncEvent>> {
        self.engine.list_pending(limit).await
    }

    // ================================
    // Operational surface
    // ================================

    pub async fn pause_replication(
        &self,
        entity_type: &str,
        source_region: &str,
        target_region: &str,
    ) -> SyncResult<()> {
        let config = self.configs.get(entity_type)?.replication.clone();
        self.replicator
            .pause(entity_type, source_region, target_region, &config)
            .await
    }

    pub async fn resume_replication(
        &self,
        entity_type: &str,
        source_region: &str,
        target_region: &str,
    ) -> SyncResult<usize> {
        self.replicator
            .resume(entity_type, source_region, target_region)
            .await
    }

    pub async fn replication_status(
        &self,
        entity_type: Option<&str>,
    ) -> SyncResult<Vec<ReplicationCursor>> {
        self.replicator.status(entity_type).await
    }

    pub async fn run_check(
        &self,
        entity_type: &str,
        sources: &[String],
        kind: CheckKind,
    ) -> SyncResult<IntegrityCheck> {
        self.auditor.run_check(entity_type, sources, kind).await
    }

    pub async fn health_check(&self) -> SyncResult<HealthReport> {
        self.health.health_check().await
    }
}
