// File: src/cache/mod.rs
//
// Cache invalidation: provider registry, per-entity strategies, durable
// scheduled-invalidation journal, and instance-level dependency graph

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::{InMemoryCacheProvider, InMemoryInvalidationJournal};
pub use postgres::PostgresInvalidationJournal;
pub use redis::{RedisCacheProvider, RedisInvalidationJournal};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use data_sync_core::config::{CacheConfig, InvalidationMode};
use data_sync_core::error::{SyncError, SyncResult};
use data_sync_core::payload::Payload;

/// Invalidations are processed in batches of this size with per-batch error
/// isolation.
pub const INVALIDATION_BATCH_SIZE: usize = 100;

/// Cache key for an entity snapshot.
pub fn entity_cache_key(entity_type: &str, entity_id: &str) -> String {
    format!("{}:{}", entity_type, entity_id)
}

/// Operational statistics of one cache provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub memory_bytes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// One concrete cache backend.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> SyncResult<Option<Payload>>;

    async fn set(
        &self,
        key: &str,
        value: &Payload,
        ttl_seconds: Option<u64>,
        tags: &[String],
    ) -> SyncResult<()>;

    async fn delete(&self, key: &str) -> SyncResult<()>;

    /// Mark an entry stale without removing it; readers treat it as a miss
    /// candidate. Falls back to a one second TTL on backends without a
    /// dedicated stale marker.
    async fn mark_stale(&self, key: &str) -> SyncResult<()>;

    /// Delete every key carrying any of the tags; returns how many were
    /// removed.
    async fn invalidate_by_tags(&self, tags: &[String]) -> SyncResult<usize>;

    /// Delete every key matching a glob pattern (`*` wildcard).
    async fn invalidate_by_pattern(&self, pattern: &str) -> SyncResult<usize>;

    /// List live keys matching a glob pattern. Backends that cannot
    /// enumerate keys report an error.
    async fn keys(&self, _pattern: &str) -> SyncResult<Vec<String>> {
        Err(SyncError::CacheError {
            message: "key enumeration not supported by this provider".to_string(),
        })
    }

    async fn stats(&self) -> SyncResult<CacheStats>;

    /// Drop expired entries; returns how many were removed.
    async fn cleanup(&self) -> SyncResult<usize>;
}

/// A scheduled invalidation awaiting the sweeper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInvalidation {
    pub id: Uuid,
    pub cache_key: String,
    pub entity_type: String,
    pub entity_id: String,
    pub created_at: DateTime<Utc>,
}

impl PendingInvalidation {
    pub fn new(entity_type: &str, entity_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            cache_key: entity_cache_key(entity_type, entity_id),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Durable journal of scheduled invalidations so a crash between enqueue and
/// sweep loses nothing.
#[async_trait]
pub trait InvalidationJournal: Send + Sync {
    async fn record(&self, pending: &PendingInvalidation) -> SyncResult<()>;

    async fn list(&self) -> SyncResult<Vec<PendingInvalidation>>;

    async fn remove(&self, cache_key: &str) -> SyncResult<()>;
}

/// Reference to one cached entity instance in the dependency graph.
pub type EntityRef = (String, String);

/// Outcome of a bulk invalidation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkInvalidationReport {
    pub invalidated: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Coordinates cache providers, per-entity strategies, the scheduled
/// sweeper, and dependency-driven fanout.
pub struct CacheInvalidator {
    providers: Vec<Arc<dyn CacheProvider>>,
    journal: Arc<dyn InvalidationJournal>,
    /// dependent -> set of entities it depends on is not needed; we keep
    /// parent -> dependents for invalidation fanout
    dependents: RwLock<HashMap<EntityRef, HashSet<EntityRef>>>,
}

impl CacheInvalidator {
    pub fn new(
        providers: Vec<Arc<dyn CacheProvider>>,
        journal: Arc<dyn InvalidationJournal>,
    ) -> Self {
        Self {
            providers,
            journal,
            dependents: RwLock::new(HashMap::new()),
        }
    }

    pub fn providers(&self) -> &[Arc<dyn CacheProvider>] {
        &self.providers
    }

    /// Declare that `dependent` must be invalidated whenever `parent` is.
    pub async fn register_dependency(&self, parent: EntityRef, dependent: EntityRef) {
        let mut graph = self.dependents.write().await;
        graph.entry(parent).or_default().insert(dependent);
    }

    /// Invalidate one entity according to its configured strategy, then fan
    /// out through its dependency graph.
    pub async fn invalidate(
        &self,
        entity_type: &str,
        entity_id: &str,
        config: &CacheConfig,
    ) -> SyncResult<()> {
        if !config.enabled {
            return Ok(());
        }

        match config.mode {
            InvalidationMode::Immediate => {
                self.invalidate_immediate(entity_type, entity_id, &config.tags)
                    .await?;
            }
            InvalidationMode::Lazy => {
                let key = entity_cache_key(entity_type, entity_id);
                for provider in &self.providers {
                    provider.mark_stale(&key).await?;
                }
            }
            InvalidationMode::Scheduled => {
                let pending = PendingInvalidation::new(entity_type, entity_id);
                self.journal.record(&pending).await?;
                debug!(
                    cache_key = %pending.cache_key,
                    "scheduled cache invalidation recorded"
                );
            }
        }

        self.invalidate_dependents(entity_type, entity_id).await
    }

    /// Delete the entity key and any tagged companions on every provider.
    async fn invalidate_immediate(
        &self,
        entity_type: &str,
        entity_id: &str,
        tags: &[String],
    ) -> SyncResult<()> {
        let key = entity_cache_key(entity_type, entity_id);
        for provider in &self.providers {
            provider.delete(&key).await?;
            if !tags.is_empty() {
                provider.invalidate_by_tags(tags).await?;
            }
        }
        Ok(())
    }

    /// Traverse the dependency graph breadth-first with a visited set;
    /// cycles are harmless because invalidation is idempotent.
    async fn invalidate_dependents(&self, entity_type: &str, entity_id: &str) -> SyncResult<()> {
        let root: EntityRef = (entity_type.to_string(), entity_id.to_string());
        let graph = self.dependents.read().await;

        let mut visited: HashSet<EntityRef> = HashSet::new();
        visited.insert(root.clone());
        let mut queue: VecDeque<EntityRef> = graph
            .get(&root)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default();

        while let Some(entity) = queue.pop_front() {
            if !visited.insert(entity.clone()) {
                continue;
            }
            let key = entity_cache_key(&entity.0, &entity.1);
            for provider in &self.providers {
                provider.delete(&key).await?;
            }
            if let Some(next) = graph.get(&entity) {
                queue.extend(next.iter().cloned());
            }
        }
        Ok(())
    }

    /// Write a known payload into every provider (cache warming).
    pub async fn warm(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: &Payload,
        config: &CacheConfig,
    ) -> SyncResult<()> {
        if !config.enabled {
            return Ok(());
        }
        let key = entity_cache_key(entity_type, entity_id);
        for provider in &self.providers {
            provider
                .set(&key, payload, config.warm_ttl_seconds, &config.tags)
                .await?;
        }
        Ok(())
    }

    /// Execute every journaled invalidation; called by the minutely sweeper.
    pub async fn sweep_scheduled(&self) -> SyncResult<usize> {
        let pending = self.journal.list().await?;
        let mut swept = 0;

        for batch in pending.chunks(INVALIDATION_BATCH_SIZE) {
            for entry in batch {
                match self
                    .invalidate_immediate(&entry.entity_type, &entry.entity_id, &[])
                    .await
                {
                    Ok(()) => {
                        self.journal.remove(&entry.cache_key).await?;
                        swept += 1;
                    }
                    Err(e) => {
                        // Entry stays journaled for the next sweep
                        warn!(cache_key = %entry.cache_key, error = %e,
                              "scheduled invalidation failed");
                    }
                }
            }
        }
        Ok(swept)
    }

    /// Invalidate many entities in batches of 100 with per-batch error
    /// isolation: a failing batch is reported without aborting the rest.
    pub async fn bulk_invalidate(
        &self,
        entity_type: &str,
        entity_ids: &[String],
        config: &CacheConfig,
    ) -> SyncResult<BulkInvalidationReport> {
        let mut report = BulkInvalidationReport::default();

        for batch in entity_ids.chunks(INVALIDATION_BATCH_SIZE) {
            let mut batch_failed = false;
            for entity_id in batch {
                if let Err(e) = self.invalidate(entity_type, entity_id, config).await {
                    batch_failed = true;
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", entity_id, e));
                } else {
                    report.invalidated += 1;
                }
            }
            if batch_failed {
                warn!(entity_type, "bulk invalidation batch finished with errors");
            }
        }
        Ok(report)
    }

    /// Drop expired entries on every provider; called hourly.
    pub async fn cleanup_expired(&self) -> SyncResult<usize> {
        let mut removed = 0;
        for provider in &self.providers {
            removed += provider.cleanup().await.map_err(|e| SyncError::CacheError {
                message: format!("cleanup on {} failed: {}", provider.name(), e),
            })?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_sync_core::payload::FieldValue;

    fn invalidator() -> (CacheInvalidator, Arc<InMemoryCacheProvider>) {
        let provider = Arc::new(InMemoryCacheProvider::new("cache"));
        let journal = Arc::new(InMemoryInvalidationJournal::new());
        (
            CacheInvalidator::new(vec![provider.clone()], journal),
            provider,
        )
    }

    fn sample_payload() -> Payload {
        let mut p = Payload::new();
        p.insert("name".to_string(), FieldValue::from("A"));
        p
    }

    async fn seed(provider: &InMemoryCacheProvider, entity_type: &str, id: &str) {
        provider
            .set(
                &entity_cache_key(entity_type, id),
                &sample_payload(),
                None,
                &[],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn immediate_mode_deletes_the_entity_key() {
        let (invalidator, provider) = invalidator();
        seed(&provider, "product", "p-1").await;

        invalidator
            .invalidate("product", "p-1", &CacheConfig::default())
            .await
            .unwrap();
        assert!(provider.get("product:p-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scheduled_mode_journals_and_sweeps() {
        let (invalidator, provider) = invalidator();
        seed(&provider, "product", "p-1").await;

        let config = CacheConfig {
            mode: InvalidationMode::Scheduled,
            ..CacheConfig::default()
        };
        invalidator
            .invalidate("product", "p-1", &config)
            .await
            .unwrap();
        // Still cached until the sweeper runs
        assert!(provider.get("product:p-1").await.unwrap().is_some());

        let swept = invalidator.sweep_scheduled().await.unwrap();
        assert_eq!(swept, 1);
        assert!(provider.get("product:p-1").await.unwrap().is_none());
        // Journal is drained
        assert_eq!(invalidator.sweep_scheduled().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dependency_graph_fans_out_and_survives_cycles() {
        let (invalidator, provider) = invalidator();
        seed(&provider, "customer", "c-1").await;
        seed(&provider, "order", "o-1").await;
        seed(&provider, "order", "o-2").await;

        invalidator
            .register_dependency(
                ("customer".to_string(), "c-1".to_string()),
                ("order".to_string(), "o-1".to_string()),
            )
            .await;
        invalidator
            .register_dependency(
                ("customer".to_string(), "c-1".to_string()),
                ("order".to_string(), "o-2".to_string()),
            )
            .await;
        // Cycle back to the root
        invalidator
            .register_dependency(
                ("order".to_string(), "o-1".to_string()),
                ("customer".to_string(), "c-1".to_string()),
            )
            .await;

        invalidator
            .invalidate("customer", "c-1", &CacheConfig::default())
            .await
            .unwrap();

        assert!(provider.get("customer:c-1").await.unwrap().is_none());
        assert!(provider.get("order:o-1").await.unwrap().is_none());
        assert!(provider.get("order:o-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bulk_invalidation_reports_per_id_results() {
        let (invalidator, provider) = invalidator();
        let ids: Vec<String> = (0..250).map(|i| format!("p-{}", i)).collect();
        for id in &ids {
            seed(&provider, "product", id).await;
        }

        let report = invalidator
            .bulk_invalidate("product", &ids, &CacheConfig::default())
            .await
            .unwrap();
        assert_eq!(report.invalidated, 250);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn warm_writes_through_every_provider() {
        let (invalidator, provider) = invalidator();
        let config = CacheConfig {
            warm_ttl_seconds: Some(600),
            ..CacheConfig::default()
        };
        invalidator
            .warm("product", "p-9", &sample_payload(), &config)
            .await
            .unwrap();
        assert_eq!(
            provider.get("product:p-9").await.unwrap(),
            Some(sample_payload())
        );
    }
}
