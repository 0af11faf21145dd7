// File: src/config.rs
//
// Engine-wide and per-entity synchronization configuration
// Registered during startup, then frozen and shared read-only

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::str::FromStr;
use std::sync::Arc;

use crate::adapter::AdapterKind;
use crate::conflict::ResolutionStrategy;
use crate::error::{SyncError, SyncResult};

/// Engine-wide tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker pool size draining pending events (bounded 1-10)
    pub workers: usize,
    pub max_attempts_per_event: i32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_factor: f64,
    pub jitter_ratio: f64,
    /// Bulk submissions are refused above this pending count
    pub pending_high_watermark: usize,
    /// Fraction of worker capacity the auditor may consume
    pub integrity_check_share: f64,
    pub replication_max_lag_seconds: i64,
    pub scheduled_invalidation_interval_seconds: u64,
    pub catchup_batch_size: usize,
    pub default_deadline_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            max_attempts_per_event: 3,
            retry_backoff_base_ms: 2000,
            retry_backoff_factor: 2.0,
            jitter_ratio: 0.1,
            pending_high_watermark: 10_000,
            integrity_check_share: 0.2,
            replication_max_lag_seconds: 300,
            scheduled_invalidation_interval_seconds: 60,
            catchup_batch_size: 1000,
            default_deadline_seconds: 30,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// Recognized variables use the `SYNC_` prefix, e.g. `SYNC_WORKERS`,
    /// `SYNC_MAX_ATTEMPTS_PER_EVENT`, `SYNC_PENDING_HIGH_WATERMARK`.
    pub fn from_env() -> SyncResult<Self> {
        let defaults = Self::default();
        let config = Self {
            workers: load_with_default("SYNC_WORKERS", defaults.workers)?,
            max_attempts_per_event: load_with_default(
                "SYNC_MAX_ATTEMPTS_PER_EVENT",
                defaults.max_attempts_per_event,
            )?,
            retry_backoff_base_ms: load_with_default(
                "SYNC_RETRY_BACKOFF_BASE_MS",
                defaults.retry_backoff_base_ms,
            )?,
            retry_backoff_factor: load_with_default(
                "SYNC_RETRY_BACKOFF_FACTOR",
                defaults.retry_backoff_factor,
            )?,
            jitter_ratio: load_with_default("SYNC_JITTER_RATIO", defaults.jitter_ratio)?,
            pending_high_watermark: load_with_default(
                "SYNC_PENDING_HIGH_WATERMARK",
                defaults.pending_high_watermark,
            )?,
            integrity_check_share: load_with_default(
                "SYNC_INTEGRITY_CHECK_SHARE",
                defaults.integrity_check_share,
            )?,
            replication_max_lag_seconds: load_with_default(
                "SYNC_REPLICATION_MAX_LAG_SECONDS",
                defaults.replication_max_lag_seconds,
            )?,
            scheduled_invalidation_interval_seconds: load_with_default(
                "SYNC_SCHEDULED_INVALIDATION_INTERVAL_SECONDS",
                defaults.scheduled_invalidation_interval_seconds,
            )?,
            catchup_batch_size: load_with_default(
                "SYNC_CATCHUP_BATCH_SIZE",
                defaults.catchup_batch_size,
            )?,
            default_deadline_seconds: load_with_default(
                "SYNC_DEFAULT_DEADLINE_SECONDS",
                defaults.default_deadline_seconds,
            )?,
        };
        config.validate()
    }

    /// Clamp or reject out-of-range values.
    pub fn validate(mut self) -> SyncResult<Self> {
        self.workers = self.workers.clamp(1, 10);
        if self.max_attempts_per_event < 1 {
            return Err(SyncError::ConfigurationError {
                message: "max_attempts_per_event must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(SyncError::ConfigurationError {
                message: format!("jitter_ratio {} outside [0, 1]", self.jitter_ratio),
            });
        }
        if !(0.0..=1.0).contains(&self.integrity_check_share) {
            return Err(SyncError::ConfigurationError {
                message: format!(
                    "integrity_check_share {} outside [0, 1]",
                    self.integrity_check_share
                ),
            });
        }
        if self.retry_backoff_factor < 1.0 {
            return Err(SyncError::ConfigurationError {
                message: "retry_backoff_factor must be >= 1".to_string(),
            });
        }
        Ok(self)
    }
}

fn load_with_default<T>(key: &str, default: T) -> SyncResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value.parse().map_err(|e| SyncError::ConfigurationError {
            message: format!("{}: {}", key, e),
        }),
        Err(_) => Ok(default),
    }
}

/// Binding of a named adapter into an entity type's fanout set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterBinding {
    pub name: String,
    pub kind: AdapterKind,
    /// Read-only bindings participate in fanout only as observers
    pub write_allowed: bool,
}

impl AdapterBinding {
    pub fn writable(name: impl Into<String>, kind: AdapterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            write_allowed: true,
        }
    }

    pub fn read_only(name: impl Into<String>, kind: AdapterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            write_allowed: false,
        }
    }
}

/// Conflict handling configuration for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    pub strategy: ResolutionStrategy,
    #[serde(default)]
    pub merge_fields: Vec<String>,
    #[serde(default)]
    pub ignore_fields: Vec<String>,
    #[serde(default)]
    pub custom_resolver: Option<String>,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::LastWriteWins,
            merge_fields: Vec::new(),
            ignore_fields: Vec::new(),
            custom_resolver: None,
        }
    }
}

/// How cache entries for an entity type are invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationMode {
    Immediate,
    Lazy,
    Scheduled,
}

/// Cache behavior for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub mode: InvalidationMode,
    /// Tag keys invalidated together with the entity key
    #[serde(default)]
    pub tags: Vec<String>,
    /// Entity types whose cached entries depend on this one
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// TTL used by warm writes, seconds
    #[serde(default)]
    pub warm_ttl_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: InvalidationMode::Immediate,
            tags: Vec::new(),
            dependencies: Vec::new(),
            warm_ttl_seconds: None,
        }
    }
}

/// Cross-region replication settings for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub enabled: bool,
    pub regions: Vec<String>,
    pub max_lag_seconds: i64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            regions: Vec::new(),
            max_lag_seconds: 300,
        }
    }
}

/// Declared schema for integrity validation: required fields and field types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySchema {
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Field name -> expected type name (`FieldValue::type_name` values)
    #[serde(default)]
    pub field_types: BTreeMap<String, String>,
}

/// Complete synchronization behavior for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySyncConfig {
    pub entity_type: String,
    pub adapters: Vec<AdapterBinding>,
    #[serde(default)]
    pub conflict: ConflictConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    /// Fields whose divergence between snapshots is a data inconsistency
    #[serde(default)]
    pub critical_fields: Vec<String>,
    #[serde(default)]
    pub schema: EntitySchema,
    /// Fields referencing other entities, `field -> entity_type`
    #[serde(default)]
    pub reference_fields: BTreeMap<String, String>,
    /// Per-event deadline override, seconds
    #[serde(default)]
    pub deadline_seconds: Option<u64>,
}

impl EntitySyncConfig {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            adapters: Vec::new(),
            conflict: ConflictConfig::default(),
            cache: CacheConfig::default(),
            replication: ReplicationConfig::default(),
            critical_fields: Vec::new(),
            schema: EntitySchema::default(),
            reference_fields: BTreeMap::new(),
            deadline_seconds: None,
        }
    }

    pub fn with_adapter(mut self, binding: AdapterBinding) -> Self {
        self.adapters.push(binding);
        self
    }

    pub fn with_conflict(mut self, conflict: ConflictConfig) -> Self {
        self.conflict = conflict;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_replication(mut self, replication: ReplicationConfig) -> Self {
        self.replication = replication;
        self
    }

    pub fn with_critical_fields(mut self, fields: Vec<String>) -> Self {
        self.critical_fields = fields;
        self
    }

    pub fn with_schema(mut self, schema: EntitySchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_reference_field(
        mut self,
        field: impl Into<String>,
        target_entity_type: impl Into<String>,
    ) -> Self {
        self.reference_fields
            .insert(field.into(), target_entity_type.into());
        self
    }

    /// Adapters the engine writes through during fanout.
    pub fn writable_adapters(&self) -> impl Iterator<Item = &AdapterBinding> {
        self.adapters.iter().filter(|b| b.write_allowed)
    }
}

/// Startup-frozen lookup of per-entity configuration.
pub struct ConfigRegistry {
    entries: HashMap<String, EntitySyncConfig>,
}

impl ConfigRegistry {
    pub fn builder() -> ConfigRegistryBuilder {
        ConfigRegistryBuilder::default()
    }

    /// Look up the configuration for an entity type.
    pub fn get(&self, entity_type: &str) -> SyncResult<&EntitySyncConfig> {
        self.entries
            .get(entity_type)
            .ok_or_else(|| SyncError::ConfigurationMissing {
                entity_type: entity_type.to_string(),
            })
    }

    pub fn entity_types(&self) -> Vec<&str> {
        self.entries.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct ConfigRegistryBuilder {
    entries: HashMap<String, EntitySyncConfig>,
}

impl ConfigRegistryBuilder {
    pub fn register(mut self, config: EntitySyncConfig) -> Self {
        self.entries.insert(config.entity_type.clone(), config);
        self
    }

    pub fn build(self) -> Arc<ConfigRegistry> {
        Arc::new(ConfigRegistry {
            entries: self.entries,
        })
    }
}
