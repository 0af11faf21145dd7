// File: src/adapter.rs
//
// Adapter contract for heterogeneous sync targets
// Variants are data behind the interface, not an inheritance hierarchy

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::ErrorClass;
use crate::payload::Payload;

/// Kind of mutation carried by a sync event and applied through adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    Create,
    Update,
    Delete,
    BulkUpdate,
}

impl SyncEventKind {
    /// Dequeue priority: deletes first, bulk updates last.
    pub fn priority(&self) -> u8 {
        match self {
            SyncEventKind::Delete => 0,
            SyncEventKind::Create => 1,
            SyncEventKind::Update => 2,
            SyncEventKind::BulkUpdate => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEventKind::Create => "create",
            SyncEventKind::Update => "update",
            SyncEventKind::Delete => "delete",
            SyncEventKind::BulkUpdate => "bulk_update",
        }
    }
}

impl std::str::FromStr for SyncEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncEventKind::Create),
            "update" => Ok(SyncEventKind::Update),
            "delete" => Ok(SyncEventKind::Delete),
            "bulk_update" => Ok(SyncEventKind::BulkUpdate),
            other => Err(format!("unknown event kind: {}", other)),
        }
    }
}

/// Target store variant behind an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Database,
    Cache,
    SearchIndex,
    ExternalApi,
}

/// Typed adapter failure, classified so the engine can decide retry versus
/// immediate failure.
#[derive(Debug, thiserror::Error, Clone)]
pub enum AdapterError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Operation timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Target unavailable: {message}")]
    Unavailable { message: String },

    #[error("Schema rejected by target: {message}")]
    SchemaRejected { message: String },

    #[error("Authorization rejected: {message}")]
    Unauthorized { message: String },

    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Operation {operation} not supported by this adapter")]
    Unsupported { operation: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl AdapterError {
    pub fn unsupported(operation: &str) -> Self {
        AdapterError::Unsupported {
            operation: operation.to_string(),
        }
    }

    /// Network, timeout, and unavailability failures are transient;
    /// schema and authorization failures are permanent.
    pub fn class(&self) -> ErrorClass {
        match self {
            AdapterError::Network { .. }
            | AdapterError::Timeout { .. }
            | AdapterError::Unavailable { .. } => ErrorClass::Transient,
            AdapterError::SchemaRejected { .. }
            | AdapterError::Unauthorized { .. }
            | AdapterError::InvalidPayload { .. }
            | AdapterError::Unsupported { .. }
            | AdapterError::Serialization { .. } => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// One mutation to apply through an adapter.
#[derive(Debug, Clone, Copy)]
pub struct ApplyOp<'a> {
    pub kind: SyncEventKind,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub payload: &'a Payload,
}

/// Operational statistics reported by adapters that track them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterStats {
    pub hit_rate: f64,
    pub size: usize,
    pub memory_bytes: u64,
}

/// Capability interface over a concrete target store.
///
/// `apply`, `read`, and `list_ids` are mandatory; cache capabilities default
/// to `Unsupported` so only cache-backed adapters opt in.
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> AdapterKind;

    /// Apply one mutation to the target.
    async fn apply(&self, op: ApplyOp<'_>) -> Result<(), AdapterError>;

    /// Read the current snapshot of an entity, `None` when absent.
    async fn read(&self, entity_type: &str, entity_id: &str)
        -> Result<Option<Payload>, AdapterError>;

    /// List every entity id the target holds for a type.
    async fn list_ids(&self, entity_type: &str) -> Result<Vec<String>, AdapterError>;

    async fn stats(&self) -> Result<Option<AdapterStats>, AdapterError> {
        Ok(None)
    }

    async fn set(
        &self,
        _key: &str,
        _value: &Payload,
        _ttl_seconds: Option<u64>,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::unsupported("set"))
    }

    async fn delete(&self, _key: &str) -> Result<(), AdapterError> {
        Err(AdapterError::unsupported("delete"))
    }

    async fn mark_stale(&self, _key: &str) -> Result<(), AdapterError> {
        Err(AdapterError::unsupported("mark_stale"))
    }

    async fn invalidate_by_tags(&self, _tags: &[String]) -> Result<usize, AdapterError> {
        Err(AdapterError::unsupported("invalidate_by_tags"))
    }

    async fn invalidate_by_pattern(&self, _pattern: &str) -> Result<usize, AdapterError> {
        Err(AdapterError::unsupported("invalidate_by_pattern"))
    }

    /// Remove expired entries; returns how many were dropped.
    async fn cleanup(&self) -> Result<usize, AdapterError> {
        Ok(0)
    }
}

/// Named construction configuration for an adapter instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterSpec {
    pub name: String,
    pub kind: AdapterKind,
    /// Free-form options interpreted by the adapter factory
    /// (connection strings, endpoints, timeouts)
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl AdapterSpec {
    pub fn new(name: impl Into<String>, kind: AdapterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Startup-frozen registry of adapter instances keyed by name.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SyncAdapter>>,
}

impl AdapterRegistry {
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SyncAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Mutable registry builder; `build` freezes the registry behind an `Arc`.
#[derive(Default)]
pub struct AdapterRegistryBuilder {
    adapters: HashMap<String, Arc<dyn SyncAdapter>>,
}

impl AdapterRegistryBuilder {
    pub fn register(mut self, adapter: Arc<dyn SyncAdapter>) -> Self {
        self.adapters.insert(adapter.name().to_string(), adapter);
        self
    }

    pub fn build(self) -> Arc<AdapterRegistry> {
        Arc::new(AdapterRegistry {
            adapters: self.adapters,
        })
    }
}
