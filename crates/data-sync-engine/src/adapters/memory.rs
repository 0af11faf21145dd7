// File: src/adapters/memory.rs
//
// In-memory store adapter for tests and embedded deployments
// Doubles as the database and search-index target in single-process runs

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use data_sync_core::adapter::{AdapterError, AdapterKind, ApplyOp, SyncAdapter, SyncEventKind};
use data_sync_core::payload::Payload;

/// Stores entity snapshots keyed by (entity_type, entity_id).
pub struct InMemoryStoreAdapter {
    name: String,
    kind: AdapterKind,
    records: Arc<RwLock<BTreeMap<(String, String), Payload>>>,
}

impl InMemoryStoreAdapter {
    pub fn new(name: impl Into<String>, kind: AdapterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            records: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Seed a snapshot directly, bypassing the sync path.
    pub async fn seed(&self, entity_type: &str, entity_id: &str, payload: Payload) {
        let mut records = self.records.write().await;
        records.insert((entity_type.to_string(), entity_id.to_string()), payload);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl SyncAdapter for InMemoryStoreAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        self.kind
    }

    async fn apply(&self, op: ApplyOp<'_>) -> Result<(), AdapterError> {
        let mut records = self.records.write().await;
        let key = (op.entity_type.to_string(), op.entity_id.to_string());
        match op.kind {
            SyncEventKind::Create | SyncEventKind::Update | SyncEventKind::BulkUpdate => {
                records.insert(key, op.payload.clone());
            }
            SyncEventKind::Delete => {
                records.remove(&key);
            }
        }
        Ok(())
    }

    async fn read(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<Payload>, AdapterError> {
        let records = self.records.read().await;
        Ok(records
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned())
    }

    async fn list_ids(&self, entity_type: &str) -> Result<Vec<String>, AdapterError> {
        let records = self.records.read().await;
        Ok(records
            .keys()
            .filter(|(t, _)| t == entity_type)
            .map(|(_, id)| id.clone())
            .collect())
    }
}
