// File: src/adapters/cache.rs
//
// Bridges a cache provider into the adapter fanout so cached copies are
// written and invalidated through the same interface as every other target

use async_trait::async_trait;
use std::sync::Arc;

use data_sync_core::adapter::{
    AdapterError, AdapterKind, AdapterStats, ApplyOp, SyncAdapter, SyncEventKind,
};
use data_sync_core::error::SyncError;
use data_sync_core::payload::Payload;

use crate::cache::{entity_cache_key, CacheProvider};

fn provider_err(e: SyncError) -> AdapterError {
    match e {
        SyncError::CacheError { message } => AdapterError::Unavailable { message },
        other => AdapterError::Unavailable {
            message: other.to_string(),
        },
    }
}

/// Cache-kind adapter backed by any [`CacheProvider`].
pub struct CacheStoreAdapter {
    name: String,
    provider: Arc<dyn CacheProvider>,
    /// TTL applied to write-through entries, seconds
    ttl_seconds: Option<u64>,
}

impl CacheStoreAdapter {
    pub fn new(name: impl Into<String>, provider: Arc<dyn CacheProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
            ttl_seconds: None,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }
}

#[async_trait]
impl SyncAdapter for CacheStoreAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Cache
    }

    async fn apply(&self, op: ApplyOp<'_>) -> Result<(), AdapterError> {
        let key = entity_cache_key(op.entity_type, op.entity_id);
        match op.kind {
            SyncEventKind::Create | SyncEventKind::Update | SyncEventKind::BulkUpdate => self
                .provider
                .set(&key, op.payload, self.ttl_seconds, &[])
                .await
                .map_err(provider_err),
            SyncEventKind::Delete => self.provider.delete(&key).await.map_err(provider_err),
        }
    }

    async fn read(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<Payload>, AdapterError> {
        self.provider
            .get(&entity_cache_key(entity_type, entity_id))
            .await
            .map_err(provider_err)
    }

    async fn list_ids(&self, entity_type: &str) -> Result<Vec<String>, AdapterError> {
        let prefix = format!("{}:", entity_type);
        let keys = self
            .provider
            .keys(&format!("{}*", prefix))
            .await
            .map_err(provider_err)?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn stats(&self) -> Result<Option<AdapterStats>, AdapterError> {
        let stats = self.provider.stats().await.map_err(provider_err)?;
        Ok(Some(AdapterStats {
            hit_rate: stats.hit_rate(),
            size: stats.size,
            memory_bytes: stats.memory_bytes,
        }))
    }

    async fn set(
        &self,
        key: &str,
        value: &Payload,
        ttl_seconds: Option<u64>,
    ) -> Result<(), AdapterError> {
        self.provider
            .set(key, value, ttl_seconds, &[])
            .await
            .map_err(provider_err)
    }

    async fn delete(&self, key: &str) -> Result<(), AdapterError> {
        self.provider.delete(key).await.map_err(provider_err)
    }

    async fn mark_stale(&self, key: &str) -> Result<(), AdapterError> {
        self.provider.mark_stale(key).await.map_err(provider_err)
    }

    async fn invalidate_by_tags(&self, tags: &[String]) -> Result<usize, AdapterError> {
        self.provider
            .invalidate_by_tags(tags)
            .await
            .map_err(provider_err)
    }

    async fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize, AdapterError> {
        self.provider
            .invalidate_by_pattern(pattern)
            .await
            .map_err(provider_err)
    }

    async fn cleanup(&self) -> Result<usize, AdapterError> {
        self.provider.cleanup().await.map_err(provider_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheProvider;
    use data_sync_core::payload::FieldValue;

    fn payload() -> Payload {
        let mut p = Payload::new();
        p.insert("email".to_string(), FieldValue::from("x@a"));
        p
    }

    #[tokio::test]
    async fn write_through_and_list_ids() {
        let provider = Arc::new(InMemoryCacheProvider::new("redis"));
        let adapter = CacheStoreAdapter::new("cache", provider);

        let p = payload();
        adapter
            .apply(ApplyOp {
                kind: SyncEventKind::Create,
                entity_type: "user",
                entity_id: "u-1",
                payload: &p,
            })
            .await
            .unwrap();

        assert_eq!(adapter.read("user", "u-1").await.unwrap(), Some(p));
        assert_eq!(adapter.list_ids("user").await.unwrap(), vec!["u-1"]);
        let stats = adapter.stats().await.unwrap().unwrap();
        assert_eq!(stats.size, 1);
    }
}
