// File: src/cache/redis.rs
//
// Redis cache provider
// Entries are JSON payloads; tag membership lives in companion sets so tag
// invalidation stays a two-step SMEMBERS + DEL

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use tokio::sync::RwLock;

use data_sync_core::error::{SyncError, SyncResult};
use data_sync_core::payload::Payload;

use super::{CacheProvider, CacheStats, InvalidationJournal, PendingInvalidation};

fn redis_err(context: &str, e: impl std::fmt::Display) -> SyncError {
    SyncError::CacheError {
        message: format!("{}: {}", context, e),
    }
}

/// Redis-backed cache provider.
pub struct RedisCacheProvider {
    name: String,
    connection: Arc<RwLock<ConnectionManager>>,
    /// Namespace prefix so several deployments can share one instance
    prefix: String,
}

impl RedisCacheProvider {
    pub async fn connect(
        name: impl Into<String>,
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> SyncResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| redis_err("Failed to create Redis client", e))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| redis_err("Failed to create Redis connection manager", e))?;
        Ok(Self {
            name: name.into(),
            connection: Arc::new(RwLock::new(connection)),
            prefix: prefix.into(),
        })
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}:entry:{}", self.prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.prefix, tag)
    }
}

#[async_trait]
impl CacheProvider for RedisCacheProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> SyncResult<Option<Payload>> {
        let mut conn = self.connection.write().await;
        let raw: Option<String> = conn
            .get(self.entry_key(key))
            .await
            .map_err(|e| redis_err("Failed to read cache entry", e))?;
        match raw {
            Some(serialized) => {
                let payload: Payload = serde_json::from_str(&serialized)
                    .map_err(|e| redis_err("Failed to deserialize cache entry", e))?;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &Payload,
        ttl_seconds: Option<u64>,
        tags: &[String],
    ) -> SyncResult<()> {
        let serialized = serde_json::to_string(value)
            .map_err(|e| redis_err("Failed to serialize cache entry", e))?;
        let entry_key = self.entry_key(key);

        let mut conn = self.connection.write().await;
        match ttl_seconds {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(&entry_key, &serialized, ttl)
                    .await
                    .map_err(|e| redis_err("Failed to write cache entry", e))?;
            }
            None => {
                let _: () = conn
                    .set(&entry_key, &serialized)
                    .await
                    .map_err(|e| redis_err("Failed to write cache entry", e))?;
            }
        }
        for tag in tags {
            let _: () = conn
                .sadd(self.tag_key(tag), &entry_key)
                .await
                .map_err(|e| redis_err("Failed to index cache tag", e))?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        let mut conn = self.connection.write().await;
        let _: () = conn
            .del(self.entry_key(key))
            .await
            .map_err(|e| redis_err("Failed to delete cache entry", e))?;
        Ok(())
    }

    async fn mark_stale(&self, key: &str) -> SyncResult<()> {
        // No dedicated stale marker on Redis; collapse the TTL instead
        let mut conn = self.connection.write().await;
        let _: () = conn
            .expire(self.entry_key(key), 1)
            .await
            .map_err(|e| redis_err("Failed to mark cache entry stale", e))?;
        Ok(())
    }

    async fn invalidate_by_tags(&self, tags: &[String]) -> SyncResult<usize> {
        let mut conn = self.connection.write().await;
        let mut removed = 0;
        for tag in tags {
            let tag_key = self.tag_key(tag);
            let members: Vec<String> = conn
                .smembers(&tag_key)
                .await
                .map_err(|e| redis_err("Failed to read tag members", e))?;
            for member in &members {
                let deleted: i64 = conn
                    .del(member)
                    .await
                    .map_err(|e| redis_err("Failed to delete tagged entry", e))?;
                removed += deleted as usize;
            }
            let _: () = conn
                .del(&tag_key)
                .await
                .map_err(|e| redis_err("Failed to drop tag index", e))?;
        }
        Ok(removed)
    }

    async fn invalidate_by_pattern(&self, pattern: &str) -> SyncResult<usize> {
        let mut conn = self.connection.write().await;
        let keys: Vec<String> = conn
            .keys(self.entry_key(pattern))
            .await
            .map_err(|e| redis_err("Failed to scan cache keys", e))?;
        let mut removed = 0;
        for key in &keys {
            let deleted: i64 = conn
                .del(key)
                .await
                .map_err(|e| redis_err("Failed to delete cache entry", e))?;
            removed += deleted as usize;
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> SyncResult<Vec<String>> {
        let mut conn = self.connection.write().await;
        let prefixed: Vec<String> = conn
            .keys(self.entry_key(pattern))
            .await
            .map_err(|e| redis_err("Failed to scan cache keys", e))?;
        let strip = format!("{}:entry:", self.prefix);
        Ok(prefixed
            .into_iter()
            .filter_map(|k| k.strip_prefix(&strip).map(str::to_string))
            .collect())
    }

    async fn stats(&self) -> SyncResult<CacheStats> {
        let mut conn = self.connection.write().await;
        let size: i64 = redis::cmd("DBSIZE")
            .query_async(&mut *conn)
            .await
            .map_err(|e| redis_err("Failed to read cache size", e))?;
        Ok(CacheStats {
            hits: 0,
            misses: 0,
            size: size as usize,
            memory_bytes: 0,
        })
    }

    async fn cleanup(&self) -> SyncResult<usize> {
        // Redis drops expired entries itself
        Ok(0)
    }
}

/// Redis-backed invalidation journal for deployments without PostgreSQL.
pub struct RedisInvalidationJournal {
    connection: Arc<RwLock<ConnectionManager>>,
    set_key: String,
}

impl RedisInvalidationJournal {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> SyncResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| redis_err("Failed to create Redis client", e))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| redis_err("Failed to create Redis connection manager", e))?;
        Ok(Self {
            connection: Arc::new(RwLock::new(connection)),
            set_key: format!("{}:pending_invalidations", prefix.into()),
        })
    }
}

#[async_trait]
impl InvalidationJournal for RedisInvalidationJournal {
    async fn record(&self, pending: &PendingInvalidation) -> SyncResult<()> {
        let serialized = serde_json::to_string(pending)
            .map_err(|e| redis_err("Failed to serialize pending invalidation", e))?;
        let mut conn = self.connection.write().await;
        let _: () = conn
            .hset(&self.set_key, &pending.cache_key, &serialized)
            .await
            .map_err(|e| redis_err("Failed to record pending invalidation", e))?;
        Ok(())
    }

    async fn list(&self) -> SyncResult<Vec<PendingInvalidation>> {
        let mut conn = self.connection.write().await;
        let raw: Vec<(String, String)> = conn
            .hgetall(&self.set_key)
            .await
            .map_err(|e| redis_err("Failed to list pending invalidations", e))?;
        let mut pending = Vec::with_capacity(raw.len());
        for (_, serialized) in raw {
            let entry: PendingInvalidation = serde_json::from_str(&serialized)
                .map_err(|e| redis_err("Failed to deserialize pending invalidation", e))?;
            pending.push(entry);
        }
        pending.sort_by_key(|p| p.created_at);
        Ok(pending)
    }

    async fn remove(&self, cache_key: &str) -> SyncResult<()> {
        let mut conn = self.connection.write().await;
        let _: () = conn
            .hdel(&self.set_key, cache_key)
            .await
            .map_err(|e| redis_err("Failed to remove pending invalidation", e))?;
        Ok(())
    }
}
