// File: src/cache/memory.rs
//
// In-memory cache provider and invalidation journal
// TTL-aware, tag-indexed, with hit/miss accounting

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use data_sync_core::error::SyncResult;
use data_sync_core::payload::Payload;

use super::{CacheProvider, CacheStats, InvalidationJournal, PendingInvalidation};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Payload,
    expires_at: Option<DateTime<Utc>>,
    stale: bool,
    tags: Vec<String>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

#[derive(Default)]
struct ProviderState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// In-memory cache backend used by tests and embedded deployments.
pub struct InMemoryCacheProvider {
    name: String,
    state: Arc<Mutex<ProviderState>>,
}

impl InMemoryCacheProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ProviderState::default())),
        }
    }

    /// Whether a live entry is marked stale.
    pub async fn is_stale(&self, key: &str) -> bool {
        let state = self.state.lock().await;
        state.entries.get(key).map_or(false, |e| e.stale)
    }
}

/// Glob matching with `*` wildcards only, the subset cache keys use.
fn glob_matches(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == key;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut remainder = key;

    // First segment anchors at the start, last at the end
    let first = parts[0];
    if !first.is_empty() {
        match remainder.strip_prefix(first) {
            Some(rest) => remainder = rest,
            None => return false,
        }
    }
    let last = parts[parts.len() - 1];
    if !last.is_empty() {
        match remainder.strip_suffix(last) {
            Some(rest) => remainder = rest,
            None => return false,
        }
    }

    // Middle segments must appear in order
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match remainder.find(part) {
            Some(pos) => remainder = &remainder[pos + part.len()..],
            None => return false,
        }
    }
    true
}

#[async_trait]
impl CacheProvider for InMemoryCacheProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> SyncResult<Option<Payload>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let expired = state.entries.get(key).map_or(false, |e| e.is_expired(now));
        if expired {
            state.entries.remove(key);
        }
        match state.entries.get(key) {
            Some(entry) => {
                let value = entry.value.clone();
                state.hits += 1;
                Ok(Some(value))
            }
            None => {
                state.misses += 1;
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &Payload,
        ttl_seconds: Option<u64>,
        tags: &[String],
    ) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at: ttl_seconds.map(|s| Utc::now() + Duration::seconds(s as i64)),
                stale: false,
                tags: tags.to_vec(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        state.entries.remove(key);
        Ok(())
    }

    async fn mark_stale(&self, key: &str) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.stale = true;
            entry.expires_at = Some(Utc::now() + Duration::seconds(1));
        }
        Ok(())
    }

    async fn invalidate_by_tags(&self, tags: &[String]) -> SyncResult<usize> {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| !entry.tags.iter().any(|t| tags.contains(t)));
        Ok(before - state.entries.len())
    }

    async fn invalidate_by_pattern(&self, pattern: &str) -> SyncResult<usize> {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|key, _| !glob_matches(pattern, key));
        Ok(before - state.entries.len())
    }

    async fn keys(&self, pattern: &str) -> SyncResult<Vec<String>> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_matches(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn stats(&self) -> SyncResult<CacheStats> {
        let state = self.state.lock().await;
        let memory_bytes = state
            .entries
            .iter()
            .map(|(k, e)| (k.len() + e.value.len() * 32) as u64)
            .sum();
        Ok(CacheStats {
            hits: state.hits,
            misses: state.misses,
            size: state.entries.len(),
            memory_bytes,
        })
    }

    async fn cleanup(&self) -> SyncResult<usize> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - state.entries.len())
    }
}

/// In-memory journal of scheduled invalidations.
#[derive(Default)]
pub struct InMemoryInvalidationJournal {
    pending: Arc<Mutex<HashMap<String, PendingInvalidation>>>,
}

impl InMemoryInvalidationJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvalidationJournal for InMemoryInvalidationJournal {
    async fn record(&self, pending: &PendingInvalidation) -> SyncResult<()> {
        let mut entries = self.pending.lock().await;
        entries.insert(pending.cache_key.clone(), pending.clone());
        Ok(())
    }

    async fn list(&self) -> SyncResult<Vec<PendingInvalidation>> {
        let entries = self.pending.lock().await;
        let mut pending: Vec<PendingInvalidation> = entries.values().cloned().collect();
        pending.sort_by_key(|p| p.created_at);
        Ok(pending)
    }

    async fn remove(&self, cache_key: &str) -> SyncResult<()> {
        let mut entries = self.pending.lock().await;
        entries.remove(cache_key);
        Ok(())
    }
}
