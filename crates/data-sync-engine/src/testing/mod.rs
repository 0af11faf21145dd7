// File: src/testing/mod.rs
//
// Test doubles and fixtures shared by unit and integration tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use data_sync_core::adapter::{AdapterError, AdapterKind, ApplyOp, SyncAdapter};
use data_sync_core::payload::{FieldValue, Payload};

use crate::adapters::InMemoryStoreAdapter;

/// Adapter wrapping an in-memory store with a scripted failure queue.
///
/// Each `apply` pops the next scripted outcome; an empty script applies
/// cleanly. Reads always hit the inner store.
pub struct ScriptedAdapter {
    inner: InMemoryStoreAdapter,
    script: Mutex<VecDeque<Result<(), AdapterError>>>,
    apply_calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(name: impl Into<String>, kind: AdapterKind) -> Self {
        Self {
            inner: InMemoryStoreAdapter::new(name, kind),
            script: Mutex::new(VecDeque::new()),
            apply_calls: AtomicUsize::new(0),
        }
    }

    /// Queue outcomes for the next `apply` calls, in order.
    pub async fn script(&self, outcomes: Vec<Result<(), AdapterError>>) {
        let mut script = self.script.lock().await;
        script.extend(outcomes);
    }

    pub async fn fail_next(&self, error: AdapterError, times: usize) {
        let mut script = self.script.lock().await;
        for _ in 0..times {
            script.push_back(Err(error.clone()));
        }
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub async fn seed(&self, entity_type: &str, entity_id: &str, payload: Payload) {
        self.inner.seed(entity_type, entity_id, payload).await;
    }
}

#[async_trait]
impl SyncAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> AdapterKind {
        self.inner.kind()
    }

    async fn apply(&self, op: ApplyOp<'_>) -> Result<(), AdapterError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = {
            let mut script = self.script.lock().await;
            script.pop_front()
        };
        match scripted {
            Some(Ok(())) | None => self.inner.apply(op).await,
            Some(Err(e)) => Err(e),
        }
    }

    async fn read(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<Payload>, AdapterError> {
        self.inner.read(entity_type, entity_id).await
    }

    async fn list_ids(&self, entity_type: &str) -> Result<Vec<String>, AdapterError> {
        self.inner.list_ids(entity_type).await
    }
}

/// Build a payload from field tuples.
pub fn payload_of(fields: &[(&str, FieldValue)]) -> Payload {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Shared handle plus trait-object view of an adapter, for registries that
/// need both.
pub fn shared<A: SyncAdapter + 'static>(adapter: A) -> (Arc<A>, Arc<dyn SyncAdapter>) {
    let concrete = Arc::new(adapter);
    let dynamic: Arc<dyn SyncAdapter> = concrete.clone();
    (concrete, dynamic)
}
