// File: src/engine/workers.rs
//
// Background workers: event drain pool plus the four periodic loops
// (scheduled invalidations, replication lag, catch-up sweep, integrity
// audit) and cache cleanup, each with its own cancellation point

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::SyncEngine;
use crate::audit::IntegrityAuditor;
use crate::cache::CacheInvalidator;
use crate::replication::Replicator;

/// Sleep between polls when the event queue is empty.
const IDLE_POLL_MS: u64 = 100;

/// Replication lag recomputation cadence.
const LAG_MONITOR_INTERVAL_SECONDS: u64 = 300;

/// Catch-up sweep over lagging cursors.
const CATCHUP_SWEEP_INTERVAL_SECONDS: u64 = 3600;

/// Integrity audit cadence.
const AUDIT_INTERVAL_SECONDS: u64 = 3600;

/// Expired cache entry cleanup cadence.
const CACHE_CLEANUP_INTERVAL_SECONDS: u64 = 3600;

/// Handles to the engine's background tasks.
pub struct EngineWorkers {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl EngineWorkers {
    /// Spawn the worker pool and every periodic loop.
    pub fn start(
        engine: Arc<SyncEngine>,
        replicator: Arc<Replicator>,
        invalidator: Arc<CacheInvalidator>,
        auditor: Arc<IntegrityAuditor>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        for worker_id in 0..engine.config().workers {
            handles.push(spawn_event_worker(engine.clone(), cancel.clone(), worker_id));
        }

        handles.push(spawn_periodic(
            cancel.clone(),
            Duration::from_secs(
                engine
                    .config()
                    .scheduled_invalidation_interval_seconds
                    .max(1),
            ),
            "scheduled_invalidations",
            {
                let invalidator = invalidator.clone();
                move || {
                    let invalidator = invalidator.clone();
                    async move { invalidator.sweep_scheduled().await.map(|n| n as u64) }
                }
            },
        ));

        handles.push(spawn_periodic(
            cancel.clone(),
            Duration::from_secs(LAG_MONITOR_INTERVAL_SECONDS),
            "replication_lag_monitor",
            {
                let replicator = replicator.clone();
                move || {
                    let replicator = replicator.clone();
                    async move {
                        replicator
                            .monitor_lag(chrono::Utc::now())
                            .await
                            .map(|lagging| lagging.len() as u64)
                    }
                }
            },
        ));

        handles.push(spawn_periodic(
            cancel.clone(),
            Duration::from_secs(CATCHUP_SWEEP_INTERVAL_SECONDS),
            "replication_catchup_sweep",
            {
                let replicator = replicator.clone();
                move || {
                    let replicator = replicator.clone();
                    async move {
                        replicator
                            .sweep_lagging(chrono::Utc::now())
                            .await
                            .map(|n| n as u64)
                    }
                }
            },
        ));

        handles.push(spawn_periodic(
            cancel.clone(),
            Duration::from_secs(AUDIT_INTERVAL_SECONDS),
            "integrity_audit",
            {
                let auditor = auditor.clone();
                move || {
                    let auditor = auditor.clone();
                    async move { auditor.run_all().await.map(|checks| checks.len() as u64) }
                }
            },
        ));

        handles.push(spawn_periodic(
            cancel.clone(),
            Duration::from_secs(CACHE_CLEANUP_INTERVAL_SECONDS),
            "cache_cleanup",
            {
                let invalidator = invalidator.clone();
                move || {
                    let invalidator = invalidator.clone();
                    async move { invalidator.cleanup_expired().await.map(|n| n as u64) }
                }
            },
        ));

        info!(workers = engine.config().workers, "engine workers started");
        Self { cancel, handles }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every loop and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        futures_util::future::join_all(self.handles).await;
        info!("engine workers stopped");
    }
}

fn spawn_event_worker(
    engine: Arc<SyncEngine>,
    cancel: CancellationToken,
    worker_id: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(worker_id, "event worker running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = engine.process_next() => match result {
                    Ok(Some(outcome)) => {
                        debug!(worker_id, event_id = %outcome.event_id(), "event processed");
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_millis(IDLE_POLL_MS)) => {}
                        }
                    }
                    Err(e) => {
                        error!(worker_id, error = %e, "event worker iteration failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_millis(IDLE_POLL_MS * 5)) => {}
                        }
                    }
                },
            }
        }
        debug!(worker_id, "event worker stopped");
    })
}

fn spawn_periodic<F, Fut>(
    cancel: CancellationToken,
    period: Duration,
    name: &'static str,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = data_sync_core::error::SyncResult<u64>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        // Skip the immediate first tick so the loop starts one period in
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match task().await {
                        Ok(processed) if processed > 0 => {
                            debug!(loop_name = name, processed, "periodic loop pass finished");
                        }
                        Ok(_) => {}
                        Err(e) => error!(loop_name = name, error = %e, "periodic loop pass failed"),
                    }
                }
            }
        }
        debug!(loop_name = name, "periodic loop stopped");
    })
}
