// File: src/monitoring/mod.rs
//
// Operational health surface aggregating event, replication, and audit state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use data_sync_core::error::SyncResult;

use crate::replication::Replicator;
use crate::store::{CheckStatus, CheckStore, CursorState, EventStore, StatusCounts};

/// Overall service health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Snapshot returned by the operational `health_check` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub event_counts: StatusCounts,
    pub generated_at: DateTime<Utc>,
}

/// Failure rate beyond which the service is degraded.
const DEGRADED_FAILURE_RATE: f64 = 0.02;

/// Failure rate beyond which the service is critical.
const CRITICAL_FAILURE_RATE: f64 = 0.10;

/// Aggregates component state into one health verdict.
pub struct HealthMonitor {
    events: Arc<dyn EventStore>,
    replicator: Arc<Replicator>,
    checks: Arc<dyn CheckStore>,
    pending_high_watermark: usize,
}

impl HealthMonitor {
    pub fn new(
        events: Arc<dyn EventStore>,
        replicator: Arc<Replicator>,
        checks: Arc<dyn CheckStore>,
        pending_high_watermark: usize,
    ) -> Self {
        Self {
            events,
            replicator,
            checks,
            pending_high_watermark,
        }
    }

    pub async fn health_check(&self) -> SyncResult<HealthReport> {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        let mut status = HealthStatus::Healthy;

        let counts = self.events.count_by_status(Duration::hours(1)).await?;
        let failure_rate = counts.failure_rate();
        if failure_rate > CRITICAL_FAILURE_RATE {
            status = HealthStatus::Critical;
            issues.push(format!(
                "sync failure rate {:.3} over the last hour",
                failure_rate
            ));
            recommendations
                .push("inspect failed events and their adapter errors".to_string());
        } else if failure_rate > DEGRADED_FAILURE_RATE {
            status = HealthStatus::Degraded;
            issues.push(format!(
                "sync failure rate {:.3} over the last hour",
                failure_rate
            ));
            recommendations.push("review recent adapter failures".to_string());
        }

        let pending = self.events.count_pending().await?;
        if pending > self.pending_high_watermark {
            status = escalate(status, HealthStatus::Degraded);
            issues.push(format!(
                "{} events pending, above the high-watermark {}",
                pending, self.pending_high_watermark
            ));
            recommendations.push("increase worker count or pause bulk producers".to_string());
        }

        let cursors = self.replicator.status(None).await?;
        for cursor in &cursors {
            match cursor.state {
                CursorState::Error => {
                    status = escalate(status, HealthStatus::Degraded);
                    issues.push(format!(
                        "replication cursor ({}, {} -> {}) in error: {}",
                        cursor.entity_type,
                        cursor.source_region,
                        cursor.target_region,
                        cursor.last_error.as_deref().unwrap_or("unknown")
                    ));
                    recommendations.push(format!(
                        "resume replication for ({}, {} -> {}) to trigger catch-up",
                        cursor.entity_type, cursor.source_region, cursor.target_region
                    ));
                }
                _ if cursor.lag_seconds > 0 => {
                    status = escalate(status, HealthStatus::Degraded);
                    issues.push(format!(
                        "replication cursor ({}, {} -> {}) lagging {} s",
                        cursor.entity_type,
                        cursor.source_region,
                        cursor.target_region,
                        cursor.lag_seconds
                    ));
                }
                _ => {}
            }
        }

        let recent_checks = self
            .checks
            .list_recent(None, Utc::now() - Duration::hours(1))
            .await?;
        let failed_checks = recent_checks
            .iter()
            .filter(|c| c.status == CheckStatus::Failed)
            .count();
        if failed_checks > 0 {
            status = escalate(status, HealthStatus::Degraded);
            issues.push(format!(
                "{} integrity checks failed in the last hour",
                failed_checks
            ));
            recommendations.push("inspect integrity findings and re-sync divergent ids".to_string());
        }

        Ok(HealthReport {
            status,
            issues,
            recommendations,
            event_counts: counts,
            generated_at: Utc::now(),
        })
    }
}

fn escalate(current: HealthStatus, at_least: HealthStatus) -> HealthStatus {
    use HealthStatus::*;
    match (current, at_least) {
        (Critical, _) | (_, Critical) => Critical,
        (Degraded, _) | (_, Degraded) => Degraded,
        _ => Healthy,
    }
}
