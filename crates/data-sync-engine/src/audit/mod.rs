// File: src/audit/mod.rs
//
// Periodic consistency, completeness, referential-integrity, and schema
// checks over the registered sync targets, with threshold alerting
// The auditor is read-only; it never mutates payloads

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use data_sync_core::adapter::{AdapterRegistry, SyncAdapter};
use data_sync_core::config::{ConfigRegistry, EntitySyncConfig};
use data_sync_core::error::{SyncError, SyncResult};
use data_sync_core::payload::{FieldValue, Payload};

use crate::store::{
    CheckFinding, CheckKind, CheckStatus, CheckStore, ConflictStore, EventStore, IntegrityCheck,
};

/// Alert severity escalates from warning to critical with the breach size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// One emitted audit alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub code: String,
    pub message: String,
    pub entity_type: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

/// Startup-registered alert sink.
pub trait AlertHandler: Send + Sync {
    fn on_alert(&self, alert: &Alert);
}

/// Default handler routing alerts into the log stream.
pub struct TracingAlertHandler;

impl AlertHandler for TracingAlertHandler {
    fn on_alert(&self, alert: &Alert) {
        match alert.severity {
            AlertSeverity::Warning => warn!(code = %alert.code, "{}", alert.message),
            AlertSeverity::Critical => {
                tracing::error!(code = %alert.code, "{}", alert.message)
            }
        }
    }
}

/// Alerting thresholds over the trailing hour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditThresholds {
    pub consistency_score_min: f64,
    pub conflict_rate_max: f64,
    pub failure_rate_max: f64,
}

impl Default for AuditThresholds {
    fn default() -> Self {
        Self {
            consistency_score_min: 0.95,
            conflict_rate_max: 0.10,
            failure_rate_max: 0.02,
        }
    }
}

/// Runs the four check kinds and owns their result records.
pub struct IntegrityAuditor {
    configs: Arc<ConfigRegistry>,
    adapters: Arc<AdapterRegistry>,
    checks: Arc<dyn CheckStore>,
    events: Arc<dyn EventStore>,
    conflicts: Arc<dyn ConflictStore>,
    alert_handlers: Vec<Arc<dyn AlertHandler>>,
    thresholds: AuditThresholds,
    /// Caps concurrent checks to the configured share of worker capacity
    permits: Arc<Semaphore>,
}

impl IntegrityAuditor {
    pub fn new(
        configs: Arc<ConfigRegistry>,
        adapters: Arc<AdapterRegistry>,
        checks: Arc<dyn CheckStore>,
        events: Arc<dyn EventStore>,
        conflicts: Arc<dyn ConflictStore>,
        alert_handlers: Vec<Arc<dyn AlertHandler>>,
        max_concurrent_checks: usize,
    ) -> Self {
        Self {
            configs,
            adapters,
            checks,
            events,
            conflicts,
            alert_handlers,
            thresholds: AuditThresholds::default(),
            permits: Arc::new(Semaphore::new(max_concurrent_checks.max(1))),
        }
    }

    pub fn with_thresholds(mut self, thresholds: AuditThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    fn adapter(&self, name: &str) -> SyncResult<Arc<dyn SyncAdapter>> {
        self.adapters
            .get(name)
            .ok_or_else(|| SyncError::IntegrityError {
                message: format!("adapter {} not registered", name),
            })
    }

    /// Run one check and persist its result record.
    pub async fn run_check(
        &self,
        entity_type: &str,
        sources: &[String],
        kind: CheckKind,
    ) -> SyncResult<IntegrityCheck> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| SyncError::IntegrityError {
                message: format!("auditor stopped: {}", e),
            })?;

        let config = self.configs.get(entity_type)?.clone();
        let mut check = IntegrityCheck::start(entity_type, kind, sources.to_vec());
        self.checks.insert(&check).await?;

        let outcome = match kind {
            CheckKind::Consistency => self.check_consistency(&mut check, sources).await,
            CheckKind::Completeness => self.check_completeness(&mut check, sources).await,
            CheckKind::ReferentialIntegrity => {
                self.check_referential(&mut check, sources, &config).await
            }
            CheckKind::SchemaValidation => self.check_schema(&mut check, sources, &config).await,
        };

        match outcome {
            Ok(()) => {
                check.inconsistencies_found = check.findings.len() as i64;
                let status = if check.findings.is_empty() {
                    CheckStatus::Passed
                } else {
                    CheckStatus::Failed
                };
                check.finish(status);
            }
            Err(e) => {
                // Checks never retry; a source failure downgrades the run
                warn!(entity_type, kind = kind.as_str(), error = %e, "integrity check degraded");
                check.finish(CheckStatus::Warning);
            }
        }

        self.checks.update(&check).await?;
        info!(
            entity_type,
            kind = kind.as_str(),
            status = check.status.as_str(),
            records = check.records_checked,
            findings = check.findings.len(),
            "integrity check finished"
        );
        Ok(check)
    }

    /// Deep field-by-field comparison of every record across all sources,
    /// anchored on the first source.
    async fn check_consistency(
        &self,
        check: &mut IntegrityCheck,
        sources: &[String],
    ) -> SyncResult<()> {
        let Some((primary_name, others)) = sources.split_first() else {
            return Err(SyncError::IntegrityError {
                message: "consistency check needs at least one source".to_string(),
            });
        };
        let primary = self.adapter(primary_name)?;
        let ids = primary
            .list_ids(&check.entity_type)
            .await
            .map_err(|e| SyncError::IntegrityError {
                message: format!("listing {} failed: {}", primary_name, e),
            })?;
        check.records_checked = ids.len() as i64;

        for id in &ids {
            let snapshot_a = primary
                .read(&check.entity_type, id)
                .await
                .map_err(|e| SyncError::IntegrityError {
                    message: format!("reading {} from {} failed: {}", id, primary_name, e),
                })?;
            let Some(snapshot_a) = snapshot_a else {
                continue;
            };

            for other_name in others {
                let other = self.adapter(other_name)?;
                let snapshot_b = other.read(&check.entity_type, id).await.map_err(|e| {
                    SyncError::IntegrityError {
                        message: format!("reading {} from {} failed: {}", id, other_name, e),
                    }
                })?;

                match snapshot_b {
                    Some(snapshot_b) => {
                        for diff in snapshot_a.diff(&snapshot_b) {
                            check.findings.push(CheckFinding {
                                entity_id: id.clone(),
                                field_path: diff.path,
                                value_a: diff.value_a.map(|v| v.to_json()),
                                value_b: diff.value_b.map(|v| v.to_json()),
                                source_a: primary_name.clone(),
                                source_b: other_name.clone(),
                            });
                        }
                    }
                    None => check.findings.push(CheckFinding {
                        entity_id: id.clone(),
                        field_path: "_record".to_string(),
                        value_a: Some(snapshot_a.to_json()),
                        value_b: None,
                        source_a: primary_name.clone(),
                        source_b: other_name.clone(),
                    }),
                }
            }
        }
        Ok(())
    }

    /// Union the id sets of every source and flag ids missing anywhere.
    async fn check_completeness(
        &self,
        check: &mut IntegrityCheck,
        sources: &[String],
    ) -> SyncResult<()> {
        let mut per_source: Vec<(String, std::collections::BTreeSet<String>)> = Vec::new();
        for name in sources {
            let adapter = self.adapter(name)?;
            let ids = adapter.list_ids(&check.entity_type).await.map_err(|e| {
                SyncError::IntegrityError {
                    message: format!("listing {} failed: {}", name, e),
                }
            })?;
            per_source.push((name.clone(), ids.into_iter().collect()));
        }

        let union: std::collections::BTreeSet<String> = per_source
            .iter()
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect();
        check.records_checked = union.len() as i64;

        for id in &union {
            for (name, ids) in &per_source {
                if !ids.contains(id) {
                    let present_in = per_source
                        .iter()
                        .find(|(_, other)| other.contains(id))
                        .map(|(n, _)| n.clone())
                        .unwrap_or_default();
                    check.findings.push(CheckFinding {
                        entity_id: id.clone(),
                        field_path: "_presence".to_string(),
                        value_a: Some(serde_json::Value::Bool(true)),
                        value_b: None,
                        source_a: present_in,
                        source_b: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Verify every configured reference field points at an entity that
    /// exists in the same source.
    async fn check_referential(
        &self,
        check: &mut IntegrityCheck,
        sources: &[String],
        config: &EntitySyncConfig,
    ) -> SyncResult<()> {
        let Some(source_name) = sources.first() else {
            return Err(SyncError::IntegrityError {
                message: "referential check needs a source".to_string(),
            });
        };
        let source = self.adapter(source_name)?;
        let ids = source
            .list_ids(&check.entity_type)
            .await
            .map_err(|e| SyncError::IntegrityError {
                message: format!("listing {} failed: {}", source_name, e),
            })?;
        check.records_checked = ids.len() as i64;

        for id in &ids {
            let Some(record) = source.read(&check.entity_type, id).await.map_err(|e| {
                SyncError::IntegrityError {
                    message: format!("reading {} failed: {}", id, e),
                }
            })?
            else {
                continue;
            };

            for (field, target_type) in &config.reference_fields {
                let Some(FieldValue::Text(target_id)) = record.get(field) else {
                    continue;
                };
                let target = source
                    .read(target_type, target_id)
                    .await
                    .map_err(|e| SyncError::IntegrityError {
                        message: format!("reading {}/{} failed: {}", target_type, target_id, e),
                    })?;
                if target.is_none() {
                    check.findings.push(CheckFinding {
                        entity_id: id.clone(),
                        field_path: field.clone(),
                        value_a: Some(serde_json::Value::String(target_id.clone())),
                        value_b: None,
                        source_a: source_name.clone(),
                        source_b: source_name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Compare each record against the configured schema.
    async fn check_schema(
        &self,
        check: &mut IntegrityCheck,
        sources: &[String],
        config: &EntitySyncConfig,
    ) -> SyncResult<()> {
        let Some(source_name) = sources.first() else {
            return Err(SyncError::IntegrityError {
                message: "schema check needs a source".to_string(),
            });
        };
        let source = self.adapter(source_name)?;
        let ids = source
            .list_ids(&check.entity_type)
            .await
            .map_err(|e| SyncError::IntegrityError {
                message: format!("listing {} failed: {}", source_name, e),
            })?;
        check.records_checked = ids.len() as i64;

        for id in &ids {
            let Some(record) = source.read(&check.entity_type, id).await.map_err(|e| {
                SyncError::IntegrityError {
                    message: format!("reading {} failed: {}", id, e),
                }
            })?
            else {
                continue;
            };
            record_schema_findings(check, id, &record, config, source_name);
        }
        Ok(())
    }

    /// Run every applicable check for every registered entity type; the
    /// hourly loop calls this.
    pub async fn run_all(&self) -> SyncResult<Vec<IntegrityCheck>> {
        let mut results = Vec::new();
        for entity_type in self.configs.entity_types() {
            let config = self.configs.get(entity_type)?.clone();
            let sources: Vec<String> = config.adapters.iter().map(|b| b.name.clone()).collect();
            if sources.is_empty() {
                continue;
            }

            if sources.len() >= 2 {
                results.push(
                    self.run_check(entity_type, &sources, CheckKind::Consistency)
                        .await?,
                );
                results.push(
                    self.run_check(entity_type, &sources, CheckKind::Completeness)
                        .await?,
                );
            }
            if !config.reference_fields.is_empty() {
                results.push(
                    self.run_check(entity_type, &sources, CheckKind::ReferentialIntegrity)
                        .await?,
                );
            }
            if !config.schema.required_fields.is_empty() || !config.schema.field_types.is_empty() {
                results.push(
                    self.run_check(entity_type, &sources, CheckKind::SchemaValidation)
                        .await?,
                );
            }
        }

        let alerts = self.evaluate_thresholds().await?;
        for alert in &alerts {
            for handler in &self.alert_handlers {
                handler.on_alert(alert);
            }
        }
        Ok(results)
    }

    /// Evaluate the trailing-hour thresholds and build the alerts they
    /// breach.
    pub async fn evaluate_thresholds(&self) -> SyncResult<Vec<Alert>> {
        let hour = Duration::hours(1);
        let since = Utc::now() - hour;
        let mut alerts = Vec::new();

        let checks = self.checks.list_recent(None, since).await?;
        let (mut records, mut inconsistencies) = (0i64, 0i64);
        for check in checks
            .iter()
            .filter(|c| c.kind == CheckKind::Consistency && c.status != CheckStatus::Running)
        {
            records += check.records_checked;
            inconsistencies += check.inconsistencies_found;
        }
        if records > 0 {
            let score = 1.0 - inconsistencies as f64 / records as f64;
            if score < self.thresholds.consistency_score_min {
                alerts.push(Alert {
                    severity: AlertSeverity::Critical,
                    code: "consistency_score".to_string(),
                    message: format!(
                        "consistency score {:.3} below {:.2} over the last hour",
                        score, self.thresholds.consistency_score_min
                    ),
                    entity_type: None,
                    emitted_at: Utc::now(),
                });
            }
        }

        let counts = self.events.count_by_status(hour).await?;
        let settled = counts.total();
        if settled > 0 {
            let conflicts = self.conflicts.count_since(since).await?;
            let conflict_rate = conflicts as f64 / settled as f64;
            if conflict_rate > self.thresholds.conflict_rate_max {
                alerts.push(Alert {
                    severity: AlertSeverity::Warning,
                    code: "conflict_rate".to_string(),
                    message: format!(
                        "conflict rate {:.3} above {:.2} over the last hour",
                        conflict_rate, self.thresholds.conflict_rate_max
                    ),
                    entity_type: None,
                    emitted_at: Utc::now(),
                });
            }

            let failure_rate = counts.failure_rate();
            if failure_rate > self.thresholds.failure_rate_max {
                alerts.push(Alert {
                    severity: AlertSeverity::Critical,
                    code: "sync_failure_rate".to_string(),
                    message: format!(
                        "sync failure rate {:.3} above {:.2} over the last hour",
                        failure_rate, self.thresholds.failure_rate_max
                    ),
                    entity_type: None,
                    emitted_at: Utc::now(),
                });
            }
        }
        Ok(alerts)
    }
}

fn record_schema_findings(
    check: &mut IntegrityCheck,
    id: &str,
    record: &Payload,
    config: &EntitySyncConfig,
    source_name: &str,
) {
    for field in &config.schema.required_fields {
        if !record.contains_key(field) {
            check.findings.push(CheckFinding {
                entity_id: id.to_string(),
                field_path: field.clone(),
                value_a: None,
                value_b: None,
                source_a: source_name.to_string(),
                source_b: source_name.to_string(),
            });
        }
    }
    for (field, expected) in &config.schema.field_types {
        if let Some(value) = record.get(field) {
            if value.type_name() != expected.as_str() {
                check.findings.push(CheckFinding {
                    entity_id: id.to_string(),
                    field_path: field.clone(),
                    value_a: Some(serde_json::Value::String(value.type_name().to_string())),
                    value_b: Some(serde_json::Value::String(expected.clone())),
                    source_a: source_name.to_string(),
                    source_b: source_name.to_string(),
                });
            }
        }
    }
}
