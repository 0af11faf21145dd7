// File: src/conflict/resolver.rs
//
// Named resolution strategies applied to detected conflicts
// Resolution is deterministic given the same two snapshots and strategy

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{ConflictRecord, ConflictState, ResolutionStrategy};
use crate::config::ConflictConfig;
use crate::payload::Payload;

/// Outcome of one resolution pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    /// The effective payload for downstream fanout
    Resolved(Payload),
    /// Record left in `Detected` for downstream tooling
    Manual,
    Failed(String),
}

/// Application-supplied resolver invoked for the `Custom` strategy.
///
/// Resolvers are pure local computation; a returned error fails the
/// conflict record.
pub trait CustomResolver: Send + Sync {
    fn resolve(&self, record: &ConflictRecord) -> Result<Payload, String>;
}

/// Applies resolution strategies and drives the record lifecycle.
///
/// Custom resolvers are registered at startup and the resolver is frozen
/// afterwards.
#[derive(Default)]
pub struct ConflictResolver {
    custom: HashMap<String, Arc<dyn CustomResolver>>,
}

#[derive(Default)]
pub struct ConflictResolverBuilder {
    custom: HashMap<String, Arc<dyn CustomResolver>>,
}

impl ConflictResolverBuilder {
    /// Register a resolver keyed by entity type or an explicit name.
    pub fn register_custom(
        mut self,
        name: impl Into<String>,
        resolver: Arc<dyn CustomResolver>,
    ) -> Self {
        self.custom.insert(name.into(), resolver);
        self
    }

    pub fn build(self) -> Arc<ConflictResolver> {
        Arc::new(ConflictResolver {
            custom: self.custom,
        })
    }
}

impl ConflictResolver {
    pub fn builder() -> ConflictResolverBuilder {
        ConflictResolverBuilder::default()
    }

    /// Resolve a detected conflict, mutating the record through its
    /// lifecycle. Snapshot `a` is the stored state, `b` the incoming
    /// candidate.
    pub fn resolve(
        &self,
        record: &mut ConflictRecord,
        config: &ConflictConfig,
    ) -> ResolutionOutcome {
        if record.state.is_terminal() {
            return match &record.resolved_payload {
                Some(payload) => ResolutionOutcome::Resolved(payload.clone()),
                None => ResolutionOutcome::Failed(
                    record
                        .reason
                        .clone()
                        .unwrap_or_else(|| "conflict previously failed".to_string()),
                ),
            };
        }

        match record.strategy {
            ResolutionStrategy::Manual => {
                // Stays in Detected; downstream tooling resolves it
                record.reason = Some("manual resolution required".to_string());
                return ResolutionOutcome::Manual;
            }
            _ => record.begin_resolution(),
        }

        let outcome = match record.strategy {
            ResolutionStrategy::LastWriteWins => {
                Ok(last_write_wins(&record.snapshot_a, &record.snapshot_b))
            }
            ResolutionStrategy::FirstWriteWins => {
                Ok(first_write_wins(&record.snapshot_a, &record.snapshot_b))
            }
            ResolutionStrategy::Merge => Ok(merge(
                &record.snapshot_a,
                &record.snapshot_b,
                &config.merge_fields,
                &config.ignore_fields,
            )),
            ResolutionStrategy::Custom => {
                let key = config
                    .custom_resolver
                    .clone()
                    .unwrap_or_else(|| record.entity_type.clone());
                match self.custom.get(&key) {
                    Some(resolver) => resolver.resolve(record),
                    None => Err(format!("no custom resolver registered for {}", key)),
                }
            }
            ResolutionStrategy::Manual => unreachable!("manual handled above"),
        };

        match outcome {
            Ok(payload) => {
                debug!(
                    entity_type = %record.entity_type,
                    entity_id = %record.entity_id,
                    strategy = record.strategy.as_str(),
                    "conflict resolved"
                );
                record.mark_resolved(payload.clone());
                ResolutionOutcome::Resolved(payload)
            }
            Err(reason) => {
                debug!(
                    entity_type = %record.entity_type,
                    entity_id = %record.entity_id,
                    strategy = record.strategy.as_str(),
                    reason = %reason,
                    "conflict resolution failed"
                );
                record.mark_failed(reason.clone());
                ResolutionOutcome::Failed(reason)
            }
        }
    }
}

fn write_time(payload: &Payload) -> DateTime<Utc> {
    payload
        .updated_at()
        .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC)
}

fn create_time(payload: &Payload) -> DateTime<Utc> {
    payload
        .created_at()
        .or_else(|| payload.updated_at())
        .unwrap_or_else(|| DateTime::<Utc>::MAX_UTC)
}

/// Candidate with the greatest updated-at wins; ties favor the incoming
/// snapshot.
fn last_write_wins(a: &Payload, b: &Payload) -> Payload {
    if write_time(a) > write_time(b) {
        a.clone()
    } else {
        b.clone()
    }
}

/// Candidate with the smallest created-at wins; ties favor the stored
/// snapshot.
fn first_write_wins(a: &Payload, b: &Payload) -> Payload {
    if create_time(b) < create_time(a) {
        b.clone()
    } else {
        a.clone()
    }
}

/// Field-wise merge starting from the stored snapshot.
fn merge(a: &Payload, b: &Payload, merge_fields: &[String], ignore_fields: &[String]) -> Payload {
    let mut result = a.clone();
    let b_newer = write_time(b) >= write_time(a);

    for (field, value_b) in b.iter() {
        if ignore_fields.iter().any(|f| f == field) {
            continue;
        }
        let forced = merge_fields.iter().any(|f| f == field);
        match result.get(field) {
            None => {
                result.insert(field.clone(), value_b.clone());
            }
            Some(value_a) => {
                if forced {
                    result.insert(field.clone(), value_b.clone());
                } else if value_a != value_b && b_newer {
                    result.insert(field.clone(), value_b.clone());
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictKind;
    use crate::payload::FieldValue;

    fn payload(fields: &[(&str, FieldValue)]) -> Payload {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn record(
        strategy: ResolutionStrategy,
        a: Payload,
        b: Payload,
    ) -> ConflictRecord {
        ConflictRecord::new(
            "product",
            "p-1",
            ConflictKind::ConcurrentUpdate,
            strategy,
            a,
            b,
        )
    }

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn last_write_wins_picks_the_newer_candidate() {
        let a = payload(&[
            ("price", FieldValue::Integer(100)),
            ("updated_at", FieldValue::Integer(T0)),
        ]);
        let b = payload(&[
            ("price", FieldValue::Integer(120)),
            ("updated_at", FieldValue::Integer(T0 + 50)),
        ]);
        let resolver = ConflictResolver::builder().build();
        let mut rec = record(ResolutionStrategy::LastWriteWins, a, b.clone());

        match resolver.resolve(&mut rec, &ConflictConfig::default()) {
            ResolutionOutcome::Resolved(payload) => {
                assert_eq!(payload.get("price"), Some(&FieldValue::Integer(120)))
            }
            other => panic!("expected resolution, got {:?}", other),
        }
        assert_eq!(rec.state, ConflictState::Resolved);
        assert_eq!(rec.resolved_payload.as_ref(), Some(&b));
    }

    #[test]
    fn last_write_wins_is_idempotent() {
        let a = payload(&[("updated_at", FieldValue::Integer(T0 + 99))]);
        let b = payload(&[("updated_at", FieldValue::Integer(T0))]);
        let first = last_write_wins(&a, &b);
        let second = last_write_wins(&first, &b);
        assert_eq!(first, second);
        assert_eq!(first, a);
    }

    #[test]
    fn first_write_wins_picks_the_older_creation() {
        let a = payload(&[
            ("owner", FieldValue::from("alice")),
            ("created_at", FieldValue::Integer(T0)),
        ]);
        let b = payload(&[
            ("owner", FieldValue::from("bob")),
            ("created_at", FieldValue::Integer(T0 + 10_000)),
        ]);
        let resolver = ConflictResolver::builder().build();
        let mut rec = record(ResolutionStrategy::FirstWriteWins, a.clone(), b);

        match resolver.resolve(&mut rec, &ConflictConfig::default()) {
            ResolutionOutcome::Resolved(payload) => {
                assert_eq!(payload.get("owner"), Some(&FieldValue::from("alice")))
            }
            other => panic!("expected resolution, got {:?}", other),
        }
        assert_eq!(rec.resolved_payload.as_ref(), Some(&a));
    }

    #[test]
    fn merge_honors_ignore_merge_and_recency_rules() {
        let a = payload(&[
            ("name", FieldValue::from("A")),
            ("price", FieldValue::Integer(100)),
            ("stock", FieldValue::Integer(5)),
            ("updated_at", FieldValue::Integer(T0)),
        ]);
        let b = payload(&[
            ("name", FieldValue::from("B")),
            ("price", FieldValue::Integer(120)),
            ("color", FieldValue::from("red")),
            ("updated_at", FieldValue::Integer(T0 + 500)),
        ]);
        let config = ConflictConfig {
            strategy: ResolutionStrategy::Merge,
            merge_fields: vec!["price".to_string()],
            ignore_fields: vec!["name".to_string()],
            custom_resolver: None,
        };
        let resolver = ConflictResolver::builder().build();
        let mut rec = record(ResolutionStrategy::Merge, a, b);

        let payload = match resolver.resolve(&mut rec, &config) {
            ResolutionOutcome::Resolved(payload) => payload,
            other => panic!("expected resolution, got {:?}", other),
        };
        // ignored field keeps the stored value
        assert_eq!(payload.get("name"), Some(&FieldValue::from("A")));
        // merge field always takes the incoming value
        assert_eq!(payload.get("price"), Some(&FieldValue::Integer(120)));
        // field absent in the stored snapshot is adopted
        assert_eq!(payload.get("color"), Some(&FieldValue::from("red")));
        // field absent in the incoming snapshot survives
        assert_eq!(payload.get("stock"), Some(&FieldValue::Integer(5)));
        // divergent updated_at resolves to the newer side
        assert_eq!(
            payload.get("updated_at"),
            Some(&FieldValue::Integer(T0 + 500))
        );
    }

    #[test]
    fn merge_is_commutative_when_conflicting_fields_agree() {
        let a = payload(&[
            ("name", FieldValue::from("A")),
            ("stock", FieldValue::Integer(5)),
        ]);
        let b = payload(&[
            ("name", FieldValue::from("A")),
            ("color", FieldValue::from("red")),
        ]);
        let ab = merge(&a, &b, &[], &[]);
        let ba = merge(&b, &a, &[], &[]);
        assert_eq!(ab, ba);
    }

    #[test]
    fn manual_strategy_leaves_the_record_detected() {
        let resolver = ConflictResolver::builder().build();
        let mut rec = record(ResolutionStrategy::Manual, Payload::new(), Payload::new());
        let outcome = resolver.resolve(&mut rec, &ConflictConfig::default());
        assert_eq!(outcome, ResolutionOutcome::Manual);
        assert_eq!(rec.state, ConflictState::Detected);
    }

    #[test]
    fn missing_custom_resolver_fails_the_record() {
        let resolver = ConflictResolver::builder().build();
        let mut rec = record(ResolutionStrategy::Custom, Payload::new(), Payload::new());
        let config = ConflictConfig {
            strategy: ResolutionStrategy::Custom,
            custom_resolver: Some("scoring".to_string()),
            ..ConflictConfig::default()
        };
        match resolver.resolve(&mut rec, &config) {
            ResolutionOutcome::Failed(reason) => assert!(reason.contains("scoring")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(rec.state, ConflictState::Failed);
    }

    #[test]
    fn registered_custom_resolver_is_invoked() {
        struct PreferStored;
        impl CustomResolver for PreferStored {
            fn resolve(&self, record: &ConflictRecord) -> Result<Payload, String> {
                Ok(record.snapshot_a.clone())
            }
        }

        let resolver = ConflictResolver::builder()
            .register_custom("product", Arc::new(PreferStored))
            .build();
        let a = payload(&[("name", FieldValue::from("stored"))]);
        let mut rec = record(ResolutionStrategy::Custom, a.clone(), Payload::new());
        match resolver.resolve(&mut rec, &ConflictConfig::default()) {
            ResolutionOutcome::Resolved(payload) => assert_eq!(payload, a),
            other => panic!("expected resolution, got {:?}", other),
        }
    }

    #[test]
    fn terminal_record_replays_its_outcome() {
        let resolver = ConflictResolver::builder().build();
        let a = payload(&[("updated_at", FieldValue::Integer(T0 + 10))]);
        let b = payload(&[("updated_at", FieldValue::Integer(T0))]);
        let mut rec = record(ResolutionStrategy::LastWriteWins, a.clone(), b);

        let first = resolver.resolve(&mut rec, &ConflictConfig::default());
        let second = resolver.resolve(&mut rec, &ConflictConfig::default());
        assert_eq!(first, second);
        assert_eq!(first, ResolutionOutcome::Resolved(a));
    }
}
