// File: tests/engine_sync_tests.rs
//
// End-to-end tests of the sync engine: fanout, conflict resolution, retry
// machinery, schema enforcement, and backpressure

use std::sync::Arc;

use data_sync_core::adapter::{
    AdapterError, AdapterKind, AdapterRegistry, ApplyOp, SyncAdapter, SyncEventKind,
};
use data_sync_core::config::{
    AdapterBinding, ConfigRegistry, ConflictConfig, EngineConfig, EntitySchema, EntitySyncConfig,
};
use data_sync_core::conflict::{
    ConflictKind, ConflictResolver, ConflictState, ResolutionStrategy,
};
use data_sync_core::error::SyncError;
use data_sync_core::payload::{FieldValue, Payload};

use data_sync_engine::cache::CacheProvider;
use data_sync_engine::engine::{SyncOutcome, SUPERSEDED_TAG};
use data_sync_engine::service::DataSyncService;
use data_sync_engine::store::{ConflictStore, EventStore, SyncEventStatus};
use data_sync_engine::testing::{payload_of, ScriptedAdapter};

const T0: i64 = 1_700_000_000_000;

fn product_payload(price: i64, updated_at_ms: i64) -> Payload {
    payload_of(&[
        ("name", FieldValue::from("A")),
        ("price", FieldValue::Integer(price)),
        ("updated_at", FieldValue::Integer(updated_at_ms)),
    ])
}

struct Harness {
    service: DataSyncService,
    primary: Arc<ScriptedAdapter>,
    search: Arc<ScriptedAdapter>,
}

fn harness(config: EngineConfig, entity: EntitySyncConfig) -> Harness {
    let primary = Arc::new(ScriptedAdapter::new("primary", AdapterKind::Database));
    let search = Arc::new(ScriptedAdapter::new("search", AdapterKind::SearchIndex));
    let adapters = AdapterRegistry::builder()
        .register(primary.clone())
        .register(search.clone())
        .build();
    let configs = ConfigRegistry::builder().register(entity).build();
    let service = DataSyncService::in_memory(
        config,
        configs,
        adapters,
        ConflictResolver::builder().build(),
    );
    Harness {
        service,
        primary,
        search,
    }
}

fn two_adapter_product() -> EntitySyncConfig {
    EntitySyncConfig::new("product")
        .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database))
        .with_adapter(AdapterBinding::writable("search", AdapterKind::SearchIndex))
}

#[tokio::test]
async fn simple_create_fans_out_to_all_writable_adapters() {
    let h = harness(EngineConfig::default(), two_adapter_product());

    let payload = product_payload(100, T0);
    let event_id = h
        .service
        .submit_event("product", "p-1", SyncEventKind::Create, payload.clone(), "api", "region-a")
        .await
        .unwrap();

    let outcomes = h.service.engine().drain().await.unwrap();
    assert_eq!(outcomes, vec![SyncOutcome::Completed { event_id }]);

    // Reads through every writable adapter return the event payload
    assert_eq!(
        h.primary.read("product", "p-1").await.unwrap(),
        Some(payload.clone())
    );
    assert_eq!(h.search.read("product", "p-1").await.unwrap(), Some(payload));

    let event = h.service.engine().events().fetch(event_id).await.unwrap();
    assert_eq!(event.status, SyncEventStatus::Completed);
    assert_eq!(event.attempts, 1);
}

#[tokio::test]
async fn completed_event_invalidates_the_cache_key() {
    let h = harness(EngineConfig::default(), two_adapter_product());

    // Seed a stale cached copy through the engine's provider
    let provider = &h.service.invalidator().providers()[0];
    provider
        .set("product:p-1", &product_payload(1, T0), None, &[])
        .await
        .unwrap();

    h.service
        .submit_event(
            "product",
            "p-1",
            SyncEventKind::Create,
            product_payload(100, T0),
            "api",
            "region-a",
        )
        .await
        .unwrap();
    h.service.engine().drain().await.unwrap();

    assert!(provider.get("product:p-1").await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_update_resolves_with_last_write_wins() {
    let entity = two_adapter_product().with_conflict(ConflictConfig {
        strategy: ResolutionStrategy::LastWriteWins,
        ..ConflictConfig::default()
    });
    let h = harness(EngineConfig::default(), entity);

    let first = h
        .service
        .submit_event(
            "product",
            "p-1",
            SyncEventKind::Update,
            product_payload(100, T0),
            "api",
            "region-a",
        )
        .await
        .unwrap();
    let second = h
        .service
        .submit_event(
            "product",
            "p-1",
            SyncEventKind::Update,
            product_payload(120, T0 + 50),
            "mobile",
            "region-a",
        )
        .await
        .unwrap();

    h.service.engine().drain().await.unwrap();

    // The newer write wins in every adapter
    let snapshot = h.primary.read("product", "p-1").await.unwrap().unwrap();
    assert_eq!(snapshot.get("price"), Some(&FieldValue::Integer(120)));

    // A concurrent-update conflict record was resolved with the winner
    let record = h
        .service
        .engine()
        .conflicts()
        .latest_for_event(second)
        .await
        .unwrap()
        .expect("conflict record for the second event");
    assert_eq!(record.kind, ConflictKind::ConcurrentUpdate);
    assert_eq!(record.strategy, ResolutionStrategy::LastWriteWins);
    assert_eq!(record.state, ConflictState::Resolved);
    assert_eq!(
        record.resolved_payload.as_ref().unwrap().get("price"),
        Some(&FieldValue::Integer(120))
    );

    // Both events completed; the older one is recorded as superseded
    let events = h.service.engine().events();
    let first_event = events.fetch(first).await.unwrap();
    let second_event = events.fetch(second).await.unwrap();
    assert_eq!(first_event.status, SyncEventStatus::Completed);
    assert_eq!(second_event.status, SyncEventStatus::Completed);
    assert!(first_event.metadata.tags.contains_key(SUPERSEDED_TAG));
}

#[tokio::test]
async fn transient_failures_exhaust_attempts_with_backoff() {
    let config = EngineConfig {
        jitter_ratio: 0.0,
        ..EngineConfig::default()
    };
    let entity = EntitySyncConfig::new("product")
        .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database));
    let h = harness(config, entity);

    h.primary
        .fail_next(
            AdapterError::Unavailable {
                message: "connection refused".to_string(),
            },
            3,
        )
        .await;

    let event_id = h
        .service
        .submit_event(
            "product",
            "p-1",
            SyncEventKind::Create,
            product_payload(100, T0),
            "api",
            "region-a",
        )
        .await
        .unwrap();

    // First attempt: retrying with the base backoff
    let before = chrono::Utc::now();
    let outcome = h.service.engine().process_event(event_id).await.unwrap();
    let SyncOutcome::Retrying { next_attempt_at, .. } = outcome else {
        panic!("expected retrying, got {:?}", outcome);
    };
    let delay_ms = (next_attempt_at - before).num_milliseconds();
    assert!((1800..=2400).contains(&delay_ms), "first backoff {} ms", delay_ms);

    // Second attempt: doubled backoff
    let before = chrono::Utc::now();
    let outcome = h.service.engine().process_event(event_id).await.unwrap();
    let SyncOutcome::Retrying { next_attempt_at, .. } = outcome else {
        panic!("expected retrying, got {:?}", outcome);
    };
    let delay_ms = (next_attempt_at - before).num_milliseconds();
    assert!((3600..=4800).contains(&delay_ms), "second backoff {} ms", delay_ms);

    // Third attempt exhausts max_attempts
    let outcome = h.service.engine().process_event(event_id).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Failed { .. }));

    let event = h.service.engine().events().fetch(event_id).await.unwrap();
    assert_eq!(event.status, SyncEventStatus::Failed);
    assert_eq!(event.attempts, 3);

    // Transient adapter failures never create conflict records
    assert!(h
        .service
        .engine()
        .conflicts()
        .latest_for_event(event_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn permanent_adapter_failure_fails_immediately() {
    let entity = EntitySyncConfig::new("product")
        .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database));
    let h = harness(EngineConfig::default(), entity);

    h.primary
        .fail_next(
            AdapterError::Unauthorized {
                message: "api key revoked".to_string(),
            },
            1,
        )
        .await;

    let event_id = h
        .service
        .submit_event(
            "product",
            "p-1",
            SyncEventKind::Create,
            product_payload(100, T0),
            "api",
            "region-a",
        )
        .await
        .unwrap();
    let outcome = h.service.engine().process_event(event_id).await.unwrap();

    assert!(matches!(outcome, SyncOutcome::Failed { .. }));
    let event = h.service.engine().events().fetch(event_id).await.unwrap();
    assert_eq!(event.attempts, 1);
}

#[tokio::test]
async fn missing_configuration_fails_without_retry() {
    let h = harness(EngineConfig::default(), two_adapter_product());

    let event_id = h
        .service
        .submit_event(
            "unknown-entity",
            "x-1",
            SyncEventKind::Create,
            product_payload(100, T0),
            "api",
            "region-a",
        )
        .await
        .unwrap();
    let outcome = h.service.engine().process_event(event_id).await.unwrap();

    let SyncOutcome::Failed { reason, .. } = outcome else {
        panic!("expected failure");
    };
    assert!(reason.contains("unknown-entity"));
    let event = h.service.engine().events().fetch(event_id).await.unwrap();
    assert_eq!(event.status, SyncEventStatus::Failed);
}

#[tokio::test]
async fn payload_missing_required_field_never_completes() {
    let entity = two_adapter_product().with_schema(EntitySchema {
        required_fields: vec!["name".to_string()],
        field_types: Default::default(),
    });
    let h = harness(EngineConfig::default(), entity);

    let event_id = h
        .service
        .submit_event(
            "product",
            "p-1",
            SyncEventKind::Update,
            payload_of(&[("price", FieldValue::Integer(100))]),
            "api",
            "region-a",
        )
        .await
        .unwrap();
    let outcome = h.service.engine().process_event(event_id).await.unwrap();

    assert!(matches!(outcome, SyncOutcome::Failed { .. }));
    // No adapter ever saw the invalid payload
    assert_eq!(h.primary.apply_calls(), 0);
}

#[tokio::test]
async fn manual_strategy_leaves_conflict_for_tooling_and_fails_event() {
    let entity = two_adapter_product().with_conflict(ConflictConfig {
        strategy: ResolutionStrategy::Manual,
        ..ConflictConfig::default()
    });
    let h = harness(EngineConfig::default(), entity);

    h.primary
        .seed("product", "p-1", product_payload(100, T0))
        .await;

    let event_id = h
        .service
        .submit_event(
            "product",
            "p-1",
            SyncEventKind::Update,
            product_payload(120, T0 + 10),
            "api",
            "region-a",
        )
        .await
        .unwrap();
    let outcome = h.service.engine().process_event(event_id).await.unwrap();

    assert!(matches!(outcome, SyncOutcome::Failed { .. }));
    let record = h
        .service
        .engine()
        .conflicts()
        .latest_for_event(event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, ConflictState::Detected);
    assert_eq!(record.reason.as_deref(), Some("manual resolution required"));
}

#[tokio::test]
async fn retry_reuses_the_resolved_conflict_payload() {
    let entity = EntitySyncConfig::new("product")
        .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database))
        .with_conflict(ConflictConfig {
            strategy: ResolutionStrategy::LastWriteWins,
            ..ConflictConfig::default()
        });
    let h = harness(EngineConfig::default(), entity);

    h.primary
        .seed("product", "p-1", product_payload(100, T0))
        .await;
    h.primary
        .fail_next(
            AdapterError::Timeout { timeout_ms: 50 },
            1,
        )
        .await;

    let event_id = h
        .service
        .submit_event(
            "product",
            "p-1",
            SyncEventKind::Update,
            product_payload(120, T0 + 50),
            "api",
            "region-a",
        )
        .await
        .unwrap();

    let outcome = h.service.engine().process_event(event_id).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Retrying { .. }));

    let outcome = h.service.engine().process_event(event_id).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Completed { .. }));

    // Exactly one conflict record, and the retry applied its resolution
    let total = h
        .service
        .engine()
        .conflicts()
        .count_since(chrono::DateTime::<chrono::Utc>::MIN_UTC)
        .await
        .unwrap();
    assert_eq!(total, 1);
    let snapshot = h.primary.read("product", "p-1").await.unwrap().unwrap();
    assert_eq!(snapshot.get("price"), Some(&FieldValue::Integer(120)));
}

#[tokio::test]
async fn bulk_submissions_fail_when_saturated_but_singles_succeed() {
    let config = EngineConfig {
        pending_high_watermark: 2,
        ..EngineConfig::default()
    };
    let h = harness(config, two_adapter_product());

    for i in 0..5 {
        h.service
            .submit_event(
                "product",
                &format!("p-{}", i),
                SyncEventKind::Create,
                product_payload(i, T0 + i),
                "api",
                "region-a",
            )
            .await
            .unwrap();
    }

    let result = h
        .service
        .bulk_sync("product", &["p-9".to_string()], "region-a")
        .await;
    assert!(matches!(result, Err(SyncError::Saturated { .. })));

    // Single submissions still succeed
    let accepted = h
        .service
        .submit_event(
            "product",
            "p-99",
            SyncEventKind::Create,
            product_payload(1, T0),
            "api",
            "region-a",
        )
        .await;
    assert!(accepted.is_ok());
}

#[tokio::test]
async fn bulk_sync_reports_per_id_results() {
    let h = harness(EngineConfig::default(), two_adapter_product());
    h.primary
        .seed("product", "p-1", product_payload(100, T0))
        .await;
    h.primary
        .seed("product", "p-2", product_payload(200, T0))
        .await;

    let ids = vec!["p-1".to_string(), "p-2".to_string()];
    let report = h.service.bulk_sync("product", &ids, "region-a").await.unwrap();
    assert_eq!(report.successful, 2);
    assert_eq!(report.failed, 0);

    // The re-synced snapshots reached the search index too
    assert!(h.search.read("product", "p-1").await.unwrap().is_some());
    assert!(h.search.read("product", "p-2").await.unwrap().is_some());
}

#[tokio::test]
async fn retrying_a_failed_event_replays_it_as_a_fresh_attempt() {
    let entity = EntitySyncConfig::new("product")
        .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database));
    let h = harness(
        EngineConfig {
            max_attempts_per_event: 1,
            ..EngineConfig::default()
        },
        entity,
    );

    h.primary
        .fail_next(
            AdapterError::Unavailable {
                message: "down".to_string(),
            },
            1,
        )
        .await;
    let event_id = h
        .service
        .submit_event(
            "product",
            "p-1",
            SyncEventKind::Create,
            product_payload(100, T0),
            "api",
            "region-a",
        )
        .await
        .unwrap();
    let outcome = h.service.engine().process_event(event_id).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Failed { .. }));

    // Operator retry clones the payload into a fresh event and succeeds
    let outcome = h.service.retry_event(event_id).await.unwrap();
    let SyncOutcome::Completed { event_id: new_id } = outcome else {
        panic!("expected completion");
    };
    assert_ne!(new_id, event_id);
    assert_eq!(
        h.primary
            .read("product", "p-1")
            .await
            .unwrap()
            .unwrap()
            .get("price"),
        Some(&FieldValue::Integer(100))
    );
}

#[tokio::test]
async fn read_only_bindings_are_observers_not_targets() {
    let entity = EntitySyncConfig::new("product")
        .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database))
        .with_adapter(AdapterBinding::read_only("search", AdapterKind::SearchIndex));
    let h = harness(EngineConfig::default(), entity);

    h.service
        .submit_event(
            "product",
            "p-1",
            SyncEventKind::Create,
            product_payload(100, T0),
            "api",
            "region-a",
        )
        .await
        .unwrap();
    h.service.engine().drain().await.unwrap();

    assert!(h.primary.read("product", "p-1").await.unwrap().is_some());
    assert_eq!(h.search.apply_calls(), 0);
}

#[tokio::test]
async fn re_applying_an_event_payload_is_idempotent() {
    let h = harness(EngineConfig::default(), two_adapter_product());
    let payload = product_payload(100, T0);

    let event_id = h
        .service
        .submit_event(
            "product",
            "p-1",
            SyncEventKind::Update,
            payload.clone(),
            "api",
            "region-a",
        )
        .await
        .unwrap();
    h.service.engine().drain().await.unwrap();
    let after_first = h.primary.read("product", "p-1").await.unwrap();

    // Redeliver the same mutation directly, as an at-least-once duplicate
    let event = h.service.engine().events().fetch(event_id).await.unwrap();
    h.primary
        .apply(ApplyOp {
            kind: event.kind,
            entity_type: &event.entity_type,
            entity_id: &event.entity_id,
            payload: &event.payload,
        })
        .await
        .unwrap();

    assert_eq!(h.primary.read("product", "p-1").await.unwrap(), after_first);
}
