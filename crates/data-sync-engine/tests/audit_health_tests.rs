// File: tests/audit_health_tests.rs
//
// Integrity auditing across sources, dependency-driven cache invalidation,
// and the operational health surface

use std::sync::Arc;

use data_sync_core::adapter::{AdapterError, AdapterKind, AdapterRegistry, SyncEventKind};
use data_sync_core::config::{
    AdapterBinding, CacheConfig, ConfigRegistry, EngineConfig, EntitySchema, EntitySyncConfig,
};
use data_sync_core::conflict::ConflictResolver;
use data_sync_core::payload::FieldValue;

use data_sync_engine::adapters::{CacheStoreAdapter, InMemoryStoreAdapter};
use data_sync_engine::cache::{entity_cache_key, CacheProvider, InMemoryCacheProvider};
use data_sync_engine::monitoring::HealthStatus;
use data_sync_engine::service::DataSyncService;
use data_sync_engine::store::{CheckKind, CheckStatus};
use data_sync_engine::testing::{payload_of, ScriptedAdapter};

const T0: i64 = 1_700_000_000_000;

struct AuditHarness {
    service: DataSyncService,
    primary: Arc<InMemoryStoreAdapter>,
    cache_provider: Arc<InMemoryCacheProvider>,
}

fn audit_harness(entity: EntitySyncConfig) -> AuditHarness {
    let primary = Arc::new(InMemoryStoreAdapter::new("primary", AdapterKind::Database));
    let cache_provider = Arc::new(InMemoryCacheProvider::new("redis"));
    let cache_adapter = Arc::new(CacheStoreAdapter::new("cache", cache_provider.clone()));
    let adapters = AdapterRegistry::builder()
        .register(primary.clone())
        .register(cache_adapter)
        .build();
    let configs = ConfigRegistry::builder().register(entity).build();
    let service = DataSyncService::builder(
        EngineConfig::default(),
        configs,
        adapters,
        ConflictResolver::builder().build(),
    )
    .with_cache_provider(cache_provider.clone())
    .build();
    AuditHarness {
        service,
        primary,
        cache_provider,
    }
}

fn user_entity() -> EntitySyncConfig {
    EntitySyncConfig::new("user")
        .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database))
        .with_adapter(AdapterBinding::writable("cache", AdapterKind::Cache))
}

#[tokio::test]
async fn consistency_check_surfaces_field_divergence() {
    let h = audit_harness(user_entity());

    h.primary
        .seed("user", "u-1", payload_of(&[("email", FieldValue::from("x@a"))]))
        .await;
    h.cache_provider
        .set(
            &entity_cache_key("user", "u-1"),
            &payload_of(&[("email", FieldValue::from("y@a"))]),
            None,
            &[],
        )
        .await
        .unwrap();

    let check = h
        .service
        .run_check(
            "user",
            &["primary".to_string(), "cache".to_string()],
            CheckKind::Consistency,
        )
        .await
        .unwrap();

    assert_eq!(check.status, CheckStatus::Failed);
    assert_eq!(check.records_checked, 1);
    assert_eq!(check.inconsistencies_found, 1);
    let finding = &check.findings[0];
    assert_eq!(finding.entity_id, "u-1");
    assert_eq!(finding.field_path, "email");
    assert_eq!(finding.value_a, Some(serde_json::json!("x@a")));
    assert_eq!(finding.value_b, Some(serde_json::json!("y@a")));
    assert_eq!(finding.source_a, "primary");
    assert_eq!(finding.source_b, "cache");
    assert!(check.finished_at.unwrap() >= check.started_at);
}

#[tokio::test]
async fn consistency_check_passes_on_identical_sources() {
    let h = audit_harness(user_entity());
    let payload = payload_of(&[("email", FieldValue::from("x@a"))]);

    h.primary.seed("user", "u-1", payload.clone()).await;
    h.cache_provider
        .set(&entity_cache_key("user", "u-1"), &payload, None, &[])
        .await
        .unwrap();

    let check = h
        .service
        .run_check(
            "user",
            &["primary".to_string(), "cache".to_string()],
            CheckKind::Consistency,
        )
        .await
        .unwrap();
    assert_eq!(check.status, CheckStatus::Passed);
    assert_eq!(check.inconsistencies_found, 0);
}

#[tokio::test]
async fn completeness_check_flags_ids_missing_from_any_source() {
    let h = audit_harness(user_entity());

    h.primary
        .seed("user", "u-1", payload_of(&[("email", FieldValue::from("x@a"))]))
        .await;
    h.primary
        .seed("user", "u-2", payload_of(&[("email", FieldValue::from("z@a"))]))
        .await;
    h.cache_provider
        .set(
            &entity_cache_key("user", "u-1"),
            &payload_of(&[("email", FieldValue::from("x@a"))]),
            None,
            &[],
        )
        .await
        .unwrap();

    let check = h
        .service
        .run_check(
            "user",
            &["primary".to_string(), "cache".to_string()],
            CheckKind::Completeness,
        )
        .await
        .unwrap();

    assert_eq!(check.status, CheckStatus::Failed);
    assert_eq!(check.records_checked, 2);
    assert_eq!(check.inconsistencies_found, 1);
    let finding = &check.findings[0];
    assert_eq!(finding.entity_id, "u-2");
    assert_eq!(finding.source_b, "cache");
}

#[tokio::test]
async fn referential_integrity_check_finds_dangling_references() {
    let entity = EntitySyncConfig::new("order")
        .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database))
        .with_reference_field("customer_id", "customer");
    let h = audit_harness(entity);

    h.primary
        .seed(
            "order",
            "o-1",
            payload_of(&[("customer_id", FieldValue::from("c-1"))]),
        )
        .await;
    h.primary
        .seed(
            "order",
            "o-2",
            payload_of(&[("customer_id", FieldValue::from("c-missing"))]),
        )
        .await;
    h.primary
        .seed("customer", "c-1", payload_of(&[("name", FieldValue::from("Ada"))]))
        .await;

    let check = h
        .service
        .run_check(
            "order",
            &["primary".to_string()],
            CheckKind::ReferentialIntegrity,
        )
        .await
        .unwrap();

    assert_eq!(check.status, CheckStatus::Failed);
    assert_eq!(check.records_checked, 2);
    assert_eq!(check.findings.len(), 1);
    assert_eq!(check.findings[0].entity_id, "o-2");
    assert_eq!(check.findings[0].field_path, "customer_id");
}

#[tokio::test]
async fn schema_validation_check_flags_missing_and_mistyped_fields() {
    let entity = EntitySyncConfig::new("user")
        .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database))
        .with_schema(EntitySchema {
            required_fields: vec!["email".to_string()],
            field_types: [("age".to_string(), "integer".to_string())]
                .into_iter()
                .collect(),
        });
    let h = audit_harness(entity);

    h.primary
        .seed(
            "user",
            "u-1",
            payload_of(&[
                ("email", FieldValue::from("x@a")),
                ("age", FieldValue::Integer(30)),
            ]),
        )
        .await;
    h.primary
        .seed(
            "user",
            "u-2",
            payload_of(&[("age", FieldValue::from("thirty"))]),
        )
        .await;

    let check = h
        .service
        .run_check("user", &["primary".to_string()], CheckKind::SchemaValidation)
        .await
        .unwrap();

    assert_eq!(check.status, CheckStatus::Failed);
    // u-2 is missing email and carries a mistyped age
    assert_eq!(check.findings.len(), 2);
    assert!(check.findings.iter().all(|f| f.entity_id == "u-2"));
}

#[tokio::test]
async fn dependency_invalidation_cascades_from_customer_to_orders() {
    let entity = EntitySyncConfig::new("customer")
        .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database))
        .with_cache(CacheConfig::default());
    let h = audit_harness(entity);

    // Seed cached copies of the customer and its dependent orders
    for key in ["customer:c-1", "order:o-1", "order:o-2"] {
        h.cache_provider
            .set(key, &payload_of(&[("cached", FieldValue::Boolean(true))]), None, &[])
            .await
            .unwrap();
    }
    let invalidator = h.service.invalidator();
    invalidator
        .register_dependency(
            ("customer".to_string(), "c-1".to_string()),
            ("order".to_string(), "o-1".to_string()),
        )
        .await;
    invalidator
        .register_dependency(
            ("customer".to_string(), "c-1".to_string()),
            ("order".to_string(), "o-2".to_string()),
        )
        .await;

    h.service
        .submit_event(
            "customer",
            "c-1",
            SyncEventKind::Update,
            payload_of(&[
                ("name", FieldValue::from("Ada")),
                ("updated_at", FieldValue::Integer(T0)),
            ]),
            "api",
            "region-a",
        )
        .await
        .unwrap();
    h.service.engine().drain().await.unwrap();

    assert!(h.cache_provider.get("customer:c-1").await.unwrap().is_none());
    assert!(h.cache_provider.get("order:o-1").await.unwrap().is_none());
    assert!(h.cache_provider.get("order:o-2").await.unwrap().is_none());
}

#[tokio::test]
async fn health_reports_healthy_on_a_quiet_engine() {
    let h = audit_harness(user_entity());
    let report = h.service.health_check().await.unwrap();
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.issues.is_empty());
}

#[tokio::test]
async fn health_degrades_to_critical_on_high_failure_rate() {
    let primary = Arc::new(ScriptedAdapter::new("primary", AdapterKind::Database));
    let adapters = AdapterRegistry::builder().register(primary.clone()).build();
    let configs = ConfigRegistry::builder()
        .register(
            EntitySyncConfig::new("product")
                .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database)),
        )
        .build();
    let service = DataSyncService::in_memory(
        EngineConfig::default(),
        configs,
        adapters,
        ConflictResolver::builder().build(),
    );

    primary
        .fail_next(
            AdapterError::Unauthorized {
                message: "revoked".to_string(),
            },
            1,
        )
        .await;
    service
        .submit_event(
            "product",
            "p-1",
            SyncEventKind::Create,
            payload_of(&[("name", FieldValue::from("A"))]),
            "api",
            "region-a",
        )
        .await
        .unwrap();
    service.engine().drain().await.unwrap();

    let report = service.health_check().await.unwrap();
    assert_eq!(report.status, HealthStatus::Critical);
    assert!(!report.issues.is_empty());
    assert!(!report.recommendations.is_empty());
}

#[tokio::test]
async fn run_all_covers_registered_entity_types_and_alerts() {
    let h = audit_harness(
        user_entity().with_schema(EntitySchema {
            required_fields: vec!["email".to_string()],
            field_types: Default::default(),
        }),
    );

    h.primary
        .seed("user", "u-1", payload_of(&[("email", FieldValue::from("x@a"))]))
        .await;
    h.cache_provider
        .set(
            &entity_cache_key("user", "u-1"),
            &payload_of(&[("email", FieldValue::from("y@a"))]),
            None,
            &[],
        )
        .await
        .unwrap();

    let checks = h.service.auditor().run_all().await.unwrap();
    // consistency + completeness + schema for the single entity type
    assert_eq!(checks.len(), 3);
    assert!(checks.iter().any(|c| c.kind == CheckKind::Consistency
        && c.status == CheckStatus::Failed));

    // One divergent record out of one checked breaches the score threshold
    let alerts = h.service.auditor().evaluate_thresholds().await.unwrap();
    assert!(alerts.iter().any(|a| a.code == "consistency_score"));
}
