// File: tests/replication_tests.rs
//
// Cross-region replication: per-event fanout, pause/resume catch-up,
// ordering, lag handling, and cursor state transitions

use std::sync::Arc;

use data_sync_core::adapter::{AdapterKind, AdapterRegistry, SyncEventKind};
use data_sync_core::config::{
    AdapterBinding, ConfigRegistry, EngineConfig, EntitySyncConfig, ReplicationConfig,
};
use data_sync_core::conflict::ConflictResolver;
use data_sync_core::payload::{FieldValue, Payload};

use data_sync_engine::adapters::InMemoryStoreAdapter;
use data_sync_engine::replication::InMemoryTransport;
use data_sync_engine::service::DataSyncService;
use data_sync_engine::store::{CursorState, EventStore};
use data_sync_engine::testing::payload_of;

const T0: i64 = 1_700_000_000_000;

fn replicated_product() -> EntitySyncConfig {
    EntitySyncConfig::new("product")
        .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database))
        .with_replication(ReplicationConfig {
            enabled: true,
            regions: vec!["region-a".to_string(), "region-b".to_string()],
            max_lag_seconds: 300,
        })
}

fn service_with_transport() -> (DataSyncService, Arc<InMemoryTransport>) {
    let primary = Arc::new(InMemoryStoreAdapter::new("primary", AdapterKind::Database));
    let adapters = AdapterRegistry::builder().register(primary).build();
    let configs = ConfigRegistry::builder().register(replicated_product()).build();
    let transport = Arc::new(InMemoryTransport::new("region-b"));
    let service = DataSyncService::builder(
        EngineConfig::default(),
        configs,
        adapters,
        ConflictResolver::builder().build(),
    )
    .with_transport(transport.clone())
    .build();
    (service, transport)
}

fn payload(i: i64) -> Payload {
    payload_of(&[
        ("name", FieldValue::from("A")),
        ("price", FieldValue::Integer(i)),
        ("updated_at", FieldValue::Integer(T0 + i * 10_000)),
    ])
}

#[tokio::test]
async fn completed_events_replicate_to_other_regions() {
    let (service, transport) = service_with_transport();

    service
        .submit_event("product", "p-1", SyncEventKind::Create, payload(1), "api", "region-a")
        .await
        .unwrap();
    service.engine().drain().await.unwrap();

    let delivered = transport.delivered().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].entity_id, "p-1");
    assert_eq!(delivered[0].source_region, "region-a");
    assert_eq!(delivered[0].target_region, "region-b");

    let cursors = service.replication_status(Some("product")).await.unwrap();
    assert_eq!(cursors.len(), 1);
    assert_eq!(cursors[0].state, CursorState::Active);
    assert_eq!(cursors[0].last_replicated_version, delivered[0].version);
}

#[tokio::test]
async fn origin_region_is_never_a_replication_target() {
    let (service, transport) = service_with_transport();

    service
        .submit_event("product", "p-1", SyncEventKind::Create, payload(1), "api", "region-b")
        .await
        .unwrap();
    service.engine().drain().await.unwrap();

    // The event originated in region-b, so nothing crosses the wire
    assert_eq!(transport.delivered_count().await, 0);
}

#[tokio::test]
async fn pause_then_resume_catches_up_in_version_order() {
    let (service, transport) = service_with_transport();

    service
        .pause_replication("product", "region-a", "region-b")
        .await
        .unwrap();
    let cursors = service.replication_status(Some("product")).await.unwrap();
    assert_eq!(cursors[0].state, CursorState::Paused);

    for i in 0..10 {
        service
            .submit_event(
                "product",
                &format!("p-{}", i),
                SyncEventKind::Create,
                payload(i),
                "api",
                "region-a",
            )
            .await
            .unwrap();
    }
    service.engine().drain().await.unwrap();

    // Paused cursor held every message back
    assert_eq!(transport.delivered_count().await, 0);

    let replicated = service
        .resume_replication("product", "region-a", "region-b")
        .await
        .unwrap();
    assert_eq!(replicated, 10);

    let delivered = transport.delivered().await;
    assert_eq!(delivered.len(), 10);
    let versions: Vec<i64> = delivered.iter().map(|m| m.version).collect();
    let mut sorted = versions.clone();
    sorted.sort();
    assert_eq!(versions, sorted, "messages must arrive in ascending version order");

    let cursors = service.replication_status(Some("product")).await.unwrap();
    assert_eq!(cursors[0].state, CursorState::Active);
    assert_eq!(cursors[0].last_replicated_version, *versions.last().unwrap());
}

#[tokio::test]
async fn transport_failure_marks_cursor_error_but_event_stays_completed() {
    let (service, transport) = service_with_transport();
    transport.set_rejecting(true);

    let event_id = service
        .submit_event("product", "p-1", SyncEventKind::Create, payload(1), "api", "region-a")
        .await
        .unwrap();
    service.engine().drain().await.unwrap();

    let event = service.engine().events().fetch(event_id).await.unwrap();
    assert_eq!(
        event.status,
        data_sync_engine::store::SyncEventStatus::Completed
    );

    let cursors = service.replication_status(Some("product")).await.unwrap();
    assert_eq!(cursors[0].state, CursorState::Error);
    assert_eq!(cursors[0].failed_count, 1);
    assert_eq!(cursors[0].last_replicated_version, 0);

    // Once the target recovers, catch-up replays the missed event
    transport.set_rejecting(false);
    let replicated = service
        .replicator()
        .catch_up("product", "region-a", "region-b")
        .await
        .unwrap();
    assert_eq!(replicated, 1);
    let cursors = service.replication_status(Some("product")).await.unwrap();
    assert_eq!(cursors[0].state, CursorState::Active);
    assert_eq!(cursors[0].last_replicated_version, event.version);
}

#[tokio::test]
async fn catch_up_stops_on_first_failure_to_preserve_order() {
    let (service, transport) = service_with_transport();

    service
        .pause_replication("product", "region-a", "region-b")
        .await
        .unwrap();
    for i in 0..5 {
        service
            .submit_event(
                "product",
                &format!("p-{}", i),
                SyncEventKind::Create,
                payload(i),
                "api",
                "region-a",
            )
            .await
            .unwrap();
    }
    service.engine().drain().await.unwrap();

    // Baseline: with a healthy target, resume drains the whole backlog
    service
        .replicator()
        .resume("product", "region-a", "region-b")
        .await
        .unwrap();
    assert_eq!(transport.delivered_count().await, 5);

    // Reset and verify the stop-on-failure path with a fresh pause cycle
    service
        .pause_replication("product", "region-a", "region-b")
        .await
        .unwrap();
    for i in 5..10 {
        service
            .submit_event(
                "product",
                &format!("p-{}", i),
                SyncEventKind::Create,
                payload(i),
                "api",
                "region-a",
            )
            .await
            .unwrap();
    }
    service.engine().drain().await.unwrap();
    transport.reject_next(1);

    let replicated = service
        .resume_replication("product", "region-a", "region-b")
        .await
        .unwrap();
    // First send of the batch failed, nothing after it went out
    assert_eq!(replicated, 0);
    let cursors = service.replication_status(Some("product")).await.unwrap();
    assert_eq!(cursors[0].state, CursorState::Error);

    // A later catch-up drains the remainder in order
    let replicated = service
        .replicator()
        .catch_up("product", "region-a", "region-b")
        .await
        .unwrap();
    assert_eq!(replicated, 5);
    let delivered = transport.delivered().await;
    let versions: Vec<i64> = delivered.iter().map(|m| m.version).collect();
    let mut sorted = versions.clone();
    sorted.sort();
    assert_eq!(versions, sorted);
}

#[tokio::test]
async fn lag_monitor_flags_cursors_beyond_their_maximum() {
    let (service, transport) = service_with_transport();

    service
        .submit_event("product", "p-1", SyncEventKind::Create, payload(1), "api", "region-a")
        .await
        .unwrap();
    service.engine().drain().await.unwrap();
    assert_eq!(transport.delivered_count().await, 1);

    // Freshly replicated: nothing lags
    let lagging = service
        .replicator()
        .monitor_lag(chrono::Utc::now())
        .await
        .unwrap();
    assert!(lagging.is_empty());

    // An hour later with no replication the cursor is past max_lag_seconds
    let lagging = service
        .replicator()
        .monitor_lag(chrono::Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(lagging.len(), 1);
    assert!(lagging[0].lag_seconds >= 3600);

    let cursors = service.replication_status(Some("product")).await.unwrap();
    assert!(cursors[0].lag_seconds >= 3600);
}

#[tokio::test]
async fn cursor_version_never_decreases_across_operations() {
    let (service, transport) = service_with_transport();

    for i in 0..3 {
        service
            .submit_event(
                "product",
                &format!("p-{}", i),
                SyncEventKind::Create,
                payload(i),
                "api",
                "region-a",
            )
            .await
            .unwrap();
    }
    service.engine().drain().await.unwrap();
    assert_eq!(transport.delivered_count().await, 3);

    let after_events = service.replication_status(Some("product")).await.unwrap()[0]
        .last_replicated_version;

    // Catch-up over an already-current cursor must not move it backwards
    let replicated = service
        .replicator()
        .catch_up("product", "region-a", "region-b")
        .await
        .unwrap();
    assert_eq!(replicated, 0);
    let after_catchup = service.replication_status(Some("product")).await.unwrap()[0]
        .last_replicated_version;
    assert_eq!(after_catchup, after_events);
}
