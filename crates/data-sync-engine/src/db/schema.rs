// File: src/db/schema.rs
//
// Diesel table definitions for the four sync stores plus the scheduled
// invalidation journal. Matches migrations/.

diesel::table! {
    sync_events (id) {
        id -> Uuid,
        entity_type -> Varchar,
        entity_id -> Varchar,
        kind -> Varchar,
        source -> Varchar,
        origin_region -> Varchar,
        payload -> Jsonb,
        previous -> Nullable<Jsonb>,
        version -> Int8,
        sequence -> Int8,
        submitted_at -> Timestamptz,
        status -> Varchar,
        attempts -> Int4,
        max_attempts -> Int4,
        last_error -> Nullable<Text>,
        next_attempt_at -> Nullable<Timestamptz>,
        metadata -> Jsonb,
    }
}

diesel::table! {
    conflict_records (id) {
        id -> Uuid,
        entity_type -> Varchar,
        entity_id -> Varchar,
        event_id -> Nullable<Uuid>,
        kind -> Varchar,
        strategy -> Varchar,
        state -> Varchar,
        snapshot_a -> Jsonb,
        snapshot_b -> Jsonb,
        resolved_payload -> Nullable<Jsonb>,
        reason -> Nullable<Text>,
        detected_at -> Timestamptz,
        resolved_at -> Nullable<Timestamptz>,
        participating_sources -> Jsonb,
    }
}

diesel::table! {
    replication_cursors (id) {
        id -> Uuid,
        entity_type -> Varchar,
        source_region -> Varchar,
        target_region -> Varchar,
        state -> Varchar,
        last_replicated_version -> Int8,
        last_replicated_at -> Nullable<Timestamptz>,
        pending_count -> Int8,
        failed_count -> Int8,
        lag_seconds -> Int8,
        config -> Jsonb,
        last_error -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    integrity_checks (id) {
        id -> Uuid,
        entity_type -> Varchar,
        kind -> Varchar,
        sources -> Jsonb,
        status -> Varchar,
        records_checked -> Int8,
        inconsistencies_found -> Int8,
        findings -> Jsonb,
        started_at -> Timestamptz,
        finished_at -> Nullable<Timestamptz>,
        duration_ms -> Nullable<Int8>,
    }
}

diesel::table! {
    synced_entities (entity_type, entity_id) {
        entity_type -> Varchar,
        entity_id -> Varchar,
        payload -> Jsonb,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    scheduled_invalidations (id) {
        id -> Uuid,
        cache_key -> Varchar,
        entity_type -> Varchar,
        entity_id -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    sync_events,
    conflict_records,
    replication_cursors,
    integrity_checks,
    synced_entities,
    scheduled_invalidations,
);
