// File: src/adapters/postgres.rs
//
// Primary database adapter persisting entity snapshots in PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use data_sync_core::adapter::{AdapterError, AdapterKind, ApplyOp, SyncAdapter, SyncEventKind};
use data_sync_core::payload::Payload;

use crate::db::schema::synced_entities;
use crate::db::PgPool;

#[derive(Debug, Clone, Queryable, Insertable, Selectable)]
#[diesel(table_name = synced_entities)]
struct SyncedEntityRow {
    pub entity_type: String,
    pub entity_id: String,
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
}

/// Database-kind adapter writing snapshots into the `synced_entities` table.
pub struct PostgresTableAdapter {
    name: String,
    pool: PgPool,
}

impl PostgresTableAdapter {
    pub fn new(name: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    fn connection(
        &self,
    ) -> Result<
        diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<diesel::PgConnection>>,
        AdapterError,
    > {
        // Pool exhaustion and broken connections are retryable
        self.pool.get().map_err(|e| AdapterError::Unavailable {
            message: format!("connection pool: {}", e),
        })
    }
}

#[async_trait]
impl SyncAdapter for PostgresTableAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Database
    }

    async fn apply(&self, op: ApplyOp<'_>) -> Result<(), AdapterError> {
        let mut conn = self.connection()?;
        match op.kind {
            SyncEventKind::Create | SyncEventKind::Update | SyncEventKind::BulkUpdate => {
                let row = SyncedEntityRow {
                    entity_type: op.entity_type.to_string(),
                    entity_id: op.entity_id.to_string(),
                    payload: serde_json::to_value(op.payload).map_err(|e| {
                        AdapterError::Serialization {
                            message: format!("failed to serialize payload: {}", e),
                        }
                    })?,
                    updated_at: Utc::now(),
                };
                diesel::insert_into(synced_entities::table)
                    .values(&row)
                    .on_conflict((synced_entities::entity_type, synced_entities::entity_id))
                    .do_update()
                    .set((
                        synced_entities::payload.eq(&row.payload),
                        synced_entities::updated_at.eq(row.updated_at),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| AdapterError::Unavailable {
                        message: format!("upsert failed: {}", e),
                    })?;
            }
            SyncEventKind::Delete => {
                diesel::delete(
                    synced_entities::table
                        .filter(synced_entities::entity_type.eq(op.entity_type))
                        .filter(synced_entities::entity_id.eq(op.entity_id)),
                )
                .execute(&mut conn)
                .map_err(|e| AdapterError::Unavailable {
                    message: format!("delete failed: {}", e),
                })?;
            }
        }
        Ok(())
    }

    async fn read(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<Payload>, AdapterError> {
        let mut conn = self.connection()?;
        let row: Option<SyncedEntityRow> = synced_entities::table
            .filter(synced_entities::entity_type.eq(entity_type))
            .filter(synced_entities::entity_id.eq(entity_id))
            .first(&mut conn)
            .optional()
            .map_err(|e| AdapterError::Unavailable {
                message: format!("read failed: {}", e),
            })?;

        row.map(|r| {
            serde_json::from_value(r.payload).map_err(|e| AdapterError::Serialization {
                message: format!("failed to deserialize snapshot: {}", e),
            })
        })
        .transpose()
    }

    async fn list_ids(&self, entity_type: &str) -> Result<Vec<String>, AdapterError> {
        let mut conn = self.connection()?;
        synced_entities::table
            .filter(synced_entities::entity_type.eq(entity_type))
            .select(synced_entities::entity_id)
            .order(synced_entities::entity_id.asc())
            .load(&mut conn)
            .map_err(|e| AdapterError::Unavailable {
                message: format!("id listing failed: {}", e),
            })
    }
}
