// File: src/cache/postgres.rs
//
// Durable scheduled-invalidation journal backed by PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use data_sync_core::error::{SyncError, SyncResult};

use crate::db::schema::scheduled_invalidations;
use crate::db::PgPool;

use super::{InvalidationJournal, PendingInvalidation};

#[derive(Debug, Clone, Queryable, Insertable, Selectable)]
#[diesel(table_name = scheduled_invalidations)]
struct PendingRow {
    pub id: Uuid,
    pub cache_key: String,
    pub entity_type: String,
    pub entity_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<PendingRow> for PendingInvalidation {
    fn from(row: PendingRow) -> Self {
        Self {
            id: row.id,
            cache_key: row.cache_key,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL-backed journal; a crash between enqueue and sweep loses
/// nothing because entries are removed only after the invalidation ran.
pub struct PostgresInvalidationJournal {
    pool: PgPool,
}

impl PostgresInvalidationJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn connection(
        &self,
    ) -> SyncResult<
        diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<diesel::PgConnection>>,
    > {
        self.pool.get().map_err(|e| SyncError::DatabaseError {
            message: format!("Failed to get database connection: {}", e),
        })
    }
}

#[async_trait]
impl InvalidationJournal for PostgresInvalidationJournal {
    async fn record(&self, pending: &PendingInvalidation) -> SyncResult<()> {
        let mut conn = self.connection()?;
        let row = PendingRow {
            id: pending.id,
            cache_key: pending.cache_key.clone(),
            entity_type: pending.entity_type.clone(),
            entity_id: pending.entity_id.clone(),
            created_at: pending.created_at,
        };
        diesel::insert_into(scheduled_invalidations::table)
            .values(&row)
            .on_conflict(scheduled_invalidations::cache_key)
            .do_nothing()
            .execute(&mut conn)
            .map_err(|e| SyncError::DatabaseError {
                message: format!("Failed to record scheduled invalidation: {}", e),
            })?;
        Ok(())
    }

    async fn list(&self) -> SyncResult<Vec<PendingInvalidation>> {
        let mut conn = self.connection()?;
        let rows: Vec<PendingRow> = scheduled_invalidations::table
            .order(scheduled_invalidations::created_at.asc())
            .load(&mut conn)
            .map_err(|e| SyncError::DatabaseError {
                message: format!("Failed to list scheduled invalidations: {}", e),
            })?;
        Ok(rows.into_iter().map(PendingInvalidation::from).collect())
    }

    async fn remove(&self, cache_key: &str) -> SyncResult<()> {
        let mut conn = self.connection()?;
        diesel::delete(
            scheduled_invalidations::table.filter(scheduled_invalidations::cache_key.eq(cache_key)),
        )
        .execute(&mut conn)
        .map_err(|e| SyncError::DatabaseError {
            message: format!("Failed to remove scheduled invalidation: {}", e),
        })?;
        Ok(())
    }
}
