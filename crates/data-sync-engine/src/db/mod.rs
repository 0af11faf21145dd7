// File: src/db/mod.rs
//
// Database layer: diesel schema and connection pooling helpers

pub mod schema;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use std::sync::Arc;

use data_sync_core::error::{SyncError, SyncResult};

/// Shared PostgreSQL connection pool.
pub type PgPool = Arc<Pool<ConnectionManager<PgConnection>>>;

/// Resolve the database URL from the environment, reading a `.env` file
/// when one is present.
pub fn database_url_from_env() -> SyncResult<String> {
    dotenvy::dotenv().ok();
    std::env::var("DATABASE_URL").map_err(|_| SyncError::ConfigurationError {
        message: "DATABASE_URL is not set".to_string(),
    })
}

/// Build a pooled PostgreSQL connection manager.
pub fn build_pool(database_url: &str, max_size: u32) -> SyncResult<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|e| SyncError::DatabaseError {
            message: format!("Failed to create connection pool: {}", e),
        })?;
    Ok(Arc::new(pool))
}
