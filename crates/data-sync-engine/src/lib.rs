//! # Data Sync Engine
//!
//! Runtime for propagating entity mutations across heterogeneous data stores
//! and geographic regions. Provides:
//! - An append-only, per-entity-versioned sync event log
//! - Conflict-aware orchestration with per-target fanout and retry/backoff
//! - Cache invalidation strategies over pluggable cache providers
//! - Cross-region replication with cursors, lag tracking, and catch-up
//! - A periodic integrity auditor with alerting
//!
//! The engine composes the primitives from `data-sync-core`: adapters are
//! registered at startup, per-entity behavior comes from the frozen
//! [`ConfigRegistry`](data_sync_core::ConfigRegistry), and every persisted
//! record lives in one of four stores (events, conflicts, cursors, checks)
//! behind async traits with PostgreSQL and in-memory implementations.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use data_sync_core::adapter::{AdapterKind, AdapterRegistry};
//! use data_sync_core::config::{AdapterBinding, ConfigRegistry, EntitySyncConfig, EngineConfig};
//! use data_sync_core::conflict::ConflictResolver;
//! use data_sync_engine::adapters::InMemoryStoreAdapter;
//! use data_sync_engine::service::DataSyncService;
//!
//! # async fn run() -> data_sync_core::SyncResult<()> {
//! let primary = Arc::new(InMemoryStoreAdapter::new("primary", AdapterKind::Database));
//! let adapters = AdapterRegistry::builder().register(primary).build();
//! let configs = ConfigRegistry::builder()
//!     .register(
//!         EntitySyncConfig::new("product")
//!             .with_adapter(AdapterBinding::writable("primary", AdapterKind::Database)),
//!     )
//!     .build();
//!
//! let service = DataSyncService::in_memory(
//!     EngineConfig::default(),
//!     configs,
//!     adapters,
//!     ConflictResolver::builder().build(),
//! );
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod adapters;
pub mod audit;
pub mod cache;
pub mod db;
pub mod engine;
pub mod monitoring;
pub mod replication;
pub mod service;
pub mod store;
pub mod testing;

pub use engine::{SyncEngine, SyncOutcome};
pub use service::DataSyncService;
pub use store::{SyncEvent, SyncEventStatus};
