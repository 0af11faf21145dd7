//! # Data Sync Core
//!
//! This crate provides the core data-synchronization primitives including:
//! - Payload value model shared by every store boundary
//! - Conflict detection and resolution strategies
//! - Adapter contract for heterogeneous sync targets
//! - Engine and per-entity configuration
//! - Error taxonomy with transient/permanent classification
//!
//! ## Core Concepts
//!
//! The synchronization engine is built around these key abstractions:
//!
//! - **Payload**: An ordered field map using the tagged [`FieldValue`]
//!   representation, so merging and structural comparison never fall back to
//!   untyped JSON poking
//! - **SyncAdapter**: Capability interface over a concrete target store
//!   (database, cache, search index, external API)
//! - **ConflictResolver**: Deterministic detection and resolution of
//!   concurrent or divergent writes
//! - **ConfigRegistry**: Startup-frozen lookup of per-entity sync behavior
//!
//! ## Examples
//!
//! ```rust
//! use data_sync_core::payload::{FieldValue, Payload};
//! use data_sync_core::conflict::{ConflictDetector, DetectionContext};
//!
//! let mut incoming = Payload::new();
//! incoming.insert("name".to_string(), FieldValue::from("A"));
//! incoming.insert("updated_at".to_string(), FieldValue::Integer(1_700_000_000_000));
//!
//! let detector = ConflictDetector::default();
//! let outcome = detector.detect(&DetectionContext {
//!     incoming: &incoming,
//!     incoming_version: 2,
//!     stored: None,
//!     stored_version: None,
//!     critical_fields: &[],
//! });
//! assert!(outcome.is_none());
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod adapter;
pub mod config;
pub mod conflict;
pub mod error;
pub mod payload;

// Re-export commonly used types at the crate root
pub use adapter::{AdapterError, AdapterKind, AdapterRegistry, AdapterSpec, ApplyOp, SyncAdapter};
pub use config::{ConfigRegistry, EngineConfig, EntitySyncConfig};
pub use conflict::{
    ConflictKind, ConflictRecord, ConflictState, ResolutionStrategy,
};
pub use error::{ErrorClass, SyncError, SyncResult};
pub use payload::{FieldValue, Payload};

/// Commonly used imports for downstream crates
pub mod prelude {
    pub use crate::adapter::{AdapterError, AdapterKind, ApplyOp, SyncAdapter};
    pub use crate::config::{EngineConfig, EntitySyncConfig};
    pub use crate::error::{ErrorClass, SyncError, SyncResult};
    pub use crate::payload::{FieldValue, Payload};
    pub use async_trait::async_trait;
    pub use uuid::Uuid;
}
