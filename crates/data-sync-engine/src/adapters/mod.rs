// File: src/adapters/mod.rs
//
// Concrete sync adapters: in-memory store, PostgreSQL table, cache
// provider bridge, and external HTTP API

pub mod cache;
pub mod http;
pub mod memory;
pub mod postgres;

pub use cache::CacheStoreAdapter;
pub use http::HttpApiAdapter;
pub use memory::InMemoryStoreAdapter;
pub use postgres::PostgresTableAdapter;
