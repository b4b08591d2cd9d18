// Storage layer for Conductor
// Decision: Support both PostgreSQL (production) and in-memory (dev mode)
//
// This crate provides:
// - Database: PostgreSQL repositories (sqlx)
// - InMemoryDatabase: HashMap-backed store with the same API
// - StorageBackend: enum dispatch over the two
// - CredentialStore: the narrow, tenant-scoped lookup surface used by request guards

pub mod backend;
pub mod credentials;
pub mod memory;
pub mod models;
pub mod password;
pub mod repositories;

pub use backend::StorageBackend;
pub use credentials::CredentialStore;
pub use memory::InMemoryDatabase;
pub use models::*;
pub use repositories::Database;
