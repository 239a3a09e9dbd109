pub mod accounts;
pub mod database;
pub mod kv;

pub use database::Database;
pub use database::DatabaseError;
pub use kv::{KeyValueStore, MemoryStore, StoreError};
