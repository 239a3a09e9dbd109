pub mod account;
pub mod api;
pub mod clock;
pub mod commands;
pub mod config;
pub mod database;
pub mod food;

// Re-export commonly used items
pub use clock::{Clock, SystemClock};
pub use database::{Database, KeyValueStore};
pub use food::{AnalysisOrchestrator, AnalysisRecord, HistoryStore, QuotaTracker};
