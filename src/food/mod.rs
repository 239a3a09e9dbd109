pub mod analysis;
pub mod api;
pub mod config;
pub mod history;
pub mod orchestrator;
pub mod quota;

pub use history::{AnalysisRecord, HistoryStore};
pub use orchestrator::{AnalysisError, AnalysisOrchestrator, AnalysisOutcome, AnalysisState};
pub use quota::{QuotaState, QuotaTracker};
