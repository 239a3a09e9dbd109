use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::clock::Clock;
use crate::food::api::{FoodRecognizer, RecognitionError};
use crate::food::history::{AnalysisRecord, HistoryStore};
use crate::food::quota::{QuotaError, QuotaTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Idle,
    Checking,
    Blocked,
    Submitting,
    Recording,
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalysisState::Idle => "idle",
            AnalysisState::Checking => "checking",
            AnalysisState::Blocked => "blocked",
            AnalysisState::Submitting => "submitting",
            AnalysisState::Recording => "recording",
        };
        write!(f, "{}", name)
    }
}

/// Shown when the daily quota is spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOffer {
    pub image_reference: String,
    pub free_daily_limit: u32,
}

#[derive(Debug)]
pub enum AnalysisOutcome {
    Completed {
        record: AnalysisRecord,
        saved_to_history: bool,
        usage_recorded: bool,
    },
    Blocked(UpgradeOffer),
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Access to the image was refused: {0}")]
    PermissionDenied(String),
    #[error("Analysis failed, please try again: {0}")]
    Network(RecognitionError),
    #[error("Could not check the daily quota: {0}")]
    Persistence(#[from] QuotaError),
    #[error("No analysis is waiting on an upgrade decision (state: {0})")]
    NotBlocked(AnalysisState),
}

impl AnalysisError {
    /// Whether the UI should offer a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalysisError::Network(e) => e.is_retryable(),
            AnalysisError::Persistence(_) => true,
            AnalysisError::PermissionDenied(_) | AnalysisError::NotBlocked(_) => false,
        }
    }
}

impl From<RecognitionError> for AnalysisError {
    fn from(e: RecognitionError) -> Self {
        match e {
            RecognitionError::PermissionDenied(path) => AnalysisError::PermissionDenied(path),
            other => AnalysisError::Network(other),
        }
    }
}

/// Runs one user-initiated analysis through quota, recognition and history.
pub struct AnalysisOrchestrator {
    quota: QuotaTracker,
    history: HistoryStore,
    recognizer: Arc<dyn FoodRecognizer>,
    clock: Arc<dyn Clock>,
    state: AnalysisState,
}

impl AnalysisOrchestrator {
    pub fn new(
        quota: QuotaTracker,
        history: HistoryStore,
        recognizer: Arc<dyn FoodRecognizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            quota,
            history,
            recognizer,
            clock,
            state: AnalysisState::Idle,
        }
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    fn transition(&mut self, next: AnalysisState) {
        log::debug!("Analysis state {} -> {}", self.state, next);
        self.state = next;
    }

    /// A new request while an upgrade offer is pending drops that offer.
    pub async fn analyze(&mut self, image_reference: &str) -> Result<AnalysisOutcome, AnalysisError> {
        if self.state == AnalysisState::Blocked {
            self.transition(AnalysisState::Idle);
        }

        self.transition(AnalysisState::Checking);
        let allowed = match self.quota.can_analyze().await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!("Quota check failed: {}", e);
                self.transition(AnalysisState::Idle);
                return Err(e.into());
            }
        };

        if !allowed {
            info!("Daily quota reached, offering upgrade");
            self.transition(AnalysisState::Blocked);
            return Ok(AnalysisOutcome::Blocked(UpgradeOffer {
                image_reference: image_reference.to_string(),
                free_daily_limit: self.quota.free_daily_limit(),
            }));
        }

        self.transition(AnalysisState::Submitting);
        let result = match self.recognizer.recognize(image_reference).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Error analyzing image: {}", e);
                self.transition(AnalysisState::Idle);
                return Err(e.into());
            }
        };

        self.transition(AnalysisState::Recording);
        let record = AnalysisRecord::new(self.clock.now(), image_reference, result);

        let saved_to_history = self.history.append(record.clone()).await;
        if !saved_to_history {
            warn!("Analysis of {} was not saved to history", image_reference);
        }

        let usage_recorded = match self.quota.record_usage().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to record usage: {}", e);
                false
            }
        };

        self.transition(AnalysisState::Idle);
        Ok(AnalysisOutcome::Completed {
            record,
            saved_to_history,
            usage_recorded,
        })
    }

    /// Accepts the pending upgrade offer. The blocked analysis is not re-run.
    pub async fn accept_upgrade(&mut self) -> Result<bool, AnalysisError> {
        if self.state != AnalysisState::Blocked {
            return Err(AnalysisError::NotBlocked(self.state));
        }

        let upgraded = self.quota.upgrade().await;
        self.transition(AnalysisState::Idle);
        Ok(upgraded)
    }

    pub fn decline_upgrade(&mut self) -> Result<(), AnalysisError> {
        if self.state != AnalysisState::Blocked {
            return Err(AnalysisError::NotBlocked(self.state));
        }
        self.transition(AnalysisState::Idle);
        Ok(())
    }
}
