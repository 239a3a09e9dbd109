use chrono::NaiveDate;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::clock::Clock;
use crate::database::{KeyValueStore, StoreError};

pub const QUOTA_KEY: &str = "nutribox_quota";

/// Analyses a free installation may run per calendar day.
pub const FREE_DAILY_LIMIT: u32 = 1;

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Failed to load quota state: {0}")]
    Load(StoreError),
    #[error("Failed to save quota state: {0}")]
    Save(StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub is_premium: bool,
    pub used_count: u32,
    pub period_anchor: NaiveDate,
}

impl QuotaState {
    fn fresh(today: NaiveDate) -> Self {
        Self {
            is_premium: false,
            used_count: 0,
            period_anchor: today,
        }
    }

    /// Resets the counter when `today` is not the anchored day.
    fn roll_to(&mut self, today: NaiveDate) -> bool {
        if self.period_anchor != today {
            self.used_count = 0;
            self.period_anchor = today;
            true
        } else {
            false
        }
    }
}

/// Daily usage gate for this installation.
pub struct QuotaTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    free_daily_limit: u32,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_limit(store, clock, FREE_DAILY_LIMIT)
    }

    pub fn with_limit(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, free_daily_limit: u32) -> Self {
        Self {
            store,
            clock,
            free_daily_limit,
        }
    }

    pub fn free_daily_limit(&self) -> u32 {
        self.free_daily_limit
    }

    async fn load(&self) -> Result<QuotaState, QuotaError> {
        let today = self.clock.today();
        let raw = self.store.get(QUOTA_KEY).await.map_err(QuotaError::Load)?;

        Ok(match raw {
            Some(json) => match serde_json::from_str::<QuotaState>(&json) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Discarding unreadable quota state: {}", e);
                    QuotaState::fresh(today)
                }
            },
            None => QuotaState::fresh(today),
        })
    }

    async fn save(&self, state: &QuotaState) -> Result<(), QuotaError> {
        let json = serde_json::to_string(state).map_err(|e| QuotaError::Save(e.into()))?;
        self.store.set(QUOTA_KEY, json).await.map_err(QuotaError::Save)
    }

    /// Loads the state and rolls it to today, persisting the roll.
    async fn current(&self) -> Result<QuotaState, QuotaError> {
        let mut state = self.load().await?;
        if state.roll_to(self.clock.today()) {
            info!("New quota period started on {}", state.period_anchor);
            self.save(&state).await?;
        }
        Ok(state)
    }

    pub async fn snapshot(&self) -> Result<QuotaState, QuotaError> {
        self.current().await
    }

    pub async fn can_analyze(&self) -> Result<bool, QuotaError> {
        let state = self.current().await?;
        Ok(state.is_premium || state.used_count < self.free_daily_limit)
    }

    pub async fn record_usage(&self) -> Result<(), QuotaError> {
        let mut state = self.current().await?;
        state.used_count = state.used_count.saturating_add(1);
        self.save(&state).await
    }

    /// Analyses left today, `None` when unlimited.
    pub async fn remaining(&self) -> Result<Option<u32>, QuotaError> {
        let state = self.current().await?;
        if state.is_premium {
            Ok(None)
        } else {
            Ok(Some(self.free_daily_limit.saturating_sub(state.used_count)))
        }
    }

    /// Marks the installation premium. Returns whether that was persisted.
    pub async fn upgrade(&self) -> bool {
        let mut state = match self.current().await {
            Ok(state) => state,
            Err(e) => {
                warn!("Upgrade could not read quota state: {}", e);
                return false;
            }
        };

        if state.is_premium {
            return true;
        }

        state.is_premium = true;
        match self.save(&state).await {
            Ok(()) => {
                info!("Installation upgraded to premium");
                true
            }
            Err(e) => {
                warn!("Upgrade was not persisted: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::database::kv::testing::FlakyStore;
    use crate::database::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn setup() -> (QuotaTracker, MemoryStore, FixedClock) {
        let store = MemoryStore::new();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());
        let tracker = QuotaTracker::new(Arc::new(store.clone()), Arc::new(clock.clone()));
        (tracker, store, clock)
    }

    #[tokio::test]
    async fn test_free_tier_allows_one_per_day() {
        let (tracker, _, _) = setup();
        assert!(tracker.can_analyze().await.unwrap());
        tracker.record_usage().await.unwrap();
        assert!(!tracker.can_analyze().await.unwrap());
        assert_eq!(tracker.remaining().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_upgrade_unblocks_regardless_of_count() {
        let (tracker, _, _) = setup();
        tracker.record_usage().await.unwrap();
        tracker.record_usage().await.unwrap();
        assert!(!tracker.can_analyze().await.unwrap());

        assert!(tracker.upgrade().await);
        assert!(tracker.can_analyze().await.unwrap());
        assert_eq!(tracker.remaining().await.unwrap(), None);

        assert!(tracker.upgrade().await);
        assert!(tracker.snapshot().await.unwrap().is_premium);
    }

    #[tokio::test]
    async fn test_new_day_resets_on_read() {
        let (tracker, store, clock) = setup();
        for _ in 0..7 {
            tracker.record_usage().await.unwrap();
        }
        assert!(!tracker.can_analyze().await.unwrap());

        clock.advance(Duration::days(1));
        assert!(tracker.can_analyze().await.unwrap());

        let stored: QuotaState = serde_json::from_str(&store.raw(QUOTA_KEY).unwrap()).unwrap();
        assert_eq!(stored.used_count, 0);
        assert_eq!(stored.period_anchor, clock.today());
    }

    #[tokio::test]
    async fn test_new_day_resets_on_record() {
        let (tracker, _, clock) = setup();
        for _ in 0..3 {
            tracker.record_usage().await.unwrap();
        }

        clock.advance(Duration::days(2));
        tracker.record_usage().await.unwrap();

        let state = tracker.snapshot().await.unwrap();
        assert_eq!(state.used_count, 1);
        assert_eq!(state.period_anchor, clock.today());
    }

    #[tokio::test]
    async fn test_full_free_to_premium_scenario() {
        let (tracker, _, _) = setup();
        assert_eq!(tracker.snapshot().await.unwrap().used_count, 0);
        assert!(tracker.can_analyze().await.unwrap());
        tracker.record_usage().await.unwrap();
        assert_eq!(tracker.snapshot().await.unwrap().used_count, 1);
        assert!(!tracker.can_analyze().await.unwrap());
        assert!(tracker.upgrade().await);
        assert!(tracker.can_analyze().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_state_degrades_to_default() {
        let (tracker, store, _) = setup();
        store.set(QUOTA_KEY, "{not json".to_string()).await.unwrap();
        assert!(tracker.can_analyze().await.unwrap());
    }

    #[tokio::test]
    async fn test_persistence_failures_are_reported() {
        let store = FlakyStore::default();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());
        let tracker = QuotaTracker::new(Arc::new(store.clone()), Arc::new(clock));

        store.set_fail_writes(true);
        assert!(matches!(tracker.record_usage().await, Err(QuotaError::Save(_))));
        assert!(!tracker.upgrade().await);

        store.set_fail_writes(false);
        store.set_fail_reads(true);
        assert!(matches!(tracker.can_analyze().await, Err(QuotaError::Load(_))));
    }

    #[tokio::test]
    async fn test_custom_limit() {
        let store = MemoryStore::new();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());
        let tracker = QuotaTracker::with_limit(Arc::new(store), Arc::new(clock), 3);
        for _ in 0..3 {
            assert!(tracker.can_analyze().await.unwrap());
            tracker.record_usage().await.unwrap();
        }
        assert!(!tracker.can_analyze().await.unwrap());
    }
}
