use chrono::{DateTime, Datelike, Utc};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;
use crate::database::KeyValueStore;
use crate::food::analysis::RecognitionResult;

pub const HISTORY_KEY: &str = "nutribox_history";

/// One completed analysis. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub captured_at: DateTime<Utc>,
    pub image_reference: String,
    pub result: RecognitionResult,
}

impl AnalysisRecord {
    pub fn new(captured_at: DateTime<Utc>, image_reference: impl Into<String>, result: RecognitionResult) -> Self {
        Self {
            captured_at,
            image_reference: image_reference.into(),
            result,
        }
    }
}

/// Persisted list of past analyses, most recent first.
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// `(year, month)` of today on this device.
    pub fn current_month(&self) -> (i32, u32) {
        let today = self.clock.today();
        (today.year(), today.month())
    }

    /// Entries that no longer decode (missing fields, older shapes) are
    /// skipped. A value that is not a list at all decodes as empty so the
    /// next append overwrites it.
    fn decode(json: &str) -> Vec<AnalysisRecord> {
        let entries: Vec<serde_json::Value> = match serde_json::from_str(json) {
            Ok(entries) => entries,
            Err(e) => {
                error!("History is not a JSON list, starting over: {}", e);
                return Vec::new();
            }
        };

        let total = entries.len();
        let records: Vec<AnalysisRecord> = entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect();

        if records.len() != total {
            warn!("Dropped {} incomplete history entries", total - records.len());
        }
        records
    }

    /// Reads the stored list. `None` means the read itself failed.
    async fn load(&self) -> Option<Vec<AnalysisRecord>> {
        match self.store.get(HISTORY_KEY).await {
            Ok(Some(json)) => Some(Self::decode(&json)),
            Ok(None) => {
                if let Err(e) = self.store.set(HISTORY_KEY, "[]".to_string()).await {
                    error!("Error initializing history: {}", e);
                }
                Some(Vec::new())
            }
            Err(e) => {
                error!("Error loading history: {}", e);
                None
            }
        }
    }

    /// Prepends `record` and writes the whole list back in one write.
    pub async fn append(&self, record: AnalysisRecord) -> bool {
        let Some(mut records) = self.load().await else {
            return false;
        };
        records.insert(0, record);

        let json = match serde_json::to_string(&records) {
            Ok(json) => json,
            Err(e) => {
                error!("Error encoding history: {}", e);
                return false;
            }
        };

        match self.store.set(HISTORY_KEY, json).await {
            Ok(()) => true,
            Err(e) => {
                error!("Error saving history: {}", e);
                false
            }
        }
    }

    pub async fn list(&self) -> Vec<AnalysisRecord> {
        self.load().await.unwrap_or_default()
    }

    /// History captured in the given local calendar month, newest first.
    pub async fn list_month(&self, year: i32, month: u32) -> Vec<AnalysisRecord> {
        self.list()
            .await
            .into_iter()
            .filter(|r| {
                let day = self.clock.local_date(r.captured_at);
                day.year() == year && day.month() == month
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::database::kv::testing::FlakyStore;
    use crate::database::MemoryStore;
    use crate::food::analysis::Dish;
    use chrono::{FixedOffset, TimeZone};

    fn history_in(store: Arc<dyn KeyValueStore>) -> HistoryStore {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 4, 20, 9, 0, 0).unwrap());
        HistoryStore::new(store, Arc::new(clock))
    }

    fn record(day: u32, name: &str) -> AnalysisRecord {
        AnalysisRecord::new(
            Utc.with_ymd_and_hms(2024, 4, day, 12, 0, 0).unwrap(),
            format!("file:///photos/{}.jpg", name),
            RecognitionResult {
                dishes: vec![Dish {
                    name: name.to_string(),
                    calories: 120.0,
                    weight_grams: 80.0,
                    protein_grams: 2.0,
                    carb_grams: 30.0,
                    fat_grams: 0.5,
                }],
                comment: None,
            },
        )
    }

    #[tokio::test]
    async fn test_empty_store_lists_nothing_and_initializes() {
        let store = MemoryStore::new();
        let history = history_in(Arc::new(store.clone()));
        assert!(history.list().await.is_empty());
        assert_eq!(store.raw(HISTORY_KEY), Some("[]".to_string()));
    }

    #[tokio::test]
    async fn test_list_is_reverse_insertion_order() {
        let history = history_in(Arc::new(MemoryStore::new()));
        let names = ["apple", "bagel", "curry", "dumpling"];
        for (i, name) in names.iter().enumerate() {
            assert!(history.append(record(i as u32 + 1, name)).await);
        }

        let listed: Vec<String> = history
            .list()
            .await
            .into_iter()
            .map(|r| r.result.dishes[0].name.clone())
            .collect();
        assert_eq!(listed, vec!["dumpling", "curry", "bagel", "apple"]);
    }

    #[tokio::test]
    async fn test_incomplete_entries_dropped_on_next_save() {
        let store = MemoryStore::new();
        let good = serde_json::to_value(record(2, "apple")).unwrap();
        let raw = serde_json::json!([{"image_reference": "file:///broken.jpg"}, good]);
        store.set(HISTORY_KEY, raw.to_string()).await.unwrap();

        let history = history_in(Arc::new(store.clone()));
        assert_eq!(history.list().await.len(), 1);

        assert!(history.append(record(3, "bagel")).await);
        let stored: Vec<serde_json::Value> = serde_json::from_str(&store.raw(HISTORY_KEY).unwrap()).unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_prior_list() {
        let store = FlakyStore::default();
        let history = history_in(Arc::new(store.clone()));
        assert!(history.append(record(1, "apple")).await);

        store.set_fail_writes(true);
        assert!(!history.append(record(2, "bagel")).await);

        store.set_fail_writes(false);
        let listed = history.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].result.dishes[0].name, "apple");
    }

    #[tokio::test]
    async fn test_read_failure_degrades_to_empty() {
        let store = FlakyStore::default();
        let history = history_in(Arc::new(store.clone()));
        assert!(history.append(record(1, "apple")).await);

        store.set_fail_reads(true);
        assert!(history.list().await.is_empty());
        assert!(!history.append(record(2, "bagel")).await);
    }

    #[tokio::test]
    async fn test_corrupt_list_degrades_to_empty() {
        let store = MemoryStore::new();
        store.set(HISTORY_KEY, "not json".to_string()).await.unwrap();
        let history = history_in(Arc::new(store));
        assert!(history.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_append_recovers_from_non_list_value() {
        for corrupt in ["{\"oops\":1}", "null", "[{\"captured_at\""] {
            let store = MemoryStore::new();
            store.set(HISTORY_KEY, corrupt.to_string()).await.unwrap();
            let history = history_in(Arc::new(store.clone()));

            assert!(history.append(record(1, "apple")).await);
            assert!(history.append(record(2, "bagel")).await);

            let names: Vec<String> = history
                .list()
                .await
                .into_iter()
                .map(|r| r.result.dishes[0].name.clone())
                .collect();
            assert_eq!(names, vec!["bagel", "apple"]);
        }
    }

    #[tokio::test]
    async fn test_list_month_filters() {
        let history = history_in(Arc::new(MemoryStore::new()));
        history.append(record(3, "april")).await;
        let mut may = record(1, "may");
        may.captured_at = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
        history.append(may).await;

        let april = history.list_month(2024, 4).await;
        assert_eq!(april.len(), 1);
        assert_eq!(april[0].result.dishes[0].name, "april");
        assert!(history.list_month(2023, 4).await.is_empty());
        assert_eq!(history.current_month(), (2024, 4));
    }

    #[tokio::test]
    async fn test_list_month_uses_device_offset() {
        let mut evening = record(1, "late supper");
        evening.captured_at = Utc.with_ymd_and_hms(2024, 5, 1, 2, 30, 0).unwrap();

        let clock = FixedClock::with_offset(evening.captured_at, FixedOffset::west_opt(5 * 3600).unwrap());
        let history = HistoryStore::new(Arc::new(MemoryStore::new()), Arc::new(clock));
        assert!(history.append(evening).await);

        assert_eq!(history.list_month(2024, 4).await.len(), 1);
        assert!(history.list_month(2024, 5).await.is_empty());
        assert_eq!(history.current_month(), (2024, 4));
    }
}
