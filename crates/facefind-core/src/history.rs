//! Search History
//!
//! Append-only audit trail of face searches.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::SearchRecord;
use crate::store::RecordStore;
use crate::CoreResult;

/// Aggregate numbers over past searches
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_searches: usize,
    /// Searches that matched at least one video
    pub successful_searches: usize,
    pub total_matches_found: usize,
    /// Percentage of successful searches, `0.0` when there are none
    pub success_rate: f64,
}

pub struct SearchHistory {
    store: RecordStore<SearchRecord>,
}

impl SearchHistory {
    pub fn new(store: RecordStore<SearchRecord>) -> Self {
        Self { store }
    }

    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        Ok(Self::new(RecordStore::open(path)?))
    }

    pub fn append(&self, record: SearchRecord) -> CoreResult<()> {
        self.store.upsert(record)
    }

    /// All searches, newest first. Equal timestamps keep id order.
    pub fn list(&self) -> CoreResult<Vec<SearchRecord>> {
        let mut records = self.store.list_all()?;
        records.sort_by(|a, b| {
            b.search_time
                .cmp(&a.search_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    pub fn stats(&self) -> CoreResult<HistoryStats> {
        let records = self.store.list_all()?;
        let total_searches = records.len();
        let successful_searches = records.iter().filter(|r| r.matches_found > 0).count();
        let total_matches_found: usize = records.iter().map(|r| r.matches_found).sum();
        let success_rate = if total_searches == 0 {
            0.0
        } else {
            successful_searches as f64 / total_searches as f64 * 100.0
        };

        Ok(HistoryStats {
            total_searches,
            successful_searches,
            total_matches_found,
            success_rate,
        })
    }
}
