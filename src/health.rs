//! Fetch health monitoring.
//!
//! [`HealthMonitor`] observes every fetch made by every provider's
//! [`LiveFetchClient`](crate::fetch::LiveFetchClient) and keeps the most
//! recent records in a bounded ring. One monitor is shared across all
//! providers through the application context.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fetch::{FetchObserver, FetchOutcome};

/// Records kept before the oldest are dropped.
pub const DEFAULT_MAX_RECORDS: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct FetchRecord {
    pub provider_id: String,
    pub duration_ms: f64,
    pub success: bool,
    pub cache_hit: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate view over the retained records.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthSummary {
    pub recent_fetches: usize,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
    pub cache_hit_ratio: f64,
    pub recent_errors: Vec<String>,
    pub requests_by_provider: BTreeMap<String, usize>,
}

#[derive(Debug)]
pub struct HealthMonitor {
    max_records: usize,
    records: Mutex<VecDeque<FetchRecord>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS)
    }
}

impl HealthMonitor {
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    fn records(&self) -> MutexGuard<'_, VecDeque<FetchRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, record: FetchRecord) {
        let mut records = self.records();
        records.push_back(record);
        while records.len() > self.max_records {
            records.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn summary(&self) -> HealthSummary {
        let records = self.records();
        if records.is_empty() {
            return HealthSummary {
                recent_fetches: 0,
                avg_duration_ms: 0.0,
                success_rate: 1.0,
                cache_hit_ratio: 0.0,
                recent_errors: Vec::new(),
                requests_by_provider: BTreeMap::new(),
            };
        }

        let total = records.len() as f64;
        let duration: f64 = records.iter().map(|r| r.duration_ms).sum();
        let successes = records.iter().filter(|r| r.success).count() as f64;
        let hits = records.iter().filter(|r| r.cache_hit).count() as f64;

        let errors: Vec<String> = records.iter().filter_map(|r| r.error.clone()).collect();
        let recent_errors = errors[errors.len().saturating_sub(5)..].to_vec();

        let mut requests_by_provider = BTreeMap::new();
        for record in records.iter() {
            *requests_by_provider
                .entry(record.provider_id.clone())
                .or_insert(0) += 1;
        }

        HealthSummary {
            recent_fetches: records.len(),
            avg_duration_ms: duration / total,
            success_rate: successes / total,
            cache_hit_ratio: hits / total,
            recent_errors,
            requests_by_provider,
        }
    }
}

impl FetchObserver for HealthMonitor {
    fn on_fetch(&self, outcome: &FetchOutcome) {
        self.record(FetchRecord {
            provider_id: outcome.provider_id.clone(),
            duration_ms: outcome.duration.as_secs_f64() * 1000.0,
            success: outcome.error.is_none(),
            cache_hit: outcome.cache_hit,
            error: outcome.error.clone(),
            timestamp: Utc::now(),
        });
    }
}
