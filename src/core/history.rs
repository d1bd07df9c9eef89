//! Bounded per-target measurement history and derived analysis.
//!
//! Each target keeps at most `history_size` samples in arrival order; the
//! oldest is evicted on overflow. Histories are created on the first sample
//! and only removed by [`HistoryStore::clear_history`] or
//! [`HistoryStore::clear_all`].

use crate::config::AnalysisConfig;
use crate::core::fingerprint::{Fingerprint, FingerprintClassifier};
use crate::core::stats::{self, Trend};
use crate::probe::ActivityState;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// A single correlated measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub elapsed_ms: u64,
    pub state: ActivityState,
    pub captured_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(elapsed_ms: u64, state: ActivityState) -> Self {
        Self {
            elapsed_ms,
            state,
            captured_at: Utc::now(),
        }
    }
}

/// Fixed-capacity FIFO of samples for one target.
#[derive(Debug, Clone)]
pub struct History {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when full.
    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Elapsed times in arrival order.
    pub fn elapsed_values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.elapsed_ms as f64).collect()
    }
}

/// The most recent reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentReading {
    pub elapsed_ms: u64,
    pub state: ActivityState,
    pub captured_at: DateTime<Utc>,
}

/// Summary statistics over the whole bounded history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStatistics {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub variance: f64,
    pub std_dev: f64,
}

impl SummaryStatistics {
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            min: stats::min(values),
            max: stats::max(values),
            avg: stats::mean(values),
            median: stats::median(values),
            variance: stats::variance(values),
            std_dev: stats::std_dev(values),
        }
    }
}

/// Full analysis of one target's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub target: String,
    /// Number of samples currently held
    pub measurements: usize,
    pub current: CurrentReading,
    pub statistics: SummaryStatistics,
    pub moving_average: f64,
    pub device: Fingerprint,
    /// Percentage of samples per state, one decimal, rounded per bucket
    pub status_distribution: BTreeMap<ActivityState, f64>,
    pub trend: Trend,
}

#[derive(Debug)]
struct TargetRecord {
    history: History,
    fingerprint: Option<Fingerprint>,
}

/// Process-wide store of histories and fingerprints.
pub struct HistoryStore {
    config: AnalysisConfig,
    classifier: FingerprintClassifier,
    records: RwLock<HashMap<String, TargetRecord>>,
}

impl HistoryStore {
    pub fn new(config: AnalysisConfig, classifier: FingerprintClassifier) -> Self {
        Self {
            config,
            classifier,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Append a measurement and refresh the fingerprint once the gate is met.
    pub fn add_measurement(&self, target: &str, elapsed_ms: u64, state: ActivityState) {
        self.add_sample(target, Sample::new(elapsed_ms, state));
    }

    pub fn add_sample(&self, target: &str, sample: Sample) {
        let mut records = self.records.write();
        let record = records
            .entry(target.to_string())
            .or_insert_with(|| TargetRecord {
                history: History::new(self.config.history_size),
                fingerprint: None,
            });

        record.history.push(sample);

        if record.history.len() >= self.classifier.min_samples() {
            record.fingerprint = self.classifier.classify(&record.history.elapsed_values());
        }
    }

    /// Analysis for a target, or `None` when no samples exist.
    pub fn analysis(&self, target: &str) -> Option<Analysis> {
        let records = self.records.read();
        let record = records.get(target)?;
        let latest = *record.history.latest()?;
        let values = record.history.elapsed_values();

        Some(Analysis {
            target: target.to_string(),
            measurements: record.history.len(),
            current: CurrentReading {
                elapsed_ms: latest.elapsed_ms,
                state: latest.state,
                captured_at: latest.captured_at,
            },
            statistics: SummaryStatistics::from_values(&values),
            moving_average: stats::moving_average(&values, self.config.moving_average_window),
            device: record.fingerprint.unwrap_or_else(Fingerprint::unknown),
            status_distribution: status_distribution(&record.history),
            trend: stats::trend(&values),
        })
    }

    /// Current fingerprint, absent until the sample gate is met.
    pub fn fingerprint(&self, target: &str) -> Option<Fingerprint> {
        self.records.read().get(target)?.fingerprint
    }

    /// Samples held for a target, oldest first.
    pub fn samples(&self, target: &str) -> Vec<Sample> {
        self.records
            .read()
            .get(target)
            .map(|r| r.history.samples().copied().collect())
            .unwrap_or_default()
    }

    pub fn sample_count(&self, target: &str) -> usize {
        self.records
            .read()
            .get(target)
            .map_or(0, |r| r.history.len())
    }

    /// Drop history and fingerprint for one target. Returns whether any existed.
    pub fn clear_history(&self, target: &str) -> bool {
        self.records.write().remove(target).is_some()
    }

    pub fn clear_all(&self) {
        self.records.write().clear();
    }

    pub fn target_count(&self) -> usize {
        self.records.read().len()
    }
}

fn status_distribution(history: &History) -> BTreeMap<ActivityState, f64> {
    let total = history.len() as f64;
    let mut counts: BTreeMap<ActivityState, usize> = BTreeMap::new();
    for sample in history.samples() {
        *counts.entry(sample.state).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(state, count)| (state, stats::round_to(count as f64 / total * 100.0, 1)))
        .collect()
}
