//! Measurement analysis for the RTT tracker.
//!
//! This module contains:
//! - Summary statistics and trend detection over latency samples
//! - The bounded per-target history store
//! - Device fingerprinting from accumulated samples

pub mod fingerprint;
pub mod history;
pub mod stats;

// Re-export commonly used types
pub use fingerprint::{
    Characteristics, Confidence, DeviceCategory, Fingerprint, FingerprintClassifier,
};
pub use history::{Analysis, CurrentReading, History, HistoryStore, Sample, SummaryStatistics};
pub use stats::{Trend, TREND_WINDOW};
