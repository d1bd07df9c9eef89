//! Device fingerprinting from latency statistics.
//!
//! A fingerprint is recomputed wholesale from a target's bounded history
//! once it holds at least `min_samples` samples. Rules are evaluated in a
//! fixed order and the first match wins, since the configured thresholds
//! may overlap:
//!
//! 1. variance < `low_variance` and mean < `desktop_rtt_max` → desktop / high
//! 2. variance > `high_variance` and mean < `mobile_rtt_typical` → mobile-type-a / medium
//! 3. mean > `mobile_rtt_typical` → mobile-type-b / medium
//! 4. otherwise → unknown / low

use crate::config::FingerprintConfig;
use crate::core::stats;
use serde::{Deserialize, Serialize};

/// Inferred client category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceCategory {
    Desktop,
    MobileTypeA,
    MobileTypeB,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Rounded latency characteristics backing a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Characteristics {
    pub avg_elapsed: f64,
    pub variance: f64,
    /// Standard deviation
    pub jitter: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(rename = "type")]
    pub category: DeviceCategory,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub characteristics: Option<Characteristics>,
}

impl Fingerprint {
    /// Placeholder reported while no fingerprint has been computed.
    pub fn unknown() -> Self {
        Self {
            category: DeviceCategory::Unknown,
            confidence: Confidence::Low,
            characteristics: None,
        }
    }
}

/// Classifies sample sequences into device fingerprints.
#[derive(Debug, Clone)]
pub struct FingerprintClassifier {
    config: FingerprintConfig,
}

impl FingerprintClassifier {
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    pub fn min_samples(&self) -> usize {
        self.config.min_samples
    }

    /// Classify the given elapsed times, or `None` below the sample gate.
    pub fn classify(&self, elapsed: &[f64]) -> Option<Fingerprint> {
        if elapsed.len() < self.config.min_samples {
            return None;
        }

        let avg = stats::mean(elapsed);
        let variance = stats::variance(elapsed);
        let cfg = &self.config;

        let (category, confidence) =
            if variance < cfg.low_variance && avg < cfg.desktop_rtt_max {
                (DeviceCategory::Desktop, Confidence::High)
            } else if variance > cfg.high_variance && avg < cfg.mobile_rtt_typical {
                (DeviceCategory::MobileTypeA, Confidence::Medium)
            } else if avg > cfg.mobile_rtt_typical {
                (DeviceCategory::MobileTypeB, Confidence::Medium)
            } else {
                (DeviceCategory::Unknown, Confidence::Low)
            };

        Some(Fingerprint {
            category,
            confidence,
            characteristics: Some(Characteristics {
                avg_elapsed: avg.round(),
                variance: variance.round(),
                jitter: variance.sqrt().round(),
            }),
        })
    }
}
