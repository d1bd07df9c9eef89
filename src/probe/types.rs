//! Event and classification types produced by the probe scheduler.

use crate::config::ActivityThresholds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Coarse responsiveness band inferred from a single round-trip time.
///
/// Ordered from most to least active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityState {
    /// Below `app_active`
    AppActive,
    /// `[app_active, screen_on)`
    ScreenOn,
    /// `[screen_on, screen_off)`
    ScreenOff,
    /// `[screen_off, offline)`
    Standby,
    /// At or above `offline`
    Offline,
}

impl ActivityState {
    /// Classify an elapsed time against ascending thresholds.
    ///
    /// Bands are lower-inclusive: an elapsed time equal to a threshold
    /// belongs to the band above it.
    pub fn from_elapsed(elapsed_ms: u64, thresholds: &ActivityThresholds) -> Self {
        match elapsed_ms {
            ms if ms >= thresholds.offline => Self::Offline,
            ms if ms < thresholds.app_active => Self::AppActive,
            ms if ms < thresholds.screen_on => Self::ScreenOn,
            ms if ms < thresholds.screen_off => Self::ScreenOff,
            _ => Self::Standby,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppActive => "app-active",
            Self::ScreenOn => "screen-on",
            Self::ScreenOff => "screen-off",
            Self::Standby => "standby",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier correlating a probe with its eventual response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeId(Uuid);

impl ProbeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProbeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "probe_{}", self.0.simple())
    }
}

/// A correlated probe response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementEvent {
    pub target: String,
    pub elapsed_ms: u64,
    pub state: ActivityState,
    pub timestamp: DateTime<Utc>,
    pub probe_id: ProbeId,
    /// Tracking session the probe was issued under
    #[serde(skip)]
    pub generation: u64,
}

/// A probe that could not be sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeErrorEvent {
    pub target: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything the scheduler emits downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent {
    Measurement(MeasurementEvent),
    Error(ProbeErrorEvent),
}

impl ProbeEvent {
    pub fn target(&self) -> &str {
        match self {
            ProbeEvent::Measurement(e) => &e.target,
            ProbeEvent::Error(e) => &e.target,
        }
    }
}
