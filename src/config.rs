//! Configuration for the RTT tracker.
//!
//! Every tunable of the probing, analysis and fan-out layers lives here so
//! it can be changed without touching code. The file is plain JSON and every
//! section falls back to its defaults when omitted.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the tracker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Probe scheduling and target limits
    pub probe: ProbeConfig,
    /// Activity-state latency bands
    pub thresholds: ActivityThresholds,
    /// History and rolling statistics
    pub analysis: AnalysisConfig,
    /// Device fingerprint heuristics
    pub fingerprint: FingerprintConfig,
    /// HTTP / WebSocket surface
    pub server: ServerSettings,
    /// Simulated transport parameters
    pub simulation: SimulationConfig,
}

/// Probe scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Interval used when a start command does not name one
    pub default_interval_ms: u64,
    /// Smallest interval a caller may request
    pub min_interval_ms: u64,
    /// Largest interval a caller may request
    pub max_interval_ms: u64,
    /// Ceiling on concurrently tracked targets
    pub max_targets: usize,
    /// Pending probes older than this are evicted
    pub probe_timeout_ms: u64,
    /// Cadence of the pending-probe expiry sweep
    pub sweep_interval_ms: u64,
    /// Capacity of the scheduler -> pipeline event queue
    pub event_queue: usize,
    /// Regular expression a target identifier must match
    pub target_pattern: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: 2000,
            min_interval_ms: 500,
            max_interval_ms: 60_000,
            max_targets: 10,
            probe_timeout_ms: 30_000,
            sweep_interval_ms: 5000,
            event_queue: 1024,
            target_pattern: r"^\+?\d{10,15}$".to_string(),
        }
    }
}

impl ProbeConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Latency thresholds (milliseconds) separating activity states.
///
/// Must be strictly ascending. A value equal to a threshold falls into the
/// band above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityThresholds {
    pub app_active: u64,
    pub screen_on: u64,
    pub screen_off: u64,
    pub offline: u64,
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        Self {
            app_active: 500,
            screen_on: 1000,
            screen_off: 2000,
            offline: 10_000,
        }
    }
}

impl ActivityThresholds {
    fn is_ascending(&self) -> bool {
        self.app_active < self.screen_on
            && self.screen_on < self.screen_off
            && self.screen_off < self.offline
    }
}

/// History and statistics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Samples retained per target (oldest evicted first)
    pub history_size: usize,
    /// Samples averaged by the moving average
    pub moving_average_window: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            history_size: 10,
            moving_average_window: 5,
        }
    }
}

/// Device fingerprint heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Samples required before a fingerprint is computed
    pub min_samples: usize,
    /// Variance (ms²) below which a desktop client is assumed
    pub low_variance: f64,
    /// Variance (ms²) above which a mobile client is assumed
    pub high_variance: f64,
    /// Mean RTT ceiling for desktop clients
    pub desktop_rtt_max: f64,
    /// Typical mobile mean RTT
    pub mobile_rtt_typical: f64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            min_samples: 20,
            low_variance: 100.0,
            high_variance: 300.0,
            desktop_rtt_max: 500.0,
            mobile_rtt_typical: 1500.0,
        }
    }
}

/// HTTP / WebSocket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    /// Origin allowed by CORS
    pub frontend_origin: String,
    /// Liveness message cadence per observer
    #[serde(with = "duration_serde")]
    pub heartbeat: Duration,
    /// Messages buffered per observer before drops
    pub observer_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 3001,
            frontend_origin: "http://localhost:3000".to_string(),
            heartbeat: Duration::from_secs(30),
            observer_queue: 256,
        }
    }
}

/// Weighted latency band used by the simulated transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyPattern {
    pub weight: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyPattern {
    pub fn new(weight: f64, min_ms: u64, max_ms: u64) -> Self {
        Self {
            weight,
            min_ms,
            max_ms,
        }
    }
}

/// Simulated transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Delay before the transport reports ready
    pub connect_delay_ms: u64,
    /// Fraction of probes that never get a response
    pub loss_rate: f64,
    pub patterns: Vec<LatencyPattern>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            connect_delay_ms: 1000,
            loss_rate: 0.0,
            patterns: vec![
                LatencyPattern::new(0.3, 200, 500),
                LatencyPattern::new(0.4, 800, 1200),
                LatencyPattern::new(0.2, 1500, 2500),
                LatencyPattern::new(0.1, 3000, 5000),
            ],
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(config_path)
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rtt-tracker")
            .join("config.json")
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let probe = &self.probe;
        if probe.min_interval_ms == 0 || probe.min_interval_ms > probe.max_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "interval bounds must satisfy 0 < min ({}) <= max ({})",
                probe.min_interval_ms, probe.max_interval_ms
            )));
        }
        if !(probe.min_interval_ms..=probe.max_interval_ms).contains(&probe.default_interval_ms) {
            return Err(ConfigError::Invalid(format!(
                "default interval {}ms outside [{}, {}]",
                probe.default_interval_ms, probe.min_interval_ms, probe.max_interval_ms
            )));
        }
        if probe.max_targets == 0 {
            return Err(ConfigError::Invalid("max_targets must be positive".into()));
        }
        if probe.event_queue == 0 || probe.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "event_queue and sweep_interval_ms must be positive".into(),
            ));
        }
        Regex::new(&probe.target_pattern)?;

        if !self.thresholds.is_ascending() {
            return Err(ConfigError::Invalid(format!(
                "activity thresholds must be strictly ascending: {:?}",
                self.thresholds
            )));
        }
        if self.analysis.history_size == 0 || self.analysis.moving_average_window == 0 {
            return Err(ConfigError::Invalid(
                "history_size and moving_average_window must be positive".into(),
            ));
        }
        if self.fingerprint.min_samples == 0 {
            return Err(ConfigError::Invalid(
                "fingerprint min_samples must be positive".into(),
            ));
        }
        if self.server.observer_queue == 0 || self.server.heartbeat.is_zero() {
            return Err(ConfigError::Invalid(
                "observer_queue and heartbeat must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.simulation.loss_rate) {
            return Err(ConfigError::Invalid(format!(
                "loss_rate {} outside [0, 1]",
                self.simulation.loss_rate
            )));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid target pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
