//! Command surface and event pipeline.
//!
//! [`TrackingCoordinator`] is wired once at startup and shared by handle.
//! It validates commands, drives the [`ProbeScheduler`] and owns the
//! [`HistoryStore`] and [`EventBroadcaster`]. Probe events flow from the
//! scheduler through a bounded queue into a single [`EventPipeline`] loop,
//! which records measurements and fans the results out to observers.

use crate::config::{Config, ConfigError};
use crate::core::{Analysis, FingerprintClassifier, HistoryStore};
use crate::probe::{
    ProbeEvent, ProbeScheduler, ProbeTransport, ScheduleError, SchedulerSettings, TrackingView,
};
use crate::realtime::{DeliveryReport, EventBroadcaster, ServerMessage, StatusSnapshot};
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Reasons a tracking command is rejected. Rejections never change state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("target is required")]
    MissingTarget,
    #[error("invalid target format: {0}")]
    InvalidTarget(String),
    #[error("interval must be between {min}ms and {max}ms, got {requested}ms")]
    IntervalOutOfRange { min: u64, max: u64, requested: u64 },
    #[error("already tracking {0}")]
    AlreadyTracked(String),
    #[error("maximum {max} targets allowed, stop tracking some targets first")]
    CapacityExceeded { max: usize, active: usize },
    #[error("probe transport not connected, try again")]
    TransportNotReady,
    #[error("not currently tracking {0}")]
    NotTracked(String),
}

impl CommandError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingTarget => "MISSING_TARGET",
            Self::InvalidTarget(_) => "INVALID_TARGET",
            Self::IntervalOutOfRange { .. } => "INTERVAL_OUT_OF_RANGE",
            Self::AlreadyTracked(_) => "ALREADY_TRACKED",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::TransportNotReady => "TRANSPORT_NOT_READY",
            Self::NotTracked(_) => "NOT_TRACKED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub target: String,
    pub interval: u64,
    /// Tracked targets after the start
    pub active_targets: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    pub target: String,
    pub active_targets: usize,
}

/// Interval bounds and defaults for start commands.
#[derive(Debug, Clone, Copy)]
struct IntervalPolicy {
    default_ms: u64,
    min_ms: u64,
    max_ms: u64,
}

pub struct TrackingCoordinator {
    intervals: IntervalPolicy,
    sweep_interval: Duration,
    target_pattern: Regex,
    transport: Arc<dyn ProbeTransport>,
    scheduler: ProbeScheduler,
    history: Arc<HistoryStore>,
    broadcaster: Arc<EventBroadcaster>,
}

impl TrackingCoordinator {
    /// Wire every component from `config`.
    ///
    /// The returned pipeline must be run (see [`EventPipeline::spawn`]) for
    /// measurements to reach the history store and observers.
    pub fn new(
        config: &Config,
        transport: Arc<dyn ProbeTransport>,
    ) -> Result<(Self, EventPipeline), ConfigError> {
        config.validate()?;
        let target_pattern = Regex::new(&config.probe.target_pattern)?;

        let (events_tx, events_rx) = mpsc::channel(config.probe.event_queue);
        let history = Arc::new(HistoryStore::new(
            config.analysis.clone(),
            FingerprintClassifier::new(config.fingerprint.clone()),
        ));
        let broadcaster = Arc::new(EventBroadcaster::new(config.server.observer_queue));
        let scheduler = ProbeScheduler::new(
            SchedulerSettings::from_config(config),
            transport.clone(),
            events_tx,
        );

        let pipeline = EventPipeline {
            events: events_rx,
            tracking: scheduler.tracking_view(),
            history: history.clone(),
            broadcaster: broadcaster.clone(),
        };

        let coordinator = Self {
            intervals: IntervalPolicy {
                default_ms: config.probe.default_interval_ms,
                min_ms: config.probe.min_interval_ms,
                max_ms: config.probe.max_interval_ms,
            },
            sweep_interval: config.probe.sweep_interval(),
            target_pattern,
            transport,
            scheduler,
            history,
            broadcaster,
        };
        Ok((coordinator, pipeline))
    }

    /// Start tracking a target at `interval_ms` (or the default interval).
    pub fn start(
        &self,
        target: Option<&str>,
        interval_ms: Option<u64>,
    ) -> Result<StartOutcome, CommandError> {
        let target = self.validate_target(target)?;

        let interval = interval_ms.unwrap_or(self.intervals.default_ms);
        if !(self.intervals.min_ms..=self.intervals.max_ms).contains(&interval) {
            return Err(CommandError::IntervalOutOfRange {
                min: self.intervals.min_ms,
                max: self.intervals.max_ms,
                requested: interval,
            });
        }

        if self.scheduler.is_tracking(target) {
            return Err(CommandError::AlreadyTracked(target.to_string()));
        }
        let active = self.scheduler.active_count();
        if active >= self.scheduler.max_targets() {
            return Err(CommandError::CapacityExceeded {
                max: self.scheduler.max_targets(),
                active,
            });
        }
        if !self.transport.is_ready() {
            return Err(CommandError::TransportNotReady);
        }

        self.scheduler
            .start_tracking(target, Duration::from_millis(interval))
            .map_err(|e| match e {
                ScheduleError::AlreadyTracked(t) => CommandError::AlreadyTracked(t),
                ScheduleError::CapacityExceeded { max } => CommandError::CapacityExceeded {
                    max,
                    active: self.scheduler.active_count(),
                },
            })?;

        Ok(StartOutcome {
            target: target.to_string(),
            interval,
            active_targets: self.scheduler.active_count(),
        })
    }

    /// Stop tracking a target and forget its history.
    pub fn stop(&self, target: Option<&str>) -> Result<StopOutcome, CommandError> {
        let target = match target.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Err(CommandError::MissingTarget),
        };

        if !self.scheduler.stop_tracking(target) {
            return Err(CommandError::NotTracked(target.to_string()));
        }
        self.history.clear_history(target);

        Ok(StopOutcome {
            target: target.to_string(),
            active_targets: self.scheduler.active_count(),
        })
    }

    /// Stop every target and clear all history. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let stopped = self.scheduler.stop_all();
        self.history.clear_all();
        stopped
    }

    pub fn status(&self) -> StatusSnapshot {
        let active_targets = self.scheduler.active_targets();
        StatusSnapshot {
            connected: self.transport.is_ready(),
            count: active_targets.len(),
            active_targets,
            max_targets: self.scheduler.max_targets(),
        }
    }

    /// Analysis for one target, `None` when no samples exist.
    pub fn analysis(&self, target: &str) -> Option<Analysis> {
        self.history.analysis(target)
    }

    /// Analyses of the currently tracked targets that have data.
    pub fn all_analyses(&self) -> Vec<Analysis> {
        self.scheduler
            .active_targets()
            .iter()
            .filter_map(|t| self.history.analysis(t))
            .collect()
    }

    /// Periodically evict pending probes that outlived the probe timeout.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.scheduler.spawn_sweeper(self.sweep_interval)
    }

    /// Stop all tracking, disconnect the transport and close observers.
    pub fn shutdown(&self) {
        let stopped = self.stop_all();
        self.transport.disconnect();
        self.broadcaster.close_all();
        tracing::info!(stopped, "Tracking coordinator shut down");
    }

    pub fn scheduler(&self) -> &ProbeScheduler {
        &self.scheduler
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    fn validate_target<'a>(&self, target: Option<&'a str>) -> Result<&'a str, CommandError> {
        let target = match target.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Err(CommandError::MissingTarget),
        };
        if !self.target_pattern.is_match(target) {
            return Err(CommandError::InvalidTarget(target.to_string()));
        }
        Ok(target)
    }
}

/// Single consumer of probe events.
///
/// Measurements are recorded only while their tracking session is still
/// current; anything queued before a stop is dropped.
pub struct EventPipeline {
    events: mpsc::Receiver<ProbeEvent>,
    tracking: TrackingView,
    history: Arc<HistoryStore>,
    broadcaster: Arc<EventBroadcaster>,
}

impl EventPipeline {
    /// Record and fan out one event.
    pub fn process(&self, event: ProbeEvent) -> DeliveryReport {
        let message = match event {
            ProbeEvent::Measurement(m) => {
                let recorded = self.tracking.with_session(&m.target, m.generation, || {
                    self.history.add_measurement(&m.target, m.elapsed_ms, m.state);
                });
                if recorded.is_none() {
                    tracing::debug!(target_id = %m.target, "Dropping measurement for stopped target");
                    return DeliveryReport::default();
                }
                let analysis = self.history.analysis(&m.target);
                ServerMessage::rtt_update(&m, analysis)
            }
            ProbeEvent::Error(e) => ServerMessage::probe_error(&e),
        };
        self.broadcaster.broadcast(&message)
    }

    /// Consume events until the scheduler goes away.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.process(event);
        }
        tracing::debug!("Event pipeline stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ActivityState, ProbeRequest, ResponseSink, TransportError};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    const TARGET: &str = "15551234567";

    /// Transport whose responses are delivered by hand.
    struct ManualTransport {
        ready: AtomicBool,
        sent: Mutex<Vec<(ProbeRequest, ResponseSink)>>,
    }

    impl ManualTransport {
        fn new(ready: bool) -> Arc<Self> {
            Arc::new(Self {
                ready: AtomicBool::new(ready),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn respond_last(&self, target: &str, elapsed_ms: u64) -> bool {
            let sent = self.sent.lock();
            let (request, sink) = sent
                .iter()
                .rev()
                .find(|(r, _)| r.target == target)
                .expect("no probe sent to target");
            sink.deliver(&request.probe_id, elapsed_ms)
        }
    }

    impl ProbeTransport for ManualTransport {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn send_probe(
            &self,
            request: &ProbeRequest,
            responses: ResponseSink,
        ) -> Result<(), TransportError> {
            self.sent.lock().push((request.clone(), responses));
            Ok(())
        }

        fn disconnect(&self) {
            self.ready.store(false, Ordering::SeqCst);
        }
    }

    fn coordinator(
        config: Config,
        ready: bool,
    ) -> (TrackingCoordinator, EventPipeline, Arc<ManualTransport>) {
        let transport = ManualTransport::new(ready);
        let (coordinator, pipeline) =
            TrackingCoordinator::new(&config, transport.clone()).unwrap();
        (coordinator, pipeline, transport)
    }

    #[tokio::test]
    async fn test_validation_rejects_without_state_change() {
        let (c, _p, transport) = coordinator(Config::default(), true);

        assert_eq!(c.start(None, None), Err(CommandError::MissingTarget));
        assert_eq!(c.start(Some("  "), None), Err(CommandError::MissingTarget));
        assert_eq!(
            c.start(Some("abc"), None),
            Err(CommandError::InvalidTarget("abc".into()))
        );
        assert_eq!(
            c.start(Some(TARGET), Some(100)),
            Err(CommandError::IntervalOutOfRange {
                min: 500,
                max: 60_000,
                requested: 100
            })
        );
        assert!(matches!(
            c.start(Some(TARGET), Some(60_001)),
            Err(CommandError::IntervalOutOfRange { .. })
        ));

        assert_eq!(c.status().count, 0);
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_uses_default_interval() {
        let (c, _p, transport) = coordinator(Config::default(), true);
        let outcome = c.start(Some("+15551234567"), None).unwrap();
        assert_eq!(outcome.interval, 2000);
        assert_eq!(outcome.active_targets, 1);
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_not_ready_transport_rejected() {
        let (c, _p, _t) = coordinator(Config::default(), false);
        assert_eq!(
            c.start(Some(TARGET), None),
            Err(CommandError::TransportNotReady)
        );
        assert!(!c.status().connected);
    }

    #[tokio::test]
    async fn test_duplicate_and_capacity_codes() {
        let mut config = Config::default();
        config.probe.max_targets = 1;
        let (c, _p, _t) = coordinator(config, true);

        c.start(Some(TARGET), None).unwrap();
        let dup = c.start(Some(TARGET), None).unwrap_err();
        assert_eq!(dup.code(), "ALREADY_TRACKED");

        let full = c.start(Some("15559876543"), None).unwrap_err();
        assert_eq!(full, CommandError::CapacityExceeded { max: 1, active: 1 });
        assert_eq!(full.code(), "CAPACITY_EXCEEDED");
    }

    #[tokio::test]
    async fn test_stop_reports_untracked() {
        let (c, _p, _t) = coordinator(Config::default(), true);
        c.start(Some(TARGET), None).unwrap();

        assert_eq!(
            c.stop(Some("15550000000")),
            Err(CommandError::NotTracked("15550000000".into()))
        );
        assert_eq!(c.stop(None), Err(CommandError::MissingTarget));
        assert_eq!(c.status().active_targets, vec![TARGET.to_string()]);

        let outcome = c.stop(Some(TARGET)).unwrap();
        assert_eq!(outcome.active_targets, 0);
    }

    #[tokio::test]
    async fn test_measurement_flows_to_history_and_observers() {
        let (c, pipeline, transport) = coordinator(Config::default(), true);
        let mut observer = c.broadcaster().register();
        let pipeline = pipeline.spawn();

        c.start(Some(TARGET), Some(60_000)).unwrap();
        assert!(transport.respond_last(TARGET, 750));

        let json = observer.recv().await.unwrap();
        let msg: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(msg["type"], "rtt-update");
        assert_eq!(msg["data"]["target"], TARGET);
        assert_eq!(msg["data"]["elapsedMs"], 750);
        assert_eq!(msg["data"]["state"], "screen-on");
        assert_eq!(msg["data"]["analysis"]["measurements"], 1);

        let analysis = c.analysis(TARGET).unwrap();
        assert_eq!(analysis.current.state, ActivityState::ScreenOn);
        assert_eq!(c.all_analyses().len(), 1);

        // stop clears history and later responses are discarded
        c.stop(Some(TARGET)).unwrap();
        assert!(c.analysis(TARGET).is_none());
        assert!(!transport.respond_last(TARGET, 750));
        assert!(c.all_analyses().is_empty());

        drop(c);
        pipeline.await.unwrap();
    }

    #[tokio::test]
    async fn test_measurement_queued_before_stop_is_dropped() {
        let (c, mut pipeline, transport) = coordinator(Config::default(), true);
        let mut observer = c.broadcaster().register();

        c.start(Some(TARGET), Some(60_000)).unwrap();
        assert!(transport.respond_last(TARGET, 750));
        c.stop(Some(TARGET)).unwrap();
        c.start(Some(TARGET), Some(60_000)).unwrap();

        // answered under the first session, recorded after the restart
        let stale = pipeline.events.try_recv().unwrap();
        assert_eq!(pipeline.process(stale), DeliveryReport::default());
        assert!(c.analysis(TARGET).is_none());
        assert!(observer.try_recv().is_none());

        assert!(transport.respond_last(TARGET, 300));
        let fresh = pipeline.events.try_recv().unwrap();
        assert_eq!(pipeline.process(fresh).delivered, 1);
        assert_eq!(c.analysis(TARGET).unwrap().measurements, 1);

        assert!(!transport.respond_last(TARGET, 300));
        c.stop(Some(TARGET)).unwrap();
        assert!(c.analysis(TARGET).is_none());
    }

    #[tokio::test]
    async fn test_error_event_is_broadcast() {
        let (c, pipeline, _t) = coordinator(Config::default(), true);
        let mut observer = c.broadcaster().register();

        pipeline.process(ProbeEvent::Error(crate::probe::ProbeErrorEvent {
            target: TARGET.into(),
            reason: "send failed: timeout".into(),
            timestamp: chrono::Utc::now(),
        }));

        let msg: serde_json::Value =
            serde_json::from_str(&observer.try_recv().unwrap()).unwrap();
        assert_eq!(msg["type"], "error");
        assert_eq!(msg["data"]["target"], TARGET);
        assert_eq!(msg["data"]["reason"], "send failed: timeout");
    }

    #[tokio::test]
    async fn test_stop_all_and_shutdown() {
        let (c, _p, transport) = coordinator(Config::default(), true);
        assert_eq!(c.stop_all(), 0);

        c.start(Some(TARGET), None).unwrap();
        c.start(Some("15559876543"), None).unwrap();
        let mut observer = c.broadcaster().register();

        c.shutdown();
        assert_eq!(c.status().count, 0);
        assert!(!transport.is_ready());
        assert!(observer.recv().await.is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.probe.target_pattern = "(".into();
        let result = TrackingCoordinator::new(&config, ManualTransport::new(true));
        assert!(matches!(result, Err(ConfigError::Pattern(_))));
    }
}
