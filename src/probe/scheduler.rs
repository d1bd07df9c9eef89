//! Per-target probe scheduling and response correlation.
//!
//! Every tracked target owns one repeating timer task. Each tick issues a
//! probe: a fresh [`ProbeId`] is recorded with its send instant and the
//! transport is asked to deliver it. Responses come back through a
//! [`ResponseSink`], are matched against the pending table, classified and
//! emitted as [`ProbeEvent`]s on the scheduler's event queue.
//!
//! Pending probes that never get a response are evicted by
//! [`ProbeScheduler::sweep_expired`] once they are older than the probe
//! timeout.

use crate::config::{ActivityThresholds, Config};
use crate::probe::transport::{
    CorrelateResponse, ProbeRequest, ProbeTransport, ResponseSink,
};
use crate::probe::types::{
    ActivityState, MeasurementEvent, ProbeErrorEvent, ProbeEvent, ProbeId,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Scheduler limits and classification thresholds.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Ceiling on concurrently tracked targets
    pub max_targets: usize,
    pub thresholds: ActivityThresholds,
    /// Age after which an unanswered probe is dropped
    pub probe_timeout: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_targets: config.probe.max_targets,
            thresholds: config.thresholds,
            probe_timeout: config.probe.probe_timeout(),
        }
    }
}

/// Reasons a target cannot start tracking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("already tracking {0}")]
    AlreadyTracked(String),
    #[error("maximum of {max} tracked targets reached")]
    CapacityExceeded { max: usize },
}

/// Public view of one tracked target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingInfo {
    pub target: String,
    pub interval_ms: u64,
    pub started_at: DateTime<Utc>,
}

struct TrackedTarget {
    interval: Duration,
    started_at: DateTime<Utc>,
    generation: u64,
    timer: JoinHandle<()>,
}

struct PendingProbe {
    target: String,
    generation: u64,
    sent_at: Instant,
}

struct SchedulerInner {
    settings: SchedulerSettings,
    transport: Arc<dyn ProbeTransport>,
    targets: Mutex<HashMap<String, TrackedTarget>>,
    pending: Mutex<HashMap<ProbeId, PendingProbe>>,
    events: mpsc::Sender<ProbeEvent>,
    next_generation: AtomicU64,
}

/// Owns the tracking set, the per-target timers and the pending-probe table.
///
/// Must be used from within a Tokio runtime; timers are spawned tasks.
pub struct ProbeScheduler {
    inner: Arc<SchedulerInner>,
}

impl ProbeScheduler {
    pub fn new(
        settings: SchedulerSettings,
        transport: Arc<dyn ProbeTransport>,
        events: mpsc::Sender<ProbeEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                settings,
                transport,
                targets: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                events,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Start probing `target` every `interval`.
    ///
    /// One probe is issued immediately, before the first tick elapses.
    pub fn start_tracking(&self, target: &str, interval: Duration) -> Result<(), ScheduleError> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut targets = self.inner.targets.lock();
            if targets.contains_key(target) {
                return Err(ScheduleError::AlreadyTracked(target.to_string()));
            }
            if targets.len() >= self.inner.settings.max_targets {
                return Err(ScheduleError::CapacityExceeded {
                    max: self.inner.settings.max_targets,
                });
            }

            let timer = spawn_timer(
                Arc::downgrade(&self.inner),
                target.to_string(),
                interval,
                generation,
            );
            targets.insert(
                target.to_string(),
                TrackedTarget {
                    interval,
                    started_at: Utc::now(),
                    generation,
                    timer,
                },
            );
        }

        tracing::info!(
            target_id = %target,
            interval_ms = interval.as_millis() as u64,
            "Started tracking"
        );

        issue_probe(&self.inner, target, generation);
        Ok(())
    }

    /// Stop probing `target`. Returns whether it was being tracked.
    ///
    /// Probes already in flight for the target are forgotten, so their
    /// responses are discarded.
    pub fn stop_tracking(&self, target: &str) -> bool {
        let mut targets = self.inner.targets.lock();
        let Some(tracked) = targets.remove(target) else {
            tracing::debug!(target_id = %target, "Stop requested for untracked target");
            return false;
        };
        tracked.timer.abort();
        self.inner.pending.lock().retain(|_, p| p.target != target);
        drop(targets);

        tracing::info!(target_id = %target, "Stopped tracking");
        true
    }

    /// Stop every tracked target. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let mut targets = self.inner.targets.lock();
        let drained: HashMap<String, TrackedTarget> = targets.drain().collect();
        for tracked in drained.values() {
            tracked.timer.abort();
        }
        self.inner
            .pending
            .lock()
            .retain(|_, p| !drained.contains_key(&p.target));
        drop(targets);

        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Stopped tracking all targets");
        }
        drained.len()
    }

    /// Correlate a response carrying its own elapsed time.
    pub fn handle_response(&self, probe_id: &ProbeId, elapsed_ms: u64) -> bool {
        self.inner.correlate(probe_id, Some(elapsed_ms))
    }

    /// Correlate a bare receipt, measuring elapsed time from the send instant.
    pub fn handle_receipt(&self, probe_id: &ProbeId) -> bool {
        self.inner.correlate(probe_id, None)
    }

    /// Evict pending probes older than the probe timeout.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    /// Run [`Self::sweep_expired`] every `every` until the scheduler is dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                inner.sweep_expired();
            }
        })
    }

    pub fn is_tracking(&self, target: &str) -> bool {
        self.inner.targets.lock().contains_key(target)
    }

    /// Tracked targets, sorted.
    pub fn active_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.inner.targets.lock().keys().cloned().collect();
        targets.sort();
        targets
    }

    pub fn active_count(&self) -> usize {
        self.inner.targets.lock().len()
    }

    pub fn max_targets(&self) -> usize {
        self.inner.settings.max_targets
    }

    pub fn tracking_info(&self, target: &str) -> Option<TrackingInfo> {
        self.inner.targets.lock().get(target).map(|t| TrackingInfo {
            target: target.to_string(),
            interval_ms: t.interval.as_millis() as u64,
            started_at: t.started_at,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn transport_ready(&self) -> bool {
        self.inner.transport.is_ready()
    }

    /// Weak handle for consumers that must not outlive a target's session.
    pub fn tracking_view(&self) -> TrackingView {
        TrackingView {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Read access to the tracking set that does not keep the scheduler alive.
#[derive(Clone)]
pub struct TrackingView {
    inner: Weak<SchedulerInner>,
}

impl TrackingView {
    /// Run `f` only while `target` is tracked under `generation`.
    ///
    /// The tracking set stays locked while `f` runs, so a concurrent stop
    /// either happens before (and `f` is skipped) or after `f` completes.
    pub fn with_session<R>(
        &self,
        target: &str,
        generation: u64,
        f: impl FnOnce() -> R,
    ) -> Option<R> {
        let inner = self.inner.upgrade()?;
        let targets = inner.targets.lock();
        match targets.get(target) {
            Some(t) if t.generation == generation => Some(f()),
            _ => None,
        }
    }
}

impl Drop for ProbeScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl SchedulerInner {
    fn sweep_expired(&self) -> usize {
        let timeout = self.settings.probe_timeout;
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, p| now.duration_since(p.sent_at) < timeout);
        let evicted = before - pending.len();
        drop(pending);

        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired pending probes");
        }
        evicted
    }

    fn emit(&self, event: ProbeEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(target_id = %event.target(), "Event queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Event queue closed, dropping event");
            }
        }
    }
}

impl CorrelateResponse for SchedulerInner {
    fn correlate(&self, probe_id: &ProbeId, elapsed_ms: Option<u64>) -> bool {
        let Some(pending) = self.pending.lock().remove(probe_id) else {
            tracing::debug!(probe_id = %probe_id, "Discarding response for unknown probe");
            return false;
        };

        let elapsed_ms =
            elapsed_ms.unwrap_or_else(|| pending.sent_at.elapsed().as_millis() as u64);
        let state = ActivityState::from_elapsed(elapsed_ms, &self.settings.thresholds);

        tracing::debug!(
            target_id = %pending.target,
            probe_id = %probe_id,
            elapsed_ms,
            state = %state,
            "Probe response correlated"
        );

        self.emit(ProbeEvent::Measurement(MeasurementEvent {
            target: pending.target,
            elapsed_ms,
            state,
            timestamp: Utc::now(),
            probe_id: *probe_id,
            generation: pending.generation,
        }));
        true
    }
}

fn spawn_timer(
    inner: Weak<SchedulerInner>,
    target: String,
    interval: Duration,
    generation: u64,
) -> JoinHandle<()> {
    let first_tick = Instant::now() + interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(first_tick, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else { break };
            if !issue_probe(&inner, &target, generation) {
                break;
            }
        }
    })
}

/// Send one probe for `target`. Returns `false` once the target is no
/// longer tracked under `generation`.
///
/// The tracking set is held locked across the send, so no probe leaves
/// after `stop_tracking` has returned. Transports must not block in
/// `send_probe`.
fn issue_probe(inner: &Arc<SchedulerInner>, target: &str, generation: u64) -> bool {
    let targets = inner.targets.lock();
    if !targets
        .get(target)
        .is_some_and(|t| t.generation == generation)
    {
        return false;
    }

    let probe_id = ProbeId::new();
    inner.pending.lock().insert(
        probe_id,
        PendingProbe {
            target: target.to_string(),
            generation,
            sent_at: Instant::now(),
        },
    );

    let request = ProbeRequest {
        target: target.to_string(),
        probe_id,
    };
    let weak = Arc::downgrade(inner);
    let handler: Weak<dyn CorrelateResponse> = weak;

    if let Err(e) = inner.transport.send_probe(&request, ResponseSink::new(handler)) {
        inner.pending.lock().remove(&probe_id);
        tracing::warn!(target_id = %target, error = %e, "Failed to send probe");
        inner.emit(ProbeEvent::Error(ProbeErrorEvent {
            target: target.to_string(),
            reason: e.to_string(),
            timestamp: Utc::now(),
        }));
    }
    drop(targets);
    true
}
