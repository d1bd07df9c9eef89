//! Probe transport seam.
//!
//! The scheduler only needs "send a probe, eventually hear back (or not)".
//! A [`ProbeTransport`] transmits the probe and reports the response through
//! the [`ResponseSink`] it is handed; a response that never arrives is simply
//! never reported.

use crate::config::{LatencyPattern, SimulationConfig};
use crate::probe::types::ProbeId;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;
use thiserror::Error;

/// A probe handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub target: String,
    pub probe_id: ProbeId,
}

/// Transport-level failures. These never stop a target's timer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotReady,
    #[error("send failed: {0}")]
    Send(String),
}

/// Delivers probes to targets.
pub trait ProbeTransport: Send + Sync + 'static {
    /// Whether the transport can currently send.
    fn is_ready(&self) -> bool;

    /// Transmit a probe without waiting for its response.
    ///
    /// Called with the scheduler's tracking set locked; must not block.
    fn send_probe(&self, request: &ProbeRequest, responses: ResponseSink)
        -> Result<(), TransportError>;

    /// Stop accepting probes.
    fn disconnect(&self) {}
}

/// Receiving side of response correlation, implemented by the scheduler.
pub(crate) trait CorrelateResponse: Send + Sync {
    /// `None` measures elapsed time from the recorded send instant.
    fn correlate(&self, probe_id: &ProbeId, elapsed_ms: Option<u64>) -> bool;
}

/// Handle a transport uses to report probe responses.
///
/// Holds only a weak reference, so an outstanding sink never keeps a
/// dropped scheduler alive.
#[derive(Clone)]
pub struct ResponseSink {
    handler: Weak<dyn CorrelateResponse>,
}

impl ResponseSink {
    pub(crate) fn new(handler: Weak<dyn CorrelateResponse>) -> Self {
        Self { handler }
    }

    /// Report a response with a transport-measured elapsed time.
    ///
    /// Returns `false` when the probe is unknown, expired or already answered.
    pub fn deliver(&self, probe_id: &ProbeId, elapsed_ms: u64) -> bool {
        self.handler
            .upgrade()
            .is_some_and(|h| h.correlate(probe_id, Some(elapsed_ms)))
    }

    /// Report a bare receipt; elapsed time is measured from the send instant.
    pub fn deliver_receipt(&self, probe_id: &ProbeId) -> bool {
        self.handler
            .upgrade()
            .is_some_and(|h| h.correlate(probe_id, None))
    }
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSink")
            .field("live", &(self.handler.strong_count() > 0))
            .finish()
    }
}

/// Stand-in transport producing realistic latencies without a network.
pub struct SimulatedTransport {
    config: SimulationConfig,
    ready: AtomicBool,
}

impl SimulatedTransport {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            ready: AtomicBool::new(false),
        }
    }

    /// Become ready after the configured connect delay.
    pub async fn connect(&self) {
        tracing::info!(
            delay_ms = self.config.connect_delay_ms,
            "Connecting simulated probe transport"
        );
        tokio::time::sleep(Duration::from_millis(self.config.connect_delay_ms)).await;
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!("Probe transport ready");
    }

    /// Draw a latency from the weighted patterns.
    pub fn sample_latency<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        pick_latency(&self.config.patterns, rng)
    }
}

/// Latency used when no pattern applies.
const FALLBACK_LATENCY_MS: u64 = 1000;

fn pick_latency<R: Rng + ?Sized>(patterns: &[LatencyPattern], rng: &mut R) -> u64 {
    let total: f64 = patterns.iter().map(|p| p.weight.max(0.0)).sum();
    if total <= 0.0 {
        return FALLBACK_LATENCY_MS;
    }

    let roll = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for pattern in patterns {
        cumulative += pattern.weight.max(0.0);
        if roll <= cumulative {
            let (lo, hi) = if pattern.min_ms <= pattern.max_ms {
                (pattern.min_ms, pattern.max_ms)
            } else {
                (pattern.max_ms, pattern.min_ms)
            };
            return rng.gen_range(lo..=hi);
        }
    }

    FALLBACK_LATENCY_MS
}

impl ProbeTransport for SimulatedTransport {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn send_probe(
        &self,
        request: &ProbeRequest,
        responses: ResponseSink,
    ) -> Result<(), TransportError> {
        if !self.is_ready() {
            return Err(TransportError::NotReady);
        }

        let (lost, latency) = {
            let mut rng = rand::thread_rng();
            let lost = rng.gen::<f64>() < self.config.loss_rate;
            (lost, self.sample_latency(&mut rng))
        };

        if lost {
            tracing::debug!(
                target_id = %request.target,
                probe_id = %request.probe_id,
                "Simulated probe lost"
            );
            return Ok(());
        }

        let probe_id = request.probe_id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(latency)).await;
            responses.deliver(&probe_id, latency);
        });

        Ok(())
    }

    fn disconnect(&self) {
        self.ready.store(false, Ordering::SeqCst);
        tracing::info!("Probe transport disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_latency_stays_in_pattern_ranges() {
        let transport = SimulatedTransport::new(SimulationConfig::default());
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let ms = transport.sample_latency(&mut rng);
            let in_range = (200..=500).contains(&ms)
                || (800..=1200).contains(&ms)
                || (1500..=2500).contains(&ms)
                || (3000..=5000).contains(&ms);
            assert!(in_range, "latency {ms} outside every pattern");
        }
    }

    #[test]
    fn test_single_pattern_is_exact() {
        let patterns = vec![LatencyPattern::new(1.0, 250, 250)];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pick_latency(&patterns, &mut rng), 250);
    }

    #[test]
    fn test_no_patterns_falls_back() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pick_latency(&[], &mut rng), FALLBACK_LATENCY_MS);
    }

    #[tokio::test]
    async fn test_not_ready_until_connected() {
        let transport = SimulatedTransport::new(SimulationConfig {
            connect_delay_ms: 0,
            ..SimulationConfig::default()
        });
        assert!(!transport.is_ready());

        let sink = ResponseSink::new(Weak::<NullHandler>::new());
        let request = ProbeRequest {
            target: "15551234567".into(),
            probe_id: ProbeId::new(),
        };
        assert_eq!(
            transport.send_probe(&request, sink.clone()),
            Err(TransportError::NotReady)
        );

        transport.connect().await;
        assert!(transport.is_ready());
        assert!(transport.send_probe(&request, sink).is_ok());

        transport.disconnect();
        assert!(!transport.is_ready());
    }

    #[test]
    fn test_sink_without_scheduler_reports_miss() {
        let sink = ResponseSink::new(Weak::<NullHandler>::new());
        assert!(!sink.deliver(&ProbeId::new(), 10));
        assert!(!sink.deliver_receipt(&ProbeId::new()));
    }

    struct NullHandler;

    impl CorrelateResponse for NullHandler {
        fn correlate(&self, _probe_id: &ProbeId, _elapsed_ms: Option<u64>) -> bool {
            true
        }
    }
}
