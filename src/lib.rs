//! RTT Tracker - activity inference from probe round-trip times.
//!
//! This library periodically probes a set of targets, classifies each
//! correlated round-trip time into an activity state, keeps a bounded
//! history per target and streams updates to connected observers.
//!
//! # Guarantees
//!
//! - **Immediate first sample**: starting a target issues one probe at once
//! - **Bounded memory**: histories are capped and unanswered probes expire
//! - **Isolation**: a failing target or a slow observer never affects others
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        RTT Tracker                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Scheduler  │──▶│  Transport  │──▶│  Response   │       │
//! │  │ (per-target │   │ (simulated) │   │    Sink     │       │
//! │  │   timers)   │   └─────────────┘   └──────┬──────┘       │
//! │  └─────────────┘                            │ events       │
//! │                                             ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │ Broadcaster │◀──│  Pipeline   │──▶│  History +  │       │
//! │  │ (observers) │   │             │   │ Fingerprint │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtt_tracker::{Config, SimulatedTransport, TrackingCoordinator};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::default();
//! let transport = Arc::new(SimulatedTransport::new(config.simulation.clone()));
//! transport.connect().await;
//!
//! let (coordinator, pipeline) = TrackingCoordinator::new(&config, transport)?;
//! pipeline.spawn();
//!
//! coordinator.start(Some("+15551234567"), Some(2000))?;
//! let mut observer = coordinator.broadcaster().register();
//! while let Some(json) = observer.recv().await {
//!     println!("{json}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod core;
pub mod probe;
pub mod realtime;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use coordinator::{CommandError, EventPipeline, StartOutcome, StopOutcome, TrackingCoordinator};
pub use core::{Analysis, Fingerprint, HistoryStore, Trend};
pub use probe::{
    ActivityState, ProbeEvent, ProbeScheduler, ProbeTransport, ResponseSink, SimulatedTransport,
};
pub use realtime::{EventBroadcaster, Observer, ServerMessage, StatusSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
