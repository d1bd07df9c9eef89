//! Probing layer.
//!
//! This module contains:
//! - Activity-state classification and the events the scheduler emits
//! - The transport seam and a simulated transport
//! - The per-target scheduler that issues and correlates probes

pub mod scheduler;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use scheduler::{ProbeScheduler, ScheduleError, SchedulerSettings, TrackingInfo, TrackingView};
pub use transport::{ProbeRequest, ProbeTransport, ResponseSink, SimulatedTransport, TransportError};
pub use types::{ActivityState, MeasurementEvent, ProbeErrorEvent, ProbeEvent, ProbeId};
