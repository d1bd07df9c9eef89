//! Real-time event surface.
//!
//! This module contains:
//! - The JSON messages exchanged with observers
//! - The fan-out broadcaster with per-observer bounded queues
//! - The WebSocket session (requires the `server` feature)

pub mod broadcaster;
pub mod messages;

#[cfg(feature = "server")]
pub mod socket;

// Re-export commonly used types
pub use broadcaster::{DeliveryReport, EventBroadcaster, Observer};
pub use messages::{
    ClientCommand, ErrorData, InboundFrame, RttUpdate, ServerMessage, StatusSnapshot,
};
