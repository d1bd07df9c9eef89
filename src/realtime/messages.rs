//! Wire messages exchanged with real-time observers.
//!
//! Every frame is a JSON object with a kebab-case `type` tag.

use crate::core::Analysis;
use crate::probe::{ActivityState, MeasurementEvent, ProbeErrorEvent, ProbeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Greeting sent when an observer attaches.
pub const CONNECTED_MESSAGE: &str = "Connected to RTT tracking server";

/// Reply to an inbound frame that is not valid JSON.
pub const INVALID_FORMAT_MESSAGE: &str = "Invalid message format";

/// Messages pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Connected {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    RttUpdate {
        data: RttUpdate,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<ErrorData>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Status {
        data: StatusSnapshot,
    },
}

impl ServerMessage {
    pub fn connected() -> Self {
        Self::Connected {
            message: CONNECTED_MESSAGE.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    /// Measurement update carrying the analysis computed after it was stored.
    pub fn rtt_update(event: &MeasurementEvent, analysis: Option<Analysis>) -> Self {
        Self::RttUpdate {
            data: RttUpdate {
                target: event.target.clone(),
                elapsed_ms: event.elapsed_ms,
                state: event.state,
                timestamp: event.timestamp,
                probe_id: event.probe_id,
                analysis,
            },
        }
    }

    /// A per-target probe failure.
    pub fn probe_error(event: &ProbeErrorEvent) -> Self {
        Self::Error {
            data: Some(ErrorData {
                target: event.target.clone(),
                reason: event.reason.clone(),
            }),
            message: None,
            timestamp: event.timestamp,
        }
    }

    /// A protocol-level error addressed to a single observer.
    pub fn invalid_format() -> Self {
        Self::Error {
            data: None,
            message: Some(INVALID_FORMAT_MESSAGE.to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn status(snapshot: StatusSnapshot) -> Self {
        Self::Status { data: snapshot }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RttUpdate {
    pub target: String,
    pub elapsed_ms: u64,
    pub state: ActivityState,
    pub timestamp: DateTime<Utc>,
    pub probe_id: ProbeId,
    pub analysis: Option<Analysis>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub target: String,
    pub reason: String,
}

/// Tracking status as reported to observers and the HTTP status route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub connected: bool,
    pub active_targets: Vec<String>,
    pub count: usize,
    pub max_targets: usize,
}

/// Commands an observer may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientCommand {
    Ping,
    GetStatus,
}

/// Outcome of parsing one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Command(ClientCommand),
    /// Valid JSON whose `type` is not a known command
    Unknown(Option<String>),
    Malformed,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Self {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return Self::Malformed,
        };
        match serde_json::from_value::<ClientCommand>(value.clone()) {
            Ok(cmd) => Self::Command(cmd),
            Err(_) => Self::Unknown(
                value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .map(str::to_string),
            ),
        }
    }
}
