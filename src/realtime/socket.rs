//! WebSocket session for one observer.
//!
//! A session greets the observer, forwards every broadcast, emits a
//! heartbeat on a fixed cadence and answers `ping` / `get-status` commands.
//! Inbound frames that are not JSON get an `error` reply; JSON with an
//! unknown `type` is logged and ignored.

use crate::coordinator::TrackingCoordinator;
use crate::realtime::messages::{ClientCommand, InboundFrame, ServerMessage};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Reply owed to an inbound text frame, if any.
pub fn handle_client_text(text: &str, coordinator: &TrackingCoordinator) -> Option<ServerMessage> {
    match InboundFrame::parse(text) {
        InboundFrame::Command(ClientCommand::Ping) => Some(ServerMessage::pong()),
        InboundFrame::Command(ClientCommand::GetStatus) => {
            Some(ServerMessage::status(coordinator.status()))
        }
        InboundFrame::Unknown(kind) => {
            tracing::warn!(kind = ?kind, "Unknown message type from observer");
            None
        }
        InboundFrame::Malformed => Some(ServerMessage::invalid_format()),
    }
}

/// Drive an upgraded socket until either side closes.
pub async fn run_session(socket: WebSocket, coordinator: Arc<TrackingCoordinator>, heartbeat: Duration) {
    let (mut sender, mut receiver) = socket.split();
    let mut observer = coordinator.broadcaster().register();
    let observer_id = observer.id();
    tracing::info!(observer = %observer_id, "Observer connected");

    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    if send(&mut sender, &ServerMessage::connected()).await.is_ok() {
        loop {
            tokio::select! {
                outbound = observer.recv() => {
                    let Some(payload) = outbound else { break };
                    if sender.send(Message::Text(payload.to_string())).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if send(&mut sender, &ServerMessage::heartbeat()).await.is_err() {
                        break;
                    }
                }
                inbound = receiver.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_text(&text, &coordinator) {
                            if send(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(observer = %observer_id, error = %e, "WebSocket receive error");
                        break;
                    }
                },
            }
        }
    }

    coordinator.broadcaster().unregister(observer_id);
    let _ = sender.close().await;
    tracing::info!(observer = %observer_id, "Observer disconnected");
}

async fn send(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    match message.to_json() {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize message");
            Ok(())
        }
    }
}
