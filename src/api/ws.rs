//! Dashboard websocket: streaming, signal-change acks and accident notifications.

use crate::api::GatewayState;
use crate::api::handlers::timestamp_or_epoch;
use crate::state::{AccidentNotice, EncodedFrame, Observation, SharedObservation, SignalStatus};
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Serialize;
use serde_json::{Value, json};
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    StartStream,
    StopStream,
    SignalChange {
        intersection_id: Value,
        signal_id: Value,
    },
}

#[derive(Debug, Serialize)]
struct StateUpdate<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    observation: &'a Observation,
    signal: Option<&'a SignalStatus>,
    timestamp: String,
}

/// Decode one text frame from a dashboard client.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, String> {
    let value: Value = serde_json::from_str(text).map_err(|err| format!("invalid JSON: {err}"))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing message type".to_string())?;
    match kind {
        "start_stream" | "start_video" => Ok(ClientMessage::StartStream),
        "stop_stream" | "stop_video" => Ok(ClientMessage::StopStream),
        "signal_change" => {
            let data = value.get("data").unwrap_or(&value);
            Ok(ClientMessage::SignalChange {
                intersection_id: data.get("intersectionId").cloned().unwrap_or(Value::Null),
                signal_id: data.get("signalId").cloned().unwrap_or(Value::Null),
            })
        }
        other => Err(format!("unknown message type: {other}")),
    }
}

pub fn reply_for(message: &ClientMessage) -> Value {
    match message {
        ClientMessage::StartStream => json!({"status": "streaming started"}),
        ClientMessage::StopStream => json!({"status": "streaming stopped"}),
        ClientMessage::SignalChange {
            intersection_id,
            signal_id,
        } => json!({
            "type": "signal_update_confirmation",
            "status": "success",
            "intersectionId": intersection_id,
            "signalId": signal_id,
        }),
    }
}

pub fn error_message(message: &str) -> Value {
    json!({"type": "error", "message": message})
}

pub fn notification(notice: &AccidentNotice) -> Value {
    json!({
        "type": "notification",
        "message": format!("Accident detected, record {}", notice.document_id),
        "document_id": notice.document_id,
        "severity": notice.severity,
        "real": notice.real,
    })
}

pub fn video_frame(frame: &str) -> Value {
    json!({"type": "video_frame", "frame": frame})
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> bool {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .is_ok()
}

fn state_update(
    observation: &SharedObservation,
    signals: &watch::Receiver<Option<SignalStatus>>,
    now: SystemTime,
) -> Option<Value> {
    let observation = match observation.read() {
        Ok(observation) => observation,
        Err(err) => {
            warn!(error = %err, "Observation unavailable for stream");
            return None;
        }
    };
    let signal = signals.borrow().clone();
    let update = StateUpdate {
        kind: "state",
        observation: &observation,
        signal: signal.as_ref(),
        timestamp: timestamp_or_epoch(now),
    };
    serde_json::to_value(&update).ok()
}

/// Latest frame as a `video_frame` message, marking it seen.
fn frame_message(frames: &mut watch::Receiver<Option<EncodedFrame>>) -> Option<Value> {
    frames
        .borrow_and_update()
        .as_ref()
        .map(|frame| video_frame(&frame.data))
}

fn notification_message(accidents: &mut watch::Receiver<Option<AccidentNotice>>) -> Option<Value> {
    accidents.borrow_and_update().as_ref().map(notification)
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let (signals, mut frames, mut accidents) = match state.app.read() {
        Ok(guard) => (
            guard.subscribe_signal(),
            guard.subscribe_frames(),
            guard.subscribe_accidents(),
        ),
        Err(_) => {
            warn!("State lock poisoned, closing websocket");
            return;
        }
    };
    accidents.mark_unchanged();
    let mut ticker = interval(state.frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut streaming = false;
    info!("Dashboard client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        debug!(error = %err, "Websocket receive failed");
                        break;
                    }
                };
                let reply = match parse_client_message(text.as_str()) {
                    Ok(message) => {
                        match &message {
                            ClientMessage::StartStream => streaming = true,
                            ClientMessage::StopStream => streaming = false,
                            ClientMessage::SignalChange { intersection_id, signal_id } => {
                                info!(%intersection_id, %signal_id, "Signal change requested by dashboard");
                            }
                        }
                        reply_for(&message)
                    }
                    Err(err) => {
                        warn!(error = %err, "Rejected dashboard message");
                        error_message(&err)
                    }
                };
                if !send_json(&mut socket, &reply).await {
                    break;
                }
            }
            _ = ticker.tick(), if streaming => {
                if let Some(update) = state_update(&state.observation, &signals, SystemTime::now())
                    && !send_json(&mut socket, &update).await
                {
                    break;
                }
            }
            changed = frames.changed(), if streaming => {
                if changed.is_err() {
                    break;
                }
                if let Some(frame) = frame_message(&mut frames)
                    && !send_json(&mut socket, &frame).await
                {
                    break;
                }
            }
            changed = accidents.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(message) = notification_message(&mut accidents)
                    && !send_json(&mut socket, &message).await
                {
                    break;
                }
            }
        }
    }
    info!("Dashboard client disconnected");
}
