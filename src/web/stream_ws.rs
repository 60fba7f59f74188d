//! Socket transport endpoint for viewers
//!
//! `GET /ws/stream?session_id=<uuid>` carries binary frame envelopes out and
//! JSON input envelopes in. The connection owns its pipeline subscription
//! and its session: both are released when the socket closes.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::producer::CaptureControl;
use crate::protocol::{decode_client_message, ClientMessage, Inbound, ServerMessage};
use crate::session::ConnectionState;
use crate::state::AppState;
use crate::transport::TransportKind;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub session_id: Uuid,
}

/// WebSocket upgrade handler for `/ws/stream`
pub async fn stream_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Response> {
    let session = state.sessions.get(query.session_id).ok_or_else(|| {
        AppError::NotFound(format!("Session not found: {}", query.session_id))
    })?;
    if session.transport != TransportKind::Socket {
        return Err(AppError::BadRequest(format!(
            "Session {} uses {} transport",
            session.session_id, session.transport
        )));
    }
    if session.state != ConnectionState::Disconnected {
        return Err(AppError::Conflict(format!(
            "Session {} is already {}",
            session.session_id, session.state
        )));
    }

    let session_id = query.session_id;
    Ok(ws.on_upgrade(move |socket| handle_stream_socket(socket, state, session_id)))
}

/// Walk a fresh socket session up to `CONNECTED`
fn connect_session(state: &AppState, session_id: Uuid) -> Result<()> {
    state
        .sessions
        .transition(session_id, ConnectionState::Negotiating)?;
    state
        .sessions
        .transition(session_id, ConnectionState::Connected)?;
    Ok(())
}

async fn handle_stream_socket(socket: WebSocket, state: Arc<AppState>, session_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    if let Err(e) = connect_session(&state, session_id) {
        warn!("Stream session {} could not connect: {}", session_id, e);
        if let Ok(json) = ServerMessage::error(e.to_string()).to_json() {
            let _ = sender.send(Message::Text(json)).await;
        }
        let _ = sender.close().await;
        return;
    }

    let Some(mut session_state) = state.sessions.watch(session_id) else {
        let _ = sender.close().await;
        return;
    };
    let mut subscription = state.pipeline.subscribe(Some(session_id));
    info!("Stream viewer connected (session {})", session_id);

    let mut greeting = vec![ServerMessage::Connected { session_id }];
    if let Some(screen) = state.producer.screen_dimensions() {
        greeting.push(ServerMessage::ScreenInfo {
            width: screen.width,
            height: screen.height,
            scale_factor: screen.scale_factor,
        });
    }
    let mut open = true;
    for message in greeting {
        if let Ok(json) = message.to_json() {
            if sender.send(Message::Text(json)).await.is_err() {
                open = false;
                break;
            }
        }
    }

    let mut shutdown = state.shutdown_signal();
    let mut heartbeat_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut reason = "socket closed";

    while open {
        tokio::select! {
            frame = subscription.recv() => {
                match frame {
                    Some(frame) => {
                        if sender.send(Message::Binary(frame.to_vec())).await.is_err() {
                            debug!("Stream send failed for session {}", session_id);
                            break;
                        }
                    }
                    None => {
                        info!("Stream viewer {} fell behind, closing", session_id);
                        reason = "viewer too slow";
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_viewer_message(&state, session_id, &text).await {
                            if let Ok(json) = reply.to_json() {
                                if sender.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!("Ignoring {} byte binary message from viewer {}", data.len(), session_id);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("Stream receive error for session {}: {}", session_id, e);
                        break;
                    }
                    _ => {}
                }
            }

            changed = session_state.changed() => {
                if changed.is_err() || *session_state.borrow() == ConnectionState::Disconnected {
                    info!("Stream session {} closed by server", session_id);
                    reason = "closed by server";
                    break;
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }

            _ = shutdown.recv() => {
                reason = "server shutdown";
                break;
            }
        }
    }

    drop(subscription);
    let _ = sender.close().await;

    let _ = state
        .sessions
        .transition(session_id, ConnectionState::Disconnected);
    state.sessions.remove(session_id, reason);
    state.quality.forget(&session_id);
    info!("Stream viewer disconnected (session {}, {})", session_id, reason);
}

/// Handle one text message from a viewer; returns the reply, if any
async fn handle_viewer_message(
    state: &AppState,
    session_id: Uuid,
    text: &str,
) -> Option<ServerMessage> {
    state.sessions.touch(session_id);

    let message = match decode_client_message(text) {
        Ok(Inbound::Message(message)) => message,
        Ok(Inbound::Unrecognized(kind)) => {
            debug!("Ignoring '{}' message from viewer {}", kind, session_id);
            return None;
        }
        Err(e) => {
            warn!("Dropping malformed message from viewer {}: {}", session_id, e);
            return Some(ServerMessage::error(e.to_string()));
        }
    };

    match message {
        ClientMessage::Ping { timestamp } => Some(ServerMessage::Pong { timestamp }),
        ClientMessage::Report(report) => {
            state.quality.on_report(session_id, report);
            None
        }
        input => {
            let command = input.into_input_command()?;
            let (width, height) = state
                .producer
                .screen_dimensions()
                // Capture pixels; the producer applies scale_factor
                .map(|s| (s.width, s.height))
                .unwrap_or((0, 0));
            state.input.route(&command, width, height).await;
            None
        }
    }
}
