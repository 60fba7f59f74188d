//! Signaling channel for peer-transport sessions
//!
//! `GET /ws/signaling?session_id=<uuid>&role=producer|viewer`. Each side
//! registers a sink with the relay; text envelopes are routed to the other
//! side. The first registration of a session, from either side, starts
//! fallback supervision.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handlers::request_host;
use crate::error::{AppError, Result};
use crate::signaling::{ForwardOutcome, ServerSignal, SignalEnvelope, SignalRole};
use crate::state::AppState;
use crate::transport::{SupervisionHandle, SupervisionOutcome};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Outbound signaling messages buffered per side
const SINK_CAPACITY: usize = 32;

#[derive(Debug, Deserialize)]
pub struct SignalingQuery {
    pub session_id: Uuid,
    pub role: SignalRole,
}

/// WebSocket upgrade handler for `/ws/signaling`
pub async fn signaling_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignalingQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let SignalingQuery { session_id, role } = query;

    let (outbound, supervision) =
        register_signaling(&state, session_id, role, request_host(&headers))?;
    if let Some(handle) = supervision {
        tokio::spawn(log_supervision_outcome(handle));
    }

    Ok(ws.on_upgrade(move |socket| {
        handle_signaling_socket(socket, state, session_id, role, outbound)
    }))
}

/// Register one side with the relay
///
/// Negotiation begins with the first side to register, whichever role it
/// is, so that registration starts the fallback timer. Later registrations
/// find the session already supervised and get no handle.
fn register_signaling(
    state: &Arc<AppState>,
    session_id: Uuid,
    role: SignalRole,
    host: Option<&str>,
) -> Result<(mpsc::Receiver<String>, Option<SupervisionHandle>)> {
    let (tx, rx) = mpsc::channel(SINK_CAPACITY);
    state.relay.register_peer(session_id, role, tx)?;

    let supervision = match state.supervisor.supervise(
        session_id,
        state.fallback_timeout(),
        state.socket_endpoint(host),
    ) {
        Ok(handle) => Some(handle),
        Err(AppError::Conflict(_)) => {
            debug!("Session {} is already supervised", session_id);
            None
        }
        Err(e) => {
            warn!("Failed to supervise session {}: {}", session_id, e);
            None
        }
    };
    Ok((rx, supervision))
}

async fn log_supervision_outcome(handle: SupervisionHandle) {
    let session_id = handle.session_id();
    match handle.outcome().await {
        Ok(SupervisionOutcome::FellBack(plan)) => info!(
            "Session {} fell back to socket session {} ({})",
            plan.previous_session_id, plan.session_id, plan.reason
        ),
        Ok(outcome) => debug!("Supervision of session {} ended: {:?}", session_id, outcome),
        Err(e) => warn!("Session {} failed: {}", session_id, e),
    }
}

async fn handle_signaling_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: Uuid,
    role: SignalRole,
    mut outbound: mpsc::Receiver<String>,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut shutdown = state.shutdown_signal();
    let mut heartbeat_interval = tokio::time::interval(HEARTBEAT_INTERVAL);

    info!("Signaling {} connected (session {})", role, session_id);

    loop {
        tokio::select! {
            message = outbound.recv() => {
                match message {
                    Some(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    // The relay dropped our sink: session closed or fell back
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_signal(&state, session_id, role, text) {
                            if let Ok(json) = reply.to_json() {
                                if sender.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("Signaling receive error for session {}: {}", session_id, e);
                        break;
                    }
                    _ => {}
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }

            _ = shutdown.recv() => break,
        }
    }

    let _ = sender.close().await;
    state.relay.unregister(session_id, role);
    info!("Signaling {} disconnected (session {})", role, session_id);
}

/// Route one inbound envelope; returns an error envelope for the sender when
/// the message could not be handled
fn handle_signal(
    state: &AppState,
    session_id: Uuid,
    role: SignalRole,
    text: String,
) -> Option<ServerSignal> {
    let envelope = match SignalEnvelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Malformed signaling message from {} (session {}): {}", role, session_id, e);
            return Some(ServerSignal::error(Some(session_id), "invalid_message", e.to_string()));
        }
    };

    match state.relay.forward(session_id, role, envelope) {
        ForwardOutcome::Unrecognized(kind) => Some(ServerSignal::error(
            Some(session_id),
            "unknown_type",
            format!("Unknown message type: {}", kind),
        )),
        ForwardOutcome::Rejected(reason) => {
            Some(ServerSignal::error(Some(session_id), "rejected", reason))
        }
        ForwardOutcome::UnknownSession => Some(ServerSignal::error(
            Some(session_id),
            "unknown_session",
            format!("Session not found: {}", session_id),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::transport::TransportKind;
    use tempfile::tempdir;
    use tokio::sync::broadcast;

    async fn state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = ConfigStore::new(&dir.path().join("test.db")).await.unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);
        (AppState::new(config, shutdown_tx), dir)
    }

    fn error_code(signal: Option<ServerSignal>) -> Option<String> {
        match signal {
            Some(ServerSignal::Error { code, .. }) => Some(code),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_offer_reaches_other_side() {
        let (state, _dir) = state().await;
        let id = state.sessions.create_session(TransportKind::Peer).unwrap();
        let (producer_tx, mut producer_rx) = mpsc::channel(4);
        let (viewer_tx, _viewer_rx) = mpsc::channel(4);
        state
            .relay
            .register_peer(id, SignalRole::Producer, producer_tx)
            .unwrap();
        state
            .relay
            .register_peer(id, SignalRole::Viewer, viewer_tx)
            .unwrap();

        let offer = r#"{"type":"offer","sdp":"v=0"}"#.to_string();
        let reply = handle_signal(&state, id, SignalRole::Viewer, offer.clone());
        assert!(reply.is_none());
        assert_eq!(producer_rx.recv().await.unwrap(), offer);
    }

    #[tokio::test]
    async fn test_errors_reported_to_sender() {
        let (state, _dir) = state().await;
        let id = state.sessions.create_session(TransportKind::Peer).unwrap();

        let reply = handle_signal(&state, id, SignalRole::Viewer, "not json".to_string());
        assert_eq!(error_code(reply).as_deref(), Some("invalid_message"));

        let reply = handle_signal(
            &state,
            id,
            SignalRole::Viewer,
            r#"{"type":"renegotiate"}"#.to_string(),
        );
        assert_eq!(error_code(reply).as_deref(), Some("unknown_type"));

        let reply = handle_signal(
            &state,
            Uuid::new_v4(),
            SignalRole::Viewer,
            r#"{"type":"ready"}"#.to_string(),
        );
        assert_eq!(error_code(reply).as_deref(), Some("unknown_session"));
    }

    #[tokio::test]
    async fn test_first_registration_of_either_role_is_supervised() {
        let (state, _dir) = state().await;
        let id = state.sessions.create_session(TransportKind::Peer).unwrap();

        let (_producer_rx, supervision) =
            register_signaling(&state, id, SignalRole::Producer, None).unwrap();
        assert!(supervision.is_some());

        let (_viewer_rx, supervision) =
            register_signaling(&state, id, SignalRole::Viewer, None).unwrap();
        assert!(supervision.is_none());
        assert_eq!(state.supervisor.active_count(), 1);
    }

    #[tokio::test]
    async fn test_producer_alone_falls_back_on_timeout() {
        let (state, _dir) = state().await;
        let id = state.sessions.create_session(TransportKind::Peer).unwrap();
        tokio::time::pause();

        let (mut producer_rx, supervision) =
            register_signaling(&state, id, SignalRole::Producer, Some("10.0.0.5:8080")).unwrap();
        assert_eq!(
            state.sessions.get(id).unwrap().state,
            crate::session::ConnectionState::Negotiating
        );

        // The viewer never joins
        let outcome = supervision.unwrap().outcome().await.unwrap();
        let SupervisionOutcome::FellBack(plan) = outcome else {
            panic!("expected a fallback, got {:?}", outcome);
        };
        assert_eq!(plan.previous_session_id, id);
        assert!(!state.sessions.contains(id));
        assert_eq!(state.supervisor.active_count(), 0);

        let bye: serde_json::Value =
            serde_json::from_str(&producer_rx.recv().await.unwrap()).unwrap();
        assert_eq!(bye["type"], "bye");
    }
}
