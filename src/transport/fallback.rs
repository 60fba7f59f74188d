//! Peer negotiation supervision
//!
//! A supervision task watches one peer session. `CONNECTED` before the
//! deadline ends it quietly. A deadline expiry or a `FAILED` report triggers
//! the single fallback: the peer side is told to tear down, the session is
//! retired, a fresh socket session is created and the viewer is pointed at
//! it. If the socket session cannot be created the viewer gets an error and
//! the supervision ends in `TransportExhausted`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::negotiator::{NegotiationResult, TransportKind};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::session::{ConnectionState, SessionRegistry, TransitionOutcome};
use crate::signaling::{ServerSignal, SignalRole, SignalingRelay};

/// Why a fallback happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No `CONNECTED` before the deadline
    Timeout,
    /// The peer engine reported `FAILED`
    PeerFailed,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackReason::Timeout => write!(f, "negotiation timed out"),
            FallbackReason::PeerFailed => write!(f, "peer connection failed"),
        }
    }
}

/// The socket session that replaced a peer session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackPlan {
    pub previous_session_id: Uuid,
    pub session_id: Uuid,
    pub result: NegotiationResult,
    pub reason: FallbackReason,
}

/// How a supervision ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisionOutcome {
    Connected,
    Cancelled,
    /// The session was torn down by someone else (bye, close)
    SessionClosed,
    FellBack(FallbackPlan),
}

/// Handle to a running supervision
pub struct SupervisionHandle {
    session_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<Result<SupervisionOutcome>>,
}

impl SupervisionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the supervision to finish
    pub async fn outcome(self) -> Result<SupervisionOutcome> {
        self.task
            .await
            .map_err(|e| AppError::Internal(format!("Supervision task failed: {}", e)))?
    }
}

/// Supervises peer negotiations and performs the fallback to socket
pub struct FallbackSupervisor {
    registry: Arc<SessionRegistry>,
    relay: Arc<SignalingRelay>,
    events: Arc<EventBus>,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl FallbackSupervisor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        relay: Arc<SignalingRelay>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            relay,
            events,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start supervising `session_id`
    ///
    /// `socket_endpoint` is where the viewer goes on fallback; `None` means
    /// the socket transport is unavailable and a fallback is terminal.
    pub fn supervise(
        self: &Arc<Self>,
        session_id: Uuid,
        timeout: Duration,
        socket_endpoint: Option<String>,
    ) -> Result<SupervisionHandle> {
        let state_rx = self
            .registry
            .watch(session_id)
            .ok_or_else(|| AppError::NotFound(format!("Session not found: {}", session_id)))?;

        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock();
            if active.contains_key(&session_id) {
                return Err(AppError::Conflict(format!(
                    "Session {} is already supervised",
                    session_id
                )));
            }
            active.insert(session_id, cancel.clone());
        }

        debug!(
            "Supervising session {} ({}ms timeout)",
            session_id,
            timeout.as_millis()
        );

        let supervisor = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let outcome = supervisor
                .run(session_id, timeout, socket_endpoint, state_rx, token)
                .await;
            supervisor.active.lock().remove(&session_id);
            outcome
        });

        Ok(SupervisionHandle {
            session_id,
            cancel,
            task,
        })
    }

    /// Cancel supervision of a session; returns whether one was running
    pub fn cancel(&self, session_id: Uuid) -> bool {
        match self.active.lock().remove(&session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    async fn run(
        &self,
        session_id: Uuid,
        timeout: Duration,
        socket_endpoint: Option<String>,
        mut state_rx: tokio::sync::watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) -> Result<SupervisionOutcome> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let reason = loop {
            let state = *state_rx.borrow_and_update();
            match state {
                ConnectionState::Connected => {
                    debug!("Session {} connected, supervision done", session_id);
                    return Ok(SupervisionOutcome::Connected);
                }
                ConnectionState::Failed => break FallbackReason::PeerFailed,
                ConnectionState::Disconnected if !self.registry.contains(session_id) => {
                    return Ok(SupervisionOutcome::SessionClosed);
                }
                ConnectionState::Disconnected | ConnectionState::Negotiating => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(SupervisionOutcome::Cancelled),
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Ok(SupervisionOutcome::SessionClosed);
                    }
                }
                _ = &mut deadline => break FallbackReason::Timeout,
            }
        };

        self.fall_back(session_id, reason, socket_endpoint).await
    }

    async fn fall_back(
        &self,
        session_id: Uuid,
        reason: FallbackReason,
        socket_endpoint: Option<String>,
    ) -> Result<SupervisionOutcome> {
        // Claim the session; CONNECTED may have won the race
        match self.registry.transition(session_id, ConnectionState::Failed) {
            Ok(TransitionOutcome::Missing) => return Ok(SupervisionOutcome::SessionClosed),
            Ok(_) => {}
            Err(AppError::InvalidTransition {
                from: ConnectionState::Connected,
                ..
            }) => return Ok(SupervisionOutcome::Connected),
            Err(e) => return Err(e),
        }

        warn!("Session {}: {}, falling back to socket", session_id, reason);

        let sinks = self.relay.detach(session_id).unwrap_or_default();
        sinks.notify(
            SignalRole::Producer,
            &ServerSignal::Bye {
                session_id,
                reason: reason.to_string(),
            },
        );

        let _ = self
            .registry
            .transition(session_id, ConnectionState::Disconnected);
        self.registry
            .remove(session_id, &format!("fallback: {}", reason));

        let replacement = match socket_endpoint {
            Some(endpoint) => self
                .registry
                .create_session(TransportKind::Socket)
                .map(|id| (id, endpoint)),
            None => Err(AppError::BadRequest(
                "socket transport is disabled".to_string(),
            )),
        };

        let (new_session_id, endpoint) = match replacement {
            Ok(replacement) => replacement,
            Err(e) => {
                let message = format!("{}; socket fallback unavailable: {}", reason, e);
                warn!("Session {}: {}", session_id, message);
                sinks.notify(
                    SignalRole::Viewer,
                    &ServerSignal::error(Some(session_id), "transport_exhausted", message.clone()),
                );
                self.events.publish(SystemEvent::TransportFailed {
                    session_id: session_id.to_string(),
                    message: message.clone(),
                });
                return Err(AppError::TransportExhausted {
                    session_id: session_id.to_string(),
                    reason: message,
                });
            }
        };

        sinks.notify(
            SignalRole::Viewer,
            &ServerSignal::Fallback {
                session_id: new_session_id,
                previous_session_id: session_id,
                socket_endpoint: endpoint.clone(),
            },
        );
        drop(sinks);

        info!(
            "Session {} fell back to socket session {}",
            session_id, new_session_id
        );
        self.events.publish(SystemEvent::FallbackTriggered {
            previous_session_id: session_id.to_string(),
            session_id: new_session_id.to_string(),
            reason,
        });

        Ok(SupervisionOutcome::FellBack(FallbackPlan {
            previous_session_id: session_id,
            session_id: new_session_id,
            result: NegotiationResult::socket_only(endpoint),
            reason,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<SessionRegistry>,
        relay: Arc<SignalingRelay>,
        supervisor: Arc<FallbackSupervisor>,
        events: Arc<EventBus>,
    }

    fn fixture(max_sessions: usize) -> Fixture {
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(SessionRegistry::new(max_sessions, events.clone()));
        let relay = Arc::new(SignalingRelay::new(registry.clone()));
        let supervisor = Arc::new(FallbackSupervisor::new(
            registry.clone(),
            relay.clone(),
            events.clone(),
        ));
        Fixture {
            registry,
            relay,
            supervisor,
            events,
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);
    const ENDPOINT: &str = "ws://host/ws/stream";

    fn peer_session(f: &Fixture) -> (Uuid, mpsc::Receiver<String>, mpsc::Receiver<String>) {
        let id = f.registry.create_session(TransportKind::Peer).unwrap();
        let (ptx, prx) = mpsc::channel(8);
        let (vtx, vrx) = mpsc::channel(8);
        f.relay.register_peer(id, SignalRole::Producer, ptx).unwrap();
        f.relay.register_peer(id, SignalRole::Viewer, vtx).unwrap();
        (id, prx, vrx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_before_deadline_no_fallback() {
        let f = fixture(4);
        let (id, _prx, _vrx) = peer_session(&f);
        let handle = f
            .supervisor
            .supervise(id, TIMEOUT, Some(ENDPOINT.to_string()))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        f.registry.transition(id, ConnectionState::Connected).unwrap();

        assert_eq!(handle.outcome().await.unwrap(), SupervisionOutcome::Connected);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.registry.get(id).unwrap().state, ConnectionState::Connected);
        assert_eq!(f.registry.count(), 1);
        assert_eq!(f.supervisor.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_once() {
        let f = fixture(4);
        let mut events = f.events.subscribe();
        let (id, mut prx, mut vrx) = peer_session(&f);
        let start = tokio::time::Instant::now();
        let handle = f
            .supervisor
            .supervise(id, TIMEOUT, Some(ENDPOINT.to_string()))
            .unwrap();

        let SupervisionOutcome::FellBack(plan) = handle.outcome().await.unwrap() else {
            panic!("expected fallback");
        };
        assert!(start.elapsed() >= TIMEOUT);
        assert!(start.elapsed() < TIMEOUT + Duration::from_secs(1));
        assert_eq!(plan.previous_session_id, id);
        assert_eq!(plan.reason, FallbackReason::Timeout);
        assert_eq!(plan.result.transport, TransportKind::Socket);

        // Old session retired, exactly one socket session in its place
        assert!(!f.registry.contains(id));
        let sessions = f.registry.list();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, plan.session_id);
        assert_eq!(sessions[0].transport, TransportKind::Socket);

        let bye: serde_json::Value = serde_json::from_str(&prx.recv().await.unwrap()).unwrap();
        assert_eq!(bye["type"], "bye");
        let fallback: serde_json::Value =
            serde_json::from_str(&vrx.recv().await.unwrap()).unwrap();
        assert_eq!(fallback["type"], "fallback");
        assert_eq!(fallback["session_id"], plan.session_id.to_string());
        assert_eq!(fallback["socket_endpoint"], ENDPOINT);
        assert!(vrx.recv().await.is_none());

        let mut fallbacks = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SystemEvent::FallbackTriggered { .. }) {
                fallbacks += 1;
            }
        }
        assert_eq!(fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_report_falls_back_immediately() {
        let f = fixture(4);
        let (id, _prx, _vrx) = peer_session(&f);
        let start = tokio::time::Instant::now();
        let handle = f
            .supervisor
            .supervise(id, TIMEOUT, Some(ENDPOINT.to_string()))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        f.relay
            .report_peer_state(id, crate::signaling::PeerState::Failed)
            .unwrap();

        let SupervisionOutcome::FellBack(plan) = handle.outcome().await.unwrap() else {
            panic!("expected fallback");
        };
        assert_eq!(plan.reason, FallbackReason::PeerFailed);
        assert!(start.elapsed() < TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_unavailable_is_terminal() {
        let f = fixture(4);
        let mut events = f.events.subscribe();
        let (id, _prx, mut vrx) = peer_session(&f);
        let handle = f.supervisor.supervise(id, TIMEOUT, None).unwrap();

        let result = handle.outcome().await;
        assert!(matches!(result, Err(AppError::TransportExhausted { .. })));
        assert_eq!(f.registry.count(), 0);

        let error: serde_json::Value = serde_json::from_str(&vrx.recv().await.unwrap()).unwrap();
        assert_eq!(error["type"], "error");
        assert_eq!(error["code"], "transport_exhausted");

        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            failed |= matches!(event, SystemEvent::TransportFailed { .. });
        }
        assert!(failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bye_ends_supervision() {
        let f = fixture(4);
        let (id, _prx, _vrx) = peer_session(&f);
        let handle = f
            .supervisor
            .supervise(id, TIMEOUT, Some(ENDPOINT.to_string()))
            .unwrap();

        f.relay.close_session(id, Some(SignalRole::Viewer), "bye");
        assert_eq!(
            handle.outcome().await.unwrap(),
            SupervisionOutcome::SessionClosed
        );
        assert_eq!(f.registry.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_duplicate() {
        let f = fixture(4);
        let (id, _prx, _vrx) = peer_session(&f);
        let handle = f
            .supervisor
            .supervise(id, TIMEOUT, Some(ENDPOINT.to_string()))
            .unwrap();
        assert!(matches!(
            f.supervisor.supervise(id, TIMEOUT, None),
            Err(AppError::Conflict(_))
        ));

        handle.cancel();
        assert_eq!(handle.outcome().await.unwrap(), SupervisionOutcome::Cancelled);
        assert!(f.registry.contains(id));
    }
}
