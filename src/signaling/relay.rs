use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::{PeerState, ServerSignal, SignalEnvelope, SignalKind, SignalRole};
use crate::error::{AppError, Result};
use crate::session::{ConnectionState, SessionRegistry};
use crate::transport::TransportKind;
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Outbound text channel of one signaling connection
pub type SignalSink = mpsc::Sender<String>;

/// Both ends of a session's signaling pairing
#[derive(Debug, Default)]
pub struct SessionSinks {
    pub producer: Option<SignalSink>,
    pub viewer: Option<SignalSink>,
}

impl SessionSinks {
    pub fn get(&self, role: SignalRole) -> Option<&SignalSink> {
        match role {
            SignalRole::Producer => self.producer.as_ref(),
            SignalRole::Viewer => self.viewer.as_ref(),
        }
    }

    fn slot(&mut self, role: SignalRole) -> &mut Option<SignalSink> {
        match role {
            SignalRole::Producer => &mut self.producer,
            SignalRole::Viewer => &mut self.viewer,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.producer.is_none() && self.viewer.is_none()
    }

    /// Queue a server message to `role` without waiting
    pub fn notify(&self, role: SignalRole, signal: &ServerSignal) -> bool {
        let Some(sink) = self.get(role) else {
            return false;
        };
        match signal.to_json() {
            Ok(json) => sink.try_send(json).is_ok(),
            Err(e) => {
                warn!("Failed to serialize signal: {}", e);
                false
            }
        }
    }
}

/// What [`SignalingRelay::forward`] did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Delivered to the opposite side
    Delivered,
    /// Opposite side not connected; dropped
    NoPeer,
    /// Opposite side's buffer is full; dropped
    Backlogged,
    /// `ready`; logged only
    Informational,
    /// `bye`; session torn down
    Closed,
    /// `connection-state` applied to the session
    StateApplied,
    /// Unknown `type`; dropped
    Unrecognized(String),
    /// Session unknown or already torn down; dropped
    UnknownSession,
    /// Not allowed from this sender; dropped
    Rejected(String),
}

/// Relay between the producer-side peer engine and viewers
pub struct SignalingRelay {
    sinks: RwLock<HashMap<Uuid, SessionSinks>>,
    registry: Arc<SessionRegistry>,
    throttler: LogThrottler,
}

impl SignalingRelay {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            sinks: RwLock::new(HashMap::new()),
            registry,
            throttler: LogThrottler::default(),
        }
    }

    /// Register one side of a peer session and move it to `NEGOTIATING`
    pub fn register_peer(&self, session_id: Uuid, role: SignalRole, sink: SignalSink) -> Result<()> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("Session not found: {}", session_id)))?;
        if session.transport != TransportKind::Peer {
            return Err(AppError::BadRequest(format!(
                "Session {} uses {} transport",
                session_id, session.transport
            )));
        }

        {
            let mut sinks = self.sinks.write();
            let slot = sinks.entry(session_id).or_default().slot(role);
            if slot.as_ref().is_some_and(|s| !s.is_closed()) {
                return Err(AppError::Conflict(format!(
                    "Session {} already has a {}",
                    session_id, role
                )));
            }
            *slot = Some(sink);
        }

        // Torn down while registering
        if !self.registry.contains(session_id) {
            self.sinks.write().remove(&session_id);
            return Err(AppError::NotFound(format!("Session not found: {}", session_id)));
        }

        match self
            .registry
            .transition(session_id, ConnectionState::Negotiating)
        {
            Ok(_) => {}
            Err(AppError::InvalidTransition { from, .. }) => {
                debug!("Session {} registered {} while {}", session_id, role, from);
            }
            Err(e) => {
                self.remove_sink(session_id, role);
                return Err(e);
            }
        }

        info!("Signaling {} registered for session {}", role, session_id);
        Ok(())
    }

    /// Route one message received from `from`
    pub fn forward(
        &self,
        session_id: Uuid,
        from: SignalRole,
        envelope: SignalEnvelope,
    ) -> ForwardOutcome {
        if !self.registry.contains(session_id) {
            warn_throttled!(
                self.throttler,
                &format!("unknown:{}", session_id),
                "Dropping {} for unknown session {}",
                envelope.kind.name(),
                session_id
            );
            return ForwardOutcome::UnknownSession;
        }
        if let Some(claimed) = envelope.session_id {
            if claimed != session_id {
                return ForwardOutcome::Rejected(format!(
                    "message addressed to session {}",
                    claimed
                ));
            }
        }
        self.registry.touch(session_id);

        match envelope.kind {
            SignalKind::Offer | SignalKind::Answer | SignalKind::IceCandidate => {
                self.deliver(session_id, from.opposite(), envelope.raw)
            }
            SignalKind::Ready => {
                info!("Signaling {} ready for session {}", from, session_id);
                ForwardOutcome::Informational
            }
            SignalKind::Bye => {
                self.close_session(session_id, Some(from), "bye");
                ForwardOutcome::Closed
            }
            SignalKind::ConnectionState(state) => {
                if from != SignalRole::Producer {
                    return ForwardOutcome::Rejected(
                        "connection-state is only accepted from the producer".to_string(),
                    );
                }
                match self.report_peer_state(session_id, state) {
                    Ok(()) => ForwardOutcome::StateApplied,
                    Err(e) => ForwardOutcome::Rejected(e.to_string()),
                }
            }
            SignalKind::Unrecognized(kind) => {
                warn!(
                    "Dropping unrecognized signaling type '{}' from {} (session {})",
                    kind, from, session_id
                );
                ForwardOutcome::Unrecognized(kind)
            }
        }
    }

    fn deliver(&self, session_id: Uuid, to: SignalRole, raw: String) -> ForwardOutcome {
        let sink = self
            .sinks
            .read()
            .get(&session_id)
            .and_then(|s| s.get(to).cloned());

        let Some(sink) = sink else {
            warn_throttled!(
                self.throttler,
                &format!("no_peer:{}:{}", session_id, to),
                "No {} connected for session {}, dropping message",
                to,
                session_id
            );
            return ForwardOutcome::NoPeer;
        };

        // Never wait on the other side: its socket loop may be waiting on ours
        match sink.try_send(raw) {
            Ok(()) => ForwardOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn_throttled!(
                    self.throttler,
                    &format!("backlog:{}:{}", session_id, to),
                    "Signaling {} for session {} is not keeping up, dropping message",
                    to,
                    session_id
                );
                ForwardOutcome::Backlogged
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Signaling {} for session {} went away", to, session_id);
                ForwardOutcome::NoPeer
            }
        }
    }

    /// Apply a connection-state change reported by the peer engine
    pub fn report_peer_state(&self, session_id: Uuid, state: PeerState) -> Result<()> {
        match state {
            PeerState::Connected => {
                self.registry
                    .transition(session_id, ConnectionState::Connected)?;
            }
            PeerState::Failed => {
                let connected = self
                    .registry
                    .get(session_id)
                    .is_some_and(|s| s.state == ConnectionState::Connected);
                if connected {
                    // Established transport lost: nothing to fall back from
                    self.close_session(session_id, None, "peer connection failed");
                } else {
                    self.registry
                        .transition(session_id, ConnectionState::Failed)?;
                }
            }
            PeerState::Disconnected => {
                self.close_session(session_id, None, "peer connection closed");
            }
        }
        Ok(())
    }

    /// Tear down a session: notify remaining sides, drop the sinks, and
    /// remove it from the registry.
    pub fn close_session(&self, session_id: Uuid, initiator: Option<SignalRole>, reason: &str) {
        let sinks = self.sinks.write().remove(&session_id);
        if let Some(sinks) = sinks {
            let bye = ServerSignal::Bye {
                session_id,
                reason: reason.to_string(),
            };
            for role in [SignalRole::Producer, SignalRole::Viewer] {
                if Some(role) != initiator {
                    sinks.notify(role, &bye);
                }
            }
        }

        // NEGOTIATING has no edge to DISCONNECTED; removal covers it
        let _ = self
            .registry
            .transition(session_id, ConnectionState::Disconnected);
        self.registry.remove(session_id, reason);
    }

    /// Remove one side's sink; the session is torn down once both are gone
    pub fn unregister(&self, session_id: Uuid, role: SignalRole) {
        let now_empty = {
            let mut sinks = self.sinks.write();
            let Some(entry) = sinks.get_mut(&session_id) else {
                return;
            };
            *entry.slot(role) = None;
            entry.is_empty()
        };

        debug!("Signaling {} unregistered from session {}", role, session_id);
        if now_empty {
            self.close_session(session_id, Some(role), "signaling closed");
        }
    }

    fn remove_sink(&self, session_id: Uuid, role: SignalRole) {
        let mut sinks = self.sinks.write();
        if let Some(entry) = sinks.get_mut(&session_id) {
            *entry.slot(role) = None;
            if entry.is_empty() {
                sinks.remove(&session_id);
            }
        }
    }

    /// Take both sinks of a session out of the relay
    pub fn detach(&self, session_id: Uuid) -> Option<SessionSinks> {
        self.sinks.write().remove(&session_id)
    }

    pub fn is_registered(&self, session_id: Uuid, role: SignalRole) -> bool {
        self.sinks
            .read()
            .get(&session_id)
            .is_some_and(|s| s.get(role).is_some())
    }

    /// Sessions with at least one registered side
    pub fn session_count(&self) -> usize {
        self.sinks.read().len()
    }
}
