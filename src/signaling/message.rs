use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::protocol::WireError;

/// Side of a signaling pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalRole {
    Producer,
    Viewer,
}

impl SignalRole {
    pub fn opposite(self) -> Self {
        match self {
            SignalRole::Producer => SignalRole::Viewer,
            SignalRole::Viewer => SignalRole::Producer,
        }
    }
}

impl fmt::Display for SignalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalRole::Producer => write!(f, "producer"),
            SignalRole::Viewer => write!(f, "viewer"),
        }
    }
}

/// Peer engine connection state carried by `connection-state`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connected,
    Failed,
    Disconnected,
}

impl PeerState {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "connected" => Some(PeerState::Connected),
            "failed" => Some(PeerState::Failed),
            "disconnected" | "closed" => Some(PeerState::Disconnected),
            _ => None,
        }
    }
}

/// Routing-relevant part of a signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    Ready,
    Bye,
    ConnectionState(PeerState),
    Unrecognized(String),
}

impl SignalKind {
    pub fn name(&self) -> &str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
            SignalKind::Ready => "ready",
            SignalKind::Bye => "bye",
            SignalKind::ConnectionState(_) => "connection-state",
            SignalKind::Unrecognized(kind) => kind,
        }
    }
}

/// A parsed inbound signaling message; `raw` is forwarded verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEnvelope {
    pub kind: SignalKind,
    pub session_id: Option<Uuid>,
    pub raw: String,
}

impl SignalEnvelope {
    pub fn parse(raw: impl Into<String>) -> Result<Self, WireError> {
        let raw = raw.into();
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| WireError::InvalidJson(e.to_string()))?;

        let type_name = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(WireError::MissingType)?;

        let kind = match type_name {
            "offer" => SignalKind::Offer,
            "answer" => SignalKind::Answer,
            "ice-candidate" => SignalKind::IceCandidate,
            "ready" => SignalKind::Ready,
            "bye" => SignalKind::Bye,
            "connection-state" => {
                let state = value
                    .get("state")
                    .and_then(|s| s.as_str())
                    .and_then(PeerState::parse)
                    .ok_or_else(|| WireError::InvalidMessage {
                        kind: type_name.to_string(),
                        reason: "`state` must be connected, failed or disconnected".to_string(),
                    })?;
                SignalKind::ConnectionState(state)
            }
            other => SignalKind::Unrecognized(other.to_string()),
        };

        let session_id = match value.get("session_id") {
            None | Some(serde_json::Value::Null) => None,
            Some(id) => Some(
                id.as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| WireError::InvalidMessage {
                        kind: type_name.to_string(),
                        reason: "`session_id` is not a UUID".to_string(),
                    })?,
            ),
        };

        Ok(Self {
            kind,
            session_id,
            raw,
        })
    }
}

/// Server-originated signaling message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerSignal {
    /// The previous message was dropped
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<Uuid>,
        code: String,
        message: String,
    },
    /// Peer negotiation was abandoned; continue on the socket transport
    Fallback {
        session_id: Uuid,
        previous_session_id: Uuid,
        socket_endpoint: String,
    },
    /// The other side or the server ended the session
    Bye { session_id: Uuid, reason: String },
}

impl ServerSignal {
    pub fn error(session_id: Option<Uuid>, code: &str, message: impl Into<String>) -> Self {
        ServerSignal::Error {
            session_id,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
