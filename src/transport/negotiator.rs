//! Capability negotiation
//!
//! Peer transport wins whenever both sides support it; its own congestion
//! control copes with poor networks better than the socket path can, so the
//! network quality hint is carried along but never consulted.

use serde::{Deserialize, Serialize};

/// Path of the signaling WebSocket endpoint
pub const SIGNALING_PATH: &str = "/ws/signaling";
/// Path of the socket-transport stream endpoint
pub const STREAM_PATH: &str = "/ws/stream";

/// Wire transport chosen for a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Negotiated point-to-point media transport (WebRTC-class)
    Peer,
    /// Persistent WebSocket carrying binary frame envelopes
    Socket,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Peer => write!(f, "peer"),
            TransportKind::Socket => write!(f, "socket"),
        }
    }
}

/// Coarse network quality hint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    Excellent,
    #[default]
    Good,
    Fair,
    Poor,
}

impl NetworkQuality {
    /// Classify an observed frame drop rate
    pub fn from_drop_rate(drop_rate: f64) -> Self {
        if drop_rate < 0.01 {
            NetworkQuality::Excellent
        } else if drop_rate < 0.05 {
            NetworkQuality::Good
        } else if drop_rate < 0.20 {
            NetworkQuality::Fair
        } else {
            NetworkQuality::Poor
        }
    }
}

/// Transport capabilities of one side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub supports_peer_transport: bool,
    pub supports_socket_transport: bool,
    #[serde(default)]
    pub network_quality_hint: NetworkQuality,
}

impl Capabilities {
    pub fn new(peer: bool, socket: bool, hint: NetworkQuality) -> Self {
        Self {
            supports_peer_transport: peer,
            supports_socket_transport: socket,
            network_quality_hint: hint,
        }
    }

    /// A side that can only speak the socket transport
    pub fn socket_only() -> Self {
        Self::new(false, true, NetworkQuality::default())
    }
}

/// Endpoint URIs a server hands out to viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub signaling: String,
    pub socket: String,
    #[serde(default)]
    pub ice_servers: Vec<String>,
}

impl Endpoints {
    /// Build endpoints from an HTTP(S) base URL such as `http://host:8080`
    pub fn from_base_url(base_url: &str, ice_servers: Vec<String>) -> Self {
        Self {
            signaling: websocket_url(base_url, SIGNALING_PATH),
            socket: websocket_url(base_url, STREAM_PATH),
            ice_servers,
        }
    }
}

/// What `GET /api/capabilities` returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityAdvertisement {
    pub capabilities: Capabilities,
    pub endpoints: Endpoints,
}

/// Outcome of a negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationResult {
    pub transport: TransportKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signaling_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_endpoint: Option<String>,
    #[serde(default)]
    pub ice_servers: Vec<String>,
}

impl NegotiationResult {
    /// Socket transport with only the stream endpoint filled in
    pub fn socket_only(socket_endpoint: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::Socket,
            signaling_endpoint: None,
            socket_endpoint: Some(socket_endpoint.into()),
            ice_servers: vec![],
        }
    }
}

/// Pick the transport for a capability pair
pub fn select_transport(client: &Capabilities, server: &Capabilities) -> TransportKind {
    if client.supports_peer_transport && server.supports_peer_transport {
        TransportKind::Peer
    } else {
        TransportKind::Socket
    }
}

/// Negotiate a transport. Pure; never fails.
///
/// Peer results also carry the socket endpoint: it is the fallback target
/// if peer negotiation does not complete.
pub fn negotiate(
    client: &Capabilities,
    server: &Capabilities,
    endpoints: &Endpoints,
) -> NegotiationResult {
    match select_transport(client, server) {
        TransportKind::Peer => NegotiationResult {
            transport: TransportKind::Peer,
            signaling_endpoint: Some(endpoints.signaling.clone()),
            socket_endpoint: Some(endpoints.socket.clone()),
            ice_servers: endpoints.ice_servers.clone(),
        },
        TransportKind::Socket => NegotiationResult::socket_only(endpoints.socket.clone()),
    }
}

/// Map an HTTP(S) base URL plus path to the matching WS(S) URL
pub fn websocket_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("ws://{}", base)
    };
    format!("{}{}", base, path)
}
