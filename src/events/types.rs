//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineStats;
use crate::transport::{FallbackReason, TransportKind};

/// System event enumeration
///
/// Serialized as:
/// ```json
/// {
///   "event": "session.connected",
///   "data": { "session_id": "...", "transport": "socket" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Session Events
    // ============================================================================
    /// A session was created by negotiation
    #[serde(rename = "session.created")]
    SessionCreated {
        session_id: String,
        transport: TransportKind,
    },

    /// A session reached `CONNECTED`
    #[serde(rename = "session.connected")]
    SessionConnected {
        session_id: String,
        transport: TransportKind,
    },

    /// A session was torn down and removed from the registry
    #[serde(rename = "session.disconnected")]
    SessionDisconnected {
        session_id: String,
        transport: TransportKind,
        /// Human-readable reason ("bye", "socket closed", "fallback", "idle timeout")
        reason: String,
    },

    // ============================================================================
    // Transport Events
    // ============================================================================
    /// Peer negotiation gave up and a socket session replaced it
    #[serde(rename = "transport.fallback")]
    FallbackTriggered {
        previous_session_id: String,
        session_id: String,
        reason: FallbackReason,
    },

    /// Both transports failed for a viewer
    #[serde(rename = "transport.failed")]
    TransportFailed { session_id: String, message: String },

    // ============================================================================
    // Stream Events
    // ============================================================================
    /// Producer-wide encode quality changed
    #[serde(rename = "stream.quality_changed")]
    QualityChanged { previous: u32, quality: u32 },

    /// Periodic pipeline diagnostics
    #[serde(rename = "stream.stats_update")]
    StatsUpdated {
        active_sessions: usize,
        pipeline: PipelineStats,
        quality: u32,
    },

    // ============================================================================
    // Producer Events
    // ============================================================================
    #[serde(rename = "producer.connected")]
    ProducerConnected,

    #[serde(rename = "producer.disconnected")]
    ProducerDisconnected,

    /// Generic error event
    #[serde(rename = "error")]
    Error { message: String },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session.created",
            Self::SessionConnected { .. } => "session.connected",
            Self::SessionDisconnected { .. } => "session.disconnected",
            Self::FallbackTriggered { .. } => "transport.fallback",
            Self::TransportFailed { .. } => "transport.failed",
            Self::QualityChanged { .. } => "stream.quality_changed",
            Self::StatsUpdated { .. } => "stream.stats_update",
            Self::ProducerConnected => "producer.connected",
            Self::ProducerDisconnected => "producer.disconnected",
            Self::Error { .. } => "error",
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports `*` (everything), `prefix.*` and exact names.
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches(".*");
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name() {
        let event = SystemEvent::SessionConnected {
            session_id: "abc".to_string(),
            transport: TransportKind::Socket,
        };
        assert_eq!(event.event_name(), "session.connected");

        let event = SystemEvent::QualityChanged {
            previous: 70,
            quality: 60,
        };
        assert_eq!(event.event_name(), "stream.quality_changed");
    }

    #[test]
    fn test_matches_topic() {
        let event = SystemEvent::SessionDisconnected {
            session_id: "abc".to_string(),
            transport: TransportKind::Peer,
            reason: "bye".to_string(),
        };

        assert!(event.matches_topic("*"));
        assert!(event.matches_topic("session.*"));
        assert!(event.matches_topic("session.disconnected"));
        assert!(!event.matches_topic("session.connected"));
        assert!(!event.matches_topic("stream.*"));
    }

    #[test]
    fn test_serialization() {
        let event = SystemEvent::SessionCreated {
            session_id: "abc".to_string(),
            transport: TransportKind::Peer,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "session.created");
        assert_eq!(json["data"]["transport"], "peer");
    }
}
