use serde::{Deserialize, Serialize};

/// Connection state shared by the signaling relay and the fallback supervisor
///
/// ```text
/// DISCONNECTED ──> NEGOTIATING ──> CONNECTED ──> DISCONNECTED
///                       │
///                       └────────> FAILED ─────> DISCONNECTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Negotiating = 1,
    Connected = 2,
    Failed = 3,
}

impl ConnectionState {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Negotiating,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }

    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Negotiating)
                | (Negotiating, Connected)
                | (Negotiating, Failed)
                | (Connected, Disconnected)
                | (Failed, Disconnected)
        )
    }

    /// Teardown states; transitions into them are idempotent
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Disconnected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Negotiating => write!(f, "negotiating"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    const ALL: [ConnectionState; 4] = [Disconnected, Negotiating, Connected, Failed];

    #[test]
    fn test_u8_roundtrip() {
        for state in ALL {
            assert_eq!(ConnectionState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_cannot_skip_negotiating() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Failed));
        assert!(Disconnected.can_transition_to(Negotiating));
    }

    #[test]
    fn test_only_teardown_edges_go_backwards() {
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Failed.can_transition_to(Disconnected));
        assert!(!Connected.can_transition_to(Negotiating));
        assert!(!Failed.can_transition_to(Negotiating));
        assert!(!Connected.can_transition_to(Failed));
        assert!(!Negotiating.can_transition_to(Disconnected));
    }

    #[test]
    fn test_no_self_edges() {
        for state in ALL {
            assert!(!state.can_transition_to(state));
        }
    }
}
