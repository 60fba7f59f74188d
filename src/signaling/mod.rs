//! Signaling relay
//!
//! Routes offer/answer/ICE envelopes between the producer-side peer engine
//! and a viewer, one pairing per session. The relay reads only the `type`
//! field (and `state` of `connection-state`); SDP and candidates pass through
//! untouched.

pub mod message;
pub mod relay;

pub use message::{PeerState, ServerSignal, SignalEnvelope, SignalKind, SignalRole};
pub use relay::{ForwardOutcome, SessionSinks, SignalSink, SignalingRelay};
