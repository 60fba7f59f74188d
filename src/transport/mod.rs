//! Transport selection
//!
//! ```text
//! viewer caps ──┐
//!               ├─ negotiate() ── PEER ──> signaling relay ── FallbackSupervisor
//! server caps ──┘        │                                          │ timeout / failed
//!                        └──── SOCKET ──> /ws/stream <──────────────┘
//! ```
//!
//! - [`negotiator`]: the pure capability decision
//! - [`probe`]: client-side capability discovery with a local socket default
//! - [`fallback`]: peer negotiation timer and the one-shot fallback to socket

pub mod fallback;
pub mod negotiator;
pub mod probe;

pub use fallback::{
    FallbackPlan, FallbackReason, FallbackSupervisor, SupervisionHandle, SupervisionOutcome,
};
pub use negotiator::{
    negotiate, select_transport, CapabilityAdvertisement, Capabilities, Endpoints,
    NegotiationResult, NetworkQuality, TransportKind,
};
pub use probe::CapabilityProbe;
