//! Viewer sessions and their connection state machine

mod registry;
mod state;

pub use registry::{Session, SessionRegistry, TransitionOutcome};
pub use state::ConnectionState;
