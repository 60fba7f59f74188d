//! screenlink - screen sharing relay
//!
//! Negotiates a transport per viewer (peer connection when both sides can,
//! WebSocket frame stream otherwise), relays peer signaling, falls back to
//! the socket transport when peer negotiation stalls, fans encoded frames
//! out to socket viewers, and routes viewer input back to the producer.

pub mod config;
pub mod error;
pub mod events;
pub mod input;
pub mod pipeline;
pub mod producer;
pub mod protocol;
pub mod quality;
pub mod session;
pub mod signaling;
pub mod state;
pub mod transport;
pub mod utils;
pub mod web;

pub use error::{AppError, Result};
