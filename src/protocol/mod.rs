//! Wire protocol
//!
//! - [`frame`]: binary frame envelope (viewer-bound video/audio)
//! - [`input`]: JSON envelopes exchanged with viewers on the socket transport

pub mod frame;
pub mod input;

pub use frame::{FrameEnvelope, FrameKind, AUDIO_HEADER_LEN, VIDEO_HEADER_LEN};
pub use input::{decode_client_message, ClientMessage, Inbound, ServerMessage};

use thiserror::Error;

/// Errors decoding wire messages. Each one discards a single message; the
/// connection stays open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer too short: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("unknown frame kind tag 0x{0:02X}")]
    UnknownKind(u8),

    #[error("audio payload length {declared} exceeds remaining {remaining} bytes")]
    LengthOverflow { declared: u32, remaining: usize },

    #[error("{0} trailing bytes after audio payload")]
    TrailingBytes(usize),

    #[error("payload of {0} bytes does not fit a 32-bit length")]
    PayloadTooLarge(usize),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("missing or non-string `type` field")]
    MissingType,

    #[error("invalid `{kind}` message: {reason}")]
    InvalidMessage { kind: String, reason: String },
}
