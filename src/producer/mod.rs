//! Producer collaborator
//!
//! The producer captures and encodes the screen, and executes input on the
//! device. It connects over `/ws/producer`; [`ProducerLink`] is the server's
//! side of that connection and implements both collaborator seams:
//! [`CaptureControl`] for the quality controller and
//! [`InputExecutor`](crate::input::InputExecutor) for the input router.

pub mod link;

pub use link::{ProducerAttachment, ProducerCommand, ProducerLink, ProducerMessage};

use crate::input::ScreenDimensions;

/// Capture-side controls
pub trait CaptureControl: Send + Sync {
    /// Screen geometry reported by the producer, if known yet
    fn screen_dimensions(&self) -> Option<ScreenDimensions>;

    /// Ask the encoder to use `quality` for subsequent frames
    fn set_quality_hint(&self, quality: u32);
}
