//! Input event routing
//!
//! ```text
//! Viewer JSON --> ClientMessage --> InputCommand (normalized)
//!                                        |
//!                               InputRouter::route
//!                                        |
//!                         DeviceCommand (pixels) --> InputExecutor
//! ```

pub mod router;
pub mod types;

pub use router::{map_point, InputExecutor, InputRouter, InputStats, RouteOutcome};
pub use types::{
    DeviceCommand, InputCommand, KeyPhase, NavigationTarget, ScreenDimensions, TouchAction,
    DEFAULT_LONG_PRESS_MS, DEFAULT_SWIPE_MS,
};
