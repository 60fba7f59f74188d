//! Input command types

use serde::{Deserialize, Serialize};

/// Key phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPhase {
    /// Key pressed down
    Down,
    /// Key released
    Up,
    /// Down followed by up
    #[default]
    Press,
}

/// System navigation target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationTarget {
    Back,
    Home,
    Recents,
    Notifications,
    QuickSettings,
    PowerDialog,
}

/// Pointer action of a `touch` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchAction {
    Tap,
    Down,
    Up,
    Move,
    LongPress,
}

/// Default long-press hold time
pub const DEFAULT_LONG_PRESS_MS: u32 = 600;
/// Default swipe duration
pub const DEFAULT_SWIPE_MS: u32 = 300;

/// Viewer input with coordinates normalized to `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub enum InputCommand {
    Tap { x: f64, y: f64 },
    Down { x: f64, y: f64 },
    Up { x: f64, y: f64 },
    Move { x: f64, y: f64 },
    LongPress { x: f64, y: f64, duration_ms: u32 },
    Swipe {
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
        duration_ms: u32,
    },
    Key { code: u32, phase: KeyPhase },
    Navigation { target: NavigationTarget },
}

impl InputCommand {
    /// Build a pointer command from a `touch` action
    pub fn touch(action: TouchAction, x: f64, y: f64, duration_ms: Option<u32>) -> Self {
        match action {
            TouchAction::Tap => InputCommand::Tap { x, y },
            TouchAction::Down => InputCommand::Down { x, y },
            TouchAction::Up => InputCommand::Up { x, y },
            TouchAction::Move => InputCommand::Move { x, y },
            TouchAction::LongPress => InputCommand::LongPress {
                x,
                y,
                duration_ms: duration_ms.unwrap_or(DEFAULT_LONG_PRESS_MS),
            },
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            InputCommand::Tap { .. } => "tap",
            InputCommand::Down { .. } => "down",
            InputCommand::Up { .. } => "up",
            InputCommand::Move { .. } => "move",
            InputCommand::LongPress { .. } => "long_press",
            InputCommand::Swipe { .. } => "swipe",
            InputCommand::Key { .. } => "key",
            InputCommand::Navigation { .. } => "navigation",
        }
    }
}

/// Producer screen geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenDimensions {
    pub width: u32,
    pub height: u32,
    /// Ratio between capture resolution and physical resolution.
    ///
    /// Normalized pointer coordinates map onto `width`/`height` in capture
    /// pixels. Converting to physical pixels with this factor is left to the
    /// producer, which is the side that injects the event.
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,
}

fn default_scale_factor() -> f32 {
    1.0
}

impl ScreenDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            scale_factor: 1.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Input command in device pixels, as sent to the producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeviceCommand {
    Tap { x: u32, y: u32 },
    Down { x: u32, y: u32 },
    Up { x: u32, y: u32 },
    Move { x: u32, y: u32 },
    LongPress { x: u32, y: u32, duration_ms: u32 },
    Swipe {
        from_x: u32,
        from_y: u32,
        to_x: u32,
        to_y: u32,
        duration_ms: u32,
    },
    Key { code: u32, phase: KeyPhase },
    Navigation { target: NavigationTarget },
}
