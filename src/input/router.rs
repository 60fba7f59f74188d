//! Input event router
//!
//! Maps normalized viewer coordinates onto the producer's screen and hands
//! the command to the input executor. Nothing is queued: when no executor is
//! attached the command is dropped.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::types::{DeviceCommand, InputCommand};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Producer-side input execution collaborator
#[async_trait]
pub trait InputExecutor: Send + Sync {
    /// Execute a command in device pixels; `false` if it was not performed
    async fn execute(&self, command: &DeviceCommand) -> bool;
}

/// Result of routing one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The executor accepted the command
    Executed,
    /// The executor refused or failed the command
    Rejected,
    /// No executor attached; command dropped
    IgnoredNoController,
    /// Coordinates or screen size unusable; command dropped
    Invalid,
}

/// Map a normalized coordinate pair onto a `width` x `height` screen.
///
/// `round(v * dimension)` clamped to `[0, dimension - 1]`. Returns `None`
/// for non-finite input or an empty screen.
pub fn map_point(x: f64, y: f64, width: u32, height: u32) -> Option<(u32, u32)> {
    Some((map_axis(x, width)?, map_axis(y, height)?))
}

fn map_axis(value: f64, dimension: u32) -> Option<u32> {
    if !value.is_finite() || dimension == 0 {
        return None;
    }
    let max = f64::from(dimension - 1);
    Some((value * f64::from(dimension)).round().clamp(0.0, max) as u32)
}

impl InputCommand {
    /// Convert to device pixels
    pub fn to_device(&self, width: u32, height: u32) -> Option<DeviceCommand> {
        let command = match *self {
            InputCommand::Tap { x, y } => {
                let (x, y) = map_point(x, y, width, height)?;
                DeviceCommand::Tap { x, y }
            }
            InputCommand::Down { x, y } => {
                let (x, y) = map_point(x, y, width, height)?;
                DeviceCommand::Down { x, y }
            }
            InputCommand::Up { x, y } => {
                let (x, y) = map_point(x, y, width, height)?;
                DeviceCommand::Up { x, y }
            }
            InputCommand::Move { x, y } => {
                let (x, y) = map_point(x, y, width, height)?;
                DeviceCommand::Move { x, y }
            }
            InputCommand::LongPress { x, y, duration_ms } => {
                let (x, y) = map_point(x, y, width, height)?;
                DeviceCommand::LongPress { x, y, duration_ms }
            }
            InputCommand::Swipe {
                from_x,
                from_y,
                to_x,
                to_y,
                duration_ms,
            } => {
                let (from_x, from_y) = map_point(from_x, from_y, width, height)?;
                let (to_x, to_y) = map_point(to_x, to_y, width, height)?;
                DeviceCommand::Swipe {
                    from_x,
                    from_y,
                    to_x,
                    to_y,
                    duration_ms,
                }
            }
            InputCommand::Key { code, phase } => DeviceCommand::Key { code, phase },
            InputCommand::Navigation { target } => DeviceCommand::Navigation { target },
        };
        Some(command)
    }
}

/// Input routing counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct InputStats {
    pub executed: u64,
    pub rejected: u64,
    pub ignored: u64,
    pub invalid: u64,
}

/// Routes viewer input to the attached executor
pub struct InputRouter {
    executor: RwLock<Option<Arc<dyn InputExecutor>>>,
    throttler: LogThrottler,
    executed: AtomicU64,
    rejected: AtomicU64,
    ignored: AtomicU64,
    invalid: AtomicU64,
}

impl InputRouter {
    pub fn new() -> Self {
        Self {
            executor: RwLock::new(None),
            throttler: LogThrottler::default(),
            executed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
        }
    }

    /// Attach the executor, replacing any previous one
    pub fn set_executor(&self, executor: Arc<dyn InputExecutor>) {
        *self.executor.write() = Some(executor);
        self.throttler.clear("no_executor");
    }

    pub fn clear_executor(&self) {
        *self.executor.write() = None;
    }

    pub fn has_executor(&self) -> bool {
        self.executor.read().is_some()
    }

    /// Route one command to the executor
    pub async fn route(&self, command: &InputCommand, width: u32, height: u32) -> RouteOutcome {
        let executor = self.executor.read().clone();
        let Some(executor) = executor else {
            self.ignored.fetch_add(1, Ordering::Relaxed);
            warn_throttled!(
                self.throttler,
                "no_executor",
                "Input executor not available, dropping {} command",
                command.name()
            );
            return RouteOutcome::IgnoredNoController;
        };

        let Some(device) = command.to_device(width, height) else {
            self.invalid.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Dropping {} command: unusable coordinates for {}x{}",
                command.name(),
                width,
                height
            );
            return RouteOutcome::Invalid;
        };

        trace!("Routing input: {:?}", device);
        if executor.execute(&device).await {
            self.executed.fetch_add(1, Ordering::Relaxed);
            RouteOutcome::Executed
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn_throttled!(
                self.throttler,
                "rejected",
                "Input executor rejected {} command",
                command.name()
            );
            RouteOutcome::Rejected
        }
    }

    pub fn stats(&self) -> InputStats {
        InputStats {
            executed: self.executed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
        }
    }
}

impl Default for InputRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{KeyPhase, NavigationTarget};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        commands: Mutex<Vec<DeviceCommand>>,
        accept: bool,
    }

    #[async_trait]
    impl InputExecutor for Recorder {
        async fn execute(&self, command: &DeviceCommand) -> bool {
            self.commands.lock().push(command.clone());
            self.accept
        }
    }

    #[test]
    fn test_map_point() {
        assert_eq!(map_point(0.5, 0.5, 1080, 1920), Some((540, 960)));
        assert_eq!(map_point(1.0, 1.0, 1080, 1920), Some((1079, 1919)));
        assert_eq!(map_point(0.0, 0.0, 1080, 1920), Some((0, 0)));
        assert_eq!(map_point(-0.2, 1.7, 100, 100), Some((0, 99)));
        assert_eq!(map_point(f64::NAN, 0.5, 100, 100), None);
        assert_eq!(map_point(0.5, 0.5, 0, 100), None);
    }

    #[tokio::test]
    async fn test_route_maps_coordinates() {
        let router = InputRouter::new();
        let recorder = Arc::new(Recorder {
            accept: true,
            ..Default::default()
        });
        router.set_executor(recorder.clone());

        let outcome = router
            .route(&InputCommand::Tap { x: 0.5, y: 0.5 }, 1080, 1920)
            .await;
        assert_eq!(outcome, RouteOutcome::Executed);

        let outcome = router
            .route(
                &InputCommand::Swipe {
                    from_x: 0.0,
                    from_y: 1.0,
                    to_x: 1.0,
                    to_y: 0.0,
                    duration_ms: 250,
                },
                1080,
                1920,
            )
            .await;
        assert_eq!(outcome, RouteOutcome::Executed);

        let commands = recorder.commands.lock().clone();
        assert_eq!(commands[0], DeviceCommand::Tap { x: 540, y: 960 });
        assert_eq!(
            commands[1],
            DeviceCommand::Swipe {
                from_x: 0,
                from_y: 1919,
                to_x: 1079,
                to_y: 0,
                duration_ms: 250
            }
        );
        assert_eq!(router.stats().executed, 2);
    }

    #[tokio::test]
    async fn test_route_without_executor_drops() {
        let router = InputRouter::new();
        let outcome = router
            .route(
                &InputCommand::Key {
                    code: 4,
                    phase: KeyPhase::Press,
                },
                1080,
                1920,
            )
            .await;
        assert_eq!(outcome, RouteOutcome::IgnoredNoController);
        assert_eq!(router.stats().ignored, 1);

        // Attaching later does not replay anything
        let recorder = Arc::new(Recorder::default());
        router.set_executor(recorder.clone());
        assert!(recorder.commands.lock().is_empty());
    }

    #[tokio::test]
    async fn test_route_rejected_and_invalid() {
        let router = InputRouter::new();
        router.set_executor(Arc::new(Recorder::default()));

        let outcome = router
            .route(
                &InputCommand::Navigation {
                    target: NavigationTarget::Home,
                },
                1080,
                1920,
            )
            .await;
        assert_eq!(outcome, RouteOutcome::Rejected);

        let outcome = router
            .route(&InputCommand::Move { x: 0.5, y: 0.5 }, 0, 0)
            .await;
        assert_eq!(outcome, RouteOutcome::Invalid);
    }
}
