//! Closed-loop encode quality control
//!
//! Viewers send a [`PerformanceReport`] every reporting interval. The
//! controller folds the fresh reports of all viewers into one worst-case
//! report and moves the single producer-wide quality inside a hysteresis
//! band.

pub mod controller;

pub use controller::{QualityController, QualityState};

use serde::{Deserialize, Serialize};

use crate::config::QualityConfig;

/// Periodic viewer-side measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Frames rendered per second
    pub fps: f32,
    /// Fraction of frames dropped, `[0, 1]`
    pub drop_rate: f32,
    /// Capture to display latency
    #[serde(default)]
    pub latency_ms: u32,
    /// Frames waiting in the viewer's decode queue
    #[serde(default)]
    pub queue_depth: u32,
}

impl PerformanceReport {
    /// Clamp out-of-range values; `None` if a value is not a number
    pub fn sanitized(self) -> Option<Self> {
        if !self.fps.is_finite() || !self.drop_rate.is_finite() {
            return None;
        }
        Some(Self {
            fps: self.fps.max(0.0),
            drop_rate: self.drop_rate.clamp(0.0, 1.0),
            ..self
        })
    }

    /// Most conservative combination of two reports
    pub fn worst(self, other: Self) -> Self {
        Self {
            fps: self.fps.min(other.fps),
            drop_rate: self.drop_rate.max(other.drop_rate),
            latency_ms: self.latency_ms.max(other.latency_ms),
            queue_depth: self.queue_depth.max(other.queue_depth),
        }
    }
}

/// Next quality for `report` at `current`, or `None` when unchanged.
///
/// - drop rate above `high_drop_rate` and above the floor: decrease
/// - drop rate below `low_drop_rate` with enough fps and below the ceiling: increase
pub fn next_quality(report: &PerformanceReport, current: u32, config: &QualityConfig) -> Option<u32> {
    let next = if report.drop_rate > config.high_drop_rate && current > config.min_quality {
        current
            .saturating_sub(config.decrease_step)
            .max(config.min_quality)
    } else if report.drop_rate < config.low_drop_rate
        && report.fps >= config.min_fps_for_increase
        && current < config.max_quality
    {
        current
            .saturating_add(config.increase_step)
            .min(config.max_quality)
    } else {
        return None;
    };

    (next != current).then_some(next)
}
