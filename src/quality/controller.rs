use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::{next_quality, PerformanceReport};
use crate::config::QualityConfig;
use crate::events::{EventBus, SystemEvent};
use crate::producer::CaptureControl;

/// Snapshot of the controller
#[derive(Debug, Clone, Serialize)]
pub struct QualityState {
    pub current_quality: u32,
    pub last_adjusted_at: Option<DateTime<Utc>>,
    pub min_quality: u32,
    pub max_quality: u32,
    /// Viewers with a report inside the aggregation window
    pub reporting_viewers: usize,
}

#[derive(Debug, Clone, Copy)]
struct ViewerReport {
    report: PerformanceReport,
    accepted_at: Instant,
}

/// Producer-wide quality controller
pub struct QualityController {
    config: RwLock<QualityConfig>,
    current: AtomicU32,
    last_adjusted_at: RwLock<Option<DateTime<Utc>>>,
    /// Latest accepted report per viewer; the lock also serializes evaluation
    reports: Mutex<HashMap<Uuid, ViewerReport>>,
    capture: RwLock<Option<Arc<dyn CaptureControl>>>,
    events: Arc<EventBus>,
}

impl QualityController {
    pub fn new(config: QualityConfig, events: Arc<EventBus>) -> Self {
        let initial = config
            .initial_quality
            .clamp(config.min_quality, config.max_quality);
        Self {
            config: RwLock::new(config),
            current: AtomicU32::new(initial),
            last_adjusted_at: RwLock::new(None),
            reports: Mutex::new(HashMap::new()),
            capture: RwLock::new(None),
            events,
        }
    }

    /// Current encode quality
    pub fn current(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }

    fn interval(config: &QualityConfig) -> Duration {
        Duration::from_secs(u64::from(config.report_interval_secs.max(1)))
    }

    /// Handle a viewer report
    ///
    /// Reports from a viewer arriving sooner than one interval after its last
    /// accepted report are ignored. Returns the new quality when it changed.
    pub fn on_report(&self, session_id: Uuid, report: PerformanceReport) -> Option<u32> {
        let Some(report) = report.sanitized() else {
            debug!("Ignoring non-numeric report from {}", session_id);
            return None;
        };

        let config = self.config.read().clone();
        let interval = Self::interval(&config);
        let now = Instant::now();

        let (previous, next) = {
            let mut reports = self.reports.lock();
            if let Some(last) = reports.get(&session_id) {
                if now.duration_since(last.accepted_at) < interval {
                    debug!("Report from {} inside reporting interval, ignored", session_id);
                    return None;
                }
            }
            reports.insert(
                session_id,
                ViewerReport {
                    report,
                    accepted_at: now,
                },
            );

            let window = interval * 2;
            reports.retain(|_, r| now.duration_since(r.accepted_at) < window);
            let aggregate = reports
                .values()
                .map(|r| r.report)
                .reduce(PerformanceReport::worst)
                .unwrap_or(report);

            let previous = self.current();
            let next = next_quality(&aggregate, previous, &config)?;
            self.current.store(next, Ordering::Release);
            *self.last_adjusted_at.write() = Some(Utc::now());
            (previous, next)
        };

        info!(
            "Quality {} -> {} (reported by {})",
            previous, next, session_id
        );
        self.notify(previous, next);
        Some(next)
    }

    /// Drop a departed viewer's report
    pub fn forget(&self, session_id: &Uuid) {
        self.reports.lock().remove(session_id);
    }

    /// Attach the capture collaborator and push the current quality to it
    pub fn set_capture(&self, capture: Arc<dyn CaptureControl>) {
        capture.set_quality_hint(self.current());
        *self.capture.write() = Some(capture);
    }

    pub fn clear_capture(&self) {
        *self.capture.write() = None;
    }

    /// Apply a new configuration, clamping the current quality into its range
    pub fn apply_config(&self, config: QualityConfig) {
        let previous = self.current();
        let clamped = previous.clamp(config.min_quality, config.max_quality);
        *self.config.write() = config;

        if clamped != previous {
            self.current.store(clamped, Ordering::Release);
            *self.last_adjusted_at.write() = Some(Utc::now());
            info!("Quality {} -> {} (range changed)", previous, clamped);
            self.notify(previous, clamped);
        }
    }

    pub fn state(&self) -> QualityState {
        let config = self.config.read().clone();
        let window = Self::interval(&config) * 2;
        let now = Instant::now();
        let reporting_viewers = self
            .reports
            .lock()
            .values()
            .filter(|r| now.duration_since(r.accepted_at) < window)
            .count();

        QualityState {
            current_quality: self.current(),
            last_adjusted_at: *self.last_adjusted_at.read(),
            min_quality: config.min_quality,
            max_quality: config.max_quality,
            reporting_viewers,
        }
    }

    fn notify(&self, previous: u32, quality: u32) {
        let capture = self.capture.read().clone();
        if let Some(capture) = capture {
            capture.set_quality_hint(quality);
        }
        self.events
            .publish(SystemEvent::QualityChanged { previous, quality });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ScreenDimensions;

    #[derive(Default)]
    struct HintRecorder {
        hints: Mutex<Vec<u32>>,
    }

    impl CaptureControl for HintRecorder {
        fn screen_dimensions(&self) -> Option<ScreenDimensions> {
            None
        }

        fn set_quality_hint(&self, quality: u32) {
            self.hints.lock().push(quality);
        }
    }

    fn report(fps: f32, drop_rate: f32) -> PerformanceReport {
        PerformanceReport {
            fps,
            drop_rate,
            latency_ms: 30,
            queue_depth: 0,
        }
    }

    fn controller() -> QualityController {
        QualityController::new(QualityConfig::default(), Arc::new(EventBus::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_per_viewer() {
        let controller = controller();
        let viewer = Uuid::new_v4();

        assert_eq!(controller.on_report(viewer, report(30.0, 0.3)), Some(60));
        // Same viewer, inside the interval
        assert_eq!(controller.on_report(viewer, report(30.0, 0.3)), None);
        assert_eq!(controller.current(), 60);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(controller.on_report(viewer, report(30.0, 0.3)), Some(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worst_case_across_viewers() {
        let controller = controller();
        let slow = Uuid::new_v4();
        let fast = Uuid::new_v4();

        assert_eq!(controller.on_report(slow, report(15.0, 0.1)), None);
        // The slow viewer's report is still fresh, so no increase
        assert_eq!(controller.on_report(fast, report(30.0, 0.0)), None);

        controller.forget(&slow);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(controller.on_report(fast, report(30.0, 0.0)), Some(75));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reports_expire() {
        let controller = controller();
        let slow = Uuid::new_v4();
        let fast = Uuid::new_v4();

        controller.on_report(slow, report(15.0, 0.3));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(controller.on_report(fast, report(30.0, 0.0)), Some(65));
        assert_eq!(controller.state().reporting_viewers, 1);
    }

    #[tokio::test]
    async fn test_changes_pushed_to_capture() {
        let events = Arc::new(EventBus::new());
        let mut rx = events.subscribe();
        let controller = QualityController::new(QualityConfig::default(), events);
        let capture = Arc::new(HintRecorder::default());
        controller.set_capture(capture.clone());

        controller.on_report(Uuid::new_v4(), report(30.0, 0.5));

        assert_eq!(*capture.hints.lock(), vec![70, 60]);
        match rx.recv().await.unwrap() {
            SystemEvent::QualityChanged { previous, quality } => {
                assert_eq!((previous, quality), (70, 60));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(controller.state().last_adjusted_at.is_some());
    }

    #[test]
    fn test_apply_config_clamps() {
        let controller = controller();
        controller.apply_config(QualityConfig {
            max_quality: 50,
            ..QualityConfig::default()
        });
        assert_eq!(controller.current(), 50);
        assert_eq!(controller.state().max_quality, 50);
    }
}
