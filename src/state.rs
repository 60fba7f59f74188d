use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, ConfigStore};
use crate::error::Result;
use crate::events::{EventBus, SystemEvent};
use crate::input::{InputRouter, InputStats};
use crate::pipeline::{FramePipeline, PipelineStats};
use crate::producer::{ProducerAttachment, ProducerLink};
use crate::quality::{QualityController, QualityState};
use crate::session::SessionRegistry;
use crate::signaling::SignalingRelay;
use crate::transport::{
    Capabilities, Endpoints, FallbackSupervisor, NetworkQuality, TransportKind,
};

/// How often idle sessions are looked for
const REAPER_INTERVAL: Duration = Duration::from_secs(10);

/// Application-wide state shared across handlers
///
/// Built once in `main` from the stored configuration and handed to every
/// handler; there is no global state.
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Event bus for lifecycle notifications
    pub events: Arc<EventBus>,
    /// Session registry
    pub sessions: Arc<SessionRegistry>,
    /// Signaling relay (peer transport)
    pub relay: Arc<SignalingRelay>,
    /// Peer negotiation supervisor
    pub supervisor: Arc<FallbackSupervisor>,
    /// Frame pipeline (socket transport)
    pub pipeline: Arc<FramePipeline>,
    /// Input router
    pub input: Arc<InputRouter>,
    /// Quality controller
    pub quality: Arc<QualityController>,
    /// Producer connection
    pub producer: Arc<ProducerLink>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

/// Aggregate counters for `/api/stats`
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub active_sessions: usize,
    pub peer_sessions: usize,
    pub socket_sessions: usize,
    pub supervised_negotiations: usize,
    pub signaling_sessions: usize,
    pub producer_connected: bool,
    pub event_subscribers: usize,
    pub pipeline: PipelineStats,
    pub quality: QualityState,
    pub input: InputStats,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ConfigStore, shutdown_tx: broadcast::Sender<()>) -> Arc<Self> {
        let snapshot = config.get();
        let events = Arc::new(EventBus::new());
        let sessions = Arc::new(SessionRegistry::new(
            snapshot.transport.max_sessions as usize,
            events.clone(),
        ));
        let relay = Arc::new(SignalingRelay::new(sessions.clone()));
        let supervisor = Arc::new(FallbackSupervisor::new(
            sessions.clone(),
            relay.clone(),
            events.clone(),
        ));
        let pipeline = Arc::new(FramePipeline::new(&snapshot.pipeline));
        let quality = Arc::new(QualityController::new(
            snapshot.quality.clone(),
            events.clone(),
        ));
        let producer = Arc::new(ProducerLink::new(events.clone()));

        Arc::new(Self {
            config,
            events,
            sessions,
            relay,
            supervisor,
            pipeline,
            input: Arc::new(InputRouter::new()),
            quality,
            producer,
            shutdown_tx,
        })
    }

    /// Subscribe to shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// What this server offers, with a network hint from the pipeline's
    /// observed drop rate
    pub fn server_capabilities(&self) -> Capabilities {
        let transport = &self.config.get().transport;
        Capabilities::new(
            transport.peer_enabled,
            transport.socket_enabled,
            NetworkQuality::from_drop_rate(self.pipeline.drop_rate()),
        )
    }

    /// Endpoint URIs for viewers
    ///
    /// `public_base_url` wins; otherwise the request's `Host` header; otherwise
    /// the bind address.
    pub fn endpoints(&self, host: Option<&str>) -> Endpoints {
        let config = self.config.get();
        Endpoints::from_base_url(&base_url(&config, host), config.transport.ice_servers.clone())
    }

    /// Fallback target for peer sessions; `None` when the socket transport is
    /// disabled
    pub fn socket_endpoint(&self, host: Option<&str>) -> Option<String> {
        if !self.config.get().transport.socket_enabled {
            return None;
        }
        Some(self.endpoints(host).socket)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.config.get().transport.fallback_timeout_ms))
    }

    /// Attach a producer and make it the input executor and capture control
    pub fn attach_producer(&self) -> Result<ProducerAttachment> {
        let attachment = self.producer.attach()?;
        self.input.set_executor(self.producer.clone());
        self.quality.set_capture(self.producer.clone());
        Ok(attachment)
    }

    pub fn detach_producer(&self, id: u64) {
        if self.producer.detach(id) {
            self.input.clear_executor();
            self.quality.clear_capture();
        }
    }

    /// Tear down a session from outside its own connection
    pub fn end_session(&self, session_id: Uuid, reason: &str) -> bool {
        let existed = self.sessions.contains(session_id);
        self.supervisor.cancel(session_id);
        self.relay.close_session(session_id, None, reason);
        self.quality.forget(&session_id);
        existed
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            active_sessions: self.sessions.count(),
            peer_sessions: self.sessions.count_by_transport(TransportKind::Peer),
            socket_sessions: self.sessions.count_by_transport(TransportKind::Socket),
            supervised_negotiations: self.supervisor.active_count(),
            signaling_sessions: self.relay.session_count(),
            producer_connected: self.producer.is_attached(),
            event_subscribers: self.events.subscriber_count(),
            pipeline: self.pipeline.stats(),
            quality: self.quality.state(),
            input: self.input.stats(),
        }
    }

    /// Spawn the idle-session reaper and the periodic stats reporter. Both
    /// stop on shutdown.
    pub fn spawn_maintenance(self: &Arc<Self>) {
        let state = self.clone();
        let mut shutdown = self.shutdown_signal();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAPER_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {
                        let idle = Duration::from_secs(u64::from(
                            state.config.get().transport.session_idle_timeout_secs,
                        ));
                        for session_id in state.sessions.reap_idle(idle) {
                            state.relay.detach(session_id);
                            state.quality.forget(&session_id);
                            info!("Reaped idle session {}", session_id);
                        }
                    }
                }
            }
            debug!("Session reaper stopped");
        });

        let state = self.clone();
        let mut shutdown = self.shutdown_signal();
        tokio::spawn(async move {
            let secs = state.config.get().pipeline.stats_interval_secs.max(1);
            let mut interval = tokio::time::interval(Duration::from_secs(u64::from(secs)));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => state.report_stats(),
                }
            }
            debug!("Stats reporter stopped");
        });
    }

    fn report_stats(&self) {
        let pipeline = self.pipeline.stats();
        let active_sessions = self.sessions.count();
        let quality = self.quality.current();

        if pipeline.drop_rate >= 0.2 {
            warn!(
                "Pipeline dropping {:.1}% of frames ({} subscribers)",
                pipeline.drop_rate * 100.0,
                pipeline.subscribers
            );
        }
        info!(
            "Stats: {} sessions, {} subscribers, video {}/{} dropped, audio {}/{} dropped, quality {}",
            active_sessions,
            pipeline.subscribers,
            pipeline.video.dropped,
            pipeline.video.pushed,
            pipeline.audio.dropped,
            pipeline.audio.pushed,
            quality
        );

        self.events.publish(SystemEvent::StatsUpdated {
            active_sessions,
            pipeline,
            quality,
        });
    }
}

fn base_url(config: &AppConfig, host: Option<&str>) -> String {
    if let Some(url) = config
        .web
        .public_base_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
    {
        return url.trim_end_matches('/').to_string();
    }
    if let Some(host) = host.filter(|h| !h.is_empty()) {
        return format!("http://{}", host);
    }
    format!("http://{}:{}", config.web.bind_address, config.web.http_port)
}
