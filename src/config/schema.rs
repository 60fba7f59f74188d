use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// Main application configuration
#[typeshare]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Transport negotiation and session settings
    pub transport: TransportConfig,
    /// Frame pipeline settings
    pub pipeline: PipelineConfig,
    /// Encode quality control settings
    pub quality: QualityConfig,
}

/// Web server configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub http_port: u16,
    /// Externally reachable base URL (e.g. "http://192.168.1.20:8080").
    /// Used to build endpoint URIs handed to viewers; derived from the
    /// request `Host` header when unset.
    pub public_base_url: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8080,
            public_base_url: None,
        }
    }
}

/// Transport negotiation configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Advertise peer (WebRTC-class) transport support
    pub peer_enabled: bool,
    /// Advertise socket (WebSocket-class) transport support
    pub socket_enabled: bool,
    /// STUN/TURN server URIs handed to peer-transport viewers
    pub ice_servers: Vec<String>,
    /// Peer negotiation timeout before falling back to socket transport (ms)
    pub fallback_timeout_ms: u32,
    /// Maximum concurrent sessions
    pub max_sessions: u32,
    /// Sessions that never connect are reaped after this many seconds
    pub session_idle_timeout_secs: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            peer_enabled: true,
            socket_enabled: true,
            ice_servers: vec![],
            fallback_timeout_ms: 5000,
            max_sessions: 16,
            session_idle_timeout_secs: 60,
        }
    }
}

/// Frame pipeline configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Video queue capacity (drop-oldest beyond this)
    pub video_capacity: u32,
    /// Audio queue capacity (drop-oldest beyond this)
    pub audio_capacity: u32,
    /// Per-subscriber outbound buffer; a full buffer unsubscribes the viewer
    pub subscriber_buffer: u32,
    /// Diagnostics interval in seconds
    pub stats_interval_secs: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video_capacity: 3,
            audio_capacity: 8,
            subscriber_buffer: 16,
            stats_interval_secs: 30,
        }
    }
}

/// Quality controller configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityConfig {
    /// Quality floor
    pub min_quality: u32,
    /// Quality ceiling
    pub max_quality: u32,
    /// Quality used before any report arrives
    pub initial_quality: u32,
    /// Step applied when the drop rate is high
    pub decrease_step: u32,
    /// Step applied when the stream is healthy
    pub increase_step: u32,
    /// Drop rate above which quality is decreased
    pub high_drop_rate: f32,
    /// Drop rate below which quality may be increased
    pub low_drop_rate: f32,
    /// Minimum reported fps required for an increase
    pub min_fps_for_increase: f32,
    /// Per-viewer reporting interval in seconds
    pub report_interval_secs: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_quality: 40,
            max_quality: 80,
            initial_quality: 70,
            decrease_step: 10,
            increase_step: 5,
            high_drop_rate: 0.20,
            low_drop_rate: 0.05,
            min_fps_for_increase: 25.0,
            report_interval_secs: 5,
        }
    }
}

impl QualityConfig {
    /// Reject configurations the controller cannot honor
    pub fn validate(&self) -> Result<(), String> {
        if self.min_quality > self.max_quality {
            return Err(format!(
                "min_quality ({}) exceeds max_quality ({})",
                self.min_quality, self.max_quality
            ));
        }
        if !(0.0..=1.0).contains(&self.low_drop_rate) || !(0.0..=1.0).contains(&self.high_drop_rate)
        {
            return Err("drop rate thresholds must be within [0, 1]".to_string());
        }
        if self.low_drop_rate > self.high_drop_rate {
            return Err("low_drop_rate must not exceed high_drop_rate".to_string());
        }
        Ok(())
    }
}

impl TransportConfig {
    /// Reject configurations that leave no usable transport
    pub fn validate(&self) -> Result<(), String> {
        if !self.socket_enabled && !self.peer_enabled {
            return Err("at least one transport must be enabled".to_string());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"pipeline": {"video_capacity": 5}}"#).unwrap();
        assert_eq!(config.pipeline.video_capacity, 5);
        assert_eq!(config.pipeline.audio_capacity, 8);
        assert_eq!(config.transport.fallback_timeout_ms, 5000);
        assert_eq!(config.quality.min_quality, 40);
    }

    #[test]
    fn test_quality_validation() {
        let mut quality = QualityConfig::default();
        assert!(quality.validate().is_ok());

        quality.min_quality = 90;
        assert!(quality.validate().is_err());
    }

    #[test]
    fn test_transport_validation() {
        let transport = TransportConfig {
            peer_enabled: false,
            socket_enabled: false,
            ..Default::default()
        };
        assert!(transport.validate().is_err());
    }
}
