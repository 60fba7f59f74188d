use serde::Deserialize;
use typeshare::typeshare;

use crate::config::{QualityConfig, TransportConfig};
use crate::error::AppError;

// ===== Quality Config =====
#[typeshare]
#[derive(Debug, Default, Deserialize)]
pub struct QualityConfigUpdate {
    pub min_quality: Option<u32>,
    pub max_quality: Option<u32>,
    pub initial_quality: Option<u32>,
    pub decrease_step: Option<u32>,
    pub increase_step: Option<u32>,
    pub high_drop_rate: Option<f32>,
    pub low_drop_rate: Option<f32>,
    pub min_fps_for_increase: Option<f32>,
    pub report_interval_secs: Option<u32>,
}

impl QualityConfigUpdate {
    pub fn validate(&self) -> crate::error::Result<()> {
        for (name, value) in [
            ("min_quality", self.min_quality),
            ("max_quality", self.max_quality),
            ("initial_quality", self.initial_quality),
        ] {
            if let Some(value) = value {
                if !(1..=100).contains(&value) {
                    return Err(AppError::BadRequest(format!(
                        "Invalid {}: must be 1-100",
                        name
                    )));
                }
            }
        }
        for (name, value) in [
            ("decrease_step", self.decrease_step),
            ("increase_step", self.increase_step),
            ("report_interval_secs", self.report_interval_secs),
        ] {
            if value == Some(0) {
                return Err(AppError::BadRequest(format!(
                    "Invalid {}: must be positive",
                    name
                )));
            }
        }
        if let Some(fps) = self.min_fps_for_increase {
            if !(0.0..=240.0).contains(&fps) {
                return Err(AppError::BadRequest(
                    "Invalid min_fps_for_increase: must be 0-240".into(),
                ));
            }
        }
        Ok(())
    }

    /// Check the result of applying this update to `current`, so cross-field
    /// errors such as `min_quality > max_quality` are reported as bad requests.
    pub fn validate_against(&self, current: &QualityConfig) -> crate::error::Result<()> {
        let mut merged = current.clone();
        self.apply_to(&mut merged);
        merged.validate().map_err(AppError::BadRequest)
    }

    pub fn apply_to(&self, config: &mut QualityConfig) {
        if let Some(v) = self.min_quality {
            config.min_quality = v;
        }
        if let Some(v) = self.max_quality {
            config.max_quality = v;
        }
        if let Some(v) = self.initial_quality {
            config.initial_quality = v;
        }
        if let Some(v) = self.decrease_step {
            config.decrease_step = v;
        }
        if let Some(v) = self.increase_step {
            config.increase_step = v;
        }
        if let Some(v) = self.high_drop_rate {
            config.high_drop_rate = v;
        }
        if let Some(v) = self.low_drop_rate {
            config.low_drop_rate = v;
        }
        if let Some(v) = self.min_fps_for_increase {
            config.min_fps_for_increase = v;
        }
        if let Some(v) = self.report_interval_secs {
            config.report_interval_secs = v;
        }
    }
}

// ===== Transport Config =====
#[typeshare]
#[derive(Debug, Default, Deserialize)]
pub struct TransportConfigUpdate {
    pub peer_enabled: Option<bool>,
    pub socket_enabled: Option<bool>,
    pub ice_servers: Option<Vec<String>>,
    pub fallback_timeout_ms: Option<u32>,
    pub max_sessions: Option<u32>,
    pub session_idle_timeout_secs: Option<u32>,
}

impl TransportConfigUpdate {
    pub fn validate(&self) -> crate::error::Result<()> {
        if let Some(timeout) = self.fallback_timeout_ms {
            if !(500..=60_000).contains(&timeout) {
                return Err(AppError::BadRequest(
                    "Invalid fallback_timeout_ms: must be 500-60000".into(),
                ));
            }
        }
        if let Some(ref servers) = self.ice_servers {
            for server in servers {
                if !(server.starts_with("stun:")
                    || server.starts_with("turn:")
                    || server.starts_with("turns:"))
                {
                    return Err(AppError::BadRequest(format!(
                        "Invalid ICE server URI: {}",
                        server
                    )));
                }
            }
        }
        if self.session_idle_timeout_secs == Some(0) {
            return Err(AppError::BadRequest(
                "Invalid session_idle_timeout_secs: must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn apply_to(&self, config: &mut TransportConfig) {
        if let Some(v) = self.peer_enabled {
            config.peer_enabled = v;
        }
        if let Some(v) = self.socket_enabled {
            config.socket_enabled = v;
        }
        if let Some(ref v) = self.ice_servers {
            config.ice_servers = v.clone();
        }
        if let Some(v) = self.fallback_timeout_ms {
            config.fallback_timeout_ms = v;
        }
        if let Some(v) = self.max_sessions {
            config.max_sessions = v;
        }
        if let Some(v) = self.session_idle_timeout_secs {
            config.session_idle_timeout_secs = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_update_partial() {
        let update: QualityConfigUpdate =
            serde_json::from_str(r#"{"max_quality": 90, "increase_step": 10}"#).unwrap();
        update.validate().unwrap();

        let mut config = QualityConfig::default();
        update.apply_to(&mut config);
        assert_eq!(config.max_quality, 90);
        assert_eq!(config.increase_step, 10);
        assert_eq!(config.min_quality, 40);
    }

    #[test]
    fn test_invalid_updates_rejected() {
        let update = QualityConfigUpdate {
            decrease_step: Some(0),
            ..Default::default()
        };
        assert!(update.validate().is_err());

        let update = TransportConfigUpdate {
            ice_servers: Some(vec!["http://not-ice".to_string()]),
            ..Default::default()
        };
        assert!(update.validate().is_err());

        let update = TransportConfigUpdate {
            fallback_timeout_ms: Some(100),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn test_quality_range_checked_against_current() {
        let current = QualityConfig::default();

        let update = QualityConfigUpdate {
            min_quality: Some(90),
            max_quality: Some(50),
            ..Default::default()
        };
        update.validate().unwrap();
        assert!(matches!(
            update.validate_against(&current),
            Err(AppError::BadRequest(_))
        ));

        // Only one bound given; the other comes from the current config
        let update = QualityConfigUpdate {
            max_quality: Some(current.min_quality - 1),
            ..Default::default()
        };
        assert!(matches!(
            update.validate_against(&current),
            Err(AppError::BadRequest(_))
        ));

        let update = QualityConfigUpdate {
            min_quality: Some(50),
            max_quality: Some(90),
            ..Default::default()
        };
        update.validate_against(&current).unwrap();
    }
}
