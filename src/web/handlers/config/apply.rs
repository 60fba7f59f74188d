//! Hot-apply configuration changes to running services
//!
//! Pipeline capacities are read once at startup and need a restart.

use std::sync::Arc;

use crate::config::{QualityConfig, TransportConfig};
use crate::state::AppState;

pub fn apply_quality_config(state: &Arc<AppState>, old_config: &QualityConfig, new_config: &QualityConfig) {
    if old_config == new_config {
        tracing::info!("Quality config unchanged, skipping reload");
        return;
    }
    state.quality.apply_config(new_config.clone());
    tracing::info!(
        "Quality config applied (range {}-{})",
        new_config.min_quality,
        new_config.max_quality
    );
}

pub fn apply_transport_config(
    state: &Arc<AppState>,
    old_config: &TransportConfig,
    new_config: &TransportConfig,
) {
    if old_config == new_config {
        tracing::info!("Transport config unchanged, skipping reload");
        return;
    }
    if old_config.max_sessions != new_config.max_sessions {
        state
            .sessions
            .set_max_sessions(new_config.max_sessions as usize);
    }
    tracing::info!(
        "Transport config applied (peer: {}, socket: {}, fallback timeout: {}ms)",
        new_config.peer_enabled,
        new_config.socket_enabled,
        new_config.fallback_timeout_ms
    );
}
