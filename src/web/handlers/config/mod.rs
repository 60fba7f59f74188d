//! Configuration handlers
//!
//! - GET   /api/config           - full configuration
//! - GET   /api/config/quality   - quality controller configuration
//! - PATCH /api/config/quality   - update quality controller configuration
//! - GET   /api/config/transport - transport configuration
//! - PATCH /api/config/transport - update transport configuration

mod apply;
mod types;

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::config::{AppConfig, QualityConfig, TransportConfig};
use crate::error::Result;
use crate::state::AppState;

pub use types::{QualityConfigUpdate, TransportConfigUpdate};

pub async fn get_all_config(State(state): State<Arc<AppState>>) -> Json<AppConfig> {
    Json((*state.config.get()).clone())
}

pub async fn get_quality_config(State(state): State<Arc<AppState>>) -> Json<QualityConfig> {
    Json(state.config.get().quality.clone())
}

pub async fn update_quality_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QualityConfigUpdate>,
) -> Result<Json<QualityConfig>> {
    req.validate()?;

    let old_config = state.config.get().quality.clone();
    req.validate_against(&old_config)?;
    state
        .config
        .update(|config| req.apply_to(&mut config.quality))
        .await?;
    let new_config = state.config.get().quality.clone();

    apply::apply_quality_config(&state, &old_config, &new_config);
    Ok(Json(new_config))
}

pub async fn get_transport_config(State(state): State<Arc<AppState>>) -> Json<TransportConfig> {
    Json(state.config.get().transport.clone())
}

pub async fn update_transport_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransportConfigUpdate>,
) -> Result<Json<TransportConfig>> {
    req.validate()?;

    let old_config = state.config.get().transport.clone();
    state
        .config
        .update(|config| req.apply_to(&mut config.transport))
        .await?;
    let new_config = state.config.get().transport.clone();

    apply::apply_transport_config(&state, &old_config, &new_config);
    Ok(Json(new_config))
}
