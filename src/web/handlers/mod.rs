pub mod config;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::quality::PerformanceReport;
use crate::session::Session;
use crate::state::{AppState, ServerStats};
use crate::transport::{
    negotiate, CapabilityAdvertisement, Capabilities, NegotiationResult, TransportKind,
};

/// `Host` header of a request
pub(crate) fn request_host(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|v| v.to_str().ok())
}

// ============================================================================
// Health
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Generic success response
#[derive(Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Negotiation
// ============================================================================

pub async fn get_capabilities(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<CapabilityAdvertisement> {
    Json(CapabilityAdvertisement {
        capabilities: state.server_capabilities(),
        endpoints: state.endpoints(request_host(&headers)),
    })
}

#[derive(Serialize)]
pub struct NegotiateResponse {
    pub session_id: Uuid,
    pub result: NegotiationResult,
}

/// Negotiate a transport and create the viewer's session
pub async fn negotiate_transport(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(client): Json<Capabilities>,
) -> Result<Json<NegotiateResponse>> {
    let server = state.server_capabilities();
    let endpoints = state.endpoints(request_host(&headers));
    let result = negotiate(&client, &server, &endpoints);

    if result.transport == TransportKind::Socket
        && !(client.supports_socket_transport && server.supports_socket_transport)
    {
        return Err(AppError::BadRequest(
            "No transport supported by both sides".to_string(),
        ));
    }

    let session_id = state.sessions.create_session(result.transport)?;
    info!(
        "Negotiated {} transport for session {} (client hint {:?})",
        result.transport, session_id, client.network_quality_hint
    );

    if result.transport == TransportKind::Peer && !state.producer.notify_peer_session(session_id) {
        debug!(
            "No producer attached to join signaling for session {}",
            session_id
        );
    }

    Ok(Json(NegotiateResponse { session_id, result }))
}

// ============================================================================
// Sessions
// ============================================================================

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<Session>> {
    let mut sessions = state.sessions.list();
    sessions.sort_by_key(|s| s.created_at);
    Json(sessions)
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Session>> {
    state
        .sessions
        .get(session_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Session not found: {}", session_id)))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ActionResponse>> {
    if !state.end_session(session_id, "closed by request") {
        return Err(AppError::NotFound(format!(
            "Session not found: {}",
            session_id
        )));
    }
    Ok(Json(ActionResponse {
        success: true,
        message: Some("Session closed".to_string()),
    }))
}

#[derive(Serialize)]
pub struct ReportResponse {
    /// New quality if this report changed it
    pub quality: Option<u32>,
    pub current_quality: u32,
}

/// Accept a performance report over HTTP (peer-transport viewers)
pub async fn submit_report(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(report): Json<PerformanceReport>,
) -> Result<Json<ReportResponse>> {
    if !state.sessions.contains(session_id) {
        return Err(AppError::NotFound(format!(
            "Session not found: {}",
            session_id
        )));
    }
    state.sessions.touch(session_id);
    let quality = state.quality.on_report(session_id, report);
    Ok(Json(ReportResponse {
        quality,
        current_quality: state.quality.current(),
    }))
}

// ============================================================================
// Stats
// ============================================================================

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<ServerStats> {
    Json(state.stats())
}
