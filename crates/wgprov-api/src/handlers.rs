//! REST handlers
//!
//! Thin translation between HTTP and the orchestrator: every handler
//! validates through the control plane and maps its error taxonomy onto
//! status codes. Status polling never reaches the remote host.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use wgprov_control::{ConfigError, DisconnectOutcome, ProvisionError};

use crate::models::*;
use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn not_found(message: impl Into<String>, code: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(message, code)),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(message, "invalid_username")),
    )
}

/// Start provisioning a peer for a username, or re-attach to the job
/// already in flight.
#[utoipa::path(
    post,
    path = "/api/peers/{username}/provision",
    params(
        ("username" = String, Path, description = "Username to provision")
    ),
    responses(
        (status = 202, description = "Job accepted or re-attached", body = JobResponse),
        (status = 400, description = "Invalid username", body = ErrorResponse)
    ),
    tag = "peers"
)]
pub async fn provision_peer(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    info!(username, "provisioning requested");

    let job = state
        .provisioner
        .provision(&username)
        .map_err(|e| bad_request(e.to_string()))?;

    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// Poll the provisioning job for a username
#[utoipa::path(
    get,
    path = "/api/peers/{username}/job",
    params(
        ("username" = String, Path, description = "Username to query")
    ),
    responses(
        (status = 200, description = "Current job snapshot", body = JobResponse),
        (status = 404, description = "No job for this username", body = ErrorResponse)
    ),
    tag = "peers"
)]
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    debug!(username, "job status polled");

    state
        .provisioner
        .job_status(&username)
        .map(|job| Json(job.into()))
        .ok_or_else(|| not_found(format!("no job for '{username}'"), "job_not_found"))
}

/// Fetch the rendered client configuration for a completed peer
#[utoipa::path(
    get,
    path = "/api/peers/{username}/config",
    params(
        ("username" = String, Path, description = "Username to fetch the config for")
    ),
    responses(
        (status = 200, description = "Client tunnel configuration", body = ConfigResponse),
        (status = 400, description = "Invalid username", body = ErrorResponse),
        (status = 404, description = "No peer for this username", body = ErrorResponse),
        (status = 409, description = "Provisioning not completed yet", body = ErrorResponse),
        (status = 502, description = "VPN host unreachable", body = ErrorResponse)
    ),
    tag = "peers"
)]
pub async fn peer_config(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<ConfigResponse>, ApiError> {
    debug!(username, "config requested");

    match state.provisioner.peer_config(&username).await {
        Ok(config) => Ok(Json(ConfigResponse {
            filename: format!("{username}-wg.conf"),
            username,
            config,
        })),
        Err(ConfigError::Validation(e)) => Err(bad_request(e.to_string())),
        Err(e @ ConfigError::NotFound(_)) => Err(not_found(e.to_string(), "peer_not_found")),
        Err(e @ ConfigError::NotReady(_)) => Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse::new(e.to_string(), "not_ready")),
        )),
        Err(ConfigError::Remote(e)) => Err((
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse::new(e.to_string(), "remote_unavailable")),
        )),
    }
}

/// Retire a peer: remove it from the VPN host and release its address
#[utoipa::path(
    post,
    path = "/api/peers/{username}/disconnect",
    params(
        ("username" = String, Path, description = "Username to disconnect")
    ),
    responses(
        (status = 200, description = "Peer retired (or nothing to do)", body = DisconnectResponse),
        (status = 400, description = "Invalid username", body = ErrorResponse),
        (status = 502, description = "VPN host unreachable", body = ErrorResponse)
    ),
    tag = "peers"
)]
pub async fn disconnect_peer(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    info!(username, "disconnect requested");

    match state.provisioner.disconnect(&username).await {
        Ok(DisconnectOutcome::Removed(address)) => Ok(Json(DisconnectResponse {
            message: format!("peer for {username} retired"),
            released_address: Some(address.to_string()),
            username,
        })),
        Ok(DisconnectOutcome::NoActivePeer) => Ok(Json(DisconnectResponse {
            message: format!("no active peer for {username}, nothing to do"),
            released_address: None,
            username,
        })),
        Err(ProvisionError::Validation(e)) => Err(bad_request(e.to_string())),
        Err(e) => Err((
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse::new(e.to_string(), "remote_unavailable")),
        )),
    }
}

/// Read-only server aggregate: peer count and pool utilization
#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Server status", body = ServerStatusResponse)
    ),
    tag = "system"
)]
pub async fn server_status(State(state): State<Arc<AppState>>) -> Json<ServerStatusResponse> {
    let status = state.provisioner.server_status();
    Json(ServerStatusResponse {
        peer_count: status.peer_count,
        pool_capacity: status.pool_capacity,
        pool_leased: status.pool_leased,
        pool_utilization: status.pool_utilization,
    })
}

/// Probe SSH connectivity to the VPN host with one `wg show` round-trip
#[utoipa::path(
    get,
    path = "/api/test-connection",
    responses(
        (status = 200, description = "Probe outcome, reachable or not", body = TestConnectionResponse)
    ),
    tag = "system"
)]
pub async fn test_connection(State(state): State<Arc<AppState>>) -> Json<TestConnectionResponse> {
    info!("remote connectivity probe requested");

    match state.provisioner.test_connection().await {
        Ok(()) => Json(TestConnectionResponse {
            connected: true,
            message: "VPN host reachable, WireGuard interface responding".to_string(),
        }),
        Err(e) => Json(TestConnectionResponse {
            connected: false,
            message: e.to_string(),
        }),
    }
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}
