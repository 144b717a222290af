//! REST API models
//!
//! Wire-level views of the control plane's types. Tunnel addresses are
//! carried as strings here so the schema stays plain JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use wgprov_proto::{JobSnapshot, JobState};

/// Job state as exposed over the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ApiJobState {
    Pending,
    Processing,
    Completed,
    Error,
}

impl From<JobState> for ApiJobState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Pending => ApiJobState::Pending,
            JobState::Processing => ApiJobState::Processing,
            JobState::Completed => ApiJobState::Completed,
            JobState::Error => ApiJobState::Error,
        }
    }
}

/// One provisioning job, as returned by provision and status endpoints
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobResponse {
    /// Job identifier, stable across state transitions
    pub id: Uuid,
    /// Username the job belongs to
    pub username: String,
    /// Authoritative job state
    pub state: ApiJobState,
    /// Advisory progress percentage (0-100)
    pub progress: u8,
    /// Human-readable status message
    pub message: String,
    /// Stable failure reason code, present in the error state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Tunnel address, present once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Timestamp of this snapshot
    pub updated_at: DateTime<Utc>,
}

impl From<JobSnapshot> for JobResponse {
    fn from(job: JobSnapshot) -> Self {
        Self {
            id: job.id,
            username: job.username,
            state: job.state.into(),
            progress: job.progress,
            message: job.message,
            reason: job.reason.map(|r| r.as_str().to_string()),
            address: job.address.map(|a| a.to_string()),
            updated_at: job.updated_at,
        }
    }
}

/// Rendered client configuration
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfigResponse {
    pub username: String,
    /// Tunnel config text, ready to import into a WireGuard client
    pub config: String,
    /// Suggested download filename
    pub filename: String,
}

/// Acknowledgement for disconnect requests
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DisconnectResponse {
    pub username: String,
    /// Address that was released, absent when there was no active peer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_address: Option<String>,
    pub message: String,
}

/// Read-only server aggregate
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServerStatusResponse {
    /// Number of registered peers
    pub peer_count: usize,
    /// Total leasable addresses in the pool
    pub pool_capacity: usize,
    /// Addresses currently leased
    pub pool_leased: usize,
    /// leased / capacity, 0.0 - 1.0
    pub pool_utilization: f64,
}

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of the remote connectivity diagnostic
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TestConnectionResponse {
    /// Whether the VPN host answered the probe
    pub connected: bool,
    pub message: String,
}

/// Error payload shared by all endpoints
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error description
    pub error: String,
    /// Stable machine-readable code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: &str) -> Self {
        Self {
            error: error.into(),
            code: Some(code.to_string()),
        }
    }
}
