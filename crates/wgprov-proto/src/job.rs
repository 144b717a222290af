//! Provisioning job snapshots
//!
//! Each provisioning or disconnection attempt for a username is tracked as
//! a job. State transitions publish a new immutable `JobSnapshot` rather
//! than mutating shared state, so pollers always observe a consistent view
//! without taking the writers' locks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Authoritative job state
///
/// Progress percentages carried alongside are advisory, for dashboards
/// only; callers must branch on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Request accepted, orchestrator has not started reserving resources
    Pending,
    /// Orchestrator is reserving resources and installing the peer
    Processing,
    /// Peer fully installed and confirmed on the remote host
    Completed,
    /// A step failed; all partially-acquired resources were rolled back
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Error)
    }
}

/// Stable machine-readable failure reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Username rejected before any resource was touched
    Validation,
    /// No free address in the pool; no remote call was attempted
    PoolExhausted,
    /// Could not authenticate to the VPN host (configuration error)
    RemoteAuth,
    /// VPN host unreachable after the retry budget was exhausted
    RemoteUnavailable,
    /// Remote listing did not show the peer after a reported install
    Inconsistent,
    /// Unexpected internal failure
    Internal,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Validation => "validation",
            FailureReason::PoolExhausted => "pool_exhausted",
            FailureReason::RemoteAuth => "remote_auth",
            FailureReason::RemoteUnavailable => "remote_unavailable",
            FailureReason::Inconsistent => "inconsistent",
            FailureReason::Internal => "internal",
        }
    }
}

/// Immutable view of one provisioning job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Identifier shared by every snapshot of the same job
    pub id: Uuid,
    /// Username the job belongs to
    pub username: String,
    /// Authoritative state
    pub state: JobState,
    /// Advisory progress percentage (0-100)
    pub progress: u8,
    /// Human-readable status message
    pub message: String,
    /// Failure reason, present only in the `Error` state
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<FailureReason>,
    /// Tunnel address of the provisioned peer, present once `Completed`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<Ipv4Addr>,
    /// Timestamp of this snapshot
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// First snapshot of a newly accepted job
    pub fn pending(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            id: Uuid::new_v4(),
            message: format!("provisioning request for {username} accepted"),
            username,
            state: JobState::Pending,
            progress: 5,
            reason: None,
            address: None,
            updated_at: Utc::now(),
        }
    }

    /// Successor snapshot in the `Processing` state
    pub fn processing(&self, progress: u8, message: impl Into<String>) -> Self {
        Self {
            state: JobState::Processing,
            progress,
            message: message.into(),
            reason: None,
            address: None,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Terminal success snapshot
    pub fn completed(&self, address: Ipv4Addr, message: impl Into<String>) -> Self {
        Self {
            state: JobState::Completed,
            progress: 100,
            message: message.into(),
            reason: None,
            address: Some(address),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Terminal failure snapshot
    pub fn failed(&self, reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            state: JobState::Error,
            progress: 0,
            message: message.into(),
            reason: Some(reason),
            address: None,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
