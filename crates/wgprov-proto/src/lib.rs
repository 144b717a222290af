//! Shared types for the peer provisioning system
//!
//! This crate defines the core data model shared between the orchestrator,
//! the remote command channel, and the REST API: peer records, provisioning
//! job snapshots, and username validation. It performs no I/O.

pub mod job;
pub mod peer;

pub use job::{FailureReason, JobSnapshot, JobState};
pub use peer::{validate_username, PeerRecord, PeerState, ValidationError};

/// Maximum accepted username length
pub const MAX_USERNAME_LEN: usize = 32;
