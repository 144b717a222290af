//! Peer records and username validation
//!
//! A `PeerRecord` is one VPN client identity: a username, its tunnel
//! address, and its keypair. The registry holds exactly one non-retired
//! record per username and one record per tunnel address.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::MAX_USERNAME_LEN;

/// Lifecycle state of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    /// Peer is installed and its address is leased
    Active,
    /// Peer has been retired; its address is eligible for reuse
    Retired,
}

/// One provisioned VPN client identity
#[derive(Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Owning username (unique, immutable once created)
    pub username: String,
    /// Tunnel address inside the VPN subnet
    pub address: Ipv4Addr,
    /// Base64-encoded client public key
    pub public_key: String,
    /// Base64-encoded client private key (rendered into the client config
    /// and never logged)
    pub private_key: String,
    /// Lifecycle state
    pub state: PeerState,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last provisioning error observed for this peer, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_error: Option<String>,
}

impl PeerRecord {
    /// Create a new active peer record
    pub fn new(
        username: impl Into<String>,
        address: Ipv4Addr,
        public_key: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            address,
            public_key: public_key.into(),
            private_key: private_key.into(),
            state: PeerState::Active,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == PeerState::Active
    }
}

// The private key must never reach logs through a Debug format.
impl fmt::Debug for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRecord")
            .field("username", &self.username)
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .field("private_key", &"[redacted]")
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Username rejection reasons
///
/// Usernames are interpolated into remote shell commands and file paths,
/// so the accepted alphabet is deliberately narrow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("username must not be empty")]
    Empty,

    #[error("username exceeds {MAX_USERNAME_LEN} characters (got {0})")]
    TooLong(usize),

    #[error("username contains invalid character '{0}'")]
    InvalidCharacter(char),

    #[error("username must start with a letter or digit")]
    InvalidStart,
}

/// Validate a username before any resource is touched
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() {
        return Err(ValidationError::Empty);
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(ValidationError::TooLong(username.len()));
    }
    let first = username.chars().next().unwrap();
    if !first.is_ascii_alphanumeric() {
        return Err(ValidationError::InvalidStart);
    }
    for c in username.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
            return Err(ValidationError::InvalidCharacter(c));
        }
    }
    Ok(())
}
