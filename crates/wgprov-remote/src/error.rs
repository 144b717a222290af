//! Remote channel error taxonomy
//!
//! Authentication and connection-setup failures are configuration errors:
//! they are never retried and reach the orchestrator verbatim. Everything
//! network-shaped is transient and eligible for retry.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Cannot authenticate to the VPN host; not retried
    #[error("authentication to VPN host failed: {0}")]
    Auth(String),

    /// Network-level failure talking to the VPN host; retried with backoff
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// A single command attempt exceeded its time budget; retried
    #[error("remote command timed out after {0:?}")]
    Timeout(Duration),

    /// The remote command ran but reported failure
    #[error("remote command '{command}' failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The remote host returned output the channel cannot interpret
    #[error("unexpected remote output: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_) | RemoteError::Timeout(_))
    }
}
