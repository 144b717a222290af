//! Remote command channel for the VPN host
//!
//! This crate is the only path by which the system touches the WireGuard
//! host. It executes a fixed vocabulary of configuration commands
//! (add-peer, remove-peer, list-peers, server-public-key) over an
//! authenticated SSH transport and returns structured results instead of
//! raw text. Transient failures are retried with bounded exponential
//! backoff; authentication failures are surfaced immediately.

pub mod channel;
pub mod error;
pub mod executor;
pub mod retry;

pub use channel::{RemotePeer, WgChannel};
pub use error::RemoteError;
pub use executor::{CommandOutput, RemoteExecutor, SshConfig, SshExecutor};
pub use retry::RetryPolicy;
