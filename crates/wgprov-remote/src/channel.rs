//! WireGuard command vocabulary
//!
//! `WgChannel` turns the executor's raw command results into structured
//! peer-table operations. The channel contract is idempotent: re-adding a
//! peer that already exists succeeds (`wg set` is an upsert), and removing
//! an absent peer succeeds.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::RemoteError;
use crate::executor::{CommandOutput, RemoteExecutor};
use crate::retry::RetryPolicy;

/// One entry of the remote peer table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    /// Base64-encoded public key
    pub public_key: String,
    /// Tunnel address from the first allowed-ips entry, when present
    pub address: Option<Ipv4Addr>,
}

/// Structured interface to the remote WireGuard peer table
pub struct WgChannel {
    executor: Arc<dyn RemoteExecutor>,
    interface: String,
    retry: RetryPolicy,
}

impl WgChannel {
    pub fn new(executor: Arc<dyn RemoteExecutor>, interface: impl Into<String>) -> Self {
        Self {
            executor,
            interface: interface.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Install or refresh a peer on the running interface and persist the
    /// interface configuration.
    pub async fn add_peer(&self, public_key: &str, address: Ipv4Addr) -> Result<(), RemoteError> {
        validate_key(public_key)?;
        let command = format!(
            "wg set {iface} peer {public_key} allowed-ips {address}/32 && wg-quick save {iface}",
            iface = self.interface,
        );

        let output = self
            .retry
            .run("add-peer", || self.executor.exec(&command))
            .await?;
        require_success(&command, output)?;

        info!(%address, public_key, "peer installed on remote interface");
        Ok(())
    }

    /// Remove a peer from the running interface; absent peers are a
    /// success, not an error.
    pub async fn remove_peer(&self, public_key: &str) -> Result<(), RemoteError> {
        validate_key(public_key)?;
        let command = format!(
            "wg set {iface} peer {public_key} remove && wg-quick save {iface}",
            iface = self.interface,
        );

        let output = self
            .retry
            .run("remove-peer", || self.executor.exec(&command))
            .await?;

        if !output.success() && output.stderr.contains("No such peer") {
            debug!(public_key, "peer already absent from remote interface");
            return Ok(());
        }
        require_success(&command, output)?;

        info!(public_key, "peer removed from remote interface");
        Ok(())
    }

    /// Read the remote peer table
    pub async fn list_peers(&self) -> Result<Vec<RemotePeer>, RemoteError> {
        let command = format!("wg show {} dump", self.interface);
        let output = self
            .retry
            .run("list-peers", || self.executor.exec(&command))
            .await?;
        let output = require_success(&command, output)?;
        parse_dump(&output.stdout)
    }

    /// One-shot reachability probe: connect and run `wg show` on the
    /// interface. Deliberately a single attempt, so a diagnostic call
    /// does not burn the retry budget.
    pub async fn check_connection(&self) -> Result<(), RemoteError> {
        let command = format!("wg show {}", self.interface);
        let output = self.executor.exec(&command).await?;
        require_success(&command, output)?;
        Ok(())
    }

    /// Read the server's public key
    pub async fn server_public_key(&self) -> Result<String, RemoteError> {
        let command = format!("wg show {} public-key", self.interface);
        let output = self
            .retry
            .run("server-public-key", || self.executor.exec(&command))
            .await?;
        let output = require_success(&command, output)?;

        let key = output.stdout.trim().to_string();
        validate_key(&key)
            .map_err(|_| RemoteError::Protocol(format!("invalid server public key: {key:?}")))?;
        Ok(key)
    }
}

fn require_success(command: &str, output: CommandOutput) -> Result<CommandOutput, RemoteError> {
    if output.success() {
        Ok(output)
    } else {
        Err(RemoteError::CommandFailed {
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// Keys are interpolated into a remote shell command; only accept strings
/// that decode to exactly 32 bytes of key material.
fn validate_key(public_key: &str) -> Result<(), RemoteError> {
    let bytes = BASE64
        .decode(public_key)
        .map_err(|_| RemoteError::Protocol(format!("key is not valid base64: {public_key:?}")))?;
    if bytes.len() != 32 {
        return Err(RemoteError::Protocol(format!(
            "key must decode to 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

/// Parse `wg show <if> dump` output
///
/// The first line describes the interface; each following line is one
/// peer: public-key, preshared-key, endpoint, allowed-ips, handshake,
/// rx, tx, keepalive (tab-separated).
fn parse_dump(dump: &str) -> Result<Vec<RemotePeer>, RemoteError> {
    let mut peers = Vec::new();
    for line in dump.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            return Err(RemoteError::Protocol(format!(
                "malformed peer line in wg dump: {line:?}"
            )));
        }
        let address = fields[3]
            .split(',')
            .next()
            .and_then(|cidr| cidr.split('/').next())
            .and_then(|ip| ip.parse::<Ipv4Addr>().ok());
        peers.push(RemotePeer {
            public_key: fields[0].to_string(),
            address,
        });
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockRemoteExecutor;
    use mockall::predicate::eq;
    use std::time::Duration;

    const KEY: &str = "YDbqCsuxAQmfzVvjqmKHi4c29ZWkCreMCxa1S9rKRHM=";
    const SERVER_KEY: &str = "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=";

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn channel(mock: MockRemoteExecutor) -> WgChannel {
        WgChannel::new(Arc::new(mock), "wg0").with_retry(fast_retry())
    }

    #[tokio::test]
    async fn test_add_peer_command_shape() {
        let mut mock = MockRemoteExecutor::new();
        let expected =
            format!("wg set wg0 peer {KEY} allowed-ips 10.8.0.2/32 && wg-quick save wg0");
        mock.expect_exec()
            .withf(move |cmd| cmd == expected)
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("")));

        channel(mock)
            .add_peer(KEY, Ipv4Addr::new(10, 8, 0, 2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_peer_retries_transient_then_succeeds() {
        let mut mock = MockRemoteExecutor::new();
        let mut calls = 0;
        mock.expect_exec().times(3).returning(move |_| {
            calls += 1;
            if calls < 3 {
                Err(RemoteError::Transient("connection reset".into()))
            } else {
                Ok(CommandOutput::ok(""))
            }
        });

        channel(mock)
            .add_peer(KEY, Ipv4Addr::new(10, 8, 0, 2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_peer_auth_failure_surfaces_immediately() {
        let mut mock = MockRemoteExecutor::new();
        mock.expect_exec()
            .times(1)
            .returning(|_| Err(RemoteError::Auth("Permission denied".into())));

        let result = channel(mock).add_peer(KEY, Ipv4Addr::new(10, 8, 0, 2)).await;
        assert!(matches!(result, Err(RemoteError::Auth(_))));
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_any_remote_call() {
        let mut mock = MockRemoteExecutor::new();
        mock.expect_exec().times(0);

        let result = channel(mock)
            .add_peer("not-a-key; rm -rf /", Ipv4Addr::new(10, 8, 0, 2))
            .await;
        assert!(matches!(result, Err(RemoteError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_remove_absent_peer_is_success() {
        let mut mock = MockRemoteExecutor::new();
        mock.expect_exec().times(1).returning(|_| {
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: "Unable to modify interface: No such peer".into(),
                exit_code: 1,
            })
        });

        channel(mock).remove_peer(KEY).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_peer_other_failure_is_error() {
        let mut mock = MockRemoteExecutor::new();
        mock.expect_exec().times(1).returning(|_| {
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: "Unable to access interface: Operation not permitted".into(),
                exit_code: 1,
            })
        });

        let result = channel(mock).remove_peer(KEY).await;
        assert!(matches!(result, Err(RemoteError::CommandFailed { .. })));
    }

    #[tokio::test]
    async fn test_list_peers_parses_dump() {
        let dump = format!(
            "privkey\t{SERVER_KEY}\t51820\toff\n\
             {KEY}\t(none)\t198.51.100.7:40400\t10.8.0.2/32\t1712345678\t1024\t2048\t25\n"
        );
        let mut mock = MockRemoteExecutor::new();
        mock.expect_exec()
            .with(eq("wg show wg0 dump"))
            .times(1)
            .returning(move |_| Ok(CommandOutput::ok(dump.clone())));

        let peers = channel(mock).list_peers().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].public_key, KEY);
        assert_eq!(peers[0].address, Some(Ipv4Addr::new(10, 8, 0, 2)));
    }

    #[tokio::test]
    async fn test_list_peers_empty_table() {
        let mut mock = MockRemoteExecutor::new();
        mock.expect_exec()
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("privkey\tpubkey\t51820\toff\n")));

        let peers = channel(mock).list_peers().await.unwrap();
        assert!(peers.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_dump_is_protocol_error() {
        let mut mock = MockRemoteExecutor::new();
        mock.expect_exec()
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("header\ngarbage-line\n")));

        let result = channel(mock).list_peers().await;
        assert!(matches!(result, Err(RemoteError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_check_connection_runs_wg_show() {
        let mut mock = MockRemoteExecutor::new();
        mock.expect_exec()
            .with(eq("wg show wg0"))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("interface: wg0\n")));

        channel(mock).check_connection().await.unwrap();
    }

    #[tokio::test]
    async fn test_check_connection_is_a_single_attempt() {
        let mut mock = MockRemoteExecutor::new();
        mock.expect_exec()
            .times(1)
            .returning(|_| Err(RemoteError::Transient("connection reset".into())));

        let result = channel(mock).check_connection().await;
        assert!(matches!(result, Err(RemoteError::Transient(_))));
    }

    #[tokio::test]
    async fn test_server_public_key_trimmed_and_validated() {
        let mut mock = MockRemoteExecutor::new();
        mock.expect_exec()
            .with(eq("wg show wg0 public-key"))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok(format!("{SERVER_KEY}\n"))));

        let key = channel(mock).server_public_key().await.unwrap();
        assert_eq!(key, SERVER_KEY);
    }

    #[tokio::test]
    async fn test_server_public_key_garbage_rejected() {
        let mut mock = MockRemoteExecutor::new();
        mock.expect_exec()
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("wg: command not found\n")));

        let result = channel(mock).server_public_key().await;
        assert!(matches!(result, Err(RemoteError::Protocol(_))));
    }
}
