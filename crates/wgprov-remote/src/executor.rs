//! Remote execution over SSH
//!
//! `RemoteExecutor` is the seam between the channel vocabulary and the
//! transport. The production implementation shells out to the system
//! `ssh` binary; tests substitute scripted executors.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::RemoteError;

/// Structured result of one remote command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes privileged configuration commands on the VPN host
///
/// Implementations must distinguish transport/authentication failures
/// (returned as `Err`) from commands that ran and reported a non-zero
/// exit status (returned as `Ok` with the exit code).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError>;
}

/// Connection settings for the SSH transport
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// VPN host address
    pub host: String,
    /// Remote login user
    pub user: String,
    /// SSH port
    pub port: u16,
    /// Identity file; agent/default keys are used when absent
    pub key_path: Option<PathBuf>,
    /// TCP/auth setup budget per attempt
    pub connect_timeout: Duration,
    /// Total budget for one command attempt
    pub command_timeout: Duration,
}

impl SshConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: 22,
            key_path: None,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// `RemoteExecutor` backed by the system `ssh` binary
///
/// BatchMode keeps the process from blocking on password prompts, so a
/// missing or rejected key fails fast as an auth error.
pub struct SshExecutor {
    config: SshConfig,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.config.connect_timeout.as_secs().max(1)
            ))
            .arg("-p")
            .arg(self.config.port.to_string());
        if let Some(key) = &self.config.key_path {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(format!("{}@{}", self.config.user, self.config.host))
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// stderr markers that indicate an authentication/setup problem rather
/// than a flaky network
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "Permission denied",
    "Host key verification failed",
    "No such identity",
    "Authentication failed",
    "Too many authentication failures",
];

fn classify_ssh_failure(stderr: &str) -> RemoteError {
    let line = stderr.lines().last().unwrap_or("ssh failed").to_string();
    if AUTH_FAILURE_MARKERS.iter().any(|m| stderr.contains(m)) {
        RemoteError::Auth(line)
    } else {
        RemoteError::Transient(line)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        debug!(host = %self.config.host, command, "executing remote command");

        let child = self
            .build_command(command)
            .spawn()
            .map_err(|e| RemoteError::Transient(format!("failed to spawn ssh: {e}")))?;

        let output = tokio::time::timeout(self.config.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| RemoteError::Timeout(self.config.command_timeout))?
            .map_err(|e| RemoteError::Transient(format!("ssh did not run: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        // Exit code 255 is ssh itself failing (connect, auth, host key);
        // anything else is the remote command's own status.
        if exit_code == 255 {
            return Err(classify_ssh_failure(&stderr));
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_markers_classified_as_auth() {
        let err = classify_ssh_failure("root@vpn: Permission denied (publickey).");
        assert!(matches!(err, RemoteError::Auth(_)));

        let err = classify_ssh_failure("Host key verification failed.");
        assert!(matches!(err, RemoteError::Auth(_)));
    }

    #[test]
    fn test_network_failures_classified_as_transient() {
        let err = classify_ssh_failure("ssh: connect to host 1.2.3.4 port 22: Connection refused");
        assert!(matches!(err, RemoteError::Transient(_)));

        let err = classify_ssh_failure("Connection timed out during banner exchange");
        assert!(matches!(err, RemoteError::Transient(_)));
    }

    #[test]
    fn test_ssh_argv_shape() {
        let mut config = SshConfig::new("203.0.113.9", "root");
        config.port = 2222;
        config.key_path = Some(PathBuf::from("/etc/wgprov/id_ed25519"));
        let executor = SshExecutor::new(config);

        let cmd = executor.build_command("wg show wg0 dump");
        let argv: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(argv.contains(&"BatchMode=yes".to_string()));
        assert!(argv.contains(&"2222".to_string()));
        assert!(argv.contains(&"root@203.0.113.9".to_string()));
        assert!(argv.contains(&"/etc/wgprov/id_ed25519".to_string()));
        assert_eq!(argv.last().unwrap(), "wg show wg0 dump");
    }
}
