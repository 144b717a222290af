//! End-to-end orchestrator tests against a scripted VPN host
//!
//! The fake host sits at the `RemoteExecutor` seam and emulates the `wg`
//! tooling: it keeps a peer table, answers `wg show ... dump`, and can be
//! told to fail a number of commands, reject authentication, or omit
//! peers from its listing.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use wgprov_control::{
    AddressPool, DisconnectOutcome, PeerRegistry, Provisioner, ProvisionerConfig,
};
use wgprov_proto::{FailureReason, JobSnapshot, JobState};
use wgprov_remote::{CommandOutput, RemoteError, RemoteExecutor, RetryPolicy, WgChannel};

const SERVER_KEY: &str = "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=";

struct FakeHost {
    peers: Mutex<HashMap<String, Ipv4Addr>>,
    commands: Mutex<Vec<String>>,
    fail_next: AtomicUsize,
    reject_auth: AtomicBool,
    omit_next_listings: AtomicUsize,
    exec_delay: Duration,
}

impl FakeHost {
    fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
            reject_auth: AtomicBool::new(false),
            omit_next_listings: AtomicUsize::new(0),
            exec_delay: Duration::from_millis(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = delay;
        self
    }

    fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn dump(&self) -> String {
        let mut out = format!("privkey\t{SERVER_KEY}\t51820\toff\n");
        if self.omit_next_listings.load(Ordering::SeqCst) > 0 {
            self.omit_next_listings.fetch_sub(1, Ordering::SeqCst);
            return out;
        }
        for (key, addr) in self.peers.lock().unwrap().iter() {
            out.push_str(&format!("{key}\t(none)\t(none)\t{addr}/32\t0\t0\t0\t25\n"));
        }
        out
    }
}

#[async_trait]
impl RemoteExecutor for FakeHost {
    async fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.commands.lock().unwrap().push(command.to_string());
        if !self.exec_delay.is_zero() {
            tokio::time::sleep(self.exec_delay).await;
        }

        if self.reject_auth.load(Ordering::SeqCst) {
            return Err(RemoteError::Auth("Permission denied (publickey)".into()));
        }
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(RemoteError::Transient("connection reset by peer".into()));
        }

        if command.ends_with("public-key") {
            return Ok(CommandOutput::ok(format!("{SERVER_KEY}\n")));
        }
        if command.ends_with("dump") {
            return Ok(CommandOutput::ok(self.dump()));
        }
        if command.starts_with("wg show") {
            return Ok(CommandOutput::ok("interface: wg0\n"));
        }

        let tokens: Vec<&str> = command.split_whitespace().collect();
        if let Some(i) = tokens.iter().position(|t| *t == "peer") {
            let key = tokens[i + 1].to_string();
            if tokens.get(i + 2) == Some(&"remove") {
                if self.peers.lock().unwrap().remove(&key).is_none() {
                    return Ok(CommandOutput {
                        stdout: String::new(),
                        stderr: "Unable to modify interface: No such peer".into(),
                        exit_code: 1,
                    });
                }
                return Ok(CommandOutput::ok(""));
            }
            let address: Ipv4Addr = tokens[i + 3]
                .split('/')
                .next()
                .unwrap()
                .parse()
                .expect("fake host received a malformed allowed-ips");
            self.peers.lock().unwrap().insert(key, address);
            return Ok(CommandOutput::ok(""));
        }

        Ok(CommandOutput {
            stdout: String::new(),
            stderr: format!("fake host: unknown command {command:?}"),
            exit_code: 127,
        })
    }
}

struct Rig {
    host: Arc<FakeHost>,
    pool: Arc<AddressPool>,
    registry: Arc<PeerRegistry>,
    provisioner: Provisioner,
}

fn rig_with(host: FakeHost, max_peers: usize) -> Rig {
    let host = Arc::new(host);
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };
    let channel = Arc::new(WgChannel::new(host.clone(), "wg0").with_retry(retry));
    let pool = Arc::new(
        AddressPool::new("10.8.0.0/24".parse().unwrap())
            .unwrap()
            .with_max_peers(max_peers),
    );
    let registry = Arc::new(PeerRegistry::in_memory());
    let provisioner = Provisioner::new(
        registry.clone(),
        pool.clone(),
        channel,
        ProvisionerConfig::new("203.0.113.9", 51820),
    );
    Rig {
        host,
        pool,
        registry,
        provisioner,
    }
}

fn rig(max_peers: usize) -> Rig {
    rig_with(FakeHost::new(), max_peers)
}

async fn wait_terminal(provisioner: &Provisioner, username: &str) -> JobSnapshot {
    for _ in 0..1000 {
        if let Some(job) = provisioner.job_status(username) {
            if job.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("job for {username} did not reach a terminal state");
}

#[tokio::test]
async fn provisions_first_peer_at_lowest_address() {
    let rig = rig(2);

    let job = rig.provisioner.provision("alice").unwrap();
    assert_eq!(job.state, JobState::Pending);

    let done = wait_terminal(&rig.provisioner, "alice").await;
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.address, Some(Ipv4Addr::new(10, 8, 0, 2)));

    let peer = rig.registry.get("alice").unwrap();
    assert_eq!(peer.address, Ipv4Addr::new(10, 8, 0, 2));
    assert_eq!(rig.host.peer_count(), 1);
}

#[tokio::test]
async fn rendered_config_matches_registry_address() {
    let rig = rig(2);
    rig.provisioner.provision("alice").unwrap();
    wait_terminal(&rig.provisioner, "alice").await;

    let config = rig.provisioner.peer_config("alice").await.unwrap();
    let peer = rig.registry.get("alice").unwrap();

    assert!(config.contains(&format!("Address = {}/24", peer.address)));
    assert!(config.contains(&format!("PrivateKey = {}", peer.private_key)));
    assert!(config.contains(&format!("PublicKey = {SERVER_KEY}")));
    assert!(config.contains("Endpoint = 203.0.113.9:51820"));
}

#[tokio::test]
async fn concurrent_requests_for_same_username_share_one_job() {
    let rig = rig_with(FakeHost::new().with_delay(Duration::from_millis(20)), 4);

    let first = rig.provisioner.provision("alice").unwrap();
    let second = rig.provisioner.provision("alice").unwrap();
    assert_eq!(first.id, second.id, "second caller must attach to the live job");

    let done = wait_terminal(&rig.provisioner, "alice").await;
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.id, first.id);

    assert_eq!(rig.registry.count(), 1);
    assert_eq!(rig.pool.leased_count(), 1);
    assert_eq!(rig.host.peer_count(), 1);
}

#[tokio::test]
async fn pool_exhaustion_fails_fast_without_remote_calls() {
    let rig = rig(2);

    rig.provisioner.provision("alice").unwrap();
    wait_terminal(&rig.provisioner, "alice").await;
    rig.provisioner.provision("bob").unwrap();
    wait_terminal(&rig.provisioner, "bob").await;

    let commands_before = rig.host.commands().len();
    rig.provisioner.provision("carol").unwrap();
    let failed = wait_terminal(&rig.provisioner, "carol").await;

    assert_eq!(failed.state, JobState::Error);
    assert_eq!(failed.reason, Some(FailureReason::PoolExhausted));
    assert_eq!(
        rig.host.commands().len(),
        commands_before,
        "pool exhaustion must not reach the remote host"
    );
    assert_eq!(rig.registry.count(), 2);
}

#[tokio::test]
async fn transient_failures_within_budget_are_invisible() {
    let rig = rig(2);
    // First two command attempts fail, the third succeeds.
    rig.host.fail_next.store(2, Ordering::SeqCst);

    rig.provisioner.provision("alice").unwrap();
    let done = wait_terminal(&rig.provisioner, "alice").await;

    assert_eq!(done.state, JobState::Completed);
    assert_eq!(rig.host.peer_count(), 1);
}

#[tokio::test]
async fn permanent_remote_failure_releases_the_address() {
    let rig = rig(2);
    rig.host.fail_next.store(100, Ordering::SeqCst);

    rig.provisioner.provision("alice").unwrap();
    let failed = wait_terminal(&rig.provisioner, "alice").await;

    assert_eq!(failed.state, JobState::Error);
    assert_eq!(failed.reason, Some(FailureReason::RemoteUnavailable));
    assert_eq!(rig.registry.count(), 0);

    // The lease must be back in the pool once the fault clears.
    rig.host.fail_next.store(0, Ordering::SeqCst);
    rig.provisioner.provision("bob").unwrap();
    let done = wait_terminal(&rig.provisioner, "bob").await;
    assert_eq!(done.address, Some(Ipv4Addr::new(10, 8, 0, 2)));
}

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let rig = rig(2);
    rig.host.reject_auth.store(true, Ordering::SeqCst);

    rig.provisioner.provision("alice").unwrap();
    let failed = wait_terminal(&rig.provisioner, "alice").await;

    assert_eq!(failed.state, JobState::Error);
    assert_eq!(failed.reason, Some(FailureReason::RemoteAuth));
    // One add attempt, one rollback attempt; no retries in between.
    assert_eq!(rig.host.commands().len(), 2);
    assert_eq!(rig.pool.leased_count(), 0);
}

#[tokio::test]
async fn listing_omission_rolls_back_after_one_retry() {
    let rig = rig(2);
    // The install reports success but both listing reads omit the peer.
    rig.host.omit_next_listings.store(2, Ordering::SeqCst);

    rig.provisioner.provision("alice").unwrap();
    let failed = wait_terminal(&rig.provisioner, "alice").await;

    assert_eq!(failed.state, JobState::Error);
    assert_eq!(failed.reason, Some(FailureReason::Inconsistent));
    assert_eq!(rig.registry.count(), 0);
    assert_eq!(rig.pool.leased_count(), 0);
    assert!(
        rig.host.commands().iter().any(|c| c.contains("remove")),
        "rollback must remove the partially-installed remote peer"
    );

    // The released address is reusable.
    rig.provisioner.provision("bob").unwrap();
    let done = wait_terminal(&rig.provisioner, "bob").await;
    assert_eq!(done.address, Some(Ipv4Addr::new(10, 8, 0, 2)));
}

#[tokio::test]
async fn reprovisioning_reuses_address_and_keys() {
    let rig = rig(2);

    rig.provisioner.provision("alice").unwrap();
    let first = wait_terminal(&rig.provisioner, "alice").await;
    let original = rig.registry.get("alice").unwrap();

    let rerun = rig.provisioner.provision("alice").unwrap();
    assert_ne!(rerun.id, first.id, "a finished job is superseded by a new one");
    let done = wait_terminal(&rig.provisioner, "alice").await;

    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.address, first.address);

    let current = rig.registry.get("alice").unwrap();
    assert_eq!(current.public_key, original.public_key);
    assert_eq!(current.address, original.address);
    assert_eq!(rig.registry.count(), 1);
    assert_eq!(rig.pool.leased_count(), 1);
}

#[tokio::test]
async fn disconnect_retires_peer_and_frees_address() {
    let rig = rig(2);
    rig.provisioner.provision("alice").unwrap();
    wait_terminal(&rig.provisioner, "alice").await;

    let outcome = rig.provisioner.disconnect("alice").await.unwrap();
    assert_eq!(outcome, DisconnectOutcome::Removed(Ipv4Addr::new(10, 8, 0, 2)));

    assert_eq!(rig.registry.count(), 0);
    assert_eq!(rig.pool.leased_count(), 0);
    assert_eq!(rig.host.peer_count(), 0);
    assert!(
        rig.provisioner.job_status("alice").is_none(),
        "job tracking state must not outlive the retired peer"
    );

    // A later provision allocates fresh resources.
    rig.provisioner.provision("alice").unwrap();
    let done = wait_terminal(&rig.provisioner, "alice").await;
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.address, Some(Ipv4Addr::new(10, 8, 0, 2)));
    assert_eq!(rig.registry.count(), 1);
}

#[tokio::test]
async fn disconnect_of_unknown_username_is_noop_success() {
    let rig = rig(2);
    let outcome = rig.provisioner.disconnect("ghost").await.unwrap();
    assert_eq!(outcome, DisconnectOutcome::NoActivePeer);
    assert!(rig.host.commands().is_empty());
}

#[tokio::test]
async fn invalid_username_rejected_before_any_resource() {
    let rig = rig(2);
    assert!(rig.provisioner.provision("").is_err());
    assert!(rig.provisioner.provision("alice; rm -rf /").is_err());
    assert!(rig.host.commands().is_empty());
    assert_eq!(rig.pool.leased_count(), 0);
}

#[tokio::test]
async fn config_unavailable_until_job_completes() {
    let rig = rig_with(FakeHost::new().with_delay(Duration::from_millis(30)), 2);
    rig.provisioner.provision("alice").unwrap();

    let early = rig.provisioner.peer_config("alice").await;
    assert!(early.is_err(), "config must not be served mid-provisioning");

    wait_terminal(&rig.provisioner, "alice").await;
    assert!(rig.provisioner.peer_config("alice").await.is_ok());
}

#[tokio::test]
async fn connection_probe_reports_reachable_host() {
    let rig = rig(2);

    rig.provisioner.test_connection().await.unwrap();
    assert_eq!(rig.host.commands(), vec!["wg show wg0".to_string()]);
}

#[tokio::test]
async fn connection_probe_fails_in_one_attempt() {
    let rig = rig(2);
    rig.host.fail_next.store(1, Ordering::SeqCst);

    assert!(rig.provisioner.test_connection().await.is_err());
    assert_eq!(
        rig.host.commands().len(),
        1,
        "the diagnostic probe must not retry"
    );
}

#[tokio::test]
async fn server_status_reflects_pool_and_registry() {
    let rig = rig(4);
    rig.provisioner.provision("alice").unwrap();
    wait_terminal(&rig.provisioner, "alice").await;
    rig.provisioner.provision("bob").unwrap();
    wait_terminal(&rig.provisioner, "bob").await;

    let status = rig.provisioner.server_status();
    assert_eq!(status.peer_count, 2);
    assert_eq!(status.pool_capacity, 4);
    assert_eq!(status.pool_leased, 2);
    assert!((status.pool_utilization - 0.5).abs() < f64::EPSILON);
}
