//! Provisioning orchestrator
//!
//! Drives the `pending -> processing -> {completed | error}` state
//! machine for each username: allocate an address, generate a keypair,
//! install the peer on the remote host, confirm it in the remote listing,
//! then record it in the registry. Any failure rolls back already-acquired
//! resources in reverse acquisition order and lands the job in `error`.
//!
//! Concurrency discipline:
//! - at most one in-flight run per username (per-username async lock);
//!   concurrent requests attach to the existing job,
//! - remote peer-table writes are single-writer (one shared async lock),
//! - the allocator lock is short-held and never spans a remote call.

use std::net::Ipv4Addr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use wgprov_proto::{
    validate_username, FailureReason, JobSnapshot, PeerRecord, ValidationError,
};
use wgprov_remote::{RemoteError, WgChannel};

use crate::allocator::{AddressPool, AllocationError};
use crate::jobs::{JobTracker, StartOutcome};
use crate::keys::KeyPair;
use crate::registry::PeerRegistry;
use crate::render::{client_config, RenderParams};

/// Failures inside an orchestrator run
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("peer {0} missing from remote listing after install")]
    Inconsistent(String),
}

impl ProvisionError {
    /// Stable machine-readable reason for the job record
    pub fn reason(&self) -> FailureReason {
        match self {
            ProvisionError::Validation(_) => FailureReason::Validation,
            ProvisionError::Allocation(AllocationError::PoolExhausted(_)) => {
                FailureReason::PoolExhausted
            }
            ProvisionError::Allocation(_) => FailureReason::Internal,
            ProvisionError::Remote(RemoteError::Auth(_)) => FailureReason::RemoteAuth,
            ProvisionError::Remote(_) => FailureReason::RemoteUnavailable,
            ProvisionError::Inconsistent(_) => FailureReason::Inconsistent,
        }
    }
}

/// Failures when fetching a rendered client config
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no peer found for '{0}'")]
    NotFound(String),

    #[error("provisioning for '{0}' has not completed")]
    NotReady(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Result of a disconnect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// The peer was removed and its address released
    Removed(Ipv4Addr),
    /// Nothing to do: the username had no active peer
    NoActivePeer,
}

/// Read-only aggregate for dashboards
#[derive(Debug, Clone, Copy)]
pub struct ServerStatus {
    pub peer_count: usize,
    pub pool_capacity: usize,
    pub pool_leased: usize,
    pub pool_utilization: f64,
}

/// Rendering and endpoint parameters for client configs
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub endpoint_host: String,
    pub endpoint_port: u16,
    pub dns: String,
    pub allowed_ips: String,
    pub persistent_keepalive: u16,
    pub address_prefix: u8,
}

impl ProvisionerConfig {
    pub fn new(endpoint_host: impl Into<String>, endpoint_port: u16) -> Self {
        Self {
            endpoint_host: endpoint_host.into(),
            endpoint_port,
            dns: "8.8.8.8, 1.1.1.1".to_string(),
            allowed_ips: "0.0.0.0/0".to_string(),
            persistent_keepalive: 25,
            address_prefix: 24,
        }
    }
}

struct Inner {
    registry: Arc<PeerRegistry>,
    pool: Arc<AddressPool>,
    channel: Arc<WgChannel>,
    jobs: JobTracker,
    /// Remote peer-table mutations are a single-writer resource
    remote_write: tokio::sync::Mutex<()>,
    /// Server public key, fetched from the host once and cached
    server_key: tokio::sync::OnceCell<String>,
    config: ProvisionerConfig,
}

/// The provisioning orchestrator. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Provisioner {
    inner: Arc<Inner>,
}

impl Provisioner {
    /// Wire up the orchestrator and rebuild pool leases from any peers
    /// the registry loaded from disk.
    pub fn new(
        registry: Arc<PeerRegistry>,
        pool: Arc<AddressPool>,
        channel: Arc<WgChannel>,
        config: ProvisionerConfig,
    ) -> Self {
        for peer in registry.list() {
            if peer.is_active() && !pool.lease(peer.address) {
                warn!(
                    username = %peer.username,
                    address = %peer.address,
                    "persisted peer address could not be leased from the pool"
                );
            }
        }
        Self {
            inner: Arc::new(Inner {
                registry,
                pool,
                channel,
                jobs: JobTracker::new(),
                remote_write: tokio::sync::Mutex::new(()),
                server_key: tokio::sync::OnceCell::new(),
                config,
            }),
        }
    }

    /// Start a provisioning job for `username`, or re-attach to the job
    /// already in flight. Returns immediately; callers poll `job_status`.
    pub fn provision(&self, username: &str) -> Result<JobSnapshot, ValidationError> {
        validate_username(username)?;

        match self.inner.jobs.start(username) {
            StartOutcome::Attached(job) => Ok(job),
            StartOutcome::Started(job) => {
                info!(username, job_id = %job.id, "provisioning job started");
                let orchestrator = self.clone();
                let spawned = job.clone();
                tokio::spawn(async move {
                    orchestrator.run_job(spawned).await;
                });
                Ok(job)
            }
        }
    }

    /// Current job snapshot for a username; never touches the remote host
    pub fn job_status(&self, username: &str) -> Option<JobSnapshot> {
        self.inner.jobs.get(username)
    }

    /// Rendered client config, available once provisioning completed
    pub async fn peer_config(&self, username: &str) -> Result<String, ConfigError> {
        validate_username(username)?;

        if let Some(job) = self.inner.jobs.get(username) {
            if !job.is_terminal() {
                return Err(ConfigError::NotReady(username.to_string()));
            }
        }
        let peer = self
            .inner
            .registry
            .get(username)
            .filter(PeerRecord::is_active)
            .ok_or_else(|| ConfigError::NotFound(username.to_string()))?;

        let server_key = self.server_public_key().await?;
        let cfg = &self.inner.config;
        let params = RenderParams {
            server_public_key: server_key,
            endpoint_host: cfg.endpoint_host.clone(),
            endpoint_port: cfg.endpoint_port,
            dns: cfg.dns.clone(),
            allowed_ips: cfg.allowed_ips.clone(),
            persistent_keepalive: cfg.persistent_keepalive,
            address_prefix: cfg.address_prefix,
        };
        Ok(client_config(&peer, &params))
    }

    /// Retire a peer: remove the remote entry, release the address, and
    /// delete the registry record. Disconnecting a username with no
    /// active peer is a no-op success.
    pub async fn disconnect(&self, username: &str) -> Result<DisconnectOutcome, ProvisionError> {
        validate_username(username)?;

        let lock = self.inner.jobs.user_lock(username);
        let _user_guard = lock.lock().await;

        let Some(peer) = self.inner.registry.get(username).filter(PeerRecord::is_active) else {
            info!(username, "disconnect requested for unknown peer, nothing to do");
            return Ok(DisconnectOutcome::NoActivePeer);
        };

        {
            let _write_guard = self.inner.remote_write.lock().await;
            self.inner.channel.remove_peer(&peer.public_key).await?;
        }
        self.inner.pool.release(peer.address);
        self.inner.registry.delete(username);
        self.inner.jobs.forget(username);

        info!(username, address = %peer.address, "peer retired");
        Ok(DisconnectOutcome::Removed(peer.address))
    }

    /// Reachability diagnostic: one SSH round-trip running `wg show` on
    /// the managed interface, without retries.
    pub async fn test_connection(&self) -> Result<(), RemoteError> {
        self.inner.channel.check_connection().await
    }

    /// Read-only aggregate; never touches the remote host
    pub fn server_status(&self) -> ServerStatus {
        let capacity = self.inner.pool.capacity();
        let leased = self.inner.pool.leased_count();
        ServerStatus {
            peer_count: self.inner.registry.count(),
            pool_capacity: capacity,
            pool_leased: leased,
            pool_utilization: if capacity == 0 {
                0.0
            } else {
                leased as f64 / capacity as f64
            },
        }
    }

    async fn server_public_key(&self) -> Result<String, RemoteError> {
        self.inner
            .server_key
            .get_or_try_init(|| self.inner.channel.server_public_key())
            .await
            .cloned()
    }

    async fn run_job(self, job: JobSnapshot) {
        let username = job.username.clone();
        let lock = self.inner.jobs.user_lock(&username);
        let _user_guard = lock.lock().await;

        let outcome = self.execute(&job).await;
        let final_snapshot = match outcome {
            Ok(address) => {
                info!(username, %address, "provisioning completed");
                job.completed(address, format!("peer for {username} installed and confirmed"))
            }
            Err(err) => {
                error!(username, error = %err, reason = err.reason().as_str(), "provisioning failed");
                self.record_peer_error(&username, &err);
                job.failed(err.reason(), err.to_string())
            }
        };
        self.inner.jobs.publish(final_snapshot);
    }

    async fn execute(&self, job: &JobSnapshot) -> Result<Ipv4Addr, ProvisionError> {
        let username = job.username.as_str();

        // Idempotent reconnect: a still-valid peer keeps its address and
        // keys; the remote entry is simply re-asserted.
        if let Some(peer) = self.inner.registry.get(username).filter(PeerRecord::is_active) {
            info!(username, address = %peer.address, "re-provisioning existing peer");
            self.inner
                .jobs
                .publish(job.processing(45, "re-installing existing peer on VPN host"));
            {
                let _write_guard = self.inner.remote_write.lock().await;
                self.inner.channel.add_peer(&peer.public_key, peer.address).await?;
            }
            self.inner
                .jobs
                .publish(job.processing(75, "confirming peer on VPN host"));
            self.confirm_installed(&peer.public_key).await?;
            return Ok(peer.address);
        }

        self.inner
            .jobs
            .publish(job.processing(20, "allocating tunnel address"));
        let address = self.inner.pool.allocate()?;
        let keys = KeyPair::generate();

        self.inner
            .jobs
            .publish(job.processing(45, "installing peer on VPN host"));

        let installed: Result<(), ProvisionError> = async {
            {
                let _write_guard = self.inner.remote_write.lock().await;
                self.inner.channel.add_peer(&keys.public_key, address).await?;
            }
            self.inner
                .jobs
                .publish(job.processing(75, "confirming peer on VPN host"));
            self.confirm_installed(&keys.public_key).await
        }
        .await;

        match installed {
            Ok(()) => {
                self.inner.registry.put(PeerRecord::new(
                    username,
                    address,
                    keys.public_key,
                    keys.private_key,
                ));
                Ok(address)
            }
            Err(err) => {
                self.rollback(username, address, &keys.public_key).await;
                Err(err)
            }
        }
    }

    /// Confirm the installed peer shows up in the remote listing; the
    /// listing is re-read once before this counts as a consistency
    /// failure.
    async fn confirm_installed(&self, public_key: &str) -> Result<(), ProvisionError> {
        for attempt in 0..2 {
            let peers = self.inner.channel.list_peers().await?;
            if peers.iter().any(|p| p.public_key == public_key) {
                return Ok(());
            }
            if attempt == 0 {
                warn!(public_key, "installed peer missing from remote listing, re-reading");
            }
        }
        Err(ProvisionError::Inconsistent(public_key.to_string()))
    }

    /// Undo a partial provisioning run, in reverse acquisition order:
    /// remote entry first, then the address lease. Best effort on the
    /// remote side; the job is already failing.
    async fn rollback(&self, username: &str, address: Ipv4Addr, public_key: &str) {
        {
            let _write_guard = self.inner.remote_write.lock().await;
            if let Err(cleanup_err) = self.inner.channel.remove_peer(public_key).await {
                warn!(
                    username,
                    error = %cleanup_err,
                    "failed to remove partially-installed remote peer during rollback"
                );
            }
        }
        self.inner.pool.release(address);
    }

    fn record_peer_error(&self, username: &str, err: &ProvisionError) {
        if let Some(mut peer) = self.inner.registry.get(username) {
            peer.last_error = Some(err.to_string());
            self.inner.registry.put(peer);
        }
    }
}
