//! wgprovd - WireGuard peer provisioning daemon
//!
//! Runs the provisioning orchestrator and its REST API: allocates tunnel
//! addresses, generates keypairs, installs peers on a remote WireGuard
//! host over SSH, and serves client configs.

use anyhow::{Context, Result};
use clap::Parser;
use ipnetwork::Ipv4Network;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wgprov_api::{ApiServer, ApiServerConfig};
use wgprov_control::{AddressPool, PeerRegistry, Provisioner, ProvisionerConfig};
use wgprov_remote::{RemoteExecutor, SshConfig, SshExecutor, WgChannel};

#[derive(Parser, Debug)]
#[command(name = "wgprovd")]
#[command(about = "WireGuard peer provisioning daemon")]
#[command(version)]
#[command(long_about = r#"
wgprovd provisions WireGuard peers on a remote VPN host and serves
client configurations over a REST API.

EXAMPLES:
  # Provision against vpn.example.com, persist state locally
  wgprovd --server-host vpn.example.com \
    --ssh-user root \
    --state-file /var/lib/wgprov/peers.json

  # Development run against a lab host, in-memory state
  wgprovd --server-host 192.0.2.10 --ssh-key ~/.ssh/lab_ed25519 \
    --log-level debug

ENVIRONMENT VARIABLES:
  WGPROV_BIND          API listen address
  WGPROV_SERVER_HOST   VPN host to manage (and client endpoint)
  WGPROV_SSH_USER      SSH login user on the VPN host
  WGPROV_SSH_KEY       SSH identity file
  WGPROV_STATE_FILE    JSON peer state file
"#)]
struct Args {
    /// API listen address
    #[arg(long, default_value = "127.0.0.1:8000", env = "WGPROV_BIND")]
    bind: SocketAddr,

    /// VPN host to manage; also the client endpoint unless --endpoint-host is set
    #[arg(long, env = "WGPROV_SERVER_HOST")]
    server_host: String,

    /// Endpoint hostname written into client configs (defaults to --server-host)
    #[arg(long, env = "WGPROV_ENDPOINT_HOST")]
    endpoint_host: Option<String>,

    /// WireGuard listen port on the VPN host
    #[arg(long, default_value = "51820", env = "WGPROV_WG_PORT")]
    wg_port: u16,

    /// WireGuard interface name on the VPN host
    #[arg(long, default_value = "wg0", env = "WGPROV_WG_INTERFACE")]
    wg_interface: String,

    /// SSH login user on the VPN host
    #[arg(long, default_value = "root", env = "WGPROV_SSH_USER")]
    ssh_user: String,

    /// SSH port on the VPN host
    #[arg(long, default_value = "22", env = "WGPROV_SSH_PORT")]
    ssh_port: u16,

    /// SSH identity file; agent/default keys are used when absent
    #[arg(long, env = "WGPROV_SSH_KEY")]
    ssh_key: Option<PathBuf>,

    /// Per-command SSH timeout in seconds
    #[arg(long, default_value = "30", env = "WGPROV_SSH_TIMEOUT")]
    ssh_timeout: u64,

    /// Tunnel subnet; .1 is reserved for the gateway
    #[arg(long, default_value = "10.8.0.0/24", env = "WGPROV_SUBNET")]
    subnet: Ipv4Network,

    /// Cap on provisioned peers (defaults to the subnet's capacity)
    #[arg(long, env = "WGPROV_MAX_PEERS")]
    max_peers: Option<usize>,

    /// JSON peer state file; state is in-memory only when absent
    #[arg(long, env = "WGPROV_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// DNS servers written into client configs
    #[arg(long, default_value = "8.8.8.8, 1.1.1.1", env = "WGPROV_DNS")]
    dns: String,

    /// AllowedIPs written into client configs
    #[arg(long, default_value = "0.0.0.0/0", env = "WGPROV_ALLOWED_IPS")]
    allowed_ips: String,

    /// PersistentKeepalive written into client configs, in seconds
    #[arg(long, default_value = "25", env = "WGPROV_KEEPALIVE")]
    keepalive: u16,

    /// Disable CORS for browser dashboards
    #[arg(long)]
    no_cors: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "WGPROV_LOG")]
    log_level: String,
}

fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    tracing::info!("Starting wgprovd");
    tracing::info!("VPN host: {}@{}:{}", args.ssh_user, args.server_host, args.ssh_port);
    tracing::info!("Interface: {}, subnet: {}", args.wg_interface, args.subnet);

    let mut ssh = SshConfig::new(args.server_host.clone(), args.ssh_user);
    ssh.port = args.ssh_port;
    ssh.key_path = args.ssh_key;
    ssh.command_timeout = Duration::from_secs(args.ssh_timeout.max(1));

    let executor: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::new(ssh));
    let channel = Arc::new(WgChannel::new(executor, args.wg_interface));

    let mut pool = AddressPool::new(args.subnet)
        .with_context(|| format!("unusable tunnel subnet {}", args.subnet))?;
    if let Some(max_peers) = args.max_peers {
        pool = pool.with_max_peers(max_peers);
    }

    let registry = match &args.state_file {
        Some(path) => {
            tracing::info!("State file: {}", path.display());
            PeerRegistry::open(path.clone())
                .with_context(|| format!("failed to load peer state from {}", path.display()))?
        }
        None => {
            tracing::warn!("No state file configured, peer state is in-memory only");
            PeerRegistry::in_memory()
        }
    };

    let endpoint_host = args.endpoint_host.unwrap_or(args.server_host);
    let mut config = ProvisionerConfig::new(endpoint_host, args.wg_port);
    config.dns = args.dns;
    config.allowed_ips = args.allowed_ips;
    config.persistent_keepalive = args.keepalive;
    config.address_prefix = args.subnet.prefix();

    let provisioner = Provisioner::new(
        Arc::new(registry),
        Arc::new(pool),
        channel,
        config,
    );

    let server = ApiServer::new(
        ApiServerConfig {
            bind_addr: args.bind,
            enable_cors: !args.no_cors,
        },
        provisioner,
    );
    server.start().await
}
