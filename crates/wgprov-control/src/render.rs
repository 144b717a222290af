//! Client configuration rendering
//!
//! Pure text generation: `(peer, server parameters) -> tunnel config`.
//! No side effects, fully deterministic, and therefore trivially
//! unit-testable.

use wgprov_proto::PeerRecord;

/// Server-side parameters required to render a client config
#[derive(Debug, Clone)]
pub struct RenderParams {
    /// Base64-encoded server public key
    pub server_public_key: String,
    /// Publicly reachable VPN host
    pub endpoint_host: String,
    /// WireGuard listen port
    pub endpoint_port: u16,
    /// DNS servers pushed to the client
    pub dns: String,
    /// Traffic routed through the tunnel
    pub allowed_ips: String,
    /// Keepalive interval in seconds
    pub persistent_keepalive: u16,
    /// Prefix length of the client address inside the subnet
    pub address_prefix: u8,
}

impl RenderParams {
    pub fn new(
        server_public_key: impl Into<String>,
        endpoint_host: impl Into<String>,
        endpoint_port: u16,
    ) -> Self {
        Self {
            server_public_key: server_public_key.into(),
            endpoint_host: endpoint_host.into(),
            endpoint_port,
            dns: "8.8.8.8, 1.1.1.1".to_string(),
            allowed_ips: "0.0.0.0/0".to_string(),
            persistent_keepalive: 25,
            address_prefix: 24,
        }
    }
}

/// Render the standard `[Interface]`/`[Peer]` tunnel config text
pub fn client_config(peer: &PeerRecord, params: &RenderParams) -> String {
    format!(
        "[Interface]\n\
         PrivateKey = {private_key}\n\
         Address = {address}/{prefix}\n\
         DNS = {dns}\n\
         \n\
         [Peer]\n\
         PublicKey = {server_key}\n\
         Endpoint = {host}:{port}\n\
         AllowedIPs = {allowed_ips}\n\
         PersistentKeepalive = {keepalive}\n",
        private_key = peer.private_key,
        address = peer.address,
        prefix = params.address_prefix,
        dns = params.dns,
        server_key = params.server_public_key,
        host = params.endpoint_host,
        port = params.endpoint_port,
        allowed_ips = params.allowed_ips,
        keepalive = params.persistent_keepalive,
    )
}
