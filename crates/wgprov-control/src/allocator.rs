//! Tunnel address allocation
//!
//! The pool owns the VPN subnet and hands out unique host addresses in
//! deterministic lowest-first order. The network, broadcast, and gateway
//! addresses are never handed out. The pick-and-reserve step runs under a
//! short-held lock and is never held across remote calls.

use ipnetwork::Ipv4Network;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("address pool {0} is exhausted")]
    PoolExhausted(Ipv4Network),

    #[error("subnet {0} is too small to hold any peers")]
    SubnetTooSmall(Ipv4Network),
}

/// The subnet range and the set of currently leased addresses
pub struct AddressPool {
    network: Ipv4Network,
    gateway: Ipv4Addr,
    first: Ipv4Addr,
    last: Ipv4Addr,
    leased: Mutex<BTreeSet<Ipv4Addr>>,
}

impl AddressPool {
    /// Create a pool over `network`, reserving the first host address for
    /// the server gateway.
    pub fn new(network: Ipv4Network) -> Result<Self, AllocationError> {
        // Need at least gateway + one peer between network and broadcast.
        if network.size() < 4 {
            return Err(AllocationError::SubnetTooSmall(network));
        }
        let base = u32::from(network.network());
        let gateway = Ipv4Addr::from(base + 1);
        let first = Ipv4Addr::from(base + 2);
        let last = Ipv4Addr::from(u32::from(network.broadcast()) - 1);
        if first > last {
            return Err(AllocationError::SubnetTooSmall(network));
        }
        Ok(Self {
            network,
            gateway,
            first,
            last,
            leased: Mutex::new(BTreeSet::new()),
        })
    }

    /// Cap the pool at `max_peers` leasable addresses
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        if max_peers > 0 {
            let capped = u32::from(self.first) as u64 + max_peers as u64 - 1;
            let capped = Ipv4Addr::from(capped.min(u32::from(self.last) as u64) as u32);
            self.last = capped;
        }
        self
    }

    /// Server-side gateway address inside the subnet
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    pub fn network(&self) -> Ipv4Network {
        self.network
    }

    /// Lease the lowest unused address
    pub fn allocate(&self) -> Result<Ipv4Addr, AllocationError> {
        let mut leased = self.leased.lock().unwrap();
        let mut candidate = u32::from(self.first);
        let end = u32::from(self.last);
        while candidate <= end {
            let addr = Ipv4Addr::from(candidate);
            if !leased.contains(&addr) {
                leased.insert(addr);
                debug!(address = %addr, leased = leased.len(), "leased tunnel address");
                return Ok(addr);
            }
            candidate += 1;
        }
        Err(AllocationError::PoolExhausted(self.network))
    }

    /// Return an address to the pool; releasing a free address is a no-op.
    pub fn release(&self, address: Ipv4Addr) {
        let mut leased = self.leased.lock().unwrap();
        if leased.remove(&address) {
            debug!(address = %address, leased = leased.len(), "released tunnel address");
        }
    }

    /// Mark an address as leased (used when rebuilding lease state from
    /// the persisted registry). Returns false if it was already leased or
    /// lies outside the leasable range.
    pub fn lease(&self, address: Ipv4Addr) -> bool {
        if address < self.first || address > self.last {
            return false;
        }
        self.leased.lock().unwrap().insert(address)
    }

    /// Number of addresses currently leased
    pub fn leased_count(&self) -> usize {
        self.leased.lock().unwrap().len()
    }

    /// Total leasable addresses
    pub fn capacity(&self) -> usize {
        (u32::from(self.last) - u32::from(self.first) + 1) as usize
    }
}
