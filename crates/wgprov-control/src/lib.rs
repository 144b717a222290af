//! Peer provisioning control plane
//!
//! Coordinates the address allocator, key generator, remote command
//! channel, and peer registry into a single user-facing operation with a
//! progress-trackable state machine:
//!
//! - Address allocation and release (`allocator`)
//! - WireGuard-compatible keypair generation (`keys`)
//! - Durable username -> peer mapping (`registry`)
//! - Client configuration rendering (`render`)
//! - Per-username job tracking (`jobs`)
//! - The provisioning orchestrator itself (`provisioner`)

pub mod allocator;
pub mod jobs;
pub mod keys;
pub mod provisioner;
pub mod registry;
pub mod render;

pub use allocator::{AddressPool, AllocationError};
pub use jobs::{JobTracker, StartOutcome};
pub use keys::{KeyError, KeyPair};
pub use provisioner::{
    ConfigError, DisconnectOutcome, ProvisionError, Provisioner, ProvisionerConfig, ServerStatus,
};
pub use registry::{PeerRegistry, RegistryError};
pub use render::{client_config, RenderParams};
