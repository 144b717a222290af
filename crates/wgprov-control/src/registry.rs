//! Peer registry
//!
//! Single source of truth for the username -> peer mapping. Reads return
//! cloned snapshots; `list()` never exposes a partial write. When a state
//! file is configured, every mutation is persisted as JSON so peers
//! survive daemon restarts. The state path is verified writable when the
//! registry is opened; later persistence failures are logged and do not
//! fail the mutation, matching the registry's in-memory-first contract.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{info, warn};

use wgprov_proto::PeerRecord;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub struct PeerRegistry {
    peers: RwLock<HashMap<String, PeerRecord>>,
    state_path: Option<PathBuf>,
}

impl PeerRegistry {
    /// In-memory registry with no persistence
    pub fn in_memory() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            state_path: None,
        }
    }

    /// Registry backed by a JSON state file; loads existing state if the
    /// file is present. An unwritable state path is rejected here, at
    /// startup, rather than silently losing records on the first
    /// mutation.
    pub fn open(state_path: PathBuf) -> Result<Self, RegistryError> {
        let peers = if state_path.exists() {
            let raw = std::fs::read_to_string(&state_path)?;
            let peers: HashMap<String, PeerRecord> = serde_json::from_str(&raw)?;
            info!(
                path = %state_path.display(),
                peers = peers.len(),
                "loaded peer registry state"
            );
            peers
        } else {
            HashMap::new()
        };

        let json = serde_json::to_string_pretty(&peers)?;
        std::fs::write(&state_path, json)?;

        Ok(Self {
            peers: RwLock::new(peers),
            state_path: Some(state_path),
        })
    }

    pub fn get(&self, username: &str) -> Option<PeerRecord> {
        self.peers.read().unwrap().get(username).cloned()
    }

    pub fn put(&self, peer: PeerRecord) {
        let mut peers = self.peers.write().unwrap();
        peers.insert(peer.username.clone(), peer);
        self.persist(&peers);
    }

    pub fn delete(&self, username: &str) -> Option<PeerRecord> {
        let mut peers = self.peers.write().unwrap();
        let removed = peers.remove(username);
        if removed.is_some() {
            self.persist(&peers);
        }
        removed
    }

    /// Consistent snapshot of all records
    pub fn list(&self) -> Vec<PeerRecord> {
        self.peers.read().unwrap().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.peers.read().unwrap().len()
    }

    // Called with the write lock held, so the serialized view is exactly
    // the state the mutation produced.
    fn persist(&self, peers: &HashMap<String, PeerRecord>) {
        let Some(path) = &self.state_path else {
            return;
        };
        let json = match serde_json::to_string_pretty(peers) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize registry state");
                return;
            }
        };
        if let Err(e) = std::fs::write(path, json) {
            warn!(path = %path.display(), error = %e, "failed to persist registry state");
        }
    }
}
