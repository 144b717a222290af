//! Per-username job tracking
//!
//! One job record per username, stored as immutable snapshots so status
//! polling never contends with the orchestrator's write path. The tracker
//! also hands out the per-username async locks that serialize mutations
//! for a given user.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

use wgprov_proto::JobSnapshot;

/// Result of asking the tracker to start a job
pub enum StartOutcome {
    /// A new job was created; the caller owns the provisioning run
    Started(JobSnapshot),
    /// A non-terminal job already exists; the caller attaches to it
    Attached(JobSnapshot),
}

pub struct JobTracker {
    jobs: RwLock<HashMap<String, JobSnapshot>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically create a pending job for `username`, or return the live
    /// one. A username never has two concurrent non-terminal jobs.
    pub fn start(&self, username: &str) -> StartOutcome {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(existing) = jobs.get(username) {
            if !existing.is_terminal() {
                debug!(username, job_id = %existing.id, "attaching to in-flight job");
                return StartOutcome::Attached(existing.clone());
            }
        }
        let job = JobSnapshot::pending(username);
        jobs.insert(username.to_string(), job.clone());
        StartOutcome::Started(job)
    }

    /// Publish a new snapshot for the job's username
    pub fn publish(&self, snapshot: JobSnapshot) {
        self.jobs
            .write()
            .unwrap()
            .insert(snapshot.username.clone(), snapshot);
    }

    /// Current snapshot for a username; cheap, no remote calls
    pub fn get(&self, username: &str) -> Option<JobSnapshot> {
        self.jobs.read().unwrap().get(username).cloned()
    }

    /// Drop all tracking state for a retired username: the job record,
    /// and the lock entry unless another task still holds it. Callers
    /// hold their own lock handle, which accounts for one reference.
    pub fn forget(&self, username: &str) {
        self.jobs.write().unwrap().remove(username);
        let mut locks = self.locks.lock().unwrap();
        if let Some(lock) = locks.get(username) {
            // One reference in the map, one held by the caller.
            if Arc::strong_count(lock) <= 2 {
                locks.remove(username);
                debug!(username, "dropped job tracking state");
            }
        }
    }

    /// The mutual-exclusion handle for a username. All orchestrator runs
    /// (provision and disconnect) for the same user serialize on this.
    pub fn user_lock(&self, username: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(username.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}
