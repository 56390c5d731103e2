//! # Coordination Service
//!
//! External-collaborator seam for the distributed sequence generator: one
//! persistent counter node per `(cluster, sequence)` holding a decimal
//! string, plus named fair mutual-exclusion locks (lowest sequence number
//! holds the lock, later arrivals wait on their predecessors).
//!
//! [`MemoryCoordination`] realizes the same layout in-process for standalone
//! deployments and tests; a clustered deployment plugs a real coordination
//! client in behind the [`CoordinationService`] trait.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const COORDINATION_ROOT: &str = "/shardkit";
pub const SEQUENCE_ROOT: &str = "/shardkit/sequence";
pub const LOCK_ROOT: &str = "/shardkit/locks";

/// Counter node path for a named sequence.
pub fn sequence_path(cluster: &str, name: &str) -> String {
    format!("{SEQUENCE_ROOT}/{cluster}/{name}")
}

/// Lock name guarding a named sequence.
pub fn sequence_lock_name(cluster: &str, name: &str) -> String {
    format!("{cluster}/{name}")
}

/// Coordination-service failure.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("coordination node {path:?} holds non-numeric payload {payload:?}")]
    MalformedCounter { path: String, payload: String },
    #[error("coordination service unavailable: {0}")]
    Unavailable(String),
}

/// Holds a named lock until dropped.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockGuard")
    }
}

/// Persistent counters plus named fair locks.
///
/// Counter payloads are decimal strings; a node that exists but does not
/// parse is a [`CoordinationError::MalformedCounter`], never silently zero.
pub trait CoordinationService: Send + Sync {
    /// Read a counter node, `None` when it does not exist.
    fn counter(&self, path: &str) -> Result<Option<i64>, CoordinationError>;

    /// Create a counter node with an initial value. Creating an existing
    /// node is a no-op; the stored value wins.
    fn create_counter(&self, path: &str, value: i64) -> Result<(), CoordinationError>;

    /// Overwrite a counter node.
    fn set_counter(&self, path: &str, value: i64) -> Result<(), CoordinationError>;

    /// Acquire the named lock, blocking indefinitely.
    fn lock(&self, name: &str) -> Result<LockGuard, CoordinationError>;

    /// Acquire the named lock, giving up after `timeout`. `Ok(None)` means
    /// the wait timed out; the lock state is unchanged.
    fn lock_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<LockGuard>, CoordinationError>;
}

/// In-process coordination service.
///
/// Locks are fair FIFO queues: each acquirer takes the next sequence number
/// and waits until every earlier number has released, the in-process
/// equivalent of the sequential-ephemeral-node recipe.
#[derive(Default)]
pub struct MemoryCoordination {
    nodes: Mutex<HashMap<String, String>>,
    locks: Mutex<HashMap<String, Arc<FairQueue>>>,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Arc<FairQueue> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(name.to_string()).or_default())
    }
}

impl fmt::Debug for MemoryCoordination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCoordination")
            .field("nodes", &self.nodes.lock().len())
            .field("locks", &self.locks.lock().len())
            .finish()
    }
}

impl CoordinationService for MemoryCoordination {
    fn counter(&self, path: &str) -> Result<Option<i64>, CoordinationError> {
        let nodes = self.nodes.lock();
        match nodes.get(path) {
            None => Ok(None),
            Some(payload) => {
                payload
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| CoordinationError::MalformedCounter {
                        path: path.to_string(),
                        payload: payload.clone(),
                    })
            }
        }
    }

    fn create_counter(&self, path: &str, value: i64) -> Result<(), CoordinationError> {
        let mut nodes = self.nodes.lock();
        nodes
            .entry(path.to_string())
            .or_insert_with(|| value.to_string());
        Ok(())
    }

    fn set_counter(&self, path: &str, value: i64) -> Result<(), CoordinationError> {
        let mut nodes = self.nodes.lock();
        nodes.insert(path.to_string(), value.to_string());
        Ok(())
    }

    fn lock(&self, name: &str) -> Result<LockGuard, CoordinationError> {
        let queue = self.queue(name);
        let seq = queue.acquire(None).expect("untimed acquire cannot time out");
        Ok(LockGuard::new(move || queue.release(seq)))
    }

    fn lock_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<LockGuard>, CoordinationError> {
        let queue = self.queue(name);
        match queue.acquire(Some(Instant::now() + timeout)) {
            Some(seq) => {
                let holder = Arc::clone(&queue);
                Ok(Some(LockGuard::new(move || holder.release(seq))))
            }
            None => Ok(None),
        }
    }
}

#[derive(Default)]
struct FairQueue {
    state: Mutex<QueueState>,
    turn: Condvar,
}

#[derive(Default)]
struct QueueState {
    next_seq: u64,
    waiting: VecDeque<u64>,
}

impl FairQueue {
    /// Enqueue and wait for our turn. Returns the sequence number to release
    /// with, or `None` if the deadline passed first.
    fn acquire(&self, deadline: Option<Instant>) -> Option<u64> {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.waiting.push_back(seq);

        while state.waiting.front() != Some(&seq) {
            match deadline {
                None => self.turn.wait(&mut state),
                Some(deadline) => {
                    if self.turn.wait_until(&mut state, deadline).timed_out() {
                        if state.waiting.front() == Some(&seq) {
                            break; // our turn arrived with the timeout
                        }
                        state.waiting.retain(|waiting| *waiting != seq);
                        self.turn.notify_all();
                        return None;
                    }
                }
            }
        }
        Some(seq)
    }

    fn release(&self, seq: u64) {
        let mut state = self.state.lock();
        if state.waiting.front() == Some(&seq) {
            state.waiting.pop_front();
        } else {
            state.waiting.retain(|waiting| *waiting != seq);
        }
        self.turn.notify_all();
    }
}
