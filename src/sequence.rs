//! # Distributed Sequence Generator
//!
//! Allocates batches of cluster-wide unique integers from a persistent
//! counter in the coordination service. All counter mutation happens as a
//! read-modify-write under the lock named for `(cluster, sequence)`; that
//! lock is the sole mechanism preventing two allocators from issuing
//! overlapping ranges.
//!
//! The single-id path serves from a per-sequence local buffer and refills it
//! one batch at a time, so most calls never touch the coordination service.

use crate::config::{SequenceConfig, ZERO_ID_BACKOFF_MS, ZERO_ID_RETRIES};
use crate::coordination::{
    sequence_lock_name, sequence_path, CoordinationError, CoordinationService, LockGuard,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Sequence generation failure.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("batch size must be at least 1")]
    InvalidBatchSize,
    #[error("sequence {cluster}/{name} produced zero ids in {attempts} attempts")]
    Exhausted {
        cluster: String,
        name: String,
        attempts: u32,
    },
    #[error("timed out acquiring the lock for sequence {cluster}/{name}")]
    LockTimeout { cluster: String, name: String },
    #[error("coordination failure for sequence {cluster}/{name}: {source}")]
    Coordination {
        cluster: String,
        name: String,
        #[source]
        source: CoordinationError,
    },
}

type BufferKey = (String, String);

/// Cluster-wide unique id generator.
///
/// One instance owns the local batch buffers for every `(cluster, sequence)`
/// it serves; buffer access is serialized so concurrent requesters finding
/// an empty buffer block briefly instead of each fetching a redundant batch.
pub struct SequenceGenerator {
    coordination: Arc<dyn CoordinationService>,
    buffers: Mutex<FxHashMap<BufferKey, VecDeque<i64>>>,
    batch_size: usize,
}

impl SequenceGenerator {
    pub fn new(coordination: Arc<dyn CoordinationService>, config: &SequenceConfig) -> Self {
        Self {
            coordination,
            buffers: Mutex::new(FxHashMap::default()),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Next unique 64-bit id for the named sequence.
    pub fn next_long(&self, cluster: &str, name: &str) -> Result<i64, SequenceError> {
        self.next_long_seeded(cluster, name, 0)
    }

    /// Next unique 64-bit id, never below `seed`.
    pub fn next_long_seeded(
        &self,
        cluster: &str,
        name: &str,
        seed: i64,
    ) -> Result<i64, SequenceError> {
        let mut attempt = 0;
        loop {
            let id = self.pop_or_refill(cluster, name, seed)?;
            if id != 0 {
                return Ok(id);
            }
            attempt += 1;
            if attempt > ZERO_ID_RETRIES {
                return Err(SequenceError::Exhausted {
                    cluster: cluster.to_string(),
                    name: name.to_string(),
                    attempts: ZERO_ID_RETRIES,
                });
            }
            warn!(cluster, name, attempt, "sequence produced id 0, retrying");
            thread::sleep(Duration::from_millis(ZERO_ID_BACKOFF_MS));
        }
    }

    /// Next unique 32-bit id (truncating the 64-bit allocation).
    pub fn next_int(&self, cluster: &str, name: &str) -> Result<i32, SequenceError> {
        self.next_int_seeded(cluster, name, 0)
    }

    pub fn next_int_seeded(
        &self,
        cluster: &str,
        name: &str,
        seed: i64,
    ) -> Result<i32, SequenceError> {
        Ok(self.next_long_seeded(cluster, name, seed)? as i32)
    }

    /// Allocate `batch_size` consecutive unique 64-bit ids directly from the
    /// coordination service, bypassing the local buffer.
    pub fn next_long_batch(
        &self,
        cluster: &str,
        name: &str,
        batch_size: usize,
    ) -> Result<Vec<i64>, SequenceError> {
        self.allocate(cluster, name, batch_size, 0, None)
    }

    pub fn next_long_batch_seeded(
        &self,
        cluster: &str,
        name: &str,
        batch_size: usize,
        seed: i64,
    ) -> Result<Vec<i64>, SequenceError> {
        self.allocate(cluster, name, batch_size, seed, None)
    }

    /// Batch allocation that fails fast instead of waiting indefinitely for
    /// the sequence lock.
    pub fn next_long_batch_timeout(
        &self,
        cluster: &str,
        name: &str,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Vec<i64>, SequenceError> {
        self.allocate(cluster, name, batch_size, 0, Some(timeout))
    }

    pub fn next_int_batch(
        &self,
        cluster: &str,
        name: &str,
        batch_size: usize,
    ) -> Result<Vec<i32>, SequenceError> {
        self.next_int_batch_seeded(cluster, name, batch_size, 0)
    }

    pub fn next_int_batch_seeded(
        &self,
        cluster: &str,
        name: &str,
        batch_size: usize,
        seed: i64,
    ) -> Result<Vec<i32>, SequenceError> {
        Ok(self
            .allocate(cluster, name, batch_size, seed, None)?
            .into_iter()
            .map(|id| id as i32)
            .collect())
    }

    /// Raise the stored counter to `value` if it is currently lower,
    /// creating it when absent. Used to migrate a starting offset.
    pub fn raise_floor(&self, cluster: &str, name: &str, value: i64) -> Result<(), SequenceError> {
        let _guard = self.acquire(cluster, name, None)?;
        let path = sequence_path(cluster, name);
        let stored = self
            .coordination
            .counter(&path)
            .map_err(|source| self.coordination_error(cluster, name, source))?;
        match stored {
            None => self
                .coordination
                .create_counter(&path, value)
                .map_err(|source| self.coordination_error(cluster, name, source)),
            Some(current) if value > current => self
                .coordination
                .set_counter(&path, value)
                .map_err(|source| self.coordination_error(cluster, name, source)),
            Some(_) => Ok(()),
        }
    }

    /// Pop from the local buffer, refilling it first when empty. The buffer
    /// lock is held across the re-check and the refill so only one thread
    /// fetches a batch.
    fn pop_or_refill(&self, cluster: &str, name: &str, seed: i64) -> Result<i64, SequenceError> {
        let key = (cluster.to_string(), name.to_string());
        let mut buffers = self.buffers.lock();
        let buffer = buffers.entry(key).or_default();
        if buffer.is_empty() {
            let batch = self.allocate(cluster, name, self.batch_size, seed, None)?;
            buffer.extend(batch);
        }
        buffer
            .pop_front()
            .ok_or_else(|| SequenceError::Exhausted {
                cluster: cluster.to_string(),
                name: name.to_string(),
                attempts: 0,
            })
    }

    /// The batch allocation protocol: read-modify-write under the named
    /// lock. `[base+1 ..= base+batch_size]` is issued and `base+batch_size`
    /// written back, where `base` is the stored counter or `seed`,
    /// whichever is greater.
    fn allocate(
        &self,
        cluster: &str,
        name: &str,
        batch_size: usize,
        seed: i64,
        timeout: Option<Duration>,
    ) -> Result<Vec<i64>, SequenceError> {
        if batch_size == 0 {
            return Err(SequenceError::InvalidBatchSize);
        }

        let _guard = self.acquire(cluster, name, timeout)?;

        let path = sequence_path(cluster, name);
        let stored = self
            .coordination
            .counter(&path)
            .map_err(|source| self.coordination_error(cluster, name, source))?;
        let base = match stored {
            Some(value) => value.max(seed),
            None => {
                self.coordination
                    .create_counter(&path, seed)
                    .map_err(|source| self.coordination_error(cluster, name, source))?;
                seed
            }
        };

        let ids: Vec<i64> = (1..=batch_size as i64).map(|i| base + i).collect();
        self.coordination
            .set_counter(&path, base + batch_size as i64)
            .map_err(|source| self.coordination_error(cluster, name, source))?;
        Ok(ids)
    }

    fn acquire(
        &self,
        cluster: &str,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<LockGuard, SequenceError> {
        let lock_name = sequence_lock_name(cluster, name);
        match timeout {
            None => self
                .coordination
                .lock(&lock_name)
                .map_err(|source| self.coordination_error(cluster, name, source)),
            Some(timeout) => self
                .coordination
                .lock_timeout(&lock_name, timeout)
                .map_err(|source| self.coordination_error(cluster, name, source))?
                .ok_or_else(|| SequenceError::LockTimeout {
                    cluster: cluster.to_string(),
                    name: name.to_string(),
                }),
        }
    }

    fn coordination_error(
        &self,
        cluster: &str,
        name: &str,
        source: CoordinationError,
    ) -> SequenceError {
        SequenceError::Coordination {
            cluster: cluster.to_string(),
            name: name.to_string(),
            source,
        }
    }
}

impl std::fmt::Debug for SequenceGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceGenerator")
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryCoordination;

    fn generator(batch_size: usize) -> SequenceGenerator {
        SequenceGenerator::new(
            Arc::new(MemoryCoordination::new()),
            &SequenceConfig { batch_size },
        )
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let generator = generator(10);
        let first = generator.next_long("pinus", "order_id").unwrap();
        let second = generator.next_long("pinus", "order_id").unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn test_batches_are_disjoint_and_ordered() {
        let generator = generator(10);
        let first = generator.next_long_batch("pinus", "order_id", 10).unwrap();
        let second = generator.next_long_batch("pinus", "order_id", 10).unwrap();
        assert_eq!(first, (1..=10).collect::<Vec<i64>>());
        assert_eq!(second, (11..=20).collect::<Vec<i64>>());
        assert!(second.iter().min().unwrap() > first.iter().max().unwrap());
    }

    #[test]
    fn test_sequences_are_independent() {
        let generator = generator(5);
        assert_eq!(generator.next_long("pinus", "order_id").unwrap(), 1);
        assert_eq!(generator.next_long("pinus", "user_id").unwrap(), 1);
        assert_eq!(generator.next_long("other", "order_id").unwrap(), 1);
    }

    #[test]
    fn test_buffer_survives_direct_batches() {
        let generator = generator(5);
        // buffer holds 1..=5
        assert_eq!(generator.next_long("pinus", "seq").unwrap(), 1);
        // direct batch advances the stored counter past the buffer
        let batch = generator.next_long_batch("pinus", "seq", 5).unwrap();
        assert_eq!(batch, vec![6, 7, 8, 9, 10]);
        // buffered ids keep draining, then the refill continues after the batch
        for expected in 2..=5 {
            assert_eq!(generator.next_long("pinus", "seq").unwrap(), expected);
        }
        assert_eq!(generator.next_long("pinus", "seq").unwrap(), 11);
    }

    #[test]
    fn test_seed_raises_the_base() {
        let generator = generator(5);
        let batch = generator
            .next_long_batch_seeded("pinus", "seq", 3, 1_000)
            .unwrap();
        assert_eq!(batch, vec![1_001, 1_002, 1_003]);
        // a lower seed later has no effect
        let batch = generator
            .next_long_batch_seeded("pinus", "seq", 2, 10)
            .unwrap();
        assert_eq!(batch, vec![1_004, 1_005]);
    }

    #[test]
    fn test_raise_floor() {
        let coordination = Arc::new(MemoryCoordination::new());
        let generator =
            SequenceGenerator::new(coordination.clone(), &SequenceConfig::default());

        generator.raise_floor("pinus", "seq", 500).unwrap();
        assert_eq!(
            coordination.counter(&sequence_path("pinus", "seq")).unwrap(),
            Some(500)
        );

        // lower floor leaves the counter alone
        generator.raise_floor("pinus", "seq", 100).unwrap();
        assert_eq!(
            coordination.counter(&sequence_path("pinus", "seq")).unwrap(),
            Some(500)
        );

        assert_eq!(generator.next_long("pinus", "seq").unwrap(), 501);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let generator = generator(10);
        let err = generator.next_long_batch("pinus", "seq", 0).unwrap_err();
        assert!(matches!(err, SequenceError::InvalidBatchSize));
    }

    #[test]
    fn test_int_variant_tracks_long_counter() {
        let generator = generator(10);
        assert_eq!(generator.next_int("pinus", "seq").unwrap(), 1);
        assert_eq!(generator.next_long("pinus", "seq").unwrap(), 2);
        let batch = generator.next_int_batch("pinus", "seq", 3).unwrap();
        assert_eq!(batch, vec![11, 12, 13]);
    }

    #[test]
    fn test_lock_timeout_surfaces() {
        let coordination = Arc::new(MemoryCoordination::new());
        let generator =
            SequenceGenerator::new(coordination.clone(), &SequenceConfig::default());

        let held = coordination
            .lock(&sequence_lock_name("pinus", "seq"))
            .unwrap();
        let err = generator
            .next_long_batch_timeout("pinus", "seq", 5, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, SequenceError::LockTimeout { .. }));
        drop(held);

        let batch = generator
            .next_long_batch_timeout("pinus", "seq", 5, Duration::from_millis(200))
            .unwrap();
        assert_eq!(batch, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_coordination_failure_propagates() {
        struct DownCoordination;
        impl CoordinationService for DownCoordination {
            fn counter(&self, _: &str) -> Result<Option<i64>, CoordinationError> {
                Err(CoordinationError::Unavailable("connection refused".into()))
            }
            fn create_counter(&self, _: &str, _: i64) -> Result<(), CoordinationError> {
                Err(CoordinationError::Unavailable("connection refused".into()))
            }
            fn set_counter(&self, _: &str, _: i64) -> Result<(), CoordinationError> {
                Err(CoordinationError::Unavailable("connection refused".into()))
            }
            fn lock(&self, _: &str) -> Result<LockGuard, CoordinationError> {
                Ok(LockGuard::new(|| {}))
            }
            fn lock_timeout(
                &self,
                _: &str,
                _: Duration,
            ) -> Result<Option<LockGuard>, CoordinationError> {
                Ok(Some(LockGuard::new(|| {})))
            }
        }

        let generator =
            SequenceGenerator::new(Arc::new(DownCoordination), &SequenceConfig::default());
        let err = generator.next_long("pinus", "seq").unwrap_err();
        assert!(matches!(err, SequenceError::Coordination { .. }));
    }
}
