//! # Primary Cache Protocol
//!
//! Write-invalidate coherence for sharded rows: the data path completes the
//! storage write first, then updates or evicts the cached entry here. Row
//! counts live under their own keys and are only ever adjusted by explicit
//! increment/decrement, never recomputed by scanning.
//!
//! Every cache-server fault degrades to a miss (or a no-op for writes) and
//! is logged; no cache failure ever aborts the caller's storage operation.

use crate::router::RouteResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Count sentinel for an absent counter.
pub const COUNT_MISSING: i64 = -1;

/// Wire seam to the external cache server. Keys are plain strings, values
/// opaque byte blobs; `incr`/`decr` operate only on existing keys and return
/// the new value.
pub trait CacheStore: Send + Sync {
    fn set(&self, key: &str, value: &[u8], expire_secs: u64) -> anyhow::Result<()>;
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
    /// `None` when the key does not exist.
    fn incr(&self, key: &str, delta: i64) -> anyhow::Result<Option<i64>>;
    /// `None` when the key does not exist. Floors at zero.
    fn decr(&self, key: &str, delta: i64) -> anyhow::Result<Option<i64>>;
}

/// Identifies the shard (or global table) a cached row belongs to, and
/// builds its cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheScope {
    Sharded {
        cluster: String,
        db_index: usize,
        table: String,
        table_index: u32,
    },
    Global {
        cluster: String,
        table: String,
    },
}

impl CacheScope {
    pub fn from_route(route: &RouteResult) -> Self {
        CacheScope::Sharded {
            cluster: route.cluster.clone(),
            db_index: route.db_index,
            table: route.table.clone(),
            table_index: route.table_index,
        }
    }

    pub fn global(cluster: impl Into<String>, table: impl Into<String>) -> Self {
        CacheScope::Global {
            cluster: cluster.into(),
            table: table.into(),
        }
    }

    /// Key for one cached row.
    pub fn entry_key(&self, primary_key: impl fmt::Display) -> String {
        format!("{self}.{primary_key}")
    }

    /// Key for this shard's row count.
    pub fn count_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheScope::Sharded {
                cluster,
                db_index,
                table,
                table_index,
            } => write!(f, "{cluster}_{db_index}.{table}_{table_index}"),
            CacheScope::Global { cluster, table } => write!(f, "{cluster}.{table}"),
        }
    }
}

/// Key/value and counter operations against the external cache server.
///
/// All methods are infallible by signature: faults degrade uniformly rather
/// than leaking per-call-site error handling into the write path.
pub struct PrimaryCache {
    store: Arc<dyn CacheStore>,
    expire_secs: u64,
}

impl PrimaryCache {
    pub fn new(store: Arc<dyn CacheStore>, expire_secs: u64) -> Self {
        Self { store, expire_secs }
    }

    /// Unconditional overwrite; never merges with a prior value.
    pub fn put(&self, scope: &CacheScope, primary_key: impl fmt::Display, value: &[u8]) {
        let key = scope.entry_key(primary_key);
        match self.store.set(&key, value, self.expire_secs) {
            Ok(()) => debug!(%key, "cache put"),
            Err(err) => warn!(%key, "cache put failed: {err:#}"),
        }
    }

    pub fn put_batch<P, V>(&self, scope: &CacheScope, entries: &[(P, V)])
    where
        P: fmt::Display,
        V: AsRef<[u8]>,
    {
        for (primary_key, value) in entries {
            self.put(scope, primary_key, value.as_ref());
        }
    }

    /// Fetch one row, degrading to a miss on any fault.
    pub fn get(&self, scope: &CacheScope, primary_key: impl fmt::Display) -> Option<Vec<u8>> {
        let key = scope.entry_key(primary_key);
        match self.store.get(&key) {
            Ok(value) => {
                debug!(%key, hit = value.is_some(), "cache get");
                value
            }
            Err(err) => {
                warn!(%key, "cache get failed: {err:#}");
                None
            }
        }
    }

    /// Fetch many rows; the result is the found subset in key order, misses
    /// simply absent.
    pub fn get_batch<P: fmt::Display>(
        &self,
        scope: &CacheScope,
        primary_keys: &[P],
    ) -> Vec<Vec<u8>> {
        primary_keys
            .iter()
            .filter_map(|primary_key| self.get(scope, primary_key))
            .collect()
    }

    /// Unconditional eviction; idempotent whether or not the key exists.
    pub fn remove(&self, scope: &CacheScope, primary_key: impl fmt::Display) {
        let key = scope.entry_key(primary_key);
        match self.store.delete(&key) {
            Ok(()) => debug!(%key, "cache remove"),
            Err(err) => warn!(%key, "cache remove failed: {err:#}"),
        }
    }

    pub fn remove_batch<P: fmt::Display>(&self, scope: &CacheScope, primary_keys: &[P]) {
        for primary_key in primary_keys {
            self.remove(scope, primary_key);
        }
    }

    /// Set the shard's row count outright.
    pub fn set_count(&self, scope: &CacheScope, count: i64) {
        let key = scope.count_key();
        match self
            .store
            .set(&key, count.to_string().as_bytes(), self.expire_secs)
        {
            Ok(()) => debug!(%key, count, "cache set count"),
            Err(err) => warn!(%key, "cache set count failed: {err:#}"),
        }
    }

    /// Increment the shard's row count, returning the new value, or
    /// [`COUNT_MISSING`] when no count is cached.
    pub fn incr_count(&self, scope: &CacheScope, delta: i64) -> i64 {
        let key = scope.count_key();
        match self.store.incr(&key, delta) {
            Ok(Some(count)) => {
                debug!(%key, delta, count, "cache incr count");
                count
            }
            Ok(None) => COUNT_MISSING,
            Err(err) => {
                warn!(%key, "cache incr count failed: {err:#}");
                COUNT_MISSING
            }
        }
    }

    /// Decrement the shard's row count, returning the new value, or
    /// [`COUNT_MISSING`] when no count is cached.
    pub fn decr_count(&self, scope: &CacheScope, delta: i64) -> i64 {
        let key = scope.count_key();
        match self.store.decr(&key, delta) {
            Ok(Some(count)) => {
                debug!(%key, delta, count, "cache decr count");
                count
            }
            Ok(None) => COUNT_MISSING,
            Err(err) => {
                warn!(%key, "cache decr count failed: {err:#}");
                COUNT_MISSING
            }
        }
    }

    /// The cached row count, or [`COUNT_MISSING`] when absent.
    pub fn get_count(&self, scope: &CacheScope) -> i64 {
        let key = scope.count_key();
        match self.store.get(&key) {
            Ok(Some(payload)) => match std::str::from_utf8(&payload)
                .ok()
                .and_then(|text| text.trim().parse::<i64>().ok())
            {
                Some(count) => count,
                None => {
                    warn!(%key, "cache count payload not numeric");
                    COUNT_MISSING
                }
            },
            Ok(None) => COUNT_MISSING,
            Err(err) => {
                warn!(%key, "cache get count failed: {err:#}");
                COUNT_MISSING
            }
        }
    }

    pub fn remove_count(&self, scope: &CacheScope) {
        let key = scope.count_key();
        if let Err(err) = self.store.delete(&key) {
            warn!(%key, "cache remove count failed: {err:#}");
        }
    }
}

impl fmt::Debug for PrimaryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimaryCache")
            .field("expire_secs", &self.expire_secs)
            .finish()
    }
}

/// In-process cache store for standalone deployments and tests.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn set(&self, key: &str, value: &[u8], _expire_secs: u64) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn incr(&self, key: &str, delta: i64) -> anyhow::Result<Option<i64>> {
        self.adjust(key, delta)
    }

    fn decr(&self, key: &str, delta: i64) -> anyhow::Result<Option<i64>> {
        self.adjust(key, -delta)
    }
}

impl MemoryCacheStore {
    fn adjust(&self, key: &str, delta: i64) -> anyhow::Result<Option<i64>> {
        let mut entries = self.entries.lock();
        let Some(payload) = entries.get(key) else {
            return Ok(None);
        };
        let current: i64 = std::str::from_utf8(payload)?.trim().parse()?;
        let next = (current + delta).max(0);
        entries.insert(key.to_string(), next.to_string().into_bytes());
        Ok(Some(next))
    }
}

impl fmt::Debug for MemoryCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCacheStore")
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}
