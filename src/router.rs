//! # Cluster Router
//!
//! Deterministic resolution of a sharding key to a concrete database
//! instance and physical table index. The router is a pure function over the
//! topology model and the table shard registry: it performs no I/O, touches
//! no mutable state, and identical inputs always produce identical routes.

use crate::hash::HashAlgo;
use crate::topology::{DatabaseInstance, TableShardRegistry, TopologyMap};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Which instance list a route should draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Master,
    Slave0,
    Slave1,
    Slave2,
    Slave3,
}

impl Role {
    /// Slave slot index, or `None` for the master role.
    pub fn slave_slot(self) -> Option<usize> {
        match self {
            Role::Master => None,
            Role::Slave0 => Some(0),
            Role::Slave1 => Some(1),
            Role::Slave2 => Some(2),
            Role::Slave3 => Some(3),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => f.write_str("master"),
            Role::Slave0 => f.write_str("slave0"),
            Role::Slave1 => f.write_str("slave1"),
            Role::Slave2 => f.write_str("slave2"),
            Role::Slave3 => f.write_str("slave3"),
        }
    }
}

/// An application-supplied sharding value: an integer used as-is, or a
/// string run through the configured hash function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShardingValue {
    Int(i64),
    Text(String),
}

impl ShardingValue {
    /// Normalize to the non-negative routing space.
    pub fn normalize(&self, algo: HashAlgo) -> u64 {
        match self {
            ShardingValue::Int(value) => value.unsigned_abs(),
            ShardingValue::Text(value) => algo.hash(value).unsigned_abs(),
        }
    }
}

impl fmt::Display for ShardingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardingValue::Int(value) => write!(f, "{value}"),
            ShardingValue::Text(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<i64> for ShardingValue {
    fn from(value: i64) -> Self {
        ShardingValue::Int(value)
    }
}

impl From<&str> for ShardingValue {
    fn from(value: &str) -> Self {
        ShardingValue::Text(value.to_string())
    }
}

impl From<String> for ShardingValue {
    fn from(value: String) -> Self {
        ShardingValue::Text(value)
    }
}

/// A sharding value scoped to a cluster. Supplied per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardingKey {
    pub cluster: String,
    pub value: ShardingValue,
}

impl ShardingKey {
    pub fn new(cluster: impl Into<String>, value: impl Into<ShardingValue>) -> Self {
        Self {
            cluster: cluster.into(),
            value: value.into(),
        }
    }
}

/// Routing failure. All variants are configuration or capacity problems;
/// none of them is retryable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("unknown cluster {cluster:?}")]
    ClusterNotFound { cluster: String },
    #[error("sharding value {value} falls outside every region of cluster {cluster:?}")]
    RegionOutOfRange { cluster: String, value: u64 },
    #[error("cluster {cluster:?} region {region} has no slave group {slot}")]
    SlaveGroupMissing {
        cluster: String,
        region: usize,
        slot: usize,
    },
    #[error("no shard count registered for table {table:?} in cluster {cluster:?}")]
    TableMetadataMissing { cluster: String, table: String },
    #[error("cluster {cluster:?} has no global {role} instance")]
    GlobalInstanceMissing { cluster: String, role: Role },
}

/// The resolved route: output contract of [`Router::select`].
///
/// Immutable and cheap to clone; safe to share across threads.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResult {
    pub cluster: String,
    pub region_index: usize,
    pub db_index: usize,
    pub instance: Arc<DatabaseInstance>,
    pub table: String,
    pub table_index: u32,
}

impl fmt::Display for RouteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} -> {} {}_{}",
            self.cluster, self.region_index, self.instance, self.table, self.table_index
        )
    }
}

/// Resolves sharding keys against a fixed topology.
#[derive(Debug, Clone)]
pub struct Router {
    topology: Arc<TopologyMap>,
    tables: Arc<TableShardRegistry>,
    hash_algo: HashAlgo,
}

impl Router {
    pub fn new(
        topology: Arc<TopologyMap>,
        tables: Arc<TableShardRegistry>,
        hash_algo: HashAlgo,
    ) -> Self {
        Self {
            topology,
            tables,
            hash_algo,
        }
    }

    pub fn hash_algo(&self) -> HashAlgo {
        self.hash_algo
    }

    /// Resolve `(role, table, key)` to a database instance and table index.
    ///
    /// The same normalized value feeds both the db-index and table-index
    /// modulo operations; see the topology parity report for the
    /// distribution consequences.
    pub fn select(
        &self,
        role: Role,
        table: &str,
        key: &ShardingKey,
    ) -> Result<RouteResult, RouteError> {
        let cluster = self
            .topology
            .cluster(&key.cluster)
            .ok_or_else(|| RouteError::ClusterNotFound {
                cluster: key.cluster.clone(),
            })?;

        let value = key.value.normalize(self.hash_algo);

        let region_index =
            cluster
                .region_for(value)
                .ok_or_else(|| RouteError::RegionOutOfRange {
                    cluster: key.cluster.clone(),
                    value,
                })?;
        let region = &cluster.regions()[region_index];

        let instances = match role.slave_slot() {
            None => region.masters(),
            Some(slot) => {
                region
                    .slave_group(slot)
                    .ok_or_else(|| RouteError::SlaveGroupMissing {
                        cluster: key.cluster.clone(),
                        region: region_index,
                        slot,
                    })?
            }
        };

        let db_index = (value % instances.len() as u64) as usize;
        let instance = Arc::clone(&instances[db_index]);

        let table_count = self
            .tables
            .table_count(&key.cluster, table)
            .ok_or_else(|| RouteError::TableMetadataMissing {
                cluster: key.cluster.clone(),
                table: table.to_string(),
            })?;
        let table_index = (value % table_count as u64) as u32;

        Ok(RouteResult {
            cluster: key.cluster.clone(),
            region_index,
            db_index,
            instance,
            table: table.to_string(),
            table_index,
        })
    }

    /// Resolve the instance serving a cluster's unsharded (global) tables.
    pub fn select_global(
        &self,
        role: Role,
        cluster: &str,
    ) -> Result<Arc<DatabaseInstance>, RouteError> {
        let topology = self
            .topology
            .cluster(cluster)
            .ok_or_else(|| RouteError::ClusterNotFound {
                cluster: cluster.to_string(),
            })?;

        match role.slave_slot() {
            None => topology
                .master_global()
                .cloned()
                .ok_or_else(|| RouteError::GlobalInstanceMissing {
                    cluster: cluster.to_string(),
                    role,
                }),
            Some(slot) => topology
                .slave_global(slot)
                .cloned()
                .ok_or_else(|| RouteError::GlobalInstanceMissing {
                    cluster: cluster.to_string(),
                    role,
                }),
        }
    }
}
