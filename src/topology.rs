//! # Topology Model
//!
//! Immutable in-memory representation of clusters, regions, database
//! instances, and per-table shard counts. Built once at startup from
//! configuration and never mutated afterwards; reconfiguration replaces the
//! whole model.

use crate::config::{ClusterConfig, InstanceConfig, RegionConfig, TopologyConfig};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Validation failure while building the topology model.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("duplicate cluster name {0:?}")]
    DuplicateCluster(String),
    #[error("cluster {cluster}: region {index} has start {start} greater than end {end}")]
    InvertedRegion {
        cluster: String,
        index: usize,
        start: u64,
        end: u64,
    },
    #[error("cluster {cluster}: regions {first} and {second} overlap")]
    OverlappingRegions {
        cluster: String,
        first: usize,
        second: usize,
    },
    #[error("cluster {cluster}: region {index} has no master instances")]
    EmptyMasters { cluster: String, index: usize },
    #[error("cluster {cluster}: region {region} slave group {group} is empty")]
    EmptySlaveGroup {
        cluster: String,
        region: usize,
        group: usize,
    },
}

/// Role of a physical database instance within its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceRole {
    Master,
    Slave,
}

/// Opaque handle to one physical database.
///
/// Leaf entity of the topology: constructed at load time, shared by `Arc`,
/// never mutated, closed only at process shutdown by whoever owns the
/// connection factory behind `dsn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInstance {
    name: String,
    cluster: String,
    role: InstanceRole,
    dsn: String,
}

impl DatabaseInstance {
    pub fn new(
        name: impl Into<String>,
        cluster: impl Into<String>,
        role: InstanceRole,
        dsn: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
            role,
            dsn: dsn.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn role(&self) -> InstanceRole {
        self.role
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Stable identifier used when enlisting this instance as a transaction
    /// resource.
    pub fn resource_id(&self) -> String {
        format!("{}/{}", self.cluster, self.name)
    }
}

impl fmt::Display for DatabaseInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.name)
    }
}

/// A contiguous range of sharding values mapped to one set of master and
/// slave instances. Bounds are inclusive and live in the normalized
/// (non-negative) sharding-value space.
#[derive(Debug, Clone)]
pub struct Region {
    start: u64,
    end: u64,
    masters: Vec<Arc<DatabaseInstance>>,
    slave_groups: Vec<Vec<Arc<DatabaseInstance>>>,
}

impl Region {
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn contains(&self, value: u64) -> bool {
        self.start <= value && value <= self.end
    }

    pub fn masters(&self) -> &[Arc<DatabaseInstance>] {
        &self.masters
    }

    pub fn slave_group(&self, slot: usize) -> Option<&[Arc<DatabaseInstance>]> {
        self.slave_groups.get(slot).map(Vec::as_slice)
    }

    pub fn slave_group_count(&self) -> usize {
        self.slave_groups.len()
    }
}

/// One logical cluster: global-table instances plus an ordered sequence of
/// regions over the sharding-value space.
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    name: String,
    master_global: Option<Arc<DatabaseInstance>>,
    slave_globals: Vec<Arc<DatabaseInstance>>,
    regions: Vec<Region>,
}

impl ClusterTopology {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The master instance for unsharded (global) tables, if configured.
    pub fn master_global(&self) -> Option<&Arc<DatabaseInstance>> {
        self.master_global.as_ref()
    }

    /// The n-th slave instance for unsharded (global) tables.
    pub fn slave_global(&self, slot: usize) -> Option<&Arc<DatabaseInstance>> {
        self.slave_globals.get(slot)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Index of the first region containing `value`, scanning in configured
    /// order.
    pub fn region_for(&self, value: u64) -> Option<usize> {
        self.regions.iter().position(|region| region.contains(value))
    }

    fn from_config(config: &ClusterConfig) -> Result<Self, TopologyError> {
        let mut regions = Vec::with_capacity(config.regions.len());
        for (index, region) in config.regions.iter().enumerate() {
            regions.push(Self::region_from_config(&config.name, index, region)?);
        }

        // Inclusive ranges overlap when neither ends before the other starts.
        for first in 0..regions.len() {
            for second in (first + 1)..regions.len() {
                let (a, b): (&Region, &Region) = (&regions[first], &regions[second]);
                if a.start <= b.end && b.start <= a.end {
                    return Err(TopologyError::OverlappingRegions {
                        cluster: config.name.clone(),
                        first,
                        second,
                    });
                }
            }
        }

        Ok(Self {
            name: config.name.clone(),
            master_global: config
                .master_global
                .as_ref()
                .map(|instance| make_instance(&config.name, InstanceRole::Master, instance)),
            slave_globals: config
                .slave_globals
                .iter()
                .map(|instance| make_instance(&config.name, InstanceRole::Slave, instance))
                .collect(),
            regions,
        })
    }

    fn region_from_config(
        cluster: &str,
        index: usize,
        config: &RegionConfig,
    ) -> Result<Region, TopologyError> {
        if config.start > config.end {
            return Err(TopologyError::InvertedRegion {
                cluster: cluster.to_string(),
                index,
                start: config.start,
                end: config.end,
            });
        }
        if config.masters.is_empty() {
            return Err(TopologyError::EmptyMasters {
                cluster: cluster.to_string(),
                index,
            });
        }
        for (group, instances) in config.slave_groups.iter().enumerate() {
            if instances.is_empty() {
                return Err(TopologyError::EmptySlaveGroup {
                    cluster: cluster.to_string(),
                    region: index,
                    group,
                });
            }
        }

        Ok(Region {
            start: config.start,
            end: config.end,
            masters: config
                .masters
                .iter()
                .map(|instance| make_instance(cluster, InstanceRole::Master, instance))
                .collect(),
            slave_groups: config
                .slave_groups
                .iter()
                .map(|group| {
                    group
                        .iter()
                        .map(|instance| make_instance(cluster, InstanceRole::Slave, instance))
                        .collect()
                })
                .collect(),
        })
    }
}

fn make_instance(
    cluster: &str,
    role: InstanceRole,
    config: &InstanceConfig,
) -> Arc<DatabaseInstance> {
    Arc::new(DatabaseInstance::new(
        config.name.clone(),
        cluster,
        role,
        config.dsn.clone(),
    ))
}

/// All clusters known to the process, keyed by cluster name.
///
/// Single-writer, many-reader: built once, then only read. Safe to share
/// behind an `Arc` across any number of routing threads.
#[derive(Debug, Clone, Default)]
pub struct TopologyMap {
    clusters: FxHashMap<String, ClusterTopology>,
}

impl TopologyMap {
    pub fn from_config(config: &TopologyConfig) -> Result<Self, TopologyError> {
        let mut clusters = FxHashMap::default();
        for cluster in &config.clusters {
            let topology = ClusterTopology::from_config(cluster)?;
            if clusters.insert(cluster.name.clone(), topology).is_some() {
                return Err(TopologyError::DuplicateCluster(cluster.name.clone()));
            }
        }
        Ok(Self { clusters })
    }

    pub fn cluster(&self, name: &str) -> Option<&ClusterTopology> {
        self.clusters.get(name)
    }

    pub fn cluster_names(&self) -> impl Iterator<Item = &str> {
        self.clusters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// Mapping `(cluster, table) -> physical shard count` for sharded tables.
///
/// Independent of regions; consulted after a region and instance have been
/// chosen.
#[derive(Debug, Clone, Default)]
pub struct TableShardRegistry {
    counts: FxHashMap<(String, String), u32>,
}

impl TableShardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(tables: &HashMap<String, HashMap<String, u32>>) -> Self {
        let mut registry = Self::new();
        for (cluster, entries) in tables {
            for (table, count) in entries {
                registry.register(cluster, table, *count);
            }
        }
        registry
    }

    pub fn register(&mut self, cluster: &str, table: &str, count: u32) {
        self.counts
            .insert((cluster.to_string(), table.to_string()), count);
    }

    /// Shard count for the table, or `None` when the table was never
    /// registered (the caller's `TableMetadataMissing`).
    pub fn table_count(&self, cluster: &str, table: &str) -> Option<u32> {
        self.counts
            .get(&(cluster.to_string(), table.to_string()))
            .copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, u32)> {
        self.counts
            .iter()
            .map(|((cluster, table), count)| (cluster.as_str(), table.as_str(), *count))
    }
}

/// A `(cluster, table, region)` whose instance count and table count share a
/// common factor, producing correlated db/table placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParityIssue {
    pub cluster: String,
    pub table: String,
    pub region: usize,
    pub instance_count: usize,
    pub table_count: u32,
}

/// Report every registered table whose shard count is not coprime with a
/// region's master-instance count. Routing still works for these pairs; the
/// placement is just skewed because one normalized value feeds both modulo
/// operations.
pub fn parity_report(topology: &TopologyMap, tables: &TableShardRegistry) -> Vec<ParityIssue> {
    let mut issues = Vec::new();
    for (cluster, table, count) in tables.entries() {
        let Some(cluster_topology) = topology.cluster(cluster) else {
            continue;
        };
        for (region_index, region) in cluster_topology.regions().iter().enumerate() {
            let instances = region.masters().len();
            if count > 1 && instances > 1 && gcd(instances as u64, count as u64) > 1 {
                issues.push(ParityIssue {
                    cluster: cluster.to_string(),
                    table: table.to_string(),
                    region: region_index,
                    instance_count: instances,
                    table_count: count,
                });
            }
        }
    }
    issues
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}
