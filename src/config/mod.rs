//! Unified configuration for shardkit components.
//!
//! Configuration is loaded with precedence: programmatic overrides > Env
//! vars > Config file > Defaults.
//!
//! # Example config file (shardkit.toml)
//! ```toml
//! hash_algo = "bernstein"
//!
//! [sequence]
//! batch_size = 100
//!
//! [cache]
//! servers = ["127.0.0.1:11211"]
//! expire_secs = 0
//!
//! [[topology.clusters]]
//! name = "pinus"
//!
//! [[topology.clusters.regions]]
//! start = 0
//! end = 999999
//! masters = [
//!     { name = "pinus-m0", dsn = "mysql://db0:3306/pinus" },
//!     { name = "pinus-m1", dsn = "mysql://db1:3306/pinus" },
//! ]
//!
//! [tables.pinus]
//! test_entity = 4
//! ```

mod defaults;

pub use defaults::*;

use crate::hash::HashAlgo;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Main configuration for a shardkit deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardkitConfig {
    /// Hash algorithm applied to textual sharding values
    pub hash_algo: HashAlgo,
    /// Sequence generator configuration
    pub sequence: SequenceConfig,
    /// Primary cache configuration
    pub cache: CacheConfig,
    /// Cluster topology
    pub topology: TopologyConfig,
    /// Shard counts per `(cluster, table)`
    pub tables: HashMap<String, HashMap<String, u32>>,
}

impl ShardkitConfig {
    /// Load configuration with precedence: overrides > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - Programmatic overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(ShardkitConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with SHARDKIT_ prefix
        figment = figment.merge(Env::prefixed("SHARDKIT_").split("__"));

        // Layer 3: Programmatic overrides
        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only (no overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }
}

/// Sequence generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Ids fetched per coordination round when refilling a local buffer
    pub batch_size: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_SEQUENCE_BATCH,
        }
    }
}

/// Primary cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache server addresses (host:port)
    pub servers: Vec<String>,
    /// Backstop TTL in seconds; 0 disables expiry. This is a safety net for
    /// entries stranded by a crash between a storage write and its cache
    /// update, not the consistency mechanism.
    pub expire_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            expire_secs: DEFAULT_CACHE_EXPIRE_SECS,
        }
    }
}

/// Cluster topology configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub clusters: Vec<ClusterConfig>,
}

/// One cluster: optional global-table instances plus sharded regions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub name: String,
    /// Master instance for unsharded (global) tables
    pub master_global: Option<InstanceConfig>,
    /// Slave instances for unsharded (global) tables, by slot
    pub slave_globals: Vec<InstanceConfig>,
    pub regions: Vec<RegionConfig>,
}

/// One region of the sharding-value space.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Inclusive lower bound
    pub start: u64,
    /// Inclusive upper bound
    pub end: u64,
    pub masters: Vec<InstanceConfig>,
    /// One entry per slave slot; each entry lists the instances of that slot
    pub slave_groups: Vec<Vec<InstanceConfig>>,
}

/// One physical database instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub name: String,
    pub dsn: String,
}

/// Programmatic overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_algo: Option<HashAlgo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<SequenceOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_secs: Option<u64>,
}

/// Configuration error.
#[derive(Debug, Error)]
#[error("configuration error: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShardkitConfig::default();
        assert_eq!(config.hash_algo, HashAlgo::Bernstein);
        assert_eq!(config.sequence.batch_size, DEFAULT_SEQUENCE_BATCH);
        assert_eq!(config.cache.expire_secs, DEFAULT_CACHE_EXPIRE_SECS);
        assert!(config.topology.clusters.is_empty());
    }

    #[test]
    fn test_toml_round_trip() {
        let toml = r#"
            hash_algo = "bkdr"

            [sequence]
            batch_size = 10

            [[topology.clusters]]
            name = "pinus"

            [[topology.clusters.regions]]
            start = 0
            end = 999999
            masters = [
                { name = "m0", dsn = "db://m0" },
                { name = "m1", dsn = "db://m1" },
            ]

            [tables.pinus]
            test_entity = 4
        "#;
        let config: ShardkitConfig = Figment::new()
            .merge(Serialized::defaults(ShardkitConfig::default()))
            .merge(Toml::string(toml))
            .extract()
            .unwrap();

        assert_eq!(config.hash_algo, HashAlgo::Bkdr);
        assert_eq!(config.sequence.batch_size, 10);
        assert_eq!(config.topology.clusters.len(), 1);
        assert_eq!(config.topology.clusters[0].regions[0].masters.len(), 2);
        assert_eq!(config.tables["pinus"]["test_entity"], 4);
    }

    #[test]
    fn test_overrides_win() {
        let overrides = ConfigOverrides {
            hash_algo: Some(HashAlgo::Djb),
            sequence: Some(SequenceOverrides {
                batch_size: Some(7),
            }),
            cache: None,
        };
        let config: ShardkitConfig = Figment::new()
            .merge(Serialized::defaults(ShardkitConfig::default()))
            .merge(Serialized::defaults(overrides))
            .extract()
            .unwrap();
        assert_eq!(config.hash_algo, HashAlgo::Djb);
        assert_eq!(config.sequence.batch_size, 7);
    }
}
