//! # Shardkit
//!
//! Sharding middleware that lets an application address a logical table
//! spread across many physical databases and tables as if it were one table.
//!
//! Three tightly coupled pieces make up the core: a deterministic router
//! from sharding key to database instance and table index, a distributed
//! sequence generator for cluster-wide unique ids, and a write-invalidate
//! protocol keeping an external read cache coherent with sharded writes.
//! Routing decisions determine cache keys, and generated ids are frequently
//! the sharding values routed on.
//!
//! Topology is static configuration, loaded once into an immutable model;
//! there is no ambient global state. SQL execution, the RPC transport, and
//! the transaction coordinator stay outside this crate, behind the seams in
//! [`resource`], [`codec`], [`coordination`], and [`cache`].

pub mod cache;
pub mod codec;
pub mod config;
pub mod coordination;
pub mod hash;
pub mod resource;
pub mod router;
pub mod schema;
pub mod sequence;
pub mod topology;

// Re-export main types for convenience
pub use cache::{CacheScope, CacheStore, MemoryCacheStore, PrimaryCache, COUNT_MISSING};
pub use config::{ConfigOverrides, ShardkitConfig};
pub use coordination::{CoordinationService, MemoryCoordination};
pub use hash::HashAlgo;
pub use router::{Role, RouteError, RouteResult, Router, ShardingKey, ShardingValue};
pub use schema::{EntityDescriptor, EntityRegistry, SchemaError};
pub use sequence::{SequenceError, SequenceGenerator};
pub use topology::{
    ClusterTopology, DatabaseInstance, TableShardRegistry, TopologyError, TopologyMap,
};

use anyhow::Context;
use std::sync::Arc;
use tracing::warn;

/// Main API for shard resolution and cluster consistency.
///
/// Owns the immutable topology, the router, the sequence generator, and the
/// optional primary cache. Built once from configuration; reconfiguration
/// means building a new instance.
pub struct Shardkit {
    topology: Arc<TopologyMap>,
    tables: Arc<TableShardRegistry>,
    router: Router,
    sequences: SequenceGenerator,
    cache: Option<PrimaryCache>,
    entities: EntityRegistry,
    cache_expire_secs: u64,
}

impl Shardkit {
    /// Build the topology model and wire the core components.
    ///
    /// Emits one warning per `(cluster, table, region)` whose instance count
    /// and table count share a common factor, since the shared normalized
    /// value then skews placement across the two modulo operations.
    pub fn new(
        config: &ShardkitConfig,
        coordination: Arc<dyn CoordinationService>,
    ) -> Result<Self, TopologyError> {
        let topology = Arc::new(TopologyMap::from_config(&config.topology)?);
        let tables = Arc::new(TableShardRegistry::from_config(&config.tables));

        for issue in topology::parity_report(&topology, &tables) {
            warn!(
                cluster = %issue.cluster,
                table = %issue.table,
                region = issue.region,
                instance_count = issue.instance_count,
                table_count = issue.table_count,
                "instance count and table count share a factor; placement will be skewed"
            );
        }

        let router = Router::new(Arc::clone(&topology), Arc::clone(&tables), config.hash_algo);
        let sequences = SequenceGenerator::new(coordination, &config.sequence);

        Ok(Self {
            topology,
            tables,
            router,
            sequences,
            cache: None,
            entities: EntityRegistry::new(),
            cache_expire_secs: config.cache.expire_secs,
        })
    }

    /// Attach the primary cache backed by the given store.
    pub fn attach_cache(&mut self, store: Arc<dyn CacheStore>) {
        self.cache = Some(PrimaryCache::new(store, self.cache_expire_secs));
    }

    pub fn topology(&self) -> &TopologyMap {
        &self.topology
    }

    pub fn tables(&self) -> &TableShardRegistry {
        &self.tables
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn sequences(&self) -> &SequenceGenerator {
        &self.sequences
    }

    /// The primary cache, when one is attached.
    pub fn cache(&self) -> Option<&PrimaryCache> {
        self.cache.as_ref()
    }

    /// Resolve a sharding key to a database instance and table index.
    pub fn select(
        &self,
        role: Role,
        table: &str,
        key: &ShardingKey,
    ) -> Result<RouteResult, RouteError> {
        self.router.select(role, table, key)
    }

    /// Resolve the instance serving a cluster's global tables.
    pub fn select_global(
        &self,
        role: Role,
        cluster: &str,
    ) -> Result<Arc<DatabaseInstance>, RouteError> {
        self.router.select_global(role, cluster)
    }

    /// Next cluster-wide unique 64-bit id.
    pub fn next_long(&self, cluster: &str, name: &str) -> Result<i64, SequenceError> {
        self.sequences.next_long(cluster, name)
    }

    /// Allocate a batch of cluster-wide unique 64-bit ids.
    pub fn next_long_batch(
        &self,
        cluster: &str,
        name: &str,
        batch_size: usize,
    ) -> Result<Vec<i64>, SequenceError> {
        self.sequences.next_long_batch(cluster, name, batch_size)
    }

    /// Register an entity descriptor. Done once at startup.
    pub fn register_entity<T: 'static>(
        &mut self,
        descriptor: EntityDescriptor<T>,
    ) -> Result<(), SchemaError> {
        self.entities.register(descriptor)
    }

    /// Route a registered entity by its declared sharding field.
    pub fn route_entity<T: 'static>(
        &self,
        role: Role,
        cluster: &str,
        entity: &T,
    ) -> anyhow::Result<RouteResult> {
        let descriptor = self.entities.descriptor::<T>()?;
        let key = ShardingKey {
            cluster: cluster.to_string(),
            value: descriptor.sharding_value(entity),
        };
        self.router
            .select(role, descriptor.table(), &key)
            .with_context(|| format!("routing entity {}", std::any::type_name::<T>()))
    }

    /// Evict a registered entity's cached row after its storage write.
    /// A no-op when no cache is attached.
    pub fn evict_entity<T: 'static>(&self, cluster: &str, entity: &T) -> anyhow::Result<()> {
        let Some(cache) = self.cache.as_ref() else {
            return Ok(());
        };
        let descriptor = self.entities.descriptor::<T>()?;
        let route = self.route_entity(Role::Master, cluster, entity)?;
        cache.remove(&CacheScope::from_route(&route), descriptor.primary_key(entity));
        Ok(())
    }
}

impl std::fmt::Debug for Shardkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shardkit")
            .field("clusters", &self.topology.len())
            .field("cache", &self.cache.is_some())
            .field("entities", &self.entities.len())
            .finish()
    }
}
