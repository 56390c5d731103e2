//! # Schema Registration
//!
//! Startup-time registration of entity descriptors: table name plus
//! accessors for the primary key and the sharding field. Accessors are
//! resolved once, when the descriptor is registered, and routing an entity
//! never re-derives them.

use crate::router::ShardingValue;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Schema registry failure.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("no entity descriptor registered for {0}")]
    Unregistered(&'static str),
    #[error("entity descriptor for {0} already registered")]
    AlreadyRegistered(&'static str),
}

/// How to read routing inputs out of one entity type.
pub struct EntityDescriptor<T> {
    table: String,
    primary_key: Box<dyn Fn(&T) -> i64 + Send + Sync>,
    sharding_value: Box<dyn Fn(&T) -> ShardingValue + Send + Sync>,
}

impl<T> EntityDescriptor<T> {
    pub fn new(
        table: impl Into<String>,
        primary_key: impl Fn(&T) -> i64 + Send + Sync + 'static,
        sharding_value: impl Fn(&T) -> ShardingValue + Send + Sync + 'static,
    ) -> Self {
        Self {
            table: table.into(),
            primary_key: Box::new(primary_key),
            sharding_value: Box::new(sharding_value),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self, entity: &T) -> i64 {
        (self.primary_key)(entity)
    }

    pub fn sharding_value(&self, entity: &T) -> ShardingValue {
        (self.sharding_value)(entity)
    }
}

impl<T> fmt::Debug for EntityDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("entity", &type_name::<T>())
            .field("table", &self.table)
            .finish()
    }
}

/// All registered entity descriptors, keyed by entity type.
#[derive(Default)]
pub struct EntityRegistry {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor for `T`. Registering a type twice is an error;
    /// descriptors are startup configuration, not runtime state.
    pub fn register<T: 'static>(
        &mut self,
        descriptor: EntityDescriptor<T>,
    ) -> Result<(), SchemaError> {
        use std::collections::hash_map::Entry;
        match self.entries.entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => Err(SchemaError::AlreadyRegistered(type_name::<T>())),
            Entry::Vacant(slot) => {
                slot.insert(Box::new(descriptor));
                Ok(())
            }
        }
    }

    pub fn descriptor<T: 'static>(&self) -> Result<&EntityDescriptor<T>, SchemaError> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<EntityDescriptor<T>>())
            .ok_or(SchemaError::Unregistered(type_name::<T>()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}
