//! Enlistable database resource, consumed by the external transaction
//! coordinator.
//!
//! The coordinator collects one resource per instance the router resolved
//! during an operation and issues `commit`/`rollback` on each in sequence
//! (best-effort one-phase commit). This crate only defines the seam.

/// One enlisted connection to a routed database instance.
pub trait DBResource {
    /// Stable identifier, typically `cluster/instance`.
    fn id(&self) -> &str;

    fn commit(&mut self) -> anyhow::Result<()>;

    fn rollback(&mut self) -> anyhow::Result<()>;

    /// Return the underlying connection to its pool.
    fn close(&mut self) -> anyhow::Result<()>;
}
