//! Default constants for shardkit configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Sequence Generator Defaults
// =============================================================================

/// Default number of ids allocated per coordination round.
/// Larger batches reduce coordination-service traffic at the cost of wider
/// id gaps when a process restarts with an unexhausted buffer.
pub const DEFAULT_SEQUENCE_BATCH: usize = 100;

/// Attempts made when an allocation yields the invalid id 0.
pub const ZERO_ID_RETRIES: u32 = 5;

/// Fixed pause between zero-id retries, in milliseconds.
pub const ZERO_ID_BACKOFF_MS: u64 = 500;

// =============================================================================
// Cache Defaults
// =============================================================================

/// Default backstop TTL for cached entries, in seconds (0 = no expiry).
/// Coherence comes from write invalidation, not from expiry.
pub const DEFAULT_CACHE_EXPIRE_SECS: u64 = 0;
