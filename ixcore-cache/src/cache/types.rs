//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Cache key type. Logical keys and adapted keys share this representation.
pub type CacheKey = String;

/// Type-erased cached value. Readers downcast to the type they expect and
/// treat a mismatch as a miss.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Which tier an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// Bounded, time-limited tier receiving every generated value
    Evictable,

    /// Unbounded-by-pressure tier for administratively populated values
    NonEvictable,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Evictable => "IxCache-Evictable",
            TierKind::NonEvictable => "IxCache-Not-Evictable",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics for one cache tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Tier these statistics describe
    pub tier: TierKind,

    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Number of entries currently in the tier
    pub entries: usize,

    /// Number of evictions due to the entry bound
    pub evictions_size: u64,

    /// Number of evictions due to TTL/TTI expiration
    pub evictions_ttl: u64,

    /// Number of explicit removals
    pub invalidations: u64,
}

impl CacheStats {
    pub fn new(tier: TierKind) -> Self {
        Self {
            tier,
            hits: 0,
            misses: 0,
            entries: 0,
            evictions_size: 0,
            evictions_ttl: 0,
            invalidations: 0,
        }
    }

    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Calculate total evictions
    pub fn total_evictions(&self) -> u64 {
        self.evictions_size + self.evictions_ttl
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats[{}] {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, evictions: {}, invalidations: {} }}",
            self.tier,
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.total_evictions(),
            self.invalidations
        )
    }
}
