//! Cache entry management with TTL/TTI support

use crate::cache::types::{CacheKey, CachedValue, TierKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// How an entry expires.
///
/// A zero duration in either dimension of `Timed` means that dimension is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// Never expires on its own; only bound pressure or explicit removal drops it
    Eternal,

    /// Expires after `time_to_live` since creation or `time_to_idle` since last access
    Timed {
        time_to_live: Duration,
        time_to_idle: Duration,
    },
}

impl ExpirationPolicy {
    /// Per-entry expiration in seconds: `<= 0` is eternal, otherwise TTL and TTI both
    /// equal `seconds`.
    pub fn from_seconds(seconds: i64) -> Self {
        if seconds <= 0 {
            ExpirationPolicy::Eternal
        } else {
            let limit = Duration::from_secs(seconds as u64);
            ExpirationPolicy::Timed {
                time_to_live: limit,
                time_to_idle: limit,
            }
        }
    }

    pub fn timed(time_to_live: Duration, time_to_idle: Duration) -> Self {
        if time_to_live.is_zero() && time_to_idle.is_zero() {
            ExpirationPolicy::Eternal
        } else {
            ExpirationPolicy::Timed {
                time_to_live,
                time_to_idle,
            }
        }
    }

    pub fn is_eternal(&self) -> bool {
        matches!(self, ExpirationPolicy::Eternal)
    }
}

/// A cache entry with its expiration metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The (adapted or raw) key the entry is stored under
    pub key: CacheKey,

    /// The cached value
    pub value: CachedValue,

    /// Entry metadata
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    /// Create a new cache entry created now
    pub fn new(key: CacheKey, value: CachedValue, tier: TierKind, expiration: ExpirationPolicy) -> Self {
        let now = Utc::now();

        Self {
            key,
            value,
            metadata: CacheMetadata {
                created_at: now,
                accessed_at: now,
                access_count: 0,
                tier,
                expiration,
            },
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiration against a given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.metadata.expiration {
            ExpirationPolicy::Eternal => false,
            ExpirationPolicy::Timed {
                time_to_live,
                time_to_idle,
            } => {
                exceeded(self.metadata.created_at, now, time_to_live)
                    || exceeded(self.metadata.accessed_at, now, time_to_idle)
            }
        }
    }

    /// Whether the entry was created before `threshold`
    pub fn created_before(&self, threshold: DateTime<Utc>) -> bool {
        self.metadata.created_at < threshold
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.metadata.accessed_at = Utc::now();
        self.metadata.access_count += 1;
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.metadata.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// Interpret the value as `T`. `None` on a type mismatch.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

fn exceeded(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    if limit.is_zero() {
        return false;
    }
    match chrono::Duration::from_std(limit) {
        Ok(limit) => now - since > limit,
        Err(_) => false,
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the entry was created; the staleness threshold compares against this
    pub created_at: DateTime<Utc>,

    /// Last access time (for LRU and idle tracking)
    pub accessed_at: DateTime<Utc>,

    /// Number of times this entry has been read
    pub access_count: u64,

    /// Tier owning the entry
    pub tier: TierKind,

    /// Expiration policy
    pub expiration: ExpirationPolicy,
}
