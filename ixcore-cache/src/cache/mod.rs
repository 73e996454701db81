//! # Tiered Cache Gate
//!
//! A keyed value cache with at-most-one-concurrent-generation-per-key
//! semantics, split into an evictable tier and an optional non-evictable tier.
//!
//! ## Features
//!
//! - **Single-flight generation**: concurrent misses on one key share one generator run
//! - **Per-principal keys**: logical keys are scoped to the acting principal
//! - **Bulk invalidation**: every principal's variant of a logical key can be dropped at once
//! - **Staleness reads**: entries created before a threshold count as misses
//! - **LRU + TTL/TTI**: bounded tiers with lazy expiration
//!
//! ## Example
//!
//! ```rust
//! use ixcore_cache::cache::{CacheGate, FixedPrincipal, GateConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = GateConfig::builder()
//!     .max_entries(10_000)
//!     .time_to_live(Duration::from_secs(3600))
//!     .build();
//!
//! let gate = CacheGate::new(config, Arc::new(FixedPrincipal::new("alice")))?;
//!
//! let answer = gate
//!     .get_or_else("answer", || async { Ok::<_, anyhow::Error>(Some(Arc::new(42u64))) })
//!     .await?;
//! assert_eq!(answer.as_deref(), Some(&42));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod gate;
pub mod key_adapter;
pub mod principal;
pub mod tier;
pub mod types;

pub use config::{GateConfig, GateConfigBuilder, TierConfig};
pub use entry::{CacheEntry, CacheMetadata, ExpirationPolicy};
pub use gate::{start_auto_cleanup, CacheGate};
pub use key_adapter::KeyAdapter;
pub use principal::{FixedPrincipal, GuestPrincipal, PrincipalSource, TaskPrincipal, GUEST_PRINCIPAL};
pub use tier::CacheTier;
pub use types::{CacheKey, CacheStats, CachedValue, TierKind};
