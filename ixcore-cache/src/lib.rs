//! # ixcore-cache
//!
//! Result cache shared by the ixcore services.
//!
//! ## Features
//!
//! - Tiered cache gate (evictable + optional non-evictable tier)
//! - Single-flight generation: one generator run per key, outcome shared by all waiters
//! - Principal-scoped keys with a reverse index for bulk invalidation
//! - Staleness-driven regeneration (`get_since_or_else`)
//! - Environment-driven configuration
//!
//! ## Key formats
//!
//! Adapted keys are `"!" + key + "#" + hex(sha1(principal))`; an unauthenticated
//! caller is the principal `"GUEST"`. Raw operations use the key unchanged.
//!
//! ```no_run
//! use ixcore_cache::{CacheGate, GateConfig, TaskPrincipal};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gate = CacheGate::new(GateConfig::from_env()?, Arc::new(TaskPrincipal))?;
//!
//!     let greeting = TaskPrincipal::scope("alice", async {
//!         gate.get_or_else("greeting", || async {
//!             Ok::<_, anyhow::Error>(Some(Arc::new("hello".to_string())))
//!         })
//!         .await
//!     })
//!     .await?;
//!
//!     println!("{:?}", greeting);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    start_auto_cleanup, CacheEntry, CacheGate, CacheKey, CacheMetadata, CacheStats, CacheTier,
    CachedValue, ExpirationPolicy, FixedPrincipal, GateConfig, GateConfigBuilder, GuestPrincipal,
    KeyAdapter, PrincipalSource, TaskPrincipal, TierConfig, TierKind, GUEST_PRINCIPAL,
};
pub use error::{GateError, Result};
