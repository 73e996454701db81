//! Entity fetch orchestration
//!
//! An [`EntityFetcher`] wraps one entity reference and one [`CachingStrategy`]
//! and resolves the entity through the cache gate, the backup store or the
//! entity store, depending on the strategy. Collaborators are injected through
//! [`FetchServices`].

pub mod fetcher;
pub mod key;
pub mod services;
pub mod strategy;

pub use fetcher::{EntityFetcher, BACKUP_KEY_SUFFIX};
pub use key::EntityRef;
pub use services::{
    BackupRecord, BackupStore, DirtyMarker, EntityStore, FetchServices, InMemoryDirtyMarker,
    NeverDirty,
};
pub use strategy::{CachingStrategy, ResolveStrategy};
