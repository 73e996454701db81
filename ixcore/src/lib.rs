//! ixcore: entity fetch orchestration and asynchronous search results
//!
//! Built on the single-flight [`CacheGate`](ixcore_cache::CacheGate):
//! - [`fetch`]: resolve entities through a per-fetcher caching strategy
//! - [`search`]: search result contexts filled in the background and shared by key
//! - [`endpoint`]: status views and materialized pages of those contexts

pub mod endpoint;
pub mod error;
pub mod fetch;
pub mod search;

pub use endpoint::{
    Focus, InMemorySnapshotStore, ResultEndpoint, ResultSnapshot, ResultsOutcome, ResultsQuery, SnapshotStore,
    StatusOutcome,
};
pub use error::{FetchError, Result};
pub use fetch::{
    BackupRecord, BackupStore, CachingStrategy, DirtyMarker, EntityFetcher, EntityRef, EntityStore, FetchServices,
    InMemoryDirtyMarker,
};
pub use search::{
    ContextLookup, ContextStub, DeterminedFuture, SearchDriver, SearchOptions, SearchRequest, SearchResult,
    SearchResultContext, SearchStatus, StatusListener,
};
