//! Asynchronous search results
//!
//! A search runs in the background and fills a [`SearchResultContext`] that
//! callers find by key through the cache gate. While the search runs, callers
//! page through what has accumulated or wait on a [`DeterminedFuture`] until
//! the result size is known. Once the full context is evicted, a small
//! [`ContextStub`] remains under `"cached/" + key` so callers can be sent back
//! to the location that regenerates it.

pub mod context;
pub mod driver;
pub mod future;
pub mod lookup;
pub mod types;

pub use context::{
    stub_key, ContextSnapshot, ContextStub, ResultAdapter, SearchResultContext, SearchStatus, StatusListener,
};
pub use driver::SearchDriver;
pub use future::DeterminedFuture;
pub use lookup::ContextLookup;
pub use types::{Facet, FacetValue, FieldFacet, MatchType, SearchOptions, SearchRequest, SearchResult};
