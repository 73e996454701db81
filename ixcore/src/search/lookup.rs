//! Finding a search context by key

use crate::search::context::{stub_key, ContextStub, SearchResultContext};
use crate::search::types::SearchResult;
use ixcore_cache::CacheGate;
use std::sync::Arc;
use tracing::debug;

/// Outcome of looking a context up by key
#[derive(Debug, Clone)]
pub enum ContextLookup {
    /// The live context
    Full(Arc<SearchResultContext>),
    /// Only the stub survived; the search must be rerun from its generating path
    Moved(ContextStub),
    NotFound,
}

impl ContextLookup {
    /// Look for a live context under `key` (acting principal), then for a stub
    /// under the derived stub key.
    ///
    /// A bare [`SearchResult`] cached under the key is wrapped into a fresh
    /// context.
    pub fn from_gate(gate: &CacheGate, key: &str) -> Self {
        if let Some(value) = gate.get_value(key) {
            match value.downcast::<SearchResultContext>() {
                Ok(context) => {
                    context.set_key(key);
                    return ContextLookup::Full(context);
                }
                Err(value) => {
                    if let Ok(result) = value.downcast::<SearchResult>() {
                        debug!("Wrapping cached search result {} into a context", key);
                        let context = SearchResultContext::from_result(result.as_ref().clone(), None);
                        context.set_key(key);
                        return ContextLookup::Full(Arc::new(context));
                    }
                    debug!("Value under {} is not a search context", key);
                }
            }
        }

        match gate.get_raw::<ContextStub>(&stub_key(key)) {
            Some(stub) => ContextLookup::Moved(stub.as_ref().clone()),
            None => ContextLookup::NotFound,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, ContextLookup::Full(_))
    }

    pub fn context(&self) -> Option<&Arc<SearchResultContext>> {
        match self {
            ContextLookup::Full(context) => Some(context),
            _ => None,
        }
    }
}
