//! Result materialization
//!
//! Looks a search context up by key and turns it into pages: a focused status
//! view, or a projected page of results recorded as an immutable
//! [`ResultSnapshot`]. A key whose context was evicted but whose stub survived
//! yields a redirect to the location that regenerates the search.

use crate::search::{
    ContextLookup, Facet, FieldFacet, SearchOptions, SearchRequest, SearchResultContext,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ixcore_cache::CacheGate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Window of a context to look at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Focus {
    pub top: usize,
    pub skip: usize,
    pub fdim: usize,
    /// Slash-separated path into each result; empty means the whole result
    pub field: String,
}

impl Default for Focus {
    fn default() -> Self {
        Self {
            top: 10,
            skip: 0,
            fdim: 10,
            field: String::new(),
        }
    }
}

impl Focus {
    pub fn page(top: usize, skip: usize) -> Self {
        Self {
            top,
            skip,
            ..Self::default()
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn with_fdim(mut self, fdim: usize) -> Self {
        self.fdim = fdim;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsQuery {
    pub focus: Focus,
    pub query: Option<String>,
    pub facets: Vec<String>,
    pub order: Vec<String>,
}

impl ResultsQuery {
    pub fn new(focus: Focus) -> Self {
        Self {
            focus,
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    fn request(&self) -> SearchRequest {
        SearchRequest {
            query: self.query.clone(),
            options: SearchOptions {
                top: self.focus.top,
                skip: self.focus.skip,
                fdim: self.focus.fdim,
                facets: self.facets.clone(),
                order: self.order.clone(),
            },
        }
    }
}

/// One materialized page, addressable by its id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSnapshot {
    /// Entity tag of the page
    pub id: String,
    /// SHA-1 of the context key, hex encoded
    pub key: String,
    /// Results on this page
    pub count: usize,
    /// Results of the whole search
    pub total: usize,
    pub options: SearchOptions,
    pub facets: Vec<Facet>,
    pub field_facets: Vec<FieldFacet>,
    pub sponsored: Vec<Value>,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum StatusOutcome {
    Found(Arc<SearchResultContext>),
    /// Context evicted; rerun the search at this location
    Redirect(Option<String>),
    NotFound,
}

#[derive(Debug, Clone)]
pub enum ResultsOutcome {
    Found(ResultSnapshot),
    Redirect(Option<String>),
    NotFound,
}

/// Where materialized pages are kept
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &ResultSnapshot) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<Vec<ResultSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<ResultSnapshot> {
        self.snapshots.read().iter().find(|s| s.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &ResultSnapshot) -> anyhow::Result<()> {
        self.snapshots.write().push(snapshot.clone());
        Ok(())
    }
}

pub struct ResultEndpoint {
    gate: CacheGate,
    snapshots: Arc<dyn SnapshotStore>,
}

impl ResultEndpoint {
    pub fn new(gate: CacheGate, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self { gate, snapshots }
    }

    /// Focused view of the context under `key`
    pub fn status(&self, key: &str, focus: &Focus) -> StatusOutcome {
        match ContextLookup::from_gate(&self.gate, key) {
            ContextLookup::Full(context) => StatusOutcome::Found(Arc::new(context.focused(
                focus.top,
                focus.skip,
                focus.fdim,
                &focus.field,
            ))),
            ContextLookup::Moved(stub) => StatusOutcome::Redirect(stub.generating_path),
            ContextLookup::NotFound => StatusOutcome::NotFound,
        }
    }

    /// Materialize one page of the context under `key` and record it
    pub async fn results(&self, key: &str, query: &ResultsQuery) -> anyhow::Result<ResultsOutcome> {
        let context = match ContextLookup::from_gate(&self.gate, key) {
            ContextLookup::Full(context) => context,
            ContextLookup::Moved(stub) => return Ok(ResultsOutcome::Redirect(stub.generating_path)),
            ContextLookup::NotFound => return Ok(ResultsOutcome::NotFound),
        };

        let request = query.request();
        let result = context.adapted(&request);
        let page = result.page(query.focus.skip, query.focus.top);
        let count = page.len();
        let content = project(Value::Array(page), &query.focus.field);

        let context_key = context.key().unwrap_or_else(|| key.to_string());
        let snapshot = ResultSnapshot {
            id: Uuid::new_v4().to_string(),
            key: hex::encode(Sha1::digest(context_key.as_bytes())),
            count,
            total: result.count(),
            options: request.options,
            facets: result.facets,
            field_facets: result.field_facets,
            sponsored: result.sponsored,
            content,
            created_at: Utc::now(),
        };

        self.snapshots.save(&snapshot).await?;
        debug!("Materialized {} of {} results for {} as {}", count, snapshot.total, key, snapshot.id);
        Ok(ResultsOutcome::Found(snapshot))
    }
}

/// Apply a slash-separated field path to a page of results.
///
/// The path addresses each result unless it starts with an index, in which
/// case it addresses the page itself. Missing fields become `null`.
pub fn project(page: Value, field: &str) -> Value {
    let path = field.trim_matches('/');
    if path.is_empty() {
        return page;
    }

    let pointer = format!("/{}", path);
    let indexes_page = path
        .split('/')
        .next()
        .is_some_and(|segment| segment.parse::<usize>().is_ok());

    match page {
        Value::Array(items) if !indexes_page => Value::Array(
            items
                .iter()
                .map(|item| item.pointer(&pointer).cloned().unwrap_or(Value::Null))
                .collect(),
        ),
        other => other.pointer(&pointer).cloned().unwrap_or(Value::Null),
    }
}
