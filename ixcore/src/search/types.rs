//! Common types for search module

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Paging and faceting options of a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Page size
    pub top: usize,
    /// Number of results to skip
    pub skip: usize,
    /// Maximum number of values per facet
    pub fdim: usize,
    /// Facet filters (`name/value`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<String>,
    /// Ordering expressions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top: 10,
            skip: 0,
            fdim: 10,
            facets: Vec::new(),
            order: Vec::new(),
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_top(mut self, top: usize) -> Self {
        self.top = top;
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_fdim(mut self, fdim: usize) -> Self {
        self.fdim = fdim;
        self
    }

    pub fn with_facet(mut self, facet: impl Into<String>) -> Self {
        self.facets.push(facet.into());
        self
    }

    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order.push(order.into());
        self
    }
}

/// A query plus the options it runs with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub options: SearchOptions,
}

impl SearchRequest {
    pub fn new(options: SearchOptions) -> Self {
        Self {
            query: None,
            options,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// How a field facet's query matched the field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Full,
    WordStartsWith,
    Word,
    Contains,
    NoMatch,
}

impl MatchType {
    /// Display order, best match first
    pub const ORDER: [MatchType; 5] = [
        MatchType::Full,
        MatchType::WordStartsWith,
        MatchType::Word,
        MatchType::Contains,
        MatchType::NoMatch,
    ];
}

/// Query-narrowing suggestion: restricting the query to `field` would match `count` records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFacet {
    pub field: String,
    pub query: String,
    pub count: usize,
    pub match_type: MatchType,
}

impl FieldFacet {
    pub fn new(field: impl Into<String>, query: impl Into<String>, count: usize, match_type: MatchType) -> Self {
        Self {
            field: field.into(),
            query: query.into(),
            count,
            match_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetValue {
    pub label: String,
    pub count: usize,
}

/// Counts of results per value of one attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub name: String,
    pub values: Vec<FacetValue>,
}

impl Facet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    pub fn with_value(mut self, label: impl Into<String>, count: usize) -> Self {
        self.values.push(FacetValue {
            label: label.into(),
            count,
        });
        self
    }

    /// Copy keeping at most `fdim` values
    pub fn truncated(&self, fdim: usize) -> Self {
        Self {
            name: self.name.clone(),
            values: self.values.iter().take(fdim).cloned().collect(),
        }
    }
}

/// Results of a search as produced by the index, possibly still growing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub key: Option<String>,
    pub options: SearchOptions,
    pub matches: Vec<Value>,
    pub sponsored: Vec<Value>,
    pub facets: Vec<Facet>,
    pub field_facets: Vec<FieldFacet>,
    /// Declared number of matches, which may exceed `matches.len()` while loading
    pub total: usize,
    pub finished: bool,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl SearchResult {
    pub fn new(key: Option<String>, options: SearchOptions) -> Self {
        Self {
            key,
            options,
            matches: Vec::new(),
            sponsored: Vec::new(),
            facets: Vec::new(),
            field_facets: Vec::new(),
            total: 0,
            finished: false,
            started_at: Utc::now(),
            stopped_at: None,
        }
    }

    /// Number of matches materialized so far
    pub fn size(&self) -> usize {
        self.matches.len()
    }

    /// Declared number of matches
    pub fn count(&self) -> usize {
        self.total
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Mark the result complete
    pub fn finish(&mut self) {
        self.finished = true;
        self.stopped_at = Some(Utc::now());
        self.total = self.total.max(self.matches.len());
    }

    /// Copy of `top` matches starting at `skip`
    pub fn page(&self, skip: usize, top: usize) -> Vec<Value> {
        self.matches.iter().skip(skip).take(top).cloned().collect()
    }
}
