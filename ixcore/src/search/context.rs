//! Search result context
//!
//! A context tracks one search that may still be running. The executor appends
//! results and advances the status; readers take snapshots, page through them
//! and wait for the result size to become known.
//!
//! Status only moves forward through `Pending -> Running -> Determined -> Done`;
//! `Failed` can be entered from any state that is not terminal.

use crate::search::future::DeterminedFuture;
use crate::search::types::{Facet, FieldFacet, MatchType, SearchOptions, SearchRequest, SearchResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, warn};

/// Prefix of the key a context stub is stored under
pub const STUB_KEY_PREFIX: &str = "cached/";

const ID_LENGTH: usize = 10;

/// Key a stub for the context stored under `key` lives at
pub fn stub_key(key: &str) -> String {
    format!("{}{}", STUB_KEY_PREFIX, key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchStatus {
    Pending,
    Running,
    /// Final result size known; results may still be materializing
    Determined,
    Done,
    Failed,
}

impl SearchStatus {
    fn rank(&self) -> u8 {
        match self {
            SearchStatus::Pending => 0,
            SearchStatus::Running => 1,
            SearchStatus::Determined => 2,
            SearchStatus::Done => 3,
            SearchStatus::Failed => 4,
        }
    }

    /// No transition leaves this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SearchStatus::Done | SearchStatus::Failed)
    }

    /// Waiters on the result size can be released
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SearchStatus::Determined | SearchStatus::Done | SearchStatus::Failed
        )
    }

    pub fn can_transition_to(&self, next: SearchStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == SearchStatus::Failed || next.rank() > self.rank()
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Observer of status transitions
pub trait StatusListener: Send + Sync {
    fn on_status_change(&self, new_status: SearchStatus, old_status: SearchStatus);
}

/// Turns a context into a result for a request
pub type ResultAdapter = Arc<dyn Fn(&SearchRequest, &SearchResultContext) -> SearchResult + Send + Sync>;

/// Minimal recoverable projection of a context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStub {
    pub id: String,
    pub key: Option<String>,
    pub generating_path: Option<String>,
}

impl ContextStub {
    /// Key this stub is stored under
    pub fn storage_key(&self) -> Option<String> {
        self.key.as_deref().map(stub_key)
    }
}

/// Serializable status view of a context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub id: String,
    pub key: Option<String>,
    pub status: SearchStatus,
    pub message: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub stop: Option<DateTime<Utc>>,
    pub count: usize,
    pub total: Option<usize>,
    pub finished: bool,
    pub determined: bool,
    pub generating_url: Option<String>,
}

#[derive(Default)]
struct ContextState {
    key: Option<String>,
    message: Option<String>,
    start: Option<DateTime<Utc>>,
    stop: Option<DateTime<Utc>>,
    total: Option<usize>,
    sponsored: Vec<Value>,
    facets: Vec<Facet>,
    field_facets: Vec<FieldFacet>,
}

pub struct SearchResultContext {
    id: String,
    generating_path: Option<String>,
    status: Mutex<SearchStatus>,
    state: RwLock<ContextState>,
    results: RwLock<Vec<Value>>,
    listeners: Mutex<Vec<Weak<dyn StatusListener>>>,
    adapter: OnceLock<ResultAdapter>,
}

impl SearchResultContext {
    /// A pending context; `generating_path` is where the search can be rerun from
    pub fn new(generating_path: Option<String>) -> Self {
        Self {
            id: random_id(),
            generating_path,
            status: Mutex::new(SearchStatus::Pending),
            state: RwLock::new(ContextState::default()),
            results: RwLock::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            adapter: OnceLock::new(),
        }
    }

    /// Seed a context from a result the index already produced
    pub fn from_result(result: SearchResult, generating_path: Option<String>) -> Self {
        let status = if result.is_finished() {
            SearchStatus::Done
        } else if result.size() > 0 {
            SearchStatus::Determined
        } else {
            SearchStatus::Pending
        };

        let message = (status != SearchStatus::Done).then(|| loading_message(result.size(), result.count()));
        let stop = if status == SearchStatus::Done {
            result.stopped_at
        } else {
            None
        };

        let context = Self::new(generating_path);
        *context.status.lock() = status;
        *context.results.write() = result.matches;
        *context.state.write() = ContextState {
            key: result.key,
            message,
            start: Some(result.started_at),
            stop,
            total: Some(result.total),
            sponsored: result.sponsored,
            facets: result.facets,
            field_facets: result.field_facets,
        };
        context
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> Option<String> {
        self.state.read().key.clone()
    }

    pub fn set_key(&self, key: impl Into<String>) {
        self.state.write().key = Some(key.into());
    }

    pub fn generating_path(&self) -> Option<&str> {
        self.generating_path.as_deref()
    }

    pub fn status(&self) -> SearchStatus {
        *self.status.lock()
    }

    /// Move to `status` and tell every live listener about it.
    ///
    /// Transitions backwards or out of a terminal state are refused and
    /// nobody is notified.
    pub fn set_status(&self, status: SearchStatus) -> bool {
        let old = {
            let mut current = self.status.lock();
            let old = *current;
            if !old.can_transition_to(status) {
                debug!("Context {} refused transition {} -> {}", self.id, old, status);
                return false;
            }
            *current = status;
            old
        };

        self.notify_change(status, old);
        true
    }

    pub fn message(&self) -> Option<String> {
        self.state.read().message.clone()
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.state.write().message = Some(message.into());
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.state.read().start
    }

    pub fn set_start(&self, start: DateTime<Utc>) {
        self.state.write().start = Some(start);
    }

    pub fn stop(&self) -> Option<DateTime<Utc>> {
        self.state.read().stop
    }

    pub fn set_stop(&self, stop: DateTime<Utc>) {
        self.state.write().stop = Some(stop);
    }

    /// Results materialized so far
    pub fn count(&self) -> usize {
        self.results.read().len()
    }

    /// Declared total, or the materialized count once the size is determined
    pub fn total(&self) -> Option<usize> {
        match self.state.read().total {
            Some(total) => Some(total),
            None if self.is_determined() => Some(self.count()),
            None => None,
        }
    }

    pub fn set_total(&self, total: usize) {
        self.state.write().total = Some(total);
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_determined(&self) -> bool {
        self.status().is_settled()
    }

    /// Append one result
    pub fn add(&self, result: Value) {
        self.results.write().push(result);
    }

    /// Copy of every result accumulated so far, in insertion order
    pub fn results(&self) -> Vec<Value> {
        self.results.read().clone()
    }

    /// Records that matched a predefined set of fields directly
    pub fn exact_matches(&self) -> Vec<Value> {
        self.state.read().sponsored.clone()
    }

    pub fn has_exact_matches(&self) -> bool {
        !self.state.read().sponsored.is_empty()
    }

    pub fn set_sponsored(&self, sponsored: Vec<Value>) {
        self.state.write().sponsored = sponsored;
    }

    pub fn facets(&self) -> Vec<Facet> {
        self.state.read().facets.clone()
    }

    pub fn set_facets(&self, facets: Vec<Facet>) {
        self.state.write().facets = facets;
    }

    pub fn field_facets(&self) -> Vec<FieldFacet> {
        self.state.read().field_facets.clone()
    }

    pub fn add_field_facets(&self, facets: impl IntoIterator<Item = FieldFacet>) {
        self.state.write().field_facets.extend(facets);
    }

    /// Field facets grouped by match type, best match type first. Match types
    /// without facets are left out.
    pub fn field_facets_by_match_type(&self) -> Vec<(MatchType, Vec<FieldFacet>)> {
        let facets = self.field_facets();
        MatchType::ORDER
            .into_iter()
            .filter_map(|match_type| {
                let group: Vec<FieldFacet> = facets
                    .iter()
                    .filter(|facet| facet.match_type == match_type)
                    .cloned()
                    .collect();
                (!group.is_empty()).then_some((match_type, group))
            })
            .collect()
    }

    // ----- listeners -----

    /// Register a listener. Only a weak reference is kept, so a listener
    /// nobody else holds is dropped at the next notification.
    pub fn add_listener(&self, listener: &Arc<dyn StatusListener>) {
        self.listeners.lock().push(Arc::downgrade(listener));
    }

    /// Unregister a listener, pruning dead ones on the way
    pub fn remove_listener(&self, listener: &Arc<dyn StatusListener>) {
        let target = Arc::as_ptr(listener) as *const ();
        self.listeners
            .lock()
            .retain(|weak| weak.strong_count() > 0 && weak.as_ptr() as *const () != target);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().iter().filter(|weak| weak.strong_count() > 0).count()
    }

    fn notify_change(&self, new_status: SearchStatus, old_status: SearchStatus) {
        let live: Vec<Arc<dyn StatusListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|weak| weak.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in live {
            let delivered = catch_unwind(AssertUnwindSafe(|| {
                listener.on_status_change(new_status, old_status)
            }));
            if delivered.is_err() {
                warn!(
                    "Status listener panicked on {} -> {} for context {}",
                    old_status, new_status, self.id
                );
            }
        }
    }

    /// Completes once the status is `Determined`, `Done` or `Failed`
    pub fn determined_future(self: &Arc<Self>) -> DeterminedFuture {
        DeterminedFuture::new(Arc::clone(self))
    }

    // ----- views -----

    /// Read-only copy windowed to `top` results after `skip`. Facets are
    /// limited to `field` when it is non-empty and to `fdim` values each.
    pub fn focused(&self, top: usize, skip: usize, fdim: usize, field: &str) -> SearchResultContext {
        let page: Vec<Value> = self.results.read().iter().skip(skip).take(top).cloned().collect();
        let state = self.state.read();

        let facets = state
            .facets
            .iter()
            .filter(|facet| field.is_empty() || facet.name == field)
            .map(|facet| facet.truncated(fdim))
            .collect();

        let total = match state.total {
            Some(total) => Some(total),
            None if self.is_determined() => Some(self.count()),
            None => None,
        };

        SearchResultContext {
            id: self.id.clone(),
            generating_path: self.generating_path.clone(),
            status: Mutex::new(self.status()),
            state: RwLock::new(ContextState {
                key: state.key.clone(),
                message: state.message.clone(),
                start: state.start,
                stop: state.stop,
                total,
                sponsored: state.sponsored.clone(),
                facets,
                field_facets: state.field_facets.clone(),
            }),
            results: RwLock::new(page),
            listeners: Mutex::new(Vec::new()),
            adapter: OnceLock::new(),
        }
    }

    /// Install the result adapter. Only the first call has an effect.
    pub fn set_adapter(&self, adapter: ResultAdapter) -> bool {
        self.adapter.set(adapter).is_ok()
    }

    /// Result for `request` through the installed adapter, or a projection of
    /// the accumulated results when none is installed
    pub fn adapted(&self, request: &SearchRequest) -> SearchResult {
        match self.adapter.get() {
            Some(adapter) => adapter(request, self),
            None => self.to_search_result(&request.options),
        }
    }

    /// Projection of the accumulated results under `options`
    pub fn to_search_result(&self, options: &SearchOptions) -> SearchResult {
        let state = self.state.read();
        let matches = self.results();
        let status = self.status();

        SearchResult {
            key: state.key.clone(),
            options: options.clone(),
            total: state.total.unwrap_or(matches.len()).max(matches.len()),
            matches,
            sponsored: state.sponsored.clone(),
            facets: state.facets.iter().map(|facet| facet.truncated(options.fdim)).collect(),
            field_facets: state.field_facets.clone(),
            finished: status == SearchStatus::Done,
            started_at: state.start.unwrap_or_else(Utc::now),
            stopped_at: state.stop,
        }
    }

    /// Stub needed to find the generating location after eviction
    pub fn serialized_form(&self) -> ContextStub {
        ContextStub {
            id: self.id.clone(),
            key: self.key(),
            generating_path: self.generating_path.clone(),
        }
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let state = self.state.read();
        let status = self.status();
        let count = self.count();

        ContextSnapshot {
            id: self.id.clone(),
            key: state.key.clone(),
            status,
            message: state.message.clone(),
            start: state.start,
            stop: state.stop,
            count,
            total: state.total.or(status.is_settled().then_some(count)),
            finished: status.is_terminal(),
            determined: status.is_settled(),
            generating_url: self.generating_path.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshot())
    }
}

impl fmt::Debug for SearchResultContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchResultContext")
            .field("id", &self.id)
            .field("key", &self.key())
            .field("status", &self.status())
            .field("count", &self.count())
            .finish()
    }
}

fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect()
}

fn loading_message(size: usize, total: usize) -> String {
    let percent = if total == 0 {
        0
    } else {
        (100 * size).div_ceil(total)
    };
    format!("Loading...{}%", percent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        seen: Mutex<Vec<(SearchStatus, SearchStatus)>>,
    }

    impl StatusListener for Recorder {
        fn on_status_change(&self, new_status: SearchStatus, old_status: SearchStatus) {
            self.seen.lock().push((new_status, old_status));
        }
    }

    struct Panicker;

    impl StatusListener for Panicker {
        fn on_status_change(&self, _: SearchStatus, _: SearchStatus) {
            panic!("listener failure");
        }
    }

    struct Counter(AtomicUsize);

    impl StatusListener for Counter {
        fn on_status_change(&self, _: SearchStatus, _: SearchStatus) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_new_context() {
        let ctx = SearchResultContext::new(Some("/api/v1/search?q=aspirin".into()));
        assert_eq!(ctx.id().len(), 10);
        assert!(ctx.id().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(ctx.status(), SearchStatus::Pending);
        assert_eq!(ctx.total(), None);
        assert!(!ctx.is_determined());
    }

    #[test]
    fn test_status_monotonic() {
        let ctx = SearchResultContext::new(None);
        assert!(ctx.set_status(SearchStatus::Running));
        assert!(!ctx.set_status(SearchStatus::Pending));
        assert!(!ctx.set_status(SearchStatus::Running));
        assert!(ctx.set_status(SearchStatus::Done));
        assert!(!ctx.set_status(SearchStatus::Failed));
        assert!(!ctx.set_status(SearchStatus::Running));
        assert_eq!(ctx.status(), SearchStatus::Done);
    }

    #[test]
    fn test_failed_from_any_open_state() {
        for from in [SearchStatus::Pending, SearchStatus::Running, SearchStatus::Determined] {
            assert!(from.can_transition_to(SearchStatus::Failed));
        }
        assert!(!SearchStatus::Failed.can_transition_to(SearchStatus::Failed));
    }

    #[test]
    fn test_listeners_notified_in_order() {
        let ctx = SearchResultContext::new(None);
        let recorder = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        let listener: Arc<dyn StatusListener> = recorder.clone();
        ctx.add_listener(&listener);

        ctx.set_status(SearchStatus::Running);
        ctx.set_status(SearchStatus::Determined);
        ctx.set_status(SearchStatus::Running);
        ctx.set_status(SearchStatus::Done);

        assert_eq!(
            *recorder.seen.lock(),
            vec![
                (SearchStatus::Running, SearchStatus::Pending),
                (SearchStatus::Determined, SearchStatus::Running),
                (SearchStatus::Done, SearchStatus::Determined),
            ]
        );
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let ctx = SearchResultContext::new(None);
        let panicker: Arc<dyn StatusListener> = Arc::new(Panicker);
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let counting: Arc<dyn StatusListener> = counter.clone();

        ctx.add_listener(&panicker);
        ctx.add_listener(&counting);

        ctx.set_status(SearchStatus::Running);
        ctx.set_status(SearchStatus::Done);

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dead_listeners_pruned() {
        let ctx = SearchResultContext::new(None);
        {
            let transient: Arc<dyn StatusListener> = Arc::new(Counter(AtomicUsize::new(0)));
            ctx.add_listener(&transient);
            assert_eq!(ctx.listener_count(), 1);
        }
        assert_eq!(ctx.listener_count(), 0);

        ctx.set_status(SearchStatus::Running);
        assert!(ctx.listeners.lock().is_empty());
    }

    #[test]
    fn test_remove_listener() {
        let ctx = SearchResultContext::new(None);
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let listener: Arc<dyn StatusListener> = counter.clone();

        ctx.add_listener(&listener);
        ctx.remove_listener(&listener);
        ctx.set_status(SearchStatus::Running);

        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_total_falls_back_to_count_once_determined() {
        let ctx = SearchResultContext::new(None);
        ctx.add(json!(1));
        ctx.add(json!(2));
        assert_eq!(ctx.total(), None);

        ctx.set_status(SearchStatus::Determined);
        assert_eq!(ctx.total(), Some(2));

        ctx.set_total(40);
        assert_eq!(ctx.total(), Some(40));
    }

    #[test]
    fn test_from_result_seeds_status() {
        let mut partial = SearchResult::new(Some("q1".into()), SearchOptions::default());
        partial.matches = vec![json!("a")];
        partial.total = 3;

        let ctx = SearchResultContext::from_result(partial.clone(), None);
        assert_eq!(ctx.status(), SearchStatus::Determined);
        assert_eq!(ctx.message().as_deref(), Some("Loading...34%"));
        assert_eq!(ctx.key().as_deref(), Some("q1"));
        assert_eq!(ctx.total(), Some(3));

        partial.finish();
        let done = SearchResultContext::from_result(partial, None);
        assert_eq!(done.status(), SearchStatus::Done);
        assert!(done.message().is_none());
        assert!(done.stop().is_some());

        let empty = SearchResultContext::from_result(SearchResult::new(None, SearchOptions::default()), None);
        assert_eq!(empty.status(), SearchStatus::Pending);
        assert_eq!(empty.message().as_deref(), Some("Loading...0%"));
    }

    #[test]
    fn test_focused_window() {
        let ctx = SearchResultContext::new(None);
        for i in 0..5 {
            ctx.add(json!(i));
        }
        ctx.set_facets(vec![
            Facet::new("type").with_value("a", 3).with_value("b", 2),
            Facet::new("status").with_value("approved", 5),
        ]);

        let focused = ctx.focused(2, 1, 1, "");
        assert_eq!(focused.results(), vec![json!(1), json!(2)]);
        assert_eq!(focused.id(), ctx.id());
        assert_eq!(focused.facets().len(), 2);
        assert!(focused.facets().iter().all(|f| f.values.len() == 1));

        let by_field = ctx.focused(10, 0, 10, "status");
        assert_eq!(by_field.facets().len(), 1);
        assert_eq!(by_field.count(), 5);

        // the original is untouched
        assert_eq!(ctx.count(), 5);
        assert_eq!(ctx.facets()[0].values.len(), 2);
    }

    #[test]
    fn test_field_facets_grouped_by_match_type() {
        let ctx = SearchResultContext::new(None);
        ctx.add_field_facets(vec![
            FieldFacet::new("name", "asp", 4, MatchType::Contains),
            FieldFacet::new("code", "asp", 1, MatchType::Full),
            FieldFacet::new("note", "asp", 2, MatchType::Contains),
            FieldFacet::new("alias", "asp", 3, MatchType::WordStartsWith),
        ]);

        let grouped = ctx.field_facets_by_match_type();
        let order: Vec<MatchType> = grouped.iter().map(|(m, _)| *m).collect();
        assert_eq!(order, vec![MatchType::Full, MatchType::WordStartsWith, MatchType::Contains]);
        assert_eq!(grouped[2].1.len(), 2);
    }

    #[test]
    fn test_adapter_set_once() {
        let ctx = SearchResultContext::new(None);
        ctx.add(json!("x"));

        let default = ctx.adapted(&SearchRequest::default());
        assert_eq!(default.matches, vec![json!("x")]);

        let first: ResultAdapter = Arc::new(|request: &SearchRequest, _ctx: &SearchResultContext| {
            let mut result = SearchResult::new(Some("first".into()), request.options.clone());
            result.total = 99;
            result
        });
        let second: ResultAdapter = Arc::new(|request: &SearchRequest, _ctx: &SearchResultContext| {
            SearchResult::new(Some("second".into()), request.options.clone())
        });

        assert!(ctx.set_adapter(first));
        assert!(!ctx.set_adapter(second));

        let adapted = ctx.adapted(&SearchRequest::default());
        assert_eq!(adapted.key.as_deref(), Some("first"));
        assert_eq!(adapted.count(), 99);
    }

    #[test]
    fn test_serialized_form_and_json() {
        let ctx = SearchResultContext::new(Some("/search?q=abc".into()));
        ctx.set_key("abc");

        let stub = ctx.serialized_form();
        assert_eq!(stub.id, ctx.id());
        assert_eq!(stub.storage_key().as_deref(), Some("cached/abc"));
        assert_eq!(stub.generating_path.as_deref(), Some("/search?q=abc"));

        let json: serde_json::Value = serde_json::from_str(&ctx.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "Pending");
        assert_eq!(json["generatingUrl"], "/search?q=abc");
        assert_eq!(json["count"], 0);
    }
}
