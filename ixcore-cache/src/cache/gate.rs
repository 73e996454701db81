//! Tiered cache gate with single-flight generation
//!
//! Every read goes through the gate. On a miss the caller supplies a generator;
//! the gate runs at most one generator per key at a time and hands its outcome,
//! success or failure, to every caller that asked for the key meanwhile.
//!
//! Generation runs on a spawned task that stores the value before it releases
//! the in-flight slot, so a caller arriving after the slot is gone always finds
//! the fresh entry.

use crate::cache::{
    config::GateConfig,
    entry::{CacheEntry, ExpirationPolicy},
    key_adapter::KeyAdapter,
    principal::{PrincipalSource, TaskPrincipal},
    tier::CacheTier,
    types::{CacheKey, CacheStats, CachedValue, TierKind},
};
use crate::error::{GateError, Result};
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type GenerationOutcome = Result<Option<CachedValue>>;
type SharedGeneration = Shared<BoxFuture<'static, GenerationOutcome>>;

/// A generation currently running for one key
struct InFlight {
    id: u64,
    shared: SharedGeneration,
}

struct GateInner {
    config: GateConfig,
    adapter: KeyAdapter,
    evictable: CacheTier,
    non_evictable: Option<CacheTier>,
    in_flight: DashMap<CacheKey, InFlight>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

/// Keyed two-tier cache with at most one concurrent generation per key.
///
/// Cloning is cheap and every clone shares the same tiers.
#[derive(Clone)]
pub struct CacheGate {
    inner: Arc<GateInner>,
}

impl CacheGate {
    /// Create a gate; `principal` decides how logical keys are adapted
    pub fn new(config: GateConfig, principal: Arc<dyn PrincipalSource>) -> Result<Self> {
        config.validate()?;

        let evictable = CacheTier::new(TierKind::Evictable, config.evictable.clone());
        let non_evictable = config
            .non_evictable
            .clone()
            .map(|tier| CacheTier::new(TierKind::NonEvictable, tier));

        info!(
            "Cache gate ready ({} tier{})",
            if non_evictable.is_some() { 2 } else { 1 },
            if non_evictable.is_some() { "s" } else { "" }
        );

        Ok(Self {
            inner: Arc::new(GateInner {
                config,
                adapter: KeyAdapter::new(principal),
                evictable,
                non_evictable,
                in_flight: DashMap::new(),
                next_generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.inner.config
    }

    pub fn key_adapter(&self) -> &KeyAdapter {
        &self.inner.adapter
    }

    /// Adapt a logical key for the acting principal
    pub fn adapt_key(&self, key: &str) -> CacheKey {
        self.inner.adapter.adapt(key)
    }

    // ----- reads -----

    /// Cached value for the acting principal, `None` on a miss or type mismatch
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get_raw(&self.adapt_key(key))
    }

    /// Cached value under a key used as-is
    pub fn get_raw<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        if self.is_closed() {
            return None;
        }
        self.lookup(key, None)
    }

    /// Untyped read for the acting principal
    pub fn get_value(&self, key: &str) -> Option<CachedValue> {
        self.get_raw_value(&self.adapt_key(key))
    }

    /// Untyped read under a key used as-is
    pub fn get_raw_value(&self, key: &str) -> Option<CachedValue> {
        if self.is_closed() {
            return None;
        }
        self.lookup_entry(key, None).map(|entry| entry.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.contains_raw(&self.adapt_key(key))
    }

    pub fn contains_raw(&self, key: &str) -> bool {
        !self.is_closed()
            && (self.inner.evictable.contains(key)
                || self
                    .inner
                    .non_evictable
                    .as_ref()
                    .is_some_and(|tier| tier.contains(key)))
    }

    // ----- generation -----

    /// Cached value for the acting principal, generating it on a miss.
    ///
    /// A generator returning `Ok(None)` stores nothing. Generator failures come
    /// back as [`GateError::Generation`] to every caller sharing the generation.
    pub async fn get_or_else<T, F, Fut>(&self, key: &str, generator: F) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<Arc<T>>>> + Send + 'static,
    {
        let adapted = self.adapt_key(key);
        self.generate(Some(key), adapted, None, generator).await
    }

    /// As [`get_or_else`](Self::get_or_else), but an entry created before `since`
    /// counts as a miss
    pub async fn get_since_or_else<T, F, Fut>(
        &self,
        key: &str,
        since: DateTime<Utc>,
        generator: F,
    ) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<Arc<T>>>> + Send + 'static,
    {
        let adapted = self.adapt_key(key);
        self.generate(Some(key), adapted, Some(since), generator).await
    }

    /// Generate under a key used as-is; no adapter bookkeeping
    pub async fn get_or_else_raw<T, F, Fut>(&self, key: &str, generator: F) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<Arc<T>>>> + Send + 'static,
    {
        self.generate(None, key.to_string(), None, generator).await
    }

    /// Staleness-aware generation under a key used as-is
    pub async fn get_since_or_else_raw<T, F, Fut>(
        &self,
        key: &str,
        since: DateTime<Utc>,
        generator: F,
    ) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<Arc<T>>>> + Send + 'static,
    {
        self.generate(None, key.to_string(), Some(since), generator).await
    }

    async fn generate<T, F, Fut>(
        &self,
        logical: Option<&str>,
        key: CacheKey,
        since: Option<DateTime<Utc>>,
        generator: F,
    ) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<Arc<T>>>> + Send + 'static,
    {
        if self.is_closed() {
            return Err(GateError::Closed);
        }

        if let Some(value) = self.lookup::<T>(&key, since) {
            return Ok(Some(value));
        }

        if self.inner.config.debug_level >= 2 {
            debug!("Cache miss for {}", key);
        }

        let mut generator = Some(generator);
        let shared = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                debug!("Joining in-flight generation for {}", key);
                occupied.get().shared.clone()
            }
            Entry::Vacant(vacant) => {
                // a generation may have finished between the first lookup and now
                if let Some(value) = self.lookup::<T>(&key, since) {
                    return Ok(Some(value));
                }
                let id = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let Some(generator) = generator.take() else {
                    return Ok(None);
                };
                let shared = self.spawn_generation(id, logical.map(str::to_string), key.clone(), generator);
                vacant.insert(InFlight {
                    id,
                    shared: shared.clone(),
                });
                shared
            }
        };

        let value = match shared.await? {
            Some(value) => value,
            None => return Ok(None),
        };

        match Arc::clone(&value).downcast::<T>() {
            Ok(typed) => Ok(Some(typed)),
            Err(_) => match generator.take() {
                // joined a generation that produced a different type: regenerate ourselves
                Some(generator) => {
                    warn!("Type mismatch on shared generation for {}, regenerating", key);
                    self.generate_inline(logical, &key, generator).await
                }
                None => Ok(None),
            },
        }
    }

    fn spawn_generation<T, F, Fut>(
        &self,
        id: u64,
        logical: Option<String>,
        key: CacheKey,
        generator: F,
    ) -> SharedGeneration
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<Arc<T>>>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let principal = inner.adapter.principal_name();

        let handle: JoinHandle<GenerationOutcome> = tokio::spawn(TaskPrincipal::scope(principal, async move {
            let outcome = AssertUnwindSafe(async move { generator().await })
                .catch_unwind()
                .await;

            let result = match outcome {
                Ok(Ok(Some(value))) => {
                    let value: CachedValue = value;
                    inner.store_generated(logical.as_deref(), &task_key, Arc::clone(&value));
                    Ok(Some(value))
                }
                Ok(Ok(None)) => Ok(None),
                Ok(Err(err)) => Err(GateError::generation(&task_key, format!("{:#}", err))),
                Err(panic) => Err(GateError::generation(&task_key, panic_message(&*panic))),
            };

            inner.in_flight.remove_if(&task_key, |_, slot| slot.id == id);
            result
        }));

        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(GateError::generation(&key, join_err)),
            }
        }
        .boxed()
        .shared()
    }

    async fn generate_inline<T, F, Fut>(&self, logical: Option<&str>, key: &str, generator: F) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<Arc<T>>>> + Send + 'static,
    {
        let generated = generator()
            .await
            .map_err(|err| GateError::generation(key, format!("{:#}", err)))?;

        if let Some(value) = &generated {
            let erased: CachedValue = Arc::clone(value) as CachedValue;
            self.inner.store_generated(logical, key, erased);
        }
        Ok(generated)
    }

    // ----- writes -----

    /// Insert under the acting principal's key; `expiration_seconds <= 0` is eternal
    pub fn put<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>, expiration_seconds: i64) {
        let adapted = self.adapt_key(key);
        if self.insert(&adapted, value, expiration_seconds) {
            self.inner.adapter.add_key(key, &adapted);
        }
    }

    /// Insert under a key used as-is
    pub fn put_raw<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>, expiration_seconds: i64) {
        self.insert(key, value, expiration_seconds);
    }

    /// Administrative population of the non-evictable tier. Returns `false`
    /// when the gate has a single tier.
    pub fn put_non_evictable<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>) -> bool {
        if self.is_closed() {
            warn!("Ignoring put of {} on closed cache gate", key);
            return false;
        }
        match &self.inner.non_evictable {
            Some(tier) => {
                tier.insert(key.to_string(), value, Some(ExpirationPolicy::Eternal));
                true
            }
            None => {
                warn!("No non-evictable tier configured, dropping {}", key);
                false
            }
        }
    }

    fn insert<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>, expiration_seconds: i64) -> bool {
        if self.is_closed() {
            warn!("Ignoring put of {} on closed cache gate", key);
            return false;
        }
        self.inner.evictable.insert(
            key.to_string(),
            value,
            Some(ExpirationPolicy::from_seconds(expiration_seconds)),
        );
        true
    }

    // ----- removal -----

    /// Remove the acting principal's entry for `key`
    pub fn remove(&self, key: &str) -> bool {
        let adapted = self.adapt_key(key);
        self.inner.adapter.remove_key(key, &adapted);
        self.remove_raw(&adapted)
    }

    pub fn remove_raw(&self, key: &str) -> bool {
        let evicted = self.inner.evictable.remove(key);
        let pinned = self
            .inner
            .non_evictable
            .as_ref()
            .is_some_and(|tier| tier.remove(key));
        evicted || pinned
    }

    /// Remove every principal's entry for `key`. `false` when no variant was recorded.
    pub fn remove_all_child_keys(&self, key: &str) -> bool {
        let adapted_keys = self.inner.adapter.take_all(key);
        if adapted_keys.is_empty() {
            return false;
        }
        for adapted in &adapted_keys {
            self.remove_raw(adapted);
        }
        debug!("Removed {} adapted entries of {}", adapted_keys.len(), key);
        true
    }

    /// Drop the key mapping and every entry of both tiers
    pub fn clear(&self) {
        self.inner.adapter.clear();
        let mut count = self.inner.evictable.clear();
        if let Some(tier) = &self.inner.non_evictable {
            count += tier.clear();
        }
        info!("Cache gate cleared ({} entries)", count);
    }

    // ----- diagnostics -----

    /// Lazily walk a page of the evictable tier, least recently used first
    pub fn elements(&self, top: usize, skip: usize) -> impl Iterator<Item = CacheEntry> + '_ {
        self.inner
            .evictable
            .keys()
            .into_iter()
            .filter_map(move |key| self.inner.evictable.peek(&key))
            .skip(skip)
            .take(top)
    }

    /// One statistics record per tier
    pub fn statistics(&self) -> Vec<CacheStats> {
        let mut stats = vec![self.inner.evictable.stats()];
        if let Some(tier) = &self.inner.non_evictable {
            stats.push(tier.stats());
        }
        stats
    }

    pub fn cleanup_expired(&self) -> usize {
        let mut count = self.inner.evictable.cleanup_expired();
        if let Some(tier) = &self.inner.non_evictable {
            count += tier.cleanup_expired();
        }
        count
    }

    /// Number of generations currently running
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    // ----- lifecycle -----

    /// Tear the gate down. Only the first call releases anything.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.inner.config.enable_metrics {
            for stats in self.statistics() {
                info!("{}", stats);
            }
        }

        self.inner.in_flight.clear();
        self.clear();
        info!("Cache gate closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn lookup<T: Any + Send + Sync>(&self, key: &str, since: Option<DateTime<Utc>>) -> Option<Arc<T>> {
        let entry = self.lookup_entry(key, since)?;
        match entry.downcast::<T>() {
            Some(value) => Some(value),
            None => {
                debug!("Cached value under {} has an unexpected type, treating as miss", key);
                None
            }
        }
    }

    fn lookup_entry(&self, key: &str, since: Option<DateTime<Utc>>) -> Option<CacheEntry> {
        let fresh = |entry: &CacheEntry| since.map_or(true, |threshold| !entry.created_before(threshold));

        if let Some(entry) = self.inner.evictable.get(key) {
            if fresh(&entry) {
                return Some(entry);
            }
            debug!("Stale entry for {}", key);
        }
        self.inner
            .non_evictable
            .as_ref()
            .and_then(|tier| tier.get(key))
            .filter(fresh)
    }
}

impl GateInner {
    fn store_generated(&self, logical: Option<&str>, key: &str, value: CachedValue) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.evictable.insert(key.to_string(), value, None);
        if let Some(logical) = logical {
            self.adapter.add_key(logical, key);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("generator panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("generator panicked: {}", message)
    } else {
        "generator panicked".to_string()
    }
}

/// Background task for periodic expiration sweeps. Ends once the gate closes.
pub async fn start_auto_cleanup(gate: CacheGate) {
    let interval = gate.config().cleanup_interval;

    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        if gate.is_closed() {
            debug!("Cache gate closed, stopping cleanup task");
            break;
        }

        let removed = gate.cleanup_expired();
        if removed > 0 {
            debug!("Auto cleanup: {} expired entries", removed);
        }
    }
}
