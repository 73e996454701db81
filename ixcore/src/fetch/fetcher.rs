//! Entity fetcher: one root reference resolved through one caching strategy

use crate::error::{FetchError, Result};
use crate::fetch::key::EntityRef;
use crate::fetch::services::{BackupRecord, FetchServices};
use crate::fetch::strategy::{CachingStrategy, ResolveStrategy};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use ixcore_cache::GateError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Suffix of the cache key holding a backup-sourced copy
pub const BACKUP_KEY_SUFFIX: &str = "_JSON";

type Generator<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<Option<Arc<T>>>> + Send>;

/// Shared state of a fetcher that generators can own
pub(crate) struct FetchCore<T> {
    key: EntityRef,
    services: FetchServices<T>,
    last_fetched: Mutex<Option<DateTime<Utc>>>,
}

impl<T> FetchCore<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Load straight from the store
    pub(crate) async fn find_object(&self) -> anyhow::Result<Option<T>> {
        *self.last_fetched.lock() = Some(Utc::now());
        debug!("Loading {} from store", self.key);
        self.services.store.fetch(&self.key).await
    }

    fn load_generator(self: &Arc<Self>) -> Generator<T> {
        let core = Arc::clone(self);
        Box::new(move || async move { Ok(core.find_object().await?.map(Arc::new)) }.boxed())
    }

    /// One shared entry under the canonical key, regenerated while dirty
    pub(crate) async fn global_cached(self: &Arc<Self>) -> std::result::Result<Option<Arc<T>>, GateError> {
        let since = self.services.dirty_threshold(&self.key);
        self.services
            .gate
            .get_since_or_else_raw(&self.key.canonical(), since, self.load_generator())
            .await
    }

    /// Like [`global_cached`](Self::global_cached) but keyed per principal
    pub(crate) async fn per_principal_cached(self: &Arc<Self>) -> std::result::Result<Option<Arc<T>>, GateError> {
        let since = self.services.dirty_threshold(&self.key);
        self.services
            .gate
            .get_since_or_else(&self.key.canonical(), since, self.load_generator())
            .await
    }

    /// Global cache resolution with every failure turned into `None`
    async fn global_fallback(self: &Arc<Self>) -> Option<Arc<T>> {
        match self.global_cached().await {
            Ok(value) => value,
            Err(e) => {
                warn!("Global cache fallback failed for {}: {}", self.key, e);
                None
            }
        }
    }

    /// Backup snapshot first, global cache when the snapshot is missing or broken
    pub(crate) async fn backup_cached(self: &Arc<Self>) -> std::result::Result<Option<Arc<T>>, GateError> {
        let backups = match &self.services.backups {
            Some(backups) if backups.has_backup_support(&self.key.kind) => Arc::clone(backups),
            _ => return self.global_cached().await,
        };

        let json_key = format!("{}{}", self.key.canonical(), BACKUP_KEY_SUFFIX);
        let since = self.services.dirty_threshold(&self.key);
        let core = Arc::clone(self);

        let generator = move || async move {
            let lookup_key = core.key.clone();
            let body: BoxFuture<'static, anyhow::Result<Option<BackupRecord>>> =
                async move { backups.get_by_reference(&lookup_key).await }.boxed();

            let value = match core.services.store.run_read_only(body).await {
                Ok(Some(record)) => match record.instantiate::<T>() {
                    Ok(entity) => Some(Arc::new(entity)),
                    Err(e) => {
                        warn!("Trouble deserializing entity JSON: {}", e);
                        core.global_fallback().await
                    }
                },
                Ok(None) => core.global_fallback().await,
                Err(e) => {
                    error!("Error fetching record in transaction {}: {:#}", core.key, e);
                    core.global_fallback().await
                }
            };
            Ok::<_, anyhow::Error>(value)
        };

        match self.services.gate.get_since_or_else_raw(&json_key, since, generator).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Backup cache lookup failed for {}: {}", self.key, e);
                Ok(self.global_fallback().await)
            }
        }
    }
}

/// Resolves one entity reference, normalized to its root form, through one
/// [`CachingStrategy`].
///
/// Besides the shared cache the fetcher keeps its own last loaded value, used
/// by [`get_or_reload`](Self::get_or_reload) and the `ActiveLoad` strategy.
pub struct EntityFetcher<T> {
    core: Arc<FetchCore<T>>,
    strategy: CachingStrategy,
    resolver: Box<dyn ResolveStrategy<T>>,
    stored: tokio::sync::Mutex<Option<Arc<T>>>,
}

impl<T> EntityFetcher<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(key: &EntityRef, strategy: CachingStrategy, services: FetchServices<T>) -> Self {
        Self {
            core: Arc::new(FetchCore {
                key: key.to_root(),
                services,
                last_fetched: Mutex::new(None),
            }),
            strategy,
            resolver: strategy.resolver(),
            stored: tokio::sync::Mutex::new(None),
        }
    }

    /// Fetcher using the default `BackupJsonCache` strategy
    pub fn of(key: &EntityRef, services: FetchServices<T>) -> Self {
        Self::new(key, CachingStrategy::default(), services)
    }

    /// The root reference this fetcher resolves
    pub fn key(&self) -> &EntityRef {
        &self.core.key
    }

    pub fn strategy(&self) -> CachingStrategy {
        self.strategy
    }

    /// When the store was last hit directly
    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        *self.core.last_fetched.lock()
    }

    pub(crate) fn core(&self) -> &Arc<FetchCore<T>> {
        &self.core
    }

    /// Resolve through the strategy
    pub async fn call(&self) -> Result<Arc<T>> {
        self.resolver
            .resolve(self)
            .await?
            .ok_or_else(|| FetchError::NotFound(self.core.key.canonical()))
    }

    /// [`call`](Self::call) with failures turned into `None`
    pub async fn get_if_possible(&self) -> Option<Arc<T>> {
        match self.call().await {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Fetch of {} failed: {}", self.core.key, e);
                None
            }
        }
    }

    /// The value this fetcher already holds, loading it on first use
    pub async fn get_or_reload(&self) -> Option<Arc<T>> {
        let mut stored = self.stored.lock().await;
        if stored.is_none() {
            *stored = self.load().await;
        }
        stored.clone()
    }

    /// Load directly from the store, bypassing any shared cache, and replace
    /// the held value. `None` on failure.
    pub async fn reload(&self) -> Option<Arc<T>> {
        let mut stored = self.stored.lock().await;
        *stored = self.load().await;
        stored.clone()
    }

    async fn load(&self) -> Option<Arc<T>> {
        match self.core.find_object().await {
            Ok(value) => value.map(Arc::new),
            Err(e) => {
                warn!("Direct load of {} failed: {:#}", self.core.key, e);
                None
            }
        }
    }
}
