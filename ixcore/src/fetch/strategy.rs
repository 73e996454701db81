//! Caching strategies for entity resolution
//!
//! | Strategy            | Source of the value                                        |
//! |---------------------|------------------------------------------------------------|
//! | `NoCache`           | the store, every time                                      |
//! | `GlobalCache`       | one shared gate entry, regenerated while the entity is dirty |
//! | `PerPrincipalCache` | as `GlobalCache`, but one entry per principal (legacy)     |
//! | `ActiveLoad`        | the value held by the fetcher itself                       |
//! | `BackupJsonCache`   | the backup snapshot, falling back to `GlobalCache`         |

use crate::error::{FetchError, Result};
use crate::fetch::fetcher::EntityFetcher;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachingStrategy {
    NoCache,
    GlobalCache,
    /// Kept for compatibility; prefer `GlobalCache`
    PerPrincipalCache,
    ActiveLoad,
    #[default]
    BackupJsonCache,
}

impl CachingStrategy {
    pub const ALL: [CachingStrategy; 5] = [
        CachingStrategy::NoCache,
        CachingStrategy::GlobalCache,
        CachingStrategy::PerPrincipalCache,
        CachingStrategy::ActiveLoad,
        CachingStrategy::BackupJsonCache,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CachingStrategy::NoCache => "no_cache",
            CachingStrategy::GlobalCache => "global_cache",
            CachingStrategy::PerPrincipalCache => "per_principal_cache",
            CachingStrategy::ActiveLoad => "active_load",
            CachingStrategy::BackupJsonCache => "backup_json_cache",
        }
    }

    /// The resolver implementing this strategy
    pub fn resolver<T>(&self) -> Box<dyn ResolveStrategy<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        match self {
            CachingStrategy::NoCache => Box::new(NoCache),
            CachingStrategy::GlobalCache => Box::new(GlobalCache),
            CachingStrategy::PerPrincipalCache => Box::new(PerPrincipalCache),
            CachingStrategy::ActiveLoad => Box::new(ActiveLoad),
            CachingStrategy::BackupJsonCache => Box::new(BackupJsonCache),
        }
    }
}

impl fmt::Display for CachingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CachingStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown caching strategy '{}'", s))
    }
}

/// Resolution logic of one strategy. `Ok(None)` means the entity does not exist.
#[async_trait]
pub trait ResolveStrategy<T>: Send + Sync {
    async fn resolve(&self, fetcher: &EntityFetcher<T>) -> Result<Option<Arc<T>>>;
}

pub struct NoCache;

#[async_trait]
impl<T> ResolveStrategy<T> for NoCache
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn resolve(&self, fetcher: &EntityFetcher<T>) -> Result<Option<Arc<T>>> {
        let value = fetcher.core().find_object().await.map_err(FetchError::store)?;
        Ok(value.map(Arc::new))
    }
}

pub struct GlobalCache;

#[async_trait]
impl<T> ResolveStrategy<T> for GlobalCache
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn resolve(&self, fetcher: &EntityFetcher<T>) -> Result<Option<Arc<T>>> {
        Ok(fetcher.core().global_cached().await?)
    }
}

pub struct PerPrincipalCache;

#[async_trait]
impl<T> ResolveStrategy<T> for PerPrincipalCache
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn resolve(&self, fetcher: &EntityFetcher<T>) -> Result<Option<Arc<T>>> {
        Ok(fetcher.core().per_principal_cached().await?)
    }
}

pub struct ActiveLoad;

#[async_trait]
impl<T> ResolveStrategy<T> for ActiveLoad
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn resolve(&self, fetcher: &EntityFetcher<T>) -> Result<Option<Arc<T>>> {
        Ok(fetcher.get_or_reload().await)
    }
}

pub struct BackupJsonCache;

#[async_trait]
impl<T> ResolveStrategy<T> for BackupJsonCache
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn resolve(&self, fetcher: &EntityFetcher<T>) -> Result<Option<Arc<T>>> {
        Ok(fetcher.core().backup_cached().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy() {
        assert_eq!(CachingStrategy::default(), CachingStrategy::BackupJsonCache);
    }

    #[test]
    fn test_strategy_names_round_trip() {
        for strategy in CachingStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<CachingStrategy>().unwrap(), strategy);
        }
        assert!("lru".parse::<CachingStrategy>().is_err());
    }
}
