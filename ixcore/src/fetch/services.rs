//! Collaborators the fetch orchestrator depends on

use crate::error::FetchError;
use crate::fetch::key::EntityRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use ixcore_cache::CacheGate;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// The transactional store entities are loaded from
#[async_trait]
pub trait EntityStore<T>: Send + Sync {
    /// Load the entity, `None` when it does not exist
    async fn fetch(&self, key: &EntityRef) -> anyhow::Result<Option<T>>;

    /// Run `body` inside a fresh, independent, read-only transaction
    async fn run_read_only(
        &self,
        body: BoxFuture<'static, anyhow::Result<Option<BackupRecord>>>,
    ) -> anyhow::Result<Option<BackupRecord>> {
        body.await
    }
}

/// JSON snapshot of an entity kept by the backup/audit store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub key: EntityRef,
    pub json: String,
}

impl BackupRecord {
    pub fn new(key: EntityRef, json: impl Into<String>) -> Self {
        Self {
            key,
            json: json.into(),
        }
    }

    /// Snapshot an entity
    pub fn of<T: Serialize>(key: EntityRef, entity: &T) -> anyhow::Result<Self> {
        Ok(Self::new(key, serde_json::to_string(entity)?))
    }

    /// Rebuild the entity from its JSON
    pub fn instantiate<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_str(&self.json)
            .map_err(|e| FetchError::Deserialization(format!("{}: {}", self.key, e)))
    }
}

/// Backup/audit store holding JSON snapshots of entities
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Whether entities of `kind` are snapshotted at all
    fn has_backup_support(&self, kind: &str) -> bool;

    async fn get_by_reference(&self, key: &EntityRef) -> anyhow::Result<Option<BackupRecord>>;
}

/// Staleness signal for globally cached entities
pub trait DirtyMarker: Send + Sync {
    fn is_dirty(&self, key: &EntityRef) -> bool;
}

/// Dirty marker driven by explicit calls, keyed by canonical reference
#[derive(Debug, Default)]
pub struct InMemoryDirtyMarker {
    dirty: RwLock<HashSet<String>>,
}

impl InMemoryDirtyMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&self, key: &EntityRef) {
        self.dirty.write().insert(key.canonical());
    }

    pub fn clear_dirty(&self, key: &EntityRef) -> bool {
        self.dirty.write().remove(&key.canonical())
    }

    pub fn clear_all(&self) {
        self.dirty.write().clear();
    }

    pub fn dirty_keys(&self) -> HashSet<String> {
        self.dirty.read().clone()
    }

    /// Run `action` only while `key` is clean
    pub fn perform_if_not_dirty(&self, key: &EntityRef, action: impl FnOnce()) -> bool {
        if self.is_dirty(key) {
            return false;
        }
        action();
        true
    }
}

impl DirtyMarker for InMemoryDirtyMarker {
    fn is_dirty(&self, key: &EntityRef) -> bool {
        self.dirty.read().contains(&key.canonical())
    }
}

/// Never dirty
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDirty;

impl DirtyMarker for NeverDirty {
    fn is_dirty(&self, _key: &EntityRef) -> bool {
        false
    }
}

/// Everything a fetcher needs, passed in explicitly
pub struct FetchServices<T> {
    pub gate: CacheGate,
    pub store: Arc<dyn EntityStore<T>>,
    pub backups: Option<Arc<dyn BackupStore>>,
    pub dirty: Arc<dyn DirtyMarker>,
}

impl<T> FetchServices<T> {
    pub fn new(gate: CacheGate, store: Arc<dyn EntityStore<T>>) -> Self {
        Self {
            gate,
            store,
            backups: None,
            dirty: Arc::new(NeverDirty),
        }
    }

    pub fn with_backups(mut self, backups: Arc<dyn BackupStore>) -> Self {
        self.backups = Some(backups);
        self
    }

    pub fn with_dirty_marker(mut self, dirty: Arc<dyn DirtyMarker>) -> Self {
        self.dirty = dirty;
        self
    }

    /// Creation threshold for cached copies of `key`: now while dirty, so any
    /// existing entry is stale, otherwise the beginning of time
    pub fn dirty_threshold(&self, key: &EntityRef) -> DateTime<Utc> {
        if self.dirty.is_dirty(key) {
            Utc::now()
        } else {
            DateTime::<Utc>::MIN_UTC
        }
    }
}

impl<T> Clone for FetchServices<T> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            store: Arc::clone(&self.store),
            backups: self.backups.clone(),
            dirty: Arc::clone(&self.dirty),
        }
    }
}
