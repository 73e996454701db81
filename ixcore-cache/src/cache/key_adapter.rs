//! Per-principal key adaptation
//!
//! A logical key is scoped to the acting principal as
//! `"!" + key + "#" + hex(sha1(principal))`. The adapter also remembers every
//! adapted key it has handed to the cache so all variants of a logical key can
//! be dropped at once.

use crate::cache::principal::PrincipalSource;
use crate::cache::types::CacheKey;
use dashmap::DashMap;
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

const ADAPTED_PREFIX: &str = "!";
const PRINCIPAL_SEPARATOR: char = '#';

/// Derives principal-scoped keys and tracks logical -> adapted associations
pub struct KeyAdapter {
    principal: Arc<dyn PrincipalSource>,
    mapping: DashMap<CacheKey, HashSet<CacheKey>>,
    tracked: AtomicUsize,
}

impl KeyAdapter {
    pub fn new(principal: Arc<dyn PrincipalSource>) -> Self {
        Self {
            principal,
            mapping: DashMap::new(),
            tracked: AtomicUsize::new(0),
        }
    }

    /// Adapt `key` for the currently acting principal
    pub fn adapt(&self, key: &str) -> CacheKey {
        Self::adapt_for(key, &self.principal.principal_name())
    }

    /// Adapt `key` for an explicit principal name
    pub fn adapt_for(key: &str, principal: &str) -> CacheKey {
        let fingerprint = hex::encode(Sha1::digest(principal.as_bytes()));
        format!("{}{}{}{}", ADAPTED_PREFIX, key, PRINCIPAL_SEPARATOR, fingerprint)
    }

    /// Recover the logical key from an adapted one. Keys that were never
    /// adapted come back unchanged.
    pub fn unadapt(adapted: &str) -> &str {
        match adapted.strip_prefix(ADAPTED_PREFIX) {
            Some(rest) => match rest.rfind(PRINCIPAL_SEPARATOR) {
                Some(idx) if is_fingerprint(&rest[idx + 1..]) => &rest[..idx],
                _ => adapted,
            },
            None => adapted,
        }
    }

    /// Name of the principal adaptation currently resolves to
    pub fn principal_name(&self) -> String {
        self.principal.principal_name()
    }

    /// Record that `adapted` was produced for `key`. Idempotent.
    pub fn add_key(&self, key: &str, adapted: &str) {
        let mut set = self.mapping.entry(key.to_string()).or_default();
        if set.insert(adapted.to_string()) {
            self.tracked.fetch_add(1, Ordering::Relaxed);
            debug!("Tracking adapted key {} for {}", adapted, key);
        }
    }

    /// Forget one association; the cache entry itself is left alone
    pub fn remove_key(&self, key: &str, adapted: &str) -> bool {
        let removed = match self.mapping.get_mut(key) {
            Some(mut set) => set.remove(adapted),
            None => false,
        };
        if removed {
            self.tracked.fetch_sub(1, Ordering::Relaxed);
            self.mapping.remove_if(key, |_, set| set.is_empty());
        }
        removed
    }

    /// Every adapted key recorded for `key`
    pub fn adapted_keys_of(&self, key: &str) -> HashSet<CacheKey> {
        self.mapping
            .get(key)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Remove and return the whole association set for `key`
    pub fn take_all(&self, key: &str) -> HashSet<CacheKey> {
        match self.mapping.remove(key) {
            Some((_, set)) => {
                self.tracked.fetch_sub(set.len(), Ordering::Relaxed);
                set
            }
            None => HashSet::new(),
        }
    }

    /// Drop the entire mapping
    pub fn clear(&self) {
        self.mapping.clear();
        self.tracked.store(0, Ordering::Relaxed);
    }

    /// Number of adapted keys currently tracked. Diagnostic only.
    pub fn tracked_count(&self) -> usize {
        self.tracked.load(Ordering::Relaxed)
    }
}

fn is_fingerprint(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
