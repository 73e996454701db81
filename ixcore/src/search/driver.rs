//! In-process search executor
//!
//! Registers a context under its key through the gate, so concurrent
//! submissions of the same search share one context, then feeds it from a
//! stream of results on a spawned task.

use crate::search::context::{stub_key, SearchResultContext, SearchStatus};
use chrono::Utc;
use futures::{Stream, StreamExt};
use ixcore_cache::{CacheGate, GateError};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct SearchDriver {
    gate: CacheGate,
    stub_expiration_seconds: i64,
}

impl SearchDriver {
    pub fn new(gate: CacheGate) -> Self {
        Self {
            gate,
            stub_expiration_seconds: 0,
        }
    }

    /// Expiration of the stubs left behind for recovery; `<= 0` is eternal
    pub fn with_stub_expiration(mut self, seconds: i64) -> Self {
        self.stub_expiration_seconds = seconds;
        self
    }

    pub fn gate(&self) -> &CacheGate {
        &self.gate
    }

    /// Context for the search under `key`, starting it from `results` when no
    /// context exists yet.
    ///
    /// When another submission already owns the key its context is returned
    /// and `results` is dropped unpolled. A known `total` makes the context
    /// determined as soon as it runs.
    pub async fn submit<S>(
        &self,
        key: &str,
        generating_path: Option<String>,
        total: Option<usize>,
        results: S,
    ) -> Result<Arc<SearchResultContext>, GateError>
    where
        S: Stream<Item = anyhow::Result<Value>> + Send + 'static,
    {
        let owned_key = key.to_string();
        let context = self
            .gate
            .get_or_else(key, move || async move {
                let context = Arc::new(SearchResultContext::new(generating_path));
                context.set_key(owned_key);
                tokio::spawn(drive(Arc::clone(&context), total, results));
                Ok::<_, anyhow::Error>(Some(context))
            })
            .await?
            .ok_or_else(|| GateError::generation(key, "search produced no context"))?;

        self.gate.put_raw(
            &stub_key(key),
            Arc::new(context.serialized_form()),
            self.stub_expiration_seconds,
        );
        Ok(context)
    }
}

async fn drive<S>(context: Arc<SearchResultContext>, total: Option<usize>, results: S)
where
    S: Stream<Item = anyhow::Result<Value>>,
{
    context.set_start(Utc::now());
    context.set_status(SearchStatus::Running);

    if let Some(total) = total {
        context.set_total(total);
        context.set_status(SearchStatus::Determined);
    }

    futures::pin_mut!(results);
    while let Some(item) = results.next().await {
        match item {
            Ok(value) => context.add(value),
            Err(e) => {
                warn!("Search {} failed after {} results: {:#}", context.id(), context.count(), e);
                context.set_message(format!("{:#}", e));
                context.set_stop(Utc::now());
                context.set_status(SearchStatus::Failed);
                return;
            }
        }
    }

    context.set_stop(Utc::now());
    context.set_status(SearchStatus::Done);
    info!("Search {} done with {} results", context.id(), context.count());
    debug!("Search {} key {:?}", context.id(), context.key());
}
