//! Integration tests for search result contexts
//!
//! These tests exercise a context the way a search executor and its readers
//! share it:
//! - Waiters registered before and after the size is known
//! - Concurrent appends from spawned tasks
//! - Recovery through the stub once the full context is evicted

use anyhow::Result;
use futures::future::join_all;
use ixcore::search::{
    ContextLookup, SearchDriver, SearchResultContext, SearchStatus, StatusListener,
};
use ixcore_cache::{CacheGate, GateConfig, TaskPrincipal};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Transitions(Mutex<Vec<SearchStatus>>);

impl StatusListener for Transitions {
    fn on_status_change(&self, new_status: SearchStatus, _old_status: SearchStatus) {
        self.0.lock().push(new_status);
    }
}

#[tokio::test]
async fn test_waiters_before_and_after_done() -> Result<()> {
    let ctx = Arc::new(SearchResultContext::new(Some("/search?q=aspirin".into())));
    let recorder = Arc::new(Transitions(Mutex::new(Vec::new())));
    let listener: Arc<dyn StatusListener> = recorder.clone();
    ctx.add_listener(&listener);

    ctx.set_status(SearchStatus::Running);
    for i in 0..3 {
        ctx.add(json!({ "id": i }));
    }

    let early = ctx.determined_future();
    let early_waiter = tokio::spawn(async move {
        early.await;
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!early_waiter.is_finished());

    assert!(ctx.set_status(SearchStatus::Done));
    tokio::time::timeout(Duration::from_secs(2), early_waiter).await??;

    // registered after the fact, completes on its own
    tokio::time::timeout(Duration::from_secs(2), ctx.determined_future()).await?;

    println!("Transitions: {:?}", recorder.0.lock());
    assert_eq!(*recorder.0.lock(), vec![SearchStatus::Running, SearchStatus::Done]);
    assert_eq!(ctx.total(), Some(3));

    let page = ctx.focused(2, 0, 10, "");
    assert_eq!(page.results(), vec![json!({ "id": 0 }), json!({ "id": 1 })]);
    assert_eq!(page.status(), SearchStatus::Done);
    assert_eq!(ctx.count(), 3);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_and_snapshots() -> Result<()> {
    let ctx = Arc::new(SearchResultContext::new(None));
    ctx.set_status(SearchStatus::Running);

    let writers = (0..8).map(|w| {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            for i in 0..50 {
                ctx.add(json!({ "writer": w, "seq": i }));
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    });
    let readers = (0..4).map(|_| {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let mut last = 0;
            for _ in 0..20 {
                let snapshot = ctx.results();
                assert!(snapshot.len() >= last);
                last = snapshot.len();
                tokio::task::yield_now().await;
            }
        })
    });

    for handle in join_all(writers).await.into_iter().chain(join_all(readers).await) {
        handle?;
    }

    ctx.set_status(SearchStatus::Done);
    assert_eq!(ctx.count(), 400);

    // per-writer order is preserved
    let results = ctx.results();
    for w in 0..8 {
        let seqs: Vec<i64> = results
            .iter()
            .filter(|r| r["writer"] == w)
            .filter_map(|r| r["seq"].as_i64())
            .collect();
        assert_eq!(seqs, (0..50).collect::<Vec<i64>>());
    }

    Ok(())
}

#[tokio::test]
async fn test_stub_survives_eviction() -> Result<()> {
    let gate = CacheGate::new(GateConfig::default(), Arc::new(TaskPrincipal))?;
    let driver = SearchDriver::new(gate.clone());

    let items = futures::stream::iter((0..5).map(|i| Ok::<_, anyhow::Error>(json!(i))));
    let ctx = driver
        .submit("aspirin", Some("/search?q=aspirin".into()), None, items)
        .await?;
    assert!(ctx.determined_future().wait_for(Duration::from_secs(2)).await);

    assert!(ContextLookup::from_gate(&gate, "aspirin").is_found());

    // evict the full context, keep the stub
    assert!(gate.remove("aspirin"));

    match ContextLookup::from_gate(&gate, "aspirin") {
        ContextLookup::Moved(stub) => {
            println!("Moved to {:?}", stub.generating_path);
            assert_eq!(stub.id, ctx.id());
            assert_eq!(stub.generating_path.as_deref(), Some("/search?q=aspirin"));
        }
        other => panic!("expected a stub, got {:?}", other),
    }

    gate.clear();
    assert!(matches!(ContextLookup::from_gate(&gate, "aspirin"), ContextLookup::NotFound));
    Ok(())
}

#[tokio::test]
async fn test_contexts_scoped_to_principal() -> Result<()> {
    let gate = CacheGate::new(GateConfig::default(), Arc::new(TaskPrincipal))?;
    let driver = SearchDriver::new(gate.clone());

    let alice = TaskPrincipal::scope("alice", {
        let driver = driver.clone();
        async move {
            let items = futures::stream::iter(vec![Ok::<_, anyhow::Error>(json!("a"))]);
            driver.submit("q", None, None, items).await
        }
    })
    .await?;
    alice.determined_future().await;

    let bob_sees = TaskPrincipal::scope("bob", {
        let gate = gate.clone();
        async move { ContextLookup::from_gate(&gate, "q") }
    })
    .await;
    // the stub is stored under a raw key, so other principals are redirected
    assert!(matches!(bob_sees, ContextLookup::Moved(_)));

    let alice_sees = TaskPrincipal::scope("alice", async move { ContextLookup::from_gate(&gate, "q") }).await;
    assert!(alice_sees.is_found());
    Ok(())
}
