//! Integration tests for the cache gate
//!
//! These tests verify the gate's concurrency and invalidation contracts:
//! - Single-flight generation (shared success and shared failure)
//! - Staleness-driven regeneration
//! - Principal isolation and bulk invalidation
//! - Diagnostics and teardown

use futures::future::join_all;
use ixcore_cache::{CacheGate, FixedPrincipal, GateConfig, GateError, KeyAdapter, TaskPrincipal};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn task_gate() -> CacheGate {
    CacheGate::new(GateConfig::default(), Arc::new(TaskPrincipal)).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_success() -> anyhow::Result<()> {
    let gate = task_gate();
    let calls = Arc::new(AtomicUsize::new(0));

    let callers = (0..32).map(|_| {
        let gate = gate.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            gate.get_or_else("expensive", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(Some(Arc::new(vec![1u32, 2, 3])))
            })
            .await
        })
    });

    let results = join_all(callers).await;

    let mut values = Vec::new();
    for result in results {
        values.push(result??.expect("value generated"));
    }

    println!("Generator ran {} time(s) for {} callers", calls.load(Ordering::SeqCst), values.len());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    assert_eq!(gate.in_flight(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_failure_is_shared() -> anyhow::Result<()> {
    let gate = task_gate();
    let calls = Arc::new(AtomicUsize::new(0));

    let callers = (0..16).map(|_| {
        let gate = gate.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            gate.get_or_else::<String, _, _>("flaky", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err(anyhow::anyhow!("backing store unavailable"))
            })
            .await
        })
    });

    let results = join_all(callers).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        match result? {
            Err(GateError::Generation { message, .. }) => {
                assert!(message.contains("backing store unavailable"))
            }
            other => panic!("expected a generation failure, got {:?}", other.map(|_| ())),
        }
    }

    // the failure is not cached; the next caller generates again
    let value = gate
        .get_or_else("flaky", || async { Ok(Some(Arc::new("recovered".to_string()))) })
        .await?;
    assert_eq!(value.as_deref().map(String::as_str), Some("recovered"));

    Ok(())
}

#[tokio::test]
async fn test_distinct_keys_generate_independently() -> anyhow::Result<()> {
    let gate = task_gate();
    let calls = Arc::new(AtomicUsize::new(0));

    let callers = (0..4).map(|i| {
        let gate = gate.clone();
        let calls = Arc::clone(&calls);
        async move {
            gate.get_or_else(&format!("key-{}", i), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Arc::new(i)))
            })
            .await
        }
    });

    for (i, result) in join_all(callers).await.into_iter().enumerate() {
        assert_eq!(result?.as_deref(), Some(&i));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    Ok(())
}

#[tokio::test]
async fn test_staleness_threshold() -> anyhow::Result<()> {
    let gate = task_gate();
    let calls = Arc::new(AtomicUsize::new(0));

    let generate = |calls: Arc<AtomicUsize>| {
        move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok::<_, anyhow::Error>(Some(Arc::new(n)))
        }
    };

    let first = gate.get_or_else_raw("doc", generate(Arc::clone(&calls))).await?;
    assert_eq!(first.as_deref(), Some(&1));

    // threshold in the past: cached value is fresh enough
    let past = chrono::Utc::now() - chrono::Duration::seconds(60);
    let again = gate
        .get_since_or_else_raw("doc", past, generate(Arc::clone(&calls)))
        .await?;
    assert_eq!(again.as_deref(), Some(&1));

    tokio::time::sleep(Duration::from_millis(10)).await;

    // threshold after creation: regenerate
    let now = chrono::Utc::now();
    let fresh = gate
        .get_since_or_else_raw("doc", now, generate(Arc::clone(&calls)))
        .await?;
    assert_eq!(fresh.as_deref(), Some(&2));
    assert_eq!(gate.get_raw::<usize>("doc").as_deref(), Some(&2));

    println!("Generator calls: {}", calls.load(Ordering::SeqCst));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    Ok(())
}

#[tokio::test]
async fn test_principal_isolation() -> anyhow::Result<()> {
    let gate = task_gate();

    TaskPrincipal::scope("alice", async {
        gate.put("profile", Arc::new("alice's".to_string()), 0);
    })
    .await;

    let seen_by_bob = TaskPrincipal::scope("bob", async { gate.get::<String>("profile") }).await;
    assert!(seen_by_bob.is_none());

    let seen_by_alice = TaskPrincipal::scope("alice", async { gate.get::<String>("profile") }).await;
    assert_eq!(seen_by_alice.as_deref().map(String::as_str), Some("alice's"));

    // a guest is yet another principal
    assert!(gate.get::<String>("profile").is_none());

    Ok(())
}

#[tokio::test]
async fn test_bulk_invalidation() -> anyhow::Result<()> {
    let gate = task_gate();
    let principals = ["alice", "bob", "carol"];

    for name in principals {
        TaskPrincipal::scope(name, async {
            gate.get_or_else("report", move || async move { Ok(Some(Arc::new(name.to_string()))) })
                .await
        })
        .await?;
    }

    let adapted = gate.key_adapter().adapted_keys_of("report");
    assert_eq!(adapted.len(), principals.len());
    for name in principals {
        assert!(adapted.contains(&KeyAdapter::adapt_for("report", name)));
    }

    assert!(gate.remove_all_child_keys("report"));
    assert!(gate.key_adapter().adapted_keys_of("report").is_empty());
    assert!(!gate.remove_all_child_keys("report"));

    for name in principals {
        let cached = TaskPrincipal::scope(name, async { gate.get::<String>("report") }).await;
        assert!(cached.is_none(), "{} still sees a cached report", name);
    }

    Ok(())
}

#[tokio::test]
async fn test_generator_sees_caller_principal() -> anyhow::Result<()> {
    let gate = task_gate();

    let inner_gate = gate.clone();
    let value = TaskPrincipal::scope("alice", async {
        gate.get_or_else("outer", move || async move {
            // nested gate calls inside the generator keep the caller's principal
            inner_gate.put("inner", Arc::new(1u8), 0);
            Ok(Some(Arc::new(inner_gate.key_adapter().principal_name())))
        })
        .await
    })
    .await?;

    assert_eq!(value.as_deref().map(String::as_str), Some("alice"));
    let inner = TaskPrincipal::scope("alice", async { gate.get::<u8>("inner") }).await;
    assert_eq!(inner.as_deref(), Some(&1));

    Ok(())
}

#[tokio::test]
async fn test_clear_and_close() -> anyhow::Result<()> {
    let gate = CacheGate::new(GateConfig::default(), Arc::new(FixedPrincipal::new("ops")))?;

    gate.put("a", Arc::new(1u8), 0);
    gate.put_raw("b", Arc::new(2u8), 0);
    assert_eq!(gate.elements(10, 0).count(), 2);

    gate.clear();
    assert_eq!(gate.elements(10, 0).count(), 0);
    assert!(gate.key_adapter().adapted_keys_of("a").is_empty());

    gate.put("a", Arc::new(1u8), 0);
    gate.close();
    gate.close();

    assert!(gate.get::<u8>("a").is_none());
    gate.put("a", Arc::new(3u8), 0);
    assert_eq!(gate.elements(10, 0).count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_statistics() -> anyhow::Result<()> {
    let config = GateConfig::builder()
        .max_entries(2)
        .non_evictable(5, Duration::ZERO, Duration::ZERO)
        .build();
    let gate = CacheGate::new(config, Arc::new(FixedPrincipal::new("ops")))?;

    gate.put_raw("a", Arc::new(1u8), 0);
    gate.put_raw("b", Arc::new(2u8), 0);
    gate.put_raw("c", Arc::new(3u8), 0);
    gate.get_raw::<u8>("c");

    let stats = gate.statistics();
    for tier in &stats {
        println!("{}", tier);
    }

    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].entries, 2);
    assert_eq!(stats[0].evictions_size, 1);
    assert_eq!(stats[0].hits, 1);

    let exported = serde_json::to_value(&stats[1])?;
    assert_eq!(exported["tier"], "non_evictable");
    assert_eq!(exported["entries"], 0);

    Ok(())
}
