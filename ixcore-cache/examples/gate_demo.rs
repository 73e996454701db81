//! Cache Gate Demo
//!
//! Shows single-flight generation, principal-scoped keys and bulk
//! invalidation on a gate configured from the environment.
//!
//! Usage:
//!   cargo run --example gate_demo
//!
//! Environment variables:
//!   IXCACHE_MAX_ELEMENTS  - evictable tier bound (default: 10000)
//!   IXCACHE_TIME_TO_LIVE  - entry time-to-live in seconds
//!   IXCACHE_TIME_TO_IDLE  - entry time-to-idle in seconds
//!   IXCACHE_NON_EVICTABLE_MAX_ELEMENTS - enables the non-evictable tier

use futures::future::join_all;
use ixcore_cache::{CacheGate, GateConfig, TaskPrincipal};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ixcore_cache=debug,gate_demo=info".into()),
        ))
        .init();

    let gate = CacheGate::new(GateConfig::from_env()?, Arc::new(TaskPrincipal))?;

    info!("--- Single-flight generation ---");
    let generations = Arc::new(AtomicUsize::new(0));
    let callers = (0..10).map(|_| {
        let gate = gate.clone();
        let generations = Arc::clone(&generations);
        tokio::spawn(TaskPrincipal::scope("alice", async move {
            gate.get_or_else("report", move || async move {
                generations.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, anyhow::Error>(Some(Arc::new("quarterly report".to_string())))
            })
            .await
        }))
    });
    for result in join_all(callers).await {
        info!("Caller got {:?}", result??);
    }
    info!("Generator ran {} time(s) for 10 callers", generations.load(Ordering::SeqCst));

    info!("--- Principal-scoped keys ---");
    for principal in ["alice", "bob", "GUEST"] {
        let adapted = TaskPrincipal::sync_scope(principal, || gate.adapt_key("report"));
        info!("{:>6} -> {}", principal, adapted);
    }

    TaskPrincipal::scope("bob", gate.get_or_else("report", || async {
        Ok::<_, anyhow::Error>(Some(Arc::new("bob's report".to_string())))
    }))
    .await?;
    info!(
        "Adapted keys of 'report': {:?}",
        gate.key_adapter().adapted_keys_of("report")
    );

    info!("--- Bulk invalidation ---");
    let removed = gate.remove_all_child_keys("report");
    info!("Removed every principal's copy: {}", removed);
    info!(
        "Alice still cached: {}",
        TaskPrincipal::sync_scope("alice", || gate.contains("report"))
    );

    info!("--- Statistics ---");
    for stats in gate.statistics() {
        info!("{}", stats);
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    gate.close();
    info!("=== Demo Complete ===");
    Ok(())
}
