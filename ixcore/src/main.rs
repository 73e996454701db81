use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ixcore::{Focus, InMemorySnapshotStore, ResultEndpoint, ResultsOutcome, ResultsQuery, SearchDriver, StatusOutcome};
use ixcore_cache::{CacheGate, GateConfig, TaskPrincipal};

#[derive(Parser)]
#[command(name = "ixcore")]
#[command(about = "Result cache and search context diagnostics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic search through the cache gate and print what callers see
    Simulate {
        /// Search key
        #[arg(short, long, default_value = "demo")]
        key: String,

        /// Number of synthetic results
        #[arg(short, long, default_value_t = 25)]
        count: usize,

        /// Declare the total up front
        #[arg(long)]
        known_total: bool,

        /// Acting principal
        #[arg(short, long, default_value = "GUEST")]
        principal: String,

        /// Page size
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Results to skip
        #[arg(long, default_value_t = 0)]
        skip: usize,

        /// Field path to project each result to
        #[arg(long, default_value = "")]
        field: String,

        /// Delay between results in milliseconds
        #[arg(long, default_value_t = 5)]
        delay_ms: u64,
    },

    /// Print the gate configuration resolved from the environment
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ixcore=info,ixcore_cache=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            key,
            count,
            known_total,
            principal,
            top,
            skip,
            field,
            delay_ms,
        } => {
            let gate = CacheGate::new(GateConfig::from_env()?, Arc::new(TaskPrincipal))?;
            let focus = Focus::page(top, skip).with_field(field);
            let options = SimulateOptions {
                key,
                count,
                known_total,
                delay: Duration::from_millis(delay_ms),
                focus,
            };

            TaskPrincipal::scope(principal, simulate(gate.clone(), options)).await?;
            gate.close();
        }

        Commands::Config => {
            let config = GateConfig::from_env()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

struct SimulateOptions {
    key: String,
    count: usize,
    known_total: bool,
    delay: Duration,
    focus: Focus,
}

async fn simulate(gate: CacheGate, options: SimulateOptions) -> Result<()> {
    let driver = SearchDriver::new(gate.clone());
    let endpoint = ResultEndpoint::new(gate, Arc::new(InMemorySnapshotStore::new()));

    let delay = options.delay;
    let records = futures::stream::iter(0..options.count).then(move |i| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, anyhow::Error>(json!({
            "id": i,
            "name": { "value": format!("record-{}", i) },
            "score": (i * 37) % 100,
        }))
    });

    let total = options.known_total.then_some(options.count);
    let path = format!("/search?q={}", options.key);
    let context = driver.submit(&options.key, Some(path), total, records).await?;
    info!("Submitted search {} as context {}", options.key, context.id());

    context.determined_future().await;
    println!("Determined: {}", context.to_json()?);

    while !context.is_finished() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    match endpoint.status(&options.key, &options.focus) {
        StatusOutcome::Found(focused) => println!("Status: {}", focused.to_json()?),
        StatusOutcome::Redirect(location) => println!("Moved: {:?}", location),
        StatusOutcome::NotFound => println!("Not found: {}", options.key),
    }

    match endpoint.results(&options.key, &ResultsQuery::new(options.focus)).await? {
        ResultsOutcome::Found(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        ResultsOutcome::Redirect(location) => println!("Moved: {:?}", location),
        ResultsOutcome::NotFound => println!("Not found: {}", options.key),
    }

    Ok(())
}
