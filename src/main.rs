//! Resilient gateway demo
//!
//! Runs a failure scenario through the gateway against the in-memory store and
//! prints the resulting circuit breaker metrics.
//!
//! ```text
//! settings.toml ─▶ Settings ─▶ Gateway ─▶ Retrier ─▶ CircuitBreaker ─▶ MemoryStore
//!       ▲                         ▲                                    (fault injection)
//!       └── ConfigWatcher ────────┘ configure()
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde_json::json;

use resilient_gateway::config::{load_settings, ConfigWatcher, GatewayConfigPatch, Settings, TimeoutsPatch};
use resilient_gateway::gateway::{safe_operation, Gateway, RetryOptions};
use resilient_gateway::observability::{logging, metrics};
use resilient_gateway::resilience::CircuitBreakerOverrides;
use resilient_gateway::store::{CollectionRef, MemoryStore, StoreError, StoreErrorCode};

#[derive(Parser)]
#[command(name = "resilient-gateway")]
#[command(about = "Run failure scenarios through the resilient document gateway", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the settings file on change and keep running until Ctrl-C
    #[arg(short, long)]
    watch: bool,

    #[arg(short, long, value_enum, default_value_t = Scenario::Flaky)]
    scenario: Scenario,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scenario {
    /// Two transient failures, then success
    Flaky,
    /// Backend down; the breaker opens and later calls fail fast
    Outage,
    /// Reads slower than the read deadline
    Slow,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => load_settings(path)?,
        None => Settings::default(),
    };

    logging::init_logging(&settings.observability.log_level);
    tracing::info!(scenario = ?cli.scenario, "resilient-gateway v0.1.0 starting");

    if settings.observability.metrics_enabled {
        if let Ok(addr) = settings.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(Gateway::from_settings(Arc::clone(&store), &settings));

    // Keep the watcher alive for the lifetime of main.
    let watcher_guard = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::new(path, settings.clone());
            let guard = watcher.run()?;
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                while let Some(settings) = updates.recv().await {
                    if let Err(e) = gateway.configure(&GatewayConfigPatch::from(settings.gateway)) {
                        tracing::error!(error = %e, "Rejected reloaded gateway configuration");
                    }
                }
            });
            Some(guard)
        }
        (None, true) => {
            tracing::warn!("--watch needs --config, ignoring");
            None
        }
        _ => None,
    };

    match cli.scenario {
        Scenario::Flaky => run_flaky(&gateway, &store).await,
        Scenario::Outage => run_outage(&gateway, &store).await,
        Scenario::Slow => run_slow(&gateway, &store).await?,
    }

    println!("{}", serde_json::to_string_pretty(&gateway.breakers().metrics())?);

    if watcher_guard.is_some() {
        tracing::info!("Watching configuration, press Ctrl-C to exit");
        tokio::signal::ctrl_c().await?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn fast_retries() -> RetryOptions {
    RetryOptions::new()
        .initial_delay_ms(50)
        .max_delay_ms(500)
        .on_retry(|error, attempt, delay| {
            println!("  attempt {} failed ({}), retrying in {}ms", attempt, error, delay.as_millis());
        })
}

async fn run_flaky(gateway: &Gateway<MemoryStore>, store: &MemoryStore) {
    let doc = CollectionRef::new("budgets").doc("march");
    store.insert(&doc, json!({"limit": 500, "spent": 120}));
    store.fail_next(2, StoreError::new(StoreErrorCode::Unavailable, "backend unreachable"));

    println!("flaky: reading {}", doc);
    match gateway.resilient_get(&doc, &fast_retries()).await {
        Ok(snapshot) => println!("  read ok: {}", snapshot.data.unwrap_or_default()),
        Err(e) => println!("  read failed: {} ({})", e, e.category()),
    }
}

async fn run_outage(gateway: &Gateway<MemoryStore>, store: &MemoryStore) {
    let doc = CollectionRef::new("budgets").doc("march");
    store.fail_next(1_000, StoreError::new(StoreErrorCode::Unavailable, "backend down"));

    let options = fast_retries()
        .max_attempts(2)
        .circuit_breaker("budgets")
        .circuit_overrides(CircuitBreakerOverrides {
            failure_threshold: Some(3),
            reset_timeout_ms: Some(2_000),
            ..Default::default()
        });

    for round in 1..=4 {
        println!("outage: call {}", round);
        if let Err(e) = gateway.resilient_get(&doc, &options).await {
            println!("  failed: {} ({})", e, e.category());
        }
    }
    println!("  store saw {} calls", store.call_count());
}

async fn run_slow(
    gateway: &Gateway<MemoryStore>,
    store: &MemoryStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let doc = CollectionRef::new("budgets").doc("march");
    store.insert(&doc, json!({"limit": 500}));
    store.set_latency(Duration::from_millis(200));
    gateway.configure(&GatewayConfigPatch {
        timeouts: TimeoutsPatch {
            read_ms: Some(50),
            ..Default::default()
        },
        ..Default::default()
    })?;

    println!("slow: reading {} with a 50ms deadline", doc);
    let result = safe_operation(
        gateway.resilient_get(&doc, &fast_retries().max_attempts(2)),
        None,
    )
    .await;
    println!(
        "  success={} error_type={}",
        result.success,
        serde_json::to_string(&result.error_type)?
    );
    Ok(())
}
