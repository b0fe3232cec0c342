use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, Level};

use holpaca_agent::{Agent, AgentConfig};
use holpaca_bench::{BackingStore, CacheRegistry, CachedStore, Field, MemStore, Settings, Status};
use holpaca_engine::MemEngine;

/// Workload driver for a holpaca-managed cache.
#[derive(Parser)]
#[command(name = "holpaca-bench", version)]
struct Cli {
    /// Settings file (flat dotted keys, per-thread overrides supported).
    #[arg(long, default_value = "holpaca.toml")]
    config: String,

    /// Worker threads.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Operations per thread.
    #[arg(long, default_value_t = 100_000)]
    ops: u64,

    /// Distinct keys per thread.
    #[arg(long, default_value_t = 10_000)]
    keys: u64,

    /// Value size in bytes.
    #[arg(long, default_value_t = 1_024)]
    value_size: usize,

    /// Fraction of operations that are reads; the rest are updates.
    #[arg(long, default_value_t = 0.95)]
    read_fraction: f64,

    /// Flush windowed metrics to the agent every this many operations.
    #[arg(long, default_value_t = 1_000)]
    metrics_every: u64,
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(env_filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Arc::new(Cli::parse());

    let settings = if std::path::Path::new(&cli.config).exists() {
        Settings::load(&cli.config)?
    } else {
        info!(path = %cli.config, "no settings file, using defaults");
        Settings::new()
    };

    let registry = Arc::new(CacheRegistry::new());
    let started = Instant::now();

    let mut workers = Vec::with_capacity(cli.threads);
    for thread_id in 0..cli.threads {
        let cli = cli.clone();
        let settings = settings.clone();
        let registry = registry.clone();
        workers.push(std::thread::spawn(move || worker(thread_id, &cli, &settings, &registry)));
    }

    let mut total_ops = 0u64;
    for worker in workers {
        total_ops += worker.join().expect("worker panicked")?;
    }

    let elapsed = started.elapsed();
    info!(
        total_ops,
        elapsed_ms = elapsed.as_millis() as u64,
        ops_per_sec = (total_ops as f64 / elapsed.as_secs_f64()) as u64,
        "workload done"
    );
    Ok(())
}

fn worker(
    thread_id: usize,
    cli: &Cli,
    settings: &Settings,
    registry: &CacheRegistry,
) -> Result<u64> {
    let cache_name = settings.get_or("cachelib.name", thread_id, "CacheLib");
    let (agent, store) =
        registry.acquire(&cache_name, || build_cache(settings, thread_id))?;

    let pool_name = settings.get_or("cachelib.pool.name", thread_id, "default");
    let rel_size: f64 = settings.parsed("cachelib.pool.relsize", thread_id, 1.0)?;
    let no_initial_size =
        settings.get_or("holpaca.pool.noinitialsize", thread_id, "off") == "on";
    let qos: f64 = settings.parsed("holpaca.pool.qos", thread_id, 0.0)?;
    let proportion: f64 = settings.parsed("holpaca.pool.proportion", thread_id, 1.0)?;

    let ram = settings.parsed("cachelib.size", thread_id, 1_000_000_000u64)?;
    let initial = if no_initial_size { 0 } else { (ram as f64 * rel_size) as u64 };
    let pool = agent
        .add_pool(&pool_name, initial, qos, proportion)
        .context("creating workload pool")?;
    let client = CachedStore::new(agent.clone(), store, pool);

    let table = "usertable";
    let value = vec![0x5Au8; cli.value_size];
    let mut rng = StdRng::seed_from_u64(thread_id as u64);

    // Preload the key space through the store so reads always have a row to
    // fall back to.
    for i in 0..cli.keys {
        let key = format!("user{thread_id}-{i}");
        client.insert(table, &key, &[Field::new("data", value.clone())]);
    }

    let mut done = 0u64;
    for op in 0..cli.ops {
        let key = format!("user{thread_id}-{}", rng.gen_range(0..cli.keys));
        let status = if rng.gen::<f64>() < cli.read_fraction {
            client.read(table, &key, None).0
        } else {
            client.update(table, &key, &[Field::new("data", value.clone())])
        };
        if status == Status::Ok {
            done += 1;
        }
        if op % cli.metrics_every == 0 {
            client.flush_metrics();
        }
    }
    client.flush_metrics();

    agent.remove_pool(pool).context("removing workload pool")?;
    registry.release(&cache_name);
    Ok(done)
}

fn build_cache(
    settings: &Settings,
    thread_id: usize,
) -> Result<(Agent, Arc<dyn BackingStore>)> {
    let size = settings.parsed("cachelib.size", thread_id, 1_000_000_000u64)?;
    let virtual_size = match settings.get("holpaca.virtualsize", thread_id) {
        Some(raw) => Some(
            raw.parse::<u64>()
                .map_err(|e| anyhow::anyhow!("bad holpaca.virtualsize '{raw}': {e}"))?,
        ),
        None => None,
    };

    let config = AgentConfig {
        cache_size: size,
        virtual_size,
        address: settings.get("holpaca.agent.address", thread_id).map(str::to_string),
        orchestrator_address: settings
            .get("holpaca.orchestrator.address", thread_id)
            .map(str::to_string),
        proportion: settings.parsed("holpaca.proportion", thread_id, 1.0)?,
        ..Default::default()
    };

    // The resizer/rebalancer/optimizer key family configures the real slab
    // engine; the reference engine has no such background workers.
    for key in ["cachelib.poolresizer", "cachelib.poolrebalancer", "cachelib.pooloptimizer"] {
        if settings.get_or(key, thread_id, "off") == "on" {
            info!(key, "engine-side worker requested; reference engine ignores it");
        }
    }

    let engine = Arc::new(MemEngine::new(size));
    let agent = Agent::new(config, engine).context("starting cache agent")?;
    let store: Arc<dyn BackingStore> = Arc::new(MemStore::new());
    Ok((agent, store))
}
