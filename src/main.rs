//! proxycache daemon
//!
//! Runs the sharded response cache with its metrics and health endpoints,
//! optionally driving it with a synthetic proxy workload.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          proxycache                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Workload   │───▶│   Pipeline   │───▶│    Engine    │       │
//! │  │  (workers)   │    │   (policy)   │    │   (shards)   │       │
//! │  └──────────────┘    └──────────────┘    └──────┬───────┘       │
//! │                                                 │               │
//! │                      ┌──────────────┐           │               │
//! │                      │  /metrics    │◀──────────┘               │
//! │                      │  /healthz    │                           │
//! │                      └──────────────┘                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use proxycache::cache::{CacheConfig, CacheEngine, CachePipeline};
use proxycache::metrics::{serve, ServerState};

mod workload;

use crate::workload::{Workload, WorkloadConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// proxycache - sharded HTTP response cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags below override its values
    #[arg(long, env = "PROXYCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Total cache budget in bytes (0 = default)
    #[arg(long, env = "CACHE_MAX_BYTES")]
    max_bytes: Option<u64>,

    /// Default TTL in seconds (0 = default)
    #[arg(long, env = "CACHE_DEFAULT_TTL")]
    default_ttl: Option<u64>,

    /// Admission window in seconds (0 = default)
    #[arg(long, env = "CACHE_ADMISSION_WINDOW")]
    admission_window: Option<u64>,

    /// Largest cacheable body in bytes
    #[arg(long, env = "CACHE_MAX_OBJECT_BYTES")]
    max_object_bytes: Option<usize>,

    /// Number of shards (power of two)
    #[arg(long, env = "CACHE_SHARDS")]
    shards: Option<usize>,

    /// Metrics and health server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: String,

    /// Seconds between summary log lines
    #[arg(long, env = "SUMMARY_INTERVAL_SECONDS", default_value = "30")]
    summary_interval_secs: u64,

    /// Seconds between maintenance eviction passes (0 disables)
    #[arg(long, env = "MAINTENANCE_INTERVAL_SECONDS", default_value = "10")]
    maintenance_interval_secs: u64,

    /// Run N synthetic request loops against the cache
    #[arg(long, env = "SIMULATE_WORKERS", default_value = "0")]
    simulate_workers: usize,

    /// Distinct paths in the synthetic workload
    #[arg(long, default_value = "10000")]
    simulate_keys: u64,

    /// Popularity skew of the synthetic workload
    #[arg(long, default_value = "2.0")]
    simulate_skew: f64,

    /// Largest synthetic response body
    #[arg(long, default_value = "16384")]
    simulate_body_bytes: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = load_config(&args)?;
    info!("Starting proxycache");
    info!("  Max bytes: {}", config.max_bytes);
    info!("  Default TTL: {}s", config.default_ttl_secs);
    info!("  Admission window: {}s", config.admission_window_secs);
    info!("  Shards: {}", config.shard_count);

    let engine = Arc::new(CacheEngine::new());
    engine.init(config.clone()).context("cache initialization failed")?;

    // Metrics and health server
    let addr: SocketAddr = args
        .metrics_addr
        .parse()
        .with_context(|| format!("invalid metrics address {}", args.metrics_addr))?;
    let state = Arc::new(ServerState::new(Arc::clone(&engine))?);
    let mut server = tokio::spawn(serve(addr, state));

    // Periodic summary
    let summary_engine = Arc::clone(&engine);
    let summary_interval = Duration::from_secs(args.summary_interval_secs.max(1));
    let summary = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(summary_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            log_summary(&summary_engine);
        }
    });

    // Maintenance eviction
    let maintenance = (args.maintenance_interval_secs > 0).then(|| {
        let engine = Arc::clone(&engine);
        let max_bytes = config.max_bytes;
        let period = Duration::from_secs(args.maintenance_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = engine.evict_until_under(max_bytes) {
                    warn!("Maintenance pass skipped: {}", e);
                }
            }
        })
    });

    // Synthetic workload
    let workload = if args.simulate_workers > 0 {
        let workload_config = WorkloadConfig {
            workers: args.simulate_workers,
            key_space: args.simulate_keys.max(1),
            skew: args.simulate_skew.max(1.0),
            body_bytes: args.simulate_body_bytes.max(1),
            ..Default::default()
        };
        let pipeline = CachePipeline::for_engine(Arc::clone(&engine));
        Some(Workload::spawn(pipeline, workload_config).context("failed to start workload")?)
    } else {
        None
    };

    tokio::select! {
        res = &mut server => {
            match res {
                Ok(Ok(())) => warn!("Metrics server exited"),
                Ok(Err(e)) => error!("Metrics server error: {}", e),
                Err(e) => error!("Metrics server task failed: {}", e),
            }
        }
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
    }

    if let Some(workload) = workload {
        let stats = workload.stats();
        tokio::task::spawn_blocking(move || workload.stop())
            .await
            .context("workload shutdown failed")?;
        info!(
            requests = stats.requests(),
            "Origin offload: {:.1}%",
            engine.offload_percent(stats.requests())
        );
    }
    summary.abort();
    if let Some(handle) = maintenance {
        handle.abort();
    }
    server.abort();

    log_summary(&engine);
    engine.shutdown();

    info!("proxycache shutdown complete");
    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(args: &Args) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CacheConfig::default(),
    };

    if let Some(max_bytes) = args.max_bytes {
        config.max_bytes = max_bytes;
    }
    if let Some(ttl) = args.default_ttl {
        config.default_ttl_secs = ttl;
    }
    if let Some(window) = args.admission_window {
        config.admission_window_secs = window;
    }
    if let Some(max_object_bytes) = args.max_object_bytes {
        config.max_object_bytes = max_object_bytes;
    }
    if let Some(shards) = args.shards {
        config.shard_count = shards;
    }

    let config = config.normalized();
    config.validate().context("invalid cache configuration")?;
    Ok(config)
}

fn log_summary(engine: &CacheEngine) {
    let snapshot = engine.snapshot();
    let (cached, missed) = engine.egress_bytes();
    info!(
        hits = snapshot.totals.hits,
        misses = snapshot.totals.misses,
        evictions = snapshot.totals.evictions,
        entries = snapshot.totals.entries,
        bytes_used = snapshot.totals.bytes_used,
        cached_bytes = cached,
        missed_bytes = missed,
        tracked_admissions = snapshot.tracked_admissions,
        "Cache summary: hit rate {:.1}%, byte hit rate {:.1}%",
        snapshot.hit_rate,
        snapshot.byte_hit_rate
    );
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("hyper_util=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
