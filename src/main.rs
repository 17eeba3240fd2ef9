//! Cachefront CLI
//!
//! Fetches resources over HTTP through the caching engine, and offers the
//! store maintenance commands an operator needs.
//!
//! ```text
//! cachefront get http://tiles.local/0/0/0.png -o tile.png
//! cachefront flush
//! cachefront --cluster-node redis://a:6379 --cluster-node redis://b:6379 route <key>...
//! ```

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cachefront::{
    CacheMode, CachingEngine, EngineConfig, HashRing, HttpSource, HttpSourceConfig, Payload,
    StoreClient,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Cachefront - caching layer between producers and Redis
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, short = 'c', env = "CACHEFRONT_CONFIG")]
    config: Option<PathBuf>,

    /// Caching strategy (passthrough, race, relay)
    #[arg(long, env = "CACHEFRONT_MODE")]
    mode: Option<CacheMode>,

    /// Key namespace
    #[arg(long, env = "CACHEFRONT_NAMESPACE")]
    namespace: Option<String>,

    /// Redis URL for a single store
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Store node address; repeat to enable the cluster router
    #[arg(long = "cluster-node")]
    cluster_nodes: Vec<String>,

    /// Backpressure threshold (pending store operations)
    #[arg(long, env = "CACHEFRONT_HIGH_WATER_MARK")]
    high_water_mark: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a resource through the cache
    Get {
        /// Resource URL, or a path under --base-url
        resource: String,

        /// Prefix for relative resource ids
        #[arg(long, env = "CACHEFRONT_BASE_URL")]
        base_url: Option<String>,

        /// Write the payload here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Print engine counters after the fetch
        #[arg(long)]
        stats: bool,
    },

    /// Drop every entry from the store (all nodes in cluster mode)
    Flush,

    /// Show which cluster node owns each key
    Route {
        /// Store keys
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

impl Args {
    fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => EngineConfig::default(),
        };

        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(url) = &self.redis_url {
            config.redis_url = Some(url.clone());
        }
        if !self.cluster_nodes.is_empty() {
            config.cluster_nodes = self.cluster_nodes.clone();
        }
        if let Some(limit) = self.high_water_mark {
            config.high_water_mark = Some(limit);
        }

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = args.engine_config()?;
    info!(mode = %config.mode, namespace = %config.namespace, "Starting cachefront");

    match args.command {
        Command::Get {
            resource,
            base_url,
            output,
            stats,
        } => {
            let source = HttpSource::new(HttpSourceConfig {
                base_url,
                ..Default::default()
            })?;
            let engine = CachingEngine::connect(config, source).await?;

            let result = engine.get(&resource).await;
            // Let the write or refresh land before exiting
            engine.drain().await;

            if stats {
                eprintln!("{}", serde_json::to_string_pretty(&engine.metrics())?);
            }

            let response = result?;
            eprintln!("{}", serde_json::to_string_pretty(&response.headers)?);

            let body = match &response.payload {
                Payload::Json(value) => serde_json::to_vec_pretty(value)?,
                other => other.as_bytes().unwrap_or_default().to_vec(),
            };
            match output {
                Some(path) => std::fs::write(&path, &body)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => std::io::stdout().write_all(&body)?,
            }
        }

        Command::Flush => {
            let store = cachefront::engine::connect_store(&config).await?;
            store.flush_all().await?;
            info!(store = %store.name(), "Store flushed");
        }

        Command::Route { keys } => {
            anyhow::ensure!(
                !config.cluster_nodes.is_empty(),
                "route needs --cluster-node or cluster_nodes in the config"
            );
            let ring = HashRing::new(config.cluster_nodes.iter().cloned(), config.ring_replicas)?;
            for key in keys {
                println!("{}\t{}", key, ring.route_name(&key));
            }
        }
    }

    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "redis=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Logs go to stderr; stdout carries the payload
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
