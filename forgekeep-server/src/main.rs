//! Forgekeep server CLI binary.
//!
//! Configuration precedence: built-in defaults, then the JSON config file,
//! then command-line flags. The merged value is frozen before the server
//! starts.

use anyhow::Result;
use clap::{Parser, Subcommand};
use forgekeep_server::{run_server, Config};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "forgekeep")]
#[command(about = "Forgekeep - self-hostable module registry server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the registry server
    Serve {
        /// Path to a JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,

        /// Directory holding the module tree
        #[arg(long)]
        modules_dir: Option<PathBuf>,

        /// Enable the response cache
        #[arg(long)]
        cache: bool,

        /// Directory for cached responses
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Maximum age of a cached response in seconds
        #[arg(long)]
        cache_max_age: Option<u64>,

        /// Comma-separated list of cacheable path prefixes
        #[arg(long)]
        cache_prefixes: Option<String>,

        /// Upstream registry base URL; repeat the flag in priority order
        #[arg(long = "upstream")]
        upstreams: Vec<String>,

        /// Import proxied release archives into the local registry
        #[arg(long)]
        import_proxied_releases: bool,

        /// Rescan the modules directory every N seconds
        #[arg(long)]
        scan_interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            modules_dir,
            cache,
            cache_dir,
            cache_max_age,
            cache_prefixes,
            upstreams,
            import_proxied_releases,
            scan_interval,
        } => {
            let mut cfg = match &config {
                Some(path) => Config::load(path)?,
                None => Config::load_or_default("forgekeep.json")?,
            };

            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            if let Some(modules_dir) = modules_dir {
                cfg.storage.modules_dir = modules_dir;
            }
            if cache {
                cfg.cache.enabled = true;
            }
            if let Some(cache_dir) = cache_dir {
                cfg.cache.dir = cache_dir;
            }
            if let Some(cache_max_age) = cache_max_age {
                cfg.cache.max_age_secs = cache_max_age;
            }
            if let Some(cache_prefixes) = cache_prefixes {
                cfg.cache.prefixes = cache_prefixes
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
            }
            if !upstreams.is_empty() {
                cfg.upstream.urls = upstreams;
            }
            if import_proxied_releases {
                cfg.upstream.import_releases = true;
            }
            if let Some(scan_interval) = scan_interval {
                cfg.scan.interval_secs = Some(scan_interval);
            }

            run_server(cfg).await
        }
    }
}
