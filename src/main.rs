//! campus-guard
//!
//! Rate limiting and retry layer for the CampusAxis portal API.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌────────────────────────────────────────────────────┐
//!                      │                    CAMPUS GUARD                    │
//!                      │                                                    │
//!   Client Request     │  ┌─────────┐   ┌──────────────┐   ┌────────────┐  │
//!   ───────────────────┼─▶│  http   │──▶│  rate limit  │──▶│  handlers  │  │
//!                      │  │ server  │   │  middleware  │   │  + admin   │  │
//!                      │  └─────────┘   └──────┬───────┘   └─────┬──────┘  │
//!                      │                       │                 │         │
//!                      │                       ▼                 ▼         │
//!                      │               ┌──────────────┐   ┌────────────┐   │
//!                      │               │   security   │   │ resilience │   │
//!                      │               │ limiter+store│   │   retries  │   │
//!                      │               └──────────────┘   └─────┬──────┘   │
//!                      │                                        ▼          │
//!                      │                                 ┌────────────┐    │     Supabase
//!                      │                                 │  database  │────┼───▶ REST/Auth
//!                      │                                 └────────────┘    │
//!                      │  ┌──────────────────────────────────────────────┐ │
//!                      │  │ config · observability · lifecycle           │ │
//!                      │  └──────────────────────────────────────────────┘ │
//!                      └────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use campus_guard::config::{load_config, watcher::ConfigWatcher, GuardConfig};
use campus_guard::lifecycle::{wait_for_shutdown, Shutdown};
use campus_guard::observability::{logging, metrics};
use campus_guard::GuardServer;

#[derive(Parser)]
#[command(name = "campus-guard", version, about = "Rate limiting and retry layer for the CampusAxis API")]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "CAMPUS_GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Watch the configuration file and apply changes while running.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let mut config = GuardConfig::default();
            campus_guard::config::loader::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
            config
        }
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "campus-guard starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        rate_limit_enabled = config.rate_limit.enabled,
        store = ?config.rate_limit.store,
        request_timeout_secs = config.timeouts.request_secs,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher handle alive for the lifetime of the server.
    let (_watcher, config_updates) = match (args.watch, &args.config) {
        (true, Some(path)) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), Some(updates))
        }
        _ => (None, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = GuardServer::new(config).await?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        tracing::info!("Shutdown signal received");
        trigger.trigger();
    });

    server.run(listener, config_updates, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
