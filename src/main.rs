//! LLM gateway (v1)
//!
//! A resilience layer in front of interchangeable AI-completion providers.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌────────────────────────────────────────────────────┐
//!                      │                    LLM GATEWAY                     │
//!   Client Request     │  ┌─────────┐   ┌────────────┐   ┌──────────────┐   │
//!   ───────────────────┼─▶│  http   │──▶│  security  │──▶│  providers   │   │
//!                      │  │ server  │   │ rate limit │   │  failover    │   │
//!                      │  └─────────┘   │ + adaptive │   └──────┬───────┘   │
//!                      │                └─────┬──────┘          │           │
//!                      │                      │ health          ▼           │
//!                      │                      │          ┌──────────────┐   │
//!   Client Response    │                      └─────────▶│ resilience   │───┼──▶ Providers
//!   ◀──────────────────┼── canonical response           │ breakers     │   │
//!                      │                                 └──────────────┘   │
//!                      │  config · health monitor · observability · admin   │
//!                      └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use llm_gateway::config::{load_config, watcher::ConfigWatcher};
use llm_gateway::observability::{logging, metrics};
use llm_gateway::{GatewayContext, HttpServer};

#[derive(Parser)]
#[command(name = "llm-gateway", version, about = "Resilient gateway for LLM completion providers")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml", env = "GATEWAY_CONFIG")]
    config: PathBuf,

    /// Reload rate limits when the configuration file changes.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", args.config.display());
            std::process::exit(1);
        }
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "llm-gateway starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        providers = config.providers.len(),
        request_timeout_secs = config.listener.request_timeout_secs,
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

    let bind_address = config.listener.bind_address.clone();
    let context = Arc::new(GatewayContext::build(config)?);
    let background = context.spawn_background();

    // The watcher handle must outlive the server.
    let _watcher = if args.watch {
        let (watcher, updates) = ConfigWatcher::new(&args.config);
        match watcher.run() {
            Ok(handle) => {
                let shutdown = context.shutdown.subscribe();
                tokio::spawn(context.clone().run_reload_loop(updates, shutdown));
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                None
            }
        }
    } else {
        None
    };

    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(context.clone());
    server.run(listener).await?;

    for task in background {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
