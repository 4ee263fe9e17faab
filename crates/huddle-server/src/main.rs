//! # Huddle Server
//!
//! Room-based realtime chat relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Run with custom config
//! huddle --config /path/to/huddle.toml
//!
//! # Relay JSON events instead of plain lines
//! huddle --wire-format json
//!
//! # Run with environment variables
//! HUDDLE_PORT=8080 HUDDLE_HOST=0.0.0.0 HUDDLE_ROOMS__WIRE_FORMAT=json huddle
//! ```

mod config;
mod handlers;
mod ids;
mod metrics;

use anyhow::Result;
use clap::Parser;
use huddle_protocol::WireFormat;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str =
    "huddle_server=debug,huddle_core=debug,huddle_transport=debug,tower_http=debug";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured wire format (`text` or `json`).
    #[arg(long)]
    wire_format: Option<WireFormat>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(wire_format) = args.wire_format {
        config.rooms.wire_format = wire_format;
    }

    tracing::info!("Starting Huddle server on {}:{}", config.host, config.port);

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
    }

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
