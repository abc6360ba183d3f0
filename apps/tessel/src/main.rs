//! # Tessel - Property-Graph CLI
//!
//! The main binary for the Tessel property-graph engine.
//!
//! ## Usage
//!
//! ```bash
//! tessel init
//! tessel add-node alice --prop age=31
//! tessel add-node bob
//! tessel add-edge alice bob --edge-type knows
//! tessel descendants alice
//! tessel export -o graph.tsnp
//! ```
//!
//! ## Logging
//!
//! `RUST_LOG` overrides the default `tessel=info` filter (`tessel=debug` with
//! `--verbose`). `TESSEL_LOG_FORMAT=json`, or `log_format = "json"` in the
//! configuration file, switches to machine-parseable output.

use clap::Parser;
use tessel::cli;
use tessel::config::LogFormat;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();
    let settings = cli.settings();

    let configured = settings
        .as_ref()
        .map(|settings| settings.log_format)
        .unwrap_or_default();
    init_tracing(configured, cli.verbose);

    let result = settings.and_then(|settings| cli::execute(cli, settings));
    if let Err(e) = result {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Install the global subscriber. The environment wins over the file.
fn init_tracing(configured: LogFormat, verbose: bool) {
    let format = std::env::var("TESSEL_LOG_FORMAT")
        .ok()
        .and_then(|name| LogFormat::parse(&name).ok())
        .unwrap_or(configured);

    let default_filter = if verbose { "tessel=debug,tessel_core=debug" } else { "tessel=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
