//! # coursetally - Course Rating Server
//!
//! The main binary for the coursetally rating engine.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for status, ingestion, and maintenance
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                apps/coursetally (THE BINARY)             │
//! │                                                          │
//! │   ┌─────────────┐            ┌─────────────┐             │
//! │   │   CLI       │            │   HTTP API  │             │
//! │   │  (clap)     │            │   (axum)    │             │
//! │   └──────┬──────┘            └──────┬──────┘             │
//! │          │                         │                     │
//! │          └────────────┬────────────┘                     │
//! │                       ▼                                  │
//! │             ┌──────────────────┐                         │
//! │             │ coursetally-core │                         │
//! │             │   (THE LOGIC)    │                         │
//! │             └──────────────────┘                         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! coursetally server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! coursetally status
//! coursetally ingest -f ratings.json
//! coursetally init --force
//! ```

use clap::Parser;
use coursetally::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing — COURSETALLY_LOG_FORMAT=json enables machine-parseable output.
    let log_format =
        std::env::var("COURSETALLY_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "coursetally=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Display startup banner
    if !cli.quiet {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the coursetally startup banner.
fn print_banner() {
    println!(
        r#"
  ┌─────────────────────────────────────┐
  │  coursetally v{:<21} │
  │  course ratings, counted honestly   │
  └─────────────────────────────────────┘
"#,
        env!("CARGO_PKG_VERSION")
    );
}
