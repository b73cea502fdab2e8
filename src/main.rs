//! Main entry point for the market-history-sync CLI

use clap::Parser;
use market_history_sync::cli::{Cli, Commands};
use market_history_sync::sync::BatchState;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_history_sync=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    // Parse CLI arguments
    let cli = Cli::parse();

    // One batch spans the whole invocation; Ctrl+C flips its cancelled flag
    // and every in-flight task winds down at its next checkpoint.
    let batch = BatchState::shared(format!(
        "run-{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S")
    ));
    tokio::spawn({
        let batch = batch.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - cancelling sync and saving state...");
                batch.cancel();
            }
        }
    });

    // Execute command
    let result = match cli.command {
        Commands::Listing(ref args) => args
            .execute(&cli, batch.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::History(ref args) => args
            .execute(&cli, batch.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Run(ref args) => args
            .execute(&cli, batch.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e)),
    };

    // Handle result
    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
