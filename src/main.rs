//! execflow CLI entrypoint

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use execflow::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG wins, then the configured filter, then "info"
    let fallback = execflow::config::config()
        .ok()
        .and_then(|cfg| cfg.log_filter.clone())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Parse and execute CLI
    let cli = Cli::parse();
    cli.execute().await
}
