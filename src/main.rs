//! IRC gateway - Main binary

use clap::Parser;
use ircgate_core::supervisor::Supervisor;
use ircgate_core::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Multi-account IRC gateway daemon
#[derive(Parser)]
#[command(name = "ircgate")]
#[command(about = "A multi-account IRC gateway in Rust")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    info!("Loading configuration from {:?}", cli.config);
    let config = Config::from_file(&cli.config)?;
    config.validate()?;

    if cli.test_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let supervisor = Arc::new(Supervisor::new(config.build_store()));
    supervisor.reconnect_all().await?;

    // The frontend RPC layer feeds this queue; keep the sender so embedding
    // code can clone it off before the event loop starts.
    let (_account_events, events_rx) = mpsc::channel(64);
    let event_loop = Arc::clone(&supervisor);
    tokio::spawn(async move { event_loop.run_events(events_rx).await });

    let refresher = Arc::clone(&supervisor);
    let interval = Duration::from_secs(config.general.reconnect_interval_secs.max(1));
    tokio::spawn(async move { refresher.run_refresh_loop(interval).await });

    info!("ircgate running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    supervisor.stop_all("gateway shutting down").await;
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str) {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();
}
