//! Entry point: loads configuration, wires the daemon together, and runs
//! it until ctrl-c or a platform shutdown signal arrives.

use clap::Parser;
use issuectl_core::config::Config;
use tracing::{error, info};

use issuectl_daemon::daemon::Daemon;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "issuectl-daemon", version, about = "GitHub issue automation daemon")]
struct Cli {
    /// Path to the TOML config file. Falls back to `./issuectl.toml`, then defaults.
    #[arg(long, short = 'c')]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path.clone())?,
        None => Config::load()?,
    };

    if config.general.log_format == "json" {
        issuectl_telemetry::logging::init_logging_json("issuectl-daemon", &config.general.log_level);
    } else {
        issuectl_telemetry::logging::init_logging("issuectl-daemon", &config.general.log_level);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        repositories = config.general.repositories.len(),
        "issuectl daemon starting"
    );

    let daemon = Daemon::new(config).await?;
    let shutdown = daemon.shutdown_handle();

    let ctrl_c = async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, shutting down");
        shutdown.trigger();
    };
    tokio::spawn(ctrl_c);

    daemon.run().await?;
    Ok(())
}
