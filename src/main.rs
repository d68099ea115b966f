//! wordmux server binary.
//!
//! Runs with no arguments on `0.0.0.0:4981`; see `--help` for overrides.
//! Stops on SIGINT or SIGTERM and exits successfully once every socket is
//! closed.

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wordmux::config::Config;
use wordmux::runtime;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        max_clients = config.max_clients,
        multiplexer = ?config.multiplexer,
        "Starting wordmux server"
    );

    match runtime::run(&config) {
        Ok(stats) => {
            info!(replies = stats.replies, "Exiting");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Server failed to start");
            Err(e)
        }
    }
}
