//! Load generator: repeated connect/send/reply cycles with a CSV results log.

use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wordmux::load::{self, LoadConfig};

#[derive(Parser, Debug)]
#[command(name = "wordmux-load")]
#[command(version = "0.1.0")]
#[command(about = "Stress a wordmux server with short-lived connections", long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:4981")]
    server: String,

    /// File whose first 1024 bytes are sent on every connection
    #[arg(short, long)]
    data: PathBuf,

    /// Test duration in seconds
    #[arg(short = 't', long)]
    duration: u64,

    /// Number of concurrent workers
    #[arg(short, long, default_value_t = 1)]
    workers: usize,

    /// CSV file results are appended to
    #[arg(short, long, default_value = "results.csv")]
    log: PathBuf,

    /// Per-attempt timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let payload = load::read_payload(&args.data).await?;
    let summary = load::run(LoadConfig {
        server: args.server,
        payload,
        duration: Duration::from_secs(args.duration),
        workers: args.workers,
        log: args.log,
        attempt_timeout: Duration::from_millis(args.timeout_ms),
    })
    .await?;

    println!(
        "attempts={} successes={} failures={}",
        summary.attempts, summary.successes, summary.failures
    );
    Ok(())
}
