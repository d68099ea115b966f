//! Interactive client: one line of stdin in, one word count out.

use clap::Parser;
use std::io;
use tracing_subscriber::EnvFilter;
use wordmux::client::{self, Client};

#[derive(Parser, Debug)]
#[command(name = "wordmux-client")]
#[command(version = "0.1.0")]
#[command(about = "Send lines to a wordmux server and print the counts", long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:4981")]
    server: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut client = Client::connect(&args.server)?;
    eprintln!("Connected to {}", args.server);

    client::run_interactive(&mut client, io::stdin().lock(), io::stdout().lock())?;
    Ok(())
}
