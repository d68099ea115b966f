//! Readiness-multiplexed connection engine.
//!
//! One thread, one loop, no per-connection threads:
//! - `ConnectionTable`: bounded slab of client connections
//! - `Multiplexer`: `select` or `poll` readiness wait
//! - `Server`: the dispatch loop tying them to the listener
//! - `Shutdown`: signal-driven cancellation token

mod connection;
mod event_loop;
mod multiplexer;
mod shutdown;

pub use connection::{CapacityExceeded, Connection, ConnectionTable};
pub use event_loop::{Server, ServerStats};
pub use multiplexer::{
    MultiplexError, Multiplexer, PollMultiplexer, Readiness, SelectMultiplexer,
};
pub use shutdown::Shutdown;

use crate::config::Config;

/// Run the server until SIGINT or SIGTERM.
pub fn run(config: &Config) -> Result<ServerStats, Box<dyn std::error::Error>> {
    let shutdown = Shutdown::install()?;
    let server = Server::bind(config, shutdown)?;
    Ok(server.run())
}
