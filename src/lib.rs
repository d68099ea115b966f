//! wordmux: a readiness-multiplexed word-count server.
//!
//! A single thread serves every client. Each chunk a client sends is
//! answered with the number of delimiter bytes (space, tab, newline) in that
//! chunk, as decimal text followed by `\n`.
//!
//! Components:
//! - `listener`: socket setup
//! - `runtime`: connection table, `select`/`poll` multiplexers, dispatch loop,
//!   shutdown token
//! - `protocol`: per-chunk counting and reply framing
//! - `client`, `load`: protocol consumers (interactive client, load generator)
//! - `config`: CLI and TOML configuration

#[cfg(not(unix))]
compile_error!("wordmux requires a Unix platform (select/poll on raw descriptors)");

pub mod client;
pub mod config;
pub mod listener;
pub mod load;
pub mod protocol;
pub mod runtime;
