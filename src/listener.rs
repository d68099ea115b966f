//! Listener setup.
//!
//! Creates the server's TCP endpoint once at startup: stream socket,
//! `SO_REUSEADDR`, bind, listen with a bounded backlog. Any failure here is
//! fatal and the event loop is never entered.

use crate::config::{Config, ConfigError};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use thiserror::Error;

/// Failure while creating the listening socket.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The configured host/port did not resolve to a socket address.
    #[error("invalid listen address '{addr}': {reason}")]
    Address { addr: String, reason: String },

    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),

    /// Setting a socket option failed.
    #[error("failed to set {option}: {source}")]
    Option {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Resolve the configured listen address.
fn resolve(config: &Config) -> Result<SocketAddr, SetupError> {
    let addr = config.listen_addr();
    let mut addrs = addr.to_socket_addrs().map_err(|e| SetupError::Address {
        addr: addr.clone(),
        reason: e.to_string(),
    })?;

    addrs.next().ok_or_else(|| SetupError::Address {
        addr,
        reason: "no addresses resolved".to_string(),
    })
}

/// Create, configure, bind and listen on the server socket.
///
/// The returned listener is non-blocking: the event loop only calls
/// `accept` after readiness was reported, and a peer that resets in between
/// must not stall the loop.
pub fn bind(config: &Config) -> Result<TcpListener, SetupError> {
    let addr = resolve(config)?;

    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )
    .map_err(SetupError::Socket)?;

    socket
        .set_reuse_address(true)
        .map_err(|source| SetupError::Option {
            option: "SO_REUSEADDR",
            source,
        })?;
    socket
        .set_nonblocking(true)
        .map_err(|source| SetupError::Option {
            option: "O_NONBLOCK",
            source,
        })?;
    socket
        .bind(&addr.into())
        .map_err(|source| SetupError::Bind { addr, source })?;
    socket
        .listen(config.backlog)
        .map_err(|source| SetupError::Listen { addr, source })?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Config::default()
        }
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind(&loopback()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);

        // Non-blocking: nothing pending means WouldBlock, not a hang
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_bind_conflict_is_setup_error() {
        // SO_REUSEADDR never allows sharing a port with an active listener.
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config {
            port: taken.local_addr().unwrap().port(),
            ..loopback()
        };

        match bind(&config) {
            Err(SetupError::Bind { addr, .. }) => assert_eq!(addr.port(), config.port),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_address() {
        let config = Config {
            host: "not an address".to_string(),
            ..loopback()
        };

        assert!(matches!(bind(&config), Err(SetupError::Address { .. })));
    }
}
