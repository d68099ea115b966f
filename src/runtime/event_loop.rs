//! Single-threaded dispatch loop.
//!
//! Each iteration:
//! 1. wait for readiness (the only blocking point)
//! 2. accept pending connections if the listener is readable
//! 3. service every slot found readable, in table order
//!
//! Slots accepted in step 2 are not part of the snapshot taken in step 1 and
//! are first serviced on the next iteration. The loop exits only at an
//! iteration boundary once the shutdown token is tripped.
//!
//! ## Limitation
//!
//! Replies are written on the blocking client socket without waiting for
//! write readiness. A client that never drains its receive buffer can stall
//! the whole loop.

use crate::config::Config;
use crate::listener::{self, SetupError};
use crate::protocol::{self, ConnectionError};
use crate::runtime::{Connection, ConnectionTable, Multiplexer, Readiness, Shutdown};
use bytes::BytesMut;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use tracing::{debug, info, warn};

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Connections placed in the table.
    pub accepted: u64,
    /// Connections accepted and immediately closed.
    pub rejected: u64,
    /// Slots reclaimed after EOF or an I/O error.
    pub disconnected: u64,
    /// Replies written.
    pub replies: u64,
}

/// The word-count server: listener, connection table and readiness strategy.
pub struct Server {
    listener: TcpListener,
    table: ConnectionTable<TcpStream>,
    multiplexer: Multiplexer,
    shutdown: Shutdown,
    /// Chunk buffer for reads, shared by all connections.
    chunk: Vec<u8>,
    /// Staging buffer for replies.
    reply: BytesMut,
    stats: ServerStats,
}

impl Server {
    /// Set up the listener. Nothing is accepted until [`Server::run`].
    pub fn bind(config: &Config, shutdown: Shutdown) -> Result<Self, SetupError> {
        // Capacities below are allocated up front
        config.validate()?;
        let listener = listener::bind(config)?;

        Ok(Server {
            listener,
            table: ConnectionTable::new(config.max_clients),
            multiplexer: Multiplexer::new(config.multiplexer, config.max_clients),
            shutdown,
            chunk: vec![0u8; config.buffer_size],
            reply: BytesMut::with_capacity(32),
            stats: ServerStats::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until shutdown is requested, then close every socket.
    pub fn run(mut self) -> ServerStats {
        info!(
            addr = ?self.listener.local_addr().ok(),
            multiplexer = ?self.multiplexer.kind(),
            max_clients = self.table.capacity(),
            buffer_size = self.chunk.len(),
            "Server listening"
        );

        while !self.shutdown.is_requested() {
            self.turn();
        }

        self.teardown()
    }

    /// One loop iteration.
    fn turn(&mut self) {
        let readiness = match self.multiplexer.wait(
            self.listener.as_raw_fd(),
            self.shutdown.wake_fd(),
            &mut self.table,
        ) {
            Ok(readiness) => readiness,
            Err(e) => {
                warn!(error = %e, "Readiness wait failed");
                return;
            }
        };

        let listener_ready = match readiness {
            Readiness::Ready { listener, .. } => listener,
            Readiness::Interrupted => {
                debug!("Readiness wait interrupted");
                return;
            }
        };

        // Shutdown may have been requested while we were blocked; the wake
        // descriptor only ever becomes readable after that
        if self.shutdown.is_requested() {
            return;
        }

        if listener_ready {
            self.accept_connections();
        }
        self.service_readable();
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    /// Place an accepted connection in the table, or close it.
    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        let fd = stream.as_raw_fd();
        if !self.multiplexer.can_watch(fd) {
            self.stats.rejected += 1;
            warn!(peer = %peer, fd, "Descriptor cannot be watched, dropping new connection");
            return;
        }

        // Some platforms hand out accepted sockets with the listener's
        // O_NONBLOCK; the protocol handler expects blocking I/O
        if let Err(e) = stream.set_nonblocking(false) {
            self.stats.rejected += 1;
            warn!(peer = %peer, error = %e, "Failed to configure connection");
            return;
        }

        match self.table.insert(Connection::new(stream, Some(peer))) {
            Ok(slot) => {
                self.stats.accepted += 1;
                info!(slot, peer = %peer, active = self.table.len(), "New connection");
            }
            Err(e) => {
                self.stats.rejected += 1;
                warn!(peer = %peer, error = %e, "Too many clients, dropping new connection");
            }
        }
    }

    fn service_readable(&mut self) {
        for slot in self.table.readable() {
            let Some(conn) = self.table.get_mut(slot) else {
                continue;
            };

            match protocol::serve(&mut conn.stream, &mut self.chunk, &mut self.reply) {
                Ok(count) => {
                    self.stats.replies += 1;
                    debug!(slot, count, "Replied");
                }
                Err(e) => self.close_connection(slot, e),
            }
        }
    }

    fn close_connection(&mut self, slot: usize, reason: ConnectionError) {
        if let Some(conn) = self.table.remove(slot) {
            self.stats.disconnected += 1;
            match reason {
                ConnectionError::Closed => {
                    info!(slot, peer = ?conn.peer, "Client disconnected");
                }
                e => {
                    info!(slot, peer = ?conn.peer, error = %e, "Client disconnected");
                }
            }
        }
    }

    fn teardown(mut self) -> ServerStats {
        let open = self.table.drain();
        info!(connections = open.len(), "Shutting down");
        drop(open);

        let Server {
            listener, stats, ..
        } = self;
        drop(listener);

        info!(
            accepted = stats.accepted,
            rejected = stats.rejected,
            disconnected = stats.disconnected,
            replies = stats.replies,
            "Server stopped"
        );
        stats
    }
}
