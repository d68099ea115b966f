//! Bounded connection table.
//!
//! Every slot holds one composite record: the client stream together with
//! the readiness bit the multiplexer wrote for the current iteration. Keeping
//! both in one record means a disconnect can never leave the interest
//! bookkeeping pointing at a different client than the handle.

use slab::Slab;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use thiserror::Error;

/// The table is full; the offered connection was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection table full ({capacity} clients)")]
pub struct CapacityExceeded {
    pub capacity: usize,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    /// Client socket.
    pub stream: S,
    /// Remote address, when the transport has one.
    pub peer: Option<SocketAddr>,
    /// Readable in the current iteration's readiness snapshot.
    readable: bool,
}

impl<S> Connection<S> {
    /// Create a connection that has not been reported readable yet.
    pub fn new(stream: S, peer: Option<SocketAddr>) -> Self {
        Self {
            stream,
            peer,
            readable: false,
        }
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }
}

/// Registry of active connections using slab allocation.
///
/// Vacant slots are tracked by the slab and reused by later inserts.
/// Iteration follows slot index order.
pub struct ConnectionTable<S> {
    connections: Slab<Connection<S>>,
    max_connections: usize,
}

impl<S: AsRawFd> ConnectionTable<S> {
    /// Create a new table with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Occupy a free slot with `conn`.
    ///
    /// When the table is full the connection is dropped, which closes it.
    pub fn insert(&mut self, conn: Connection<S>) -> Result<usize, CapacityExceeded> {
        if self.is_full() {
            return Err(CapacityExceeded {
                capacity: self.max_connections,
            });
        }
        debug_assert!(
            !self.contains_fd(conn.stream.as_raw_fd()),
            "descriptor already active"
        );
        Ok(self.connections.insert(conn))
    }

    /// Empty a slot, returning its connection.
    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        self.connections.try_remove(id)
    }

    /// Empty every slot. Dropping the returned connections closes them.
    pub fn drain(&mut self) -> Vec<Connection<S>> {
        self.connections.drain().collect()
    }

    pub fn get(&self, id: usize) -> Option<&Connection<S>> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    fn contains_fd(&self, fd: RawFd) -> bool {
        self.connections
            .iter()
            .any(|(_, conn)| conn.stream.as_raw_fd() == fd)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// `(slot, descriptor)` for every active connection, in table order.
    pub fn interest(&self) -> impl Iterator<Item = (usize, RawFd)> + '_ {
        self.connections
            .iter()
            .map(|(id, conn)| (id, conn.stream.as_raw_fd()))
    }

    /// Forget the previous iteration's readiness snapshot.
    pub fn clear_readiness(&mut self) {
        for (_, conn) in self.connections.iter_mut() {
            conn.readable = false;
        }
    }

    /// Record that slot `id` is readable in this iteration.
    pub fn mark_readable(&mut self, id: usize) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.readable = true;
        }
    }

    /// Slots found readable by the last wait, in table order.
    pub fn readable(&self) -> Vec<usize> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.readable)
            .map(|(id, _)| id)
            .collect()
    }
}
