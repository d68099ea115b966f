//! Bitmask strategy built on `select(2)`.

use super::{wait_failed, MultiplexError, Readiness};
use crate::runtime::ConnectionTable;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use tracing::trace;

const FD_SETSIZE: usize = libc::FD_SETSIZE as usize;

/// `select(2)` multiplexer.
///
/// One bit per descriptor; the scan is bounded by the largest descriptor in
/// the set, which is recomputed with the set on every wait.
pub struct SelectMultiplexer {
    read_fds: libc::fd_set,
    max_fd: RawFd,
}

impl SelectMultiplexer {
    pub fn new() -> Self {
        Self {
            read_fds: empty_set(),
            max_fd: -1,
        }
    }

    /// Descriptors at or above `FD_SETSIZE` do not fit in the bitmask.
    pub fn can_watch(fd: RawFd) -> bool {
        fd >= 0 && (fd as usize) < FD_SETSIZE
    }

    /// Largest descriptor in the most recent interest set.
    #[cfg(test)]
    pub fn max_fd(&self) -> RawFd {
        self.max_fd
    }

    fn watch(&mut self, fd: RawFd) -> Result<(), MultiplexError> {
        if !Self::can_watch(fd) {
            return Err(MultiplexError::DescriptorTooLarge {
                fd,
                limit: FD_SETSIZE,
            });
        }
        // SAFETY: fd is within [0, FD_SETSIZE), the bounds of the set.
        unsafe { libc::FD_SET(fd, &mut self.read_fds) };
        self.max_fd = self.max_fd.max(fd);
        Ok(())
    }

    fn is_set(&self, fd: RawFd) -> bool {
        // SAFETY: only descriptors accepted by `watch` are queried.
        Self::can_watch(fd) && unsafe { libc::FD_ISSET(fd, &self.read_fds) }
    }

    pub(super) fn wait<S: AsRawFd>(
        &mut self,
        listener: RawFd,
        wake: RawFd,
        table: &mut ConnectionTable<S>,
    ) -> Result<Readiness, MultiplexError> {
        // Rebuild from scratch: slots may have changed since the last wait
        self.read_fds = empty_set();
        self.max_fd = -1;

        self.watch(listener)?;
        self.watch(wake)?;
        for (_, fd) in table.interest() {
            self.watch(fd)?;
        }

        trace!(max_fd = self.max_fd, watched = table.len() + 2, "select");

        // SAFETY: read_fds is initialized and outlives the call; the other
        // sets and the timeout are null, so select blocks indefinitely.
        let ret = unsafe {
            libc::select(
                self.max_fd + 1,
                &mut self.read_fds,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if ret < 0 {
            return wait_failed();
        }

        let ready: Vec<usize> = table
            .interest()
            .filter(|&(_, fd)| self.is_set(fd))
            .map(|(id, _)| id)
            .collect();
        for id in ready {
            table.mark_readable(id);
        }

        Ok(Readiness::Ready {
            listener: self.is_set(listener),
            wake: self.is_set(wake),
        })
    }
}

impl Default for SelectMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

fn empty_set() -> libc::fd_set {
    // SAFETY: fd_set is plain data; FD_ZERO puts it in its canonical empty
    // state.
    unsafe {
        let mut set: libc::fd_set = std::mem::zeroed();
        libc::FD_ZERO(&mut set);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Connection;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_max_fd_tracks_largest_descriptor() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let (wake, _wake_writer) = UnixStream::pair().unwrap();
        let mut table = ConnectionTable::new(4);
        let mut remotes = Vec::new();
        let mut largest = listener.as_raw_fd().max(wake.as_raw_fd());
        for _ in 0..4 {
            let (local, mut remote) = UnixStream::pair().unwrap();
            largest = largest.max(local.as_raw_fd());
            std::io::Write::write_all(&mut remote, b"x").unwrap();
            table.insert(Connection::new(local, None)).unwrap();
            remotes.push(remote);
        }

        let mut mux = SelectMultiplexer::new();
        mux.wait(listener.as_raw_fd(), wake.as_raw_fd(), &mut table).unwrap();
        assert_eq!(mux.max_fd(), largest);

        // Dropping the largest descriptor shrinks the bound on the next wait
        let (top, _) = table
            .interest()
            .max_by_key(|&(_, fd)| fd)
            .unwrap();
        table.remove(top);
        mux.wait(listener.as_raw_fd(), wake.as_raw_fd(), &mut table).unwrap();
        assert!(mux.max_fd() < largest);
    }
}
