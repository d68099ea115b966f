//! Event-array strategy built on `poll(2)`.

use super::{wait_failed, MultiplexError, Readiness};
use crate::runtime::ConnectionTable;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::trace;

/// Returned events that make a descriptor worth reading. Hang-ups and
/// errors are included so the following read observes them and the slot is
/// reclaimed.
const READABLE: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

/// `poll(2)` multiplexer.
///
/// Entry 0 is the listener and entry 1 the wake descriptor; entries 2..
/// follow the connection table's iteration order, which cannot change while
/// the wait holds the table.
pub struct PollMultiplexer {
    fds: Vec<libc::pollfd>,
}

impl PollMultiplexer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fds: Vec::with_capacity(capacity + 2),
        }
    }

    pub(super) fn wait<S: AsRawFd>(
        &mut self,
        listener: RawFd,
        wake: RawFd,
        table: &mut ConnectionTable<S>,
    ) -> Result<Readiness, MultiplexError> {
        // Rebuild from scratch: slots may have changed since the last wait
        self.fds.clear();
        self.fds.push(interest(listener));
        self.fds.push(interest(wake));
        self.fds.extend(table.interest().map(|(_, fd)| interest(fd)));

        trace!(watched = self.fds.len(), "poll");

        // SAFETY: the pointer and length describe the initialized entries of
        // `fds`, which is not touched again until poll returns. A negative
        // timeout blocks indefinitely.
        let ret = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                -1,
            )
        };
        if ret < 0 {
            return wait_failed();
        }

        let ready: Vec<usize> = table
            .interest()
            .zip(&self.fds[2..])
            .filter(|((_, fd), entry)| {
                debug_assert_eq!(*fd, entry.fd, "poll entry out of step with table");
                entry.revents & READABLE != 0
            })
            .map(|((id, _), _)| id)
            .collect();
        for id in ready {
            table.mark_readable(id);
        }

        Ok(Readiness::Ready {
            listener: self.fds[0].revents & READABLE != 0,
            wake: self.fds[1].revents & READABLE != 0,
        })
    }
}

fn interest(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}
