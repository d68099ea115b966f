//! Readiness multiplexing.
//!
//! Both strategies rebuild their interest set from the listener, the
//! shutdown wake descriptor and the connection table on every call and block
//! without a timeout. They only
//! differ in the primitive:
//! - `select`: bitmask interest set bounded by `FD_SETSIZE`
//! - `poll`: array of `pollfd` entries, one per active slot plus the listener
//!   and the wake descriptor
//!
//! A wait interrupted by a signal is not an error; it returns
//! [`Readiness::Interrupted`] so the event loop can re-check its shutdown flag.

mod poll;
mod select;

pub use poll::PollMultiplexer;
pub use select::SelectMultiplexer;

use crate::config::MultiplexerKind;
use crate::runtime::ConnectionTable;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use thiserror::Error;

/// Outcome of one readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one descriptor is readable. Readable slots are flagged in
    /// the connection table.
    Ready { listener: bool, wake: bool },
    /// A signal arrived before anything became readable.
    Interrupted,
}

/// The wait failed for a reason other than signal delivery.
#[derive(Debug, Error)]
pub enum MultiplexError {
    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),

    /// The descriptor cannot be represented in the interest set.
    #[error("descriptor {fd} exceeds the interest set limit of {limit}")]
    DescriptorTooLarge { fd: RawFd, limit: usize },
}

/// Readiness strategy selected at startup.
pub enum Multiplexer {
    Select(SelectMultiplexer),
    Poll(PollMultiplexer),
}

impl Multiplexer {
    /// Create a multiplexer sized for `capacity` client connections.
    pub fn new(kind: MultiplexerKind, capacity: usize) -> Self {
        match kind {
            MultiplexerKind::Select => Multiplexer::Select(SelectMultiplexer::new()),
            MultiplexerKind::Poll => Multiplexer::Poll(PollMultiplexer::with_capacity(capacity)),
        }
    }

    pub fn kind(&self) -> MultiplexerKind {
        match self {
            Multiplexer::Select(_) => MultiplexerKind::Select,
            Multiplexer::Poll(_) => MultiplexerKind::Poll,
        }
    }

    /// Whether `fd` can be part of the interest set at all.
    pub fn can_watch(&self, fd: RawFd) -> bool {
        match self {
            Multiplexer::Select(_) => SelectMultiplexer::can_watch(fd),
            Multiplexer::Poll(_) => fd >= 0,
        }
    }

    /// Block until the listener, the wake descriptor or an active slot is
    /// readable.
    ///
    /// The previous snapshot is cleared first, so after an error or an
    /// interrupted wait no slot is reported readable.
    pub fn wait<S: AsRawFd>(
        &mut self,
        listener: RawFd,
        wake: RawFd,
        table: &mut ConnectionTable<S>,
    ) -> Result<Readiness, MultiplexError> {
        table.clear_readiness();

        match self {
            Multiplexer::Select(mux) => mux.wait(listener, wake, table),
            Multiplexer::Poll(mux) => mux.wait(listener, wake, table),
        }
    }
}

/// Map a failed wait syscall to its outcome.
fn wait_failed() -> Result<Readiness, MultiplexError> {
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::Interrupted {
        Ok(Readiness::Interrupted)
    } else {
        Err(MultiplexError::Wait(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Connection;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::AtomicBool;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    const KINDS: [MultiplexerKind; 2] = [MultiplexerKind::Select, MultiplexerKind::Poll];

    struct Fixture {
        listener: TcpListener,
        wake: (UnixStream, UnixStream),
    }

    impl Fixture {
        fn wait(
            &self,
            mux: &mut Multiplexer,
            table: &mut ConnectionTable<UnixStream>,
        ) -> Result<Readiness, MultiplexError> {
            mux.wait(self.listener.as_raw_fd(), self.wake.0.as_raw_fd(), table)
        }
    }

    fn setup(clients: usize) -> (Fixture, ConnectionTable<UnixStream>, Vec<UnixStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let wake = UnixStream::pair().unwrap();
        let mut table = ConnectionTable::new(clients);
        let mut remotes = Vec::new();
        for _ in 0..clients {
            let (local, remote) = UnixStream::pair().unwrap();
            table.insert(Connection::new(local, None)).unwrap();
            remotes.push(remote);
        }
        (Fixture { listener, wake }, table, remotes)
    }

    #[test]
    fn test_readable_slot_reported() {
        for kind in KINDS {
            let (fx, mut table, mut remotes) = setup(3);
            let mut mux = Multiplexer::new(kind, 3);
            remotes[1].write_all(b"hello world\n").unwrap();

            let readiness = fx.wait(&mut mux, &mut table).unwrap();
            assert_eq!(
                readiness,
                Readiness::Ready {
                    listener: false,
                    wake: false
                },
                "{kind:?}"
            );
            assert_eq!(table.readable(), vec![1], "{kind:?}");
        }
    }

    #[test]
    fn test_listener_readable_on_connect() {
        for kind in KINDS {
            let (fx, mut table, _remotes) = setup(1);
            let mut mux = Multiplexer::new(kind, 1);
            let _client = TcpStream::connect(fx.listener.local_addr().unwrap()).unwrap();

            let readiness = fx.wait(&mut mux, &mut table).unwrap();
            assert_eq!(
                readiness,
                Readiness::Ready {
                    listener: true,
                    wake: false
                },
                "{kind:?}"
            );
            assert!(table.readable().is_empty(), "{kind:?}");
        }
    }

    #[test]
    fn test_wake_descriptor_ends_wait() {
        for kind in KINDS {
            let (mut fx, mut table, _remotes) = setup(2);
            let mut mux = Multiplexer::new(kind, 2);
            fx.wake.1.write_all(&[1]).unwrap();

            let readiness = fx.wait(&mut mux, &mut table).unwrap();
            assert_eq!(
                readiness,
                Readiness::Ready {
                    listener: false,
                    wake: true
                },
                "{kind:?}"
            );
            assert!(table.readable().is_empty(), "{kind:?}");
        }
    }

    #[test]
    fn test_hangup_is_readable() {
        for kind in KINDS {
            let (fx, mut table, mut remotes) = setup(2);
            let mut mux = Multiplexer::new(kind, 2);
            drop(remotes.remove(0));

            fx.wait(&mut mux, &mut table).unwrap();
            assert_eq!(table.readable(), vec![0], "{kind:?}");
        }
    }

    #[test]
    fn test_interest_rebuilt_after_removal() {
        for kind in KINDS {
            let (fx, mut table, mut remotes) = setup(3);
            let mut mux = Multiplexer::new(kind, 3);

            remotes[0].write_all(b"a").unwrap();
            remotes[2].write_all(b"b").unwrap();
            fx.wait(&mut mux, &mut table).unwrap();
            assert_eq!(table.readable(), vec![0, 2], "{kind:?}");

            // Slot 0 goes away; its pending data must not leak into the
            // next snapshot
            table.remove(0);
            fx.wait(&mut mux, &mut table).unwrap();
            assert_eq!(table.readable(), vec![2], "{kind:?}");
        }
    }

    #[test]
    fn test_select_descriptor_limit() {
        let mux = Multiplexer::new(MultiplexerKind::Select, 1);
        assert!(mux.can_watch(0));
        assert!(!mux.can_watch(libc::FD_SETSIZE as RawFd));
        assert!(!mux.can_watch(-1));

        let mux = Multiplexer::new(MultiplexerKind::Poll, 1);
        assert!(mux.can_watch(libc::FD_SETSIZE as RawFd));
    }

    #[test]
    fn test_signal_interrupts_wait() {
        let delivered = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(libc::SIGUSR1, Arc::clone(&delivered)).unwrap();

        for kind in KINDS {
            let (tx, rx) = mpsc::channel();
            let waiter = thread::spawn(move || {
                let (fx, mut table, _remotes) = setup(1);
                let mut mux = Multiplexer::new(kind, 1);
                tx.send(unsafe { libc::pthread_self() } as usize).unwrap();
                fx.wait(&mut mux, &mut table)
            });

            let thread_id = rx.recv().unwrap();
            // The signal may land before the waiter blocks; keep poking it
            while !waiter.is_finished() {
                unsafe { libc::pthread_kill(thread_id as libc::pthread_t, libc::SIGUSR1) };
                thread::sleep(Duration::from_millis(20));
            }

            let readiness = waiter.join().unwrap().unwrap();
            assert_eq!(readiness, Readiness::Interrupted, "{kind:?}");
        }
    }
}
