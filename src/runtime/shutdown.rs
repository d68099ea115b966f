//! Cooperative shutdown.
//!
//! The signal handler stores `true` into an atomic flag and writes a byte to
//! a wake socket. The event loop polls the flag at the top of every
//! iteration and keeps the wake socket in its interest set, so a request
//! that lands just before the loop blocks still ends the wait.

use signal_hook::consts::{SIGINT, SIGTERM};
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Cancellation token shared between the signal context and the loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    wake: Arc<WakePair>,
}

/// Self-pipe: readable once shutdown has been requested.
#[derive(Debug)]
struct WakePair {
    reader: UnixStream,
    writer: UnixStream,
}

impl Shutdown {
    /// Create a token that only trips via [`Shutdown::request`].
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;

        Ok(Self {
            requested: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(WakePair { reader, writer }),
        })
    }

    /// Create a token tripped by SIGINT or SIGTERM.
    pub fn install() -> io::Result<Self> {
        let shutdown = Self::new()?;
        for signal in [SIGINT, SIGTERM] {
            // Flag first, so the loop sees it once the wake byte arrives
            signal_hook::flag::register(signal, Arc::clone(&shutdown.requested))?;
            signal_hook::low_level::pipe::register(signal, shutdown.wake.writer.try_clone()?)?;
            debug!(signal, "Installed shutdown handler");
        }
        Ok(shutdown)
    }

    /// Ask the loop to stop at its next iteration boundary.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // A full socket already holds a wake byte
        let _ = (&self.wake.writer).write(&[1]);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Descriptor that becomes readable when shutdown is requested.
    pub fn wake_fd(&self) -> RawFd {
        self.wake.reader.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_request_is_shared_by_clones() {
        let shutdown = Shutdown::new().unwrap();
        let observer = shutdown.clone();
        assert!(!observer.is_requested());

        shutdown.request();
        assert!(observer.is_requested());
    }

    #[test]
    fn test_request_makes_wake_fd_readable() {
        let shutdown = Shutdown::new().unwrap();
        let mut buf = [0u8; 8];

        let err = (&shutdown.wake.reader).read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        shutdown.request();
        shutdown.request();
        assert_eq!((&shutdown.wake.reader).read(&mut buf).unwrap(), 2);
    }
}
