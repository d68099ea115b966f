//! Word-count protocol.
//!
//! The request side has no framing: whatever one `read` returns is one
//! chunk. The server counts the delimiter bytes (space, tab, newline) in that
//! chunk and replies with the count as ASCII decimal followed by `\n`.
//!
//! ```text
//! Chunk:  a b c\n
//! Reply:  3\n
//! ```
//!
//! Counts are per read. A message split across reads gets one reply per
//! piece, and several messages arriving in one read get a single reply.

use bytes::{BufMut, BytesMut};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Bytes that separate words.
pub const DELIMITERS: [u8; 3] = [b' ', b'\t', b'\n'];

/// Reply terminator.
pub const TERMINATOR: u8 = b'\n';

/// A connection-local failure. The slot is reclaimed; no other connection
/// is affected.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer closed its write side.
    #[error("connection closed by peer")]
    Closed,

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

/// Number of delimiter bytes in `chunk`.
pub fn count_delimiters(chunk: &[u8]) -> usize {
    chunk.iter().filter(|&b| DELIMITERS.contains(b)).count()
}

/// Append the reply for `count` to `out`.
pub fn encode_reply(count: usize, out: &mut BytesMut) {
    out.put_slice(count.to_string().as_bytes());
    out.put_u8(TERMINATOR);
}

/// Result of scanning received bytes for a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyParse {
    /// A full reply, with bytes consumed including the terminator.
    Complete { count: usize, consumed: usize },
    /// No terminator yet.
    Incomplete,
    /// Terminated, but not a decimal number.
    Invalid,
}

/// Parse one reply from the front of `input`.
pub fn parse_reply(input: &[u8]) -> ReplyParse {
    let Some(end) = input.iter().position(|&b| b == TERMINATOR) else {
        return ReplyParse::Incomplete;
    };

    let digits = &input[..end];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return ReplyParse::Invalid;
    }

    match std::str::from_utf8(digits).ok().and_then(|s| s.parse().ok()) {
        Some(count) => ReplyParse::Complete {
            count,
            consumed: end + 1,
        },
        None => ReplyParse::Invalid,
    }
}

/// Service one readable connection.
///
/// Performs a single read into `chunk`. End-of-stream and read errors are
/// both reported as errors so the caller closes the slot. On data, the reply
/// is staged in `reply` and written until complete; the socket is blocking,
/// so a peer that stops reading stalls the caller here.
///
/// Returns the delimiter count that was sent.
pub fn serve<S: Read + Write>(
    stream: &mut S,
    chunk: &mut [u8],
    reply: &mut BytesMut,
) -> Result<usize, ConnectionError> {
    let n = loop {
        match stream.read(chunk) {
            Ok(0) => return Err(ConnectionError::Closed),
            Ok(n) => break n,
            // EINTR before any data arrived; the data is still there
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ConnectionError::Read(e)),
        }
    };

    let count = count_delimiters(&chunk[..n]);

    reply.clear();
    encode_reply(count, reply);
    stream.write_all(&reply[..]).map_err(ConnectionError::Write)?;

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory stream: reads from `input` once `read_errors` are used up,
    /// accepts at most `max_write` bytes per write call.
    struct MockStream {
        input: Cursor<Vec<u8>>,
        read_errors: Vec<io::ErrorKind>,
        output: Vec<u8>,
        max_write: usize,
        write_calls: usize,
        fail_writes: bool,
    }

    impl MockStream {
        fn new(input: &[u8]) -> Self {
            Self {
                input: Cursor::new(input.to_vec()),
                read_errors: Vec::new(),
                output: Vec::new(),
                max_write: usize::MAX,
                write_calls: 0,
                fail_writes: false,
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.read_errors.is_empty() {
                return Err(io::Error::from(self.read_errors.remove(0)));
            }
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.write_calls += 1;
            if self.fail_writes {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            let n = buf.len().min(self.max_write);
            self.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_count_delimiters() {
        assert_eq!(count_delimiters(b"a b c\n"), 3);
        assert_eq!(count_delimiters(b"hello world\n"), 2);
        assert_eq!(count_delimiters(b"a\tb\tc\td\n"), 4);
        assert_eq!(count_delimiters(b"word"), 0);
        assert_eq!(count_delimiters(b"   "), 3);
        // Carriage returns are not delimiters
        assert_eq!(count_delimiters(b"a\r\nb"), 1);
    }

    #[test]
    fn test_encode_reply() {
        let mut out = BytesMut::new();
        encode_reply(0, &mut out);
        encode_reply(1234, &mut out);
        assert_eq!(&out[..], b"0\n1234\n");
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(
            parse_reply(b"42\nrest"),
            ReplyParse::Complete {
                count: 42,
                consumed: 3
            }
        );
        assert_eq!(parse_reply(b"42"), ReplyParse::Incomplete);
        assert_eq!(parse_reply(b""), ReplyParse::Incomplete);
        assert_eq!(parse_reply(b"\n"), ReplyParse::Invalid);
        assert_eq!(parse_reply(b"-1\n"), ReplyParse::Invalid);
        assert_eq!(parse_reply(b"4 2\n"), ReplyParse::Invalid);
    }

    #[test]
    fn test_serve_replies_with_count() {
        let mut stream = MockStream::new(b"hello world\n");
        let mut chunk = [0u8; 1024];
        let mut reply = BytesMut::new();

        let count = serve(&mut stream, &mut chunk, &mut reply).unwrap();
        assert_eq!(count, 2);
        assert_eq!(stream.output, b"2\n");
    }

    #[test]
    fn test_serve_counts_single_read_only() {
        // A 4-byte chunk sees "a b " of "a b c d\n"
        let mut stream = MockStream::new(b"a b c d\n");
        let mut chunk = [0u8; 4];
        let mut reply = BytesMut::new();

        assert_eq!(serve(&mut stream, &mut chunk, &mut reply).unwrap(), 2);
        assert_eq!(serve(&mut stream, &mut chunk, &mut reply).unwrap(), 2);
        assert_eq!(stream.output, b"2\n2\n");
    }

    #[test]
    fn test_serve_eof_is_closed() {
        let mut stream = MockStream::new(b"");
        let mut chunk = [0u8; 16];
        let mut reply = BytesMut::new();

        assert!(matches!(
            serve(&mut stream, &mut chunk, &mut reply),
            Err(ConnectionError::Closed)
        ));
        assert!(stream.output.is_empty());
    }

    #[test]
    fn test_serve_read_error() {
        let mut stream = MockStream::new(b"never read\n");
        stream.read_errors.push(io::ErrorKind::ConnectionReset);
        let mut chunk = [0u8; 16];
        let mut reply = BytesMut::new();

        match serve(&mut stream, &mut chunk, &mut reply) {
            Err(ConnectionError::Read(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::ConnectionReset)
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(stream.output.is_empty());
        assert_eq!(stream.write_calls, 0);
    }

    #[test]
    fn test_serve_retries_interrupted_read() {
        let mut stream = MockStream::new(b"a b\n");
        stream.read_errors.push(io::ErrorKind::Interrupted);
        let mut chunk = [0u8; 16];
        let mut reply = BytesMut::new();

        assert_eq!(serve(&mut stream, &mut chunk, &mut reply).unwrap(), 2);
        assert_eq!(stream.output, b"2\n");
    }

    #[test]
    fn test_serve_finishes_partial_writes() {
        let mut stream = MockStream::new(&[b' '; 12345]);
        stream.max_write = 1;
        let mut chunk = [0u8; 16384];
        let mut reply = BytesMut::new();

        assert_eq!(serve(&mut stream, &mut chunk, &mut reply).unwrap(), 12345);
        assert_eq!(stream.output, b"12345\n");
        assert_eq!(stream.write_calls, 6);
    }

    #[test]
    fn test_serve_write_failure() {
        let mut stream = MockStream::new(b"a b\n");
        stream.fail_writes = true;
        let mut chunk = [0u8; 16];
        let mut reply = BytesMut::new();

        assert!(matches!(
            serve(&mut stream, &mut chunk, &mut reply),
            Err(ConnectionError::Write(_))
        ));
    }
}
