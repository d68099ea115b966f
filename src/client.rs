//! Interactive line-mode client.
//!
//! Sends one line of input at a time and prints the count the server sends
//! back. The client is a plain protocol consumer; it never interprets the
//! payload itself.

use crate::protocol::{parse_reply, ReplyParse};
use bytes::{Buf, BytesMut};
use std::io::{self, BufRead, Read, Write};
use std::net::TcpStream;
use thiserror::Error;
use tracing::debug;

/// Errors seen by protocol consumers.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the connection before replying, e.g. because it
    /// was at capacity.
    #[error("connection closed by server")]
    Closed,

    #[error("invalid reply: {0:?}")]
    InvalidReply(String),

    #[error("timed out waiting for reply")]
    Timeout,
}

/// Blocking connection to a word-count server.
pub struct Client {
    stream: TcpStream,
    /// Received bytes not yet consumed as a reply.
    pending: BytesMut,
}

impl Client {
    pub fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).map_err(|source| ClientError::Connect {
            addr: addr.to_string(),
            source,
        })?;

        Ok(Self {
            stream,
            pending: BytesMut::with_capacity(64),
        })
    }

    /// Send `payload` and wait for one reply.
    pub fn count(&mut self, payload: &[u8]) -> Result<usize, ClientError> {
        self.stream.write_all(payload)?;
        self.read_reply()
    }

    /// Read the next reply from the connection.
    pub fn read_reply(&mut self) -> Result<usize, ClientError> {
        let mut buf = [0u8; 256];
        loop {
            match parse_reply(&self.pending) {
                ReplyParse::Complete { count, consumed } => {
                    self.pending.advance(consumed);
                    return Ok(count);
                }
                ReplyParse::Invalid => {
                    let text = String::from_utf8_lossy(&self.pending).into_owned();
                    self.pending.clear();
                    return Err(ClientError::InvalidReply(text));
                }
                ReplyParse::Incomplete => {}
            }

            let n = self.stream.read(&mut buf)?;
            if n == 0 {
                return Err(ClientError::Closed);
            }
            self.pending.extend_from_slice(&buf[..n]);
        }
    }
}

/// Forward each line of `input` to the server and print the counts.
///
/// Returns the number of lines sent. Stops at end of input.
pub fn run_interactive<R: BufRead, W: Write>(
    client: &mut Client,
    mut input: R,
    mut output: W,
) -> Result<usize, ClientError> {
    let mut line = String::new();
    let mut sent = 0;

    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }

        let count = client.count(line.as_bytes())?;
        sent += 1;
        debug!(bytes = line.len(), count, "Line counted");
        writeln!(output, "Word count: {count}")?;
    }

    Ok(sent)
}
