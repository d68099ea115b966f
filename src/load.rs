//! Load generator.
//!
//! Workers repeatedly open a fresh connection, send a fixed payload, wait
//! for the count, and close. Every attempt appends one CSV row to the
//! results log:
//!
//! ```text
//! timestamp,elapsed_us,reply_bytes,count
//! 2026-10-19T12:00:00.000000Z,182,2,41
//! ```
//!
//! Refused connections and connections closed without a reply (the server
//! is at capacity) are counted as failures and do not stop the run.

use crate::client::ClientError;
use crate::protocol::{parse_reply, ReplyParse};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Largest payload read from the data file.
pub const MAX_PAYLOAD: usize = 1024;

/// Settings for one load run.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub server: String,
    pub payload: Bytes,
    pub duration: Duration,
    pub workers: usize,
    pub log: PathBuf,
    /// Upper bound on a single connect/send/reply exchange.
    pub attempt_timeout: Duration,
}

/// One successful exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub elapsed: Duration,
    pub reply_bytes: usize,
    pub count: usize,
}

impl Sample {
    /// The row appended to the results log, including the newline.
    pub fn csv_row(&self) -> String {
        format!(
            "{},{},{},{}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.elapsed.as_micros(),
            self.reply_bytes,
            self.count
        )
    }
}

/// Totals for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

impl LoadSummary {
    fn merge(&mut self, other: LoadSummary) {
        self.attempts += other.attempts;
        self.successes += other.successes;
        self.failures += other.failures;
    }
}

/// Read the payload: the first [`MAX_PAYLOAD`] bytes of `path`.
pub async fn read_payload(path: &std::path::Path) -> Result<Bytes, ClientError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = BytesMut::with_capacity(MAX_PAYLOAD);
    while buf.len() < MAX_PAYLOAD {
        let mut chunk = vec![0u8; MAX_PAYLOAD - buf.len()];
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf.freeze())
}

/// Connect, send `payload`, and wait for one reply.
pub async fn attempt(server: &str, payload: &[u8]) -> Result<Sample, ClientError> {
    let started = Instant::now();
    let mut stream = TcpStream::connect(server)
        .await
        .map_err(|source| ClientError::Connect {
            addr: server.to_string(),
            source,
        })?;
    stream.write_all(payload).await?;

    let mut received = BytesMut::with_capacity(32);
    loop {
        match parse_reply(&received) {
            ReplyParse::Complete { count, consumed } => {
                return Ok(Sample {
                    timestamp: Utc::now(),
                    elapsed: started.elapsed(),
                    reply_bytes: consumed,
                    count,
                });
            }
            ReplyParse::Invalid => {
                return Err(ClientError::InvalidReply(
                    String::from_utf8_lossy(&received).into_owned(),
                ));
            }
            ReplyParse::Incomplete => {}
        }

        if stream.read_buf(&mut received).await? == 0 {
            return Err(ClientError::Closed);
        }
    }
}

async fn worker(
    id: usize,
    config: Arc<LoadConfig>,
    deadline: Instant,
    rows: mpsc::Sender<Sample>,
) -> LoadSummary {
    let mut summary = LoadSummary::default();

    while Instant::now() < deadline {
        summary.attempts += 1;
        let outcome = tokio::time::timeout(
            config.attempt_timeout,
            attempt(&config.server, &config.payload),
        )
        .await
        .unwrap_or(Err(ClientError::Timeout));

        match outcome {
            Ok(sample) => {
                summary.successes += 1;
                if rows.send(sample).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                summary.failures += 1;
                debug!(worker = id, error = %e, "Attempt failed");
                // Back off briefly so a refusing server is not hammered
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    summary
}

/// Run the load test to completion.
pub async fn run(config: LoadConfig) -> Result<LoadSummary, ClientError> {
    if config.payload.is_empty() {
        return Err(ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "payload is empty; the server never replies to zero bytes",
        )));
    }

    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log)
        .await?;

    info!(
        server = %config.server,
        workers = config.workers,
        duration_secs = config.duration.as_secs_f64(),
        payload_bytes = config.payload.len(),
        log = %config.log.display(),
        "Starting load test"
    );

    let config = Arc::new(config);
    let deadline = Instant::now() + config.duration;
    let (tx, mut rx) = mpsc::channel::<Sample>(1024);

    let mut workers = Vec::with_capacity(config.workers);
    for id in 0..config.workers.max(1) {
        workers.push(tokio::spawn(worker(
            id,
            Arc::clone(&config),
            deadline,
            tx.clone(),
        )));
    }
    drop(tx);

    // Single writer keeps rows whole
    while let Some(sample) = rx.recv().await {
        log.write_all(sample.csv_row().as_bytes()).await?;
    }
    log.flush().await?;

    let mut summary = LoadSummary::default();
    for handle in workers {
        let worker_summary = handle
            .await
            .map_err(|e| ClientError::Io(std::io::Error::other(e)))?;
        summary.merge(worker_summary);
    }

    info!(
        attempts = summary.attempts,
        successes = summary.successes,
        failures = summary.failures,
        "Load test finished"
    );
    Ok(summary)
}
