//! Buffered batch delivery of records to the time-series store.
//!
//! One sink instance exclusively owns one partition's pending-record
//! buffer. Writes are awaited inline with the enqueue that triggered
//! them, which is the pipeline's backpressure mechanism: while a flush is
//! in flight no further input is accepted.

pub mod checkpoint;
pub mod http;

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::point::{Point, Record};

use self::checkpoint::CheckpointStore;

/// Elapsed time since the last successful flush after which a non-empty
/// buffer is flushed regardless of size.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// One record the store refused, with its position in the submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
}

/// Outcome of a failed batch write.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The store accepted the call but refused specific records.
    #[error("store rejected {} record(s)", .0.len())]
    Rejected(Vec<RejectedRecord>),

    /// The call itself failed: timeout, throttling, transport error.
    #[error("transmission failed: {0}")]
    Transport(#[source] anyhow::Error),
}

/// One batched write call.
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    pub database: &'a str,
    pub table: &'a str,
    pub records: &'a [Record],
}

/// Client for the store's write API.
///
/// Retry and backoff policy live behind this seam; the sink itself never
/// retries a batch.
pub trait StoreWriter: Send {
    /// Submits one bounded batch.
    fn write(
        &self,
        request: WriteRequest<'_>,
    ) -> impl Future<Output = Result<(), WriteError>> + Send;
}

/// Accumulates records and writes them out in FIFO batches.
pub struct BufferedBatchSink<W> {
    writer: W,
    database: String,
    table: String,
    batch_size: usize,
    buffer: VecDeque<Record>,
    /// Advances only when a batch write fully succeeds.
    last_flush: Instant,
}

impl<W: StoreWriter> BufferedBatchSink<W> {
    /// Creates a sink writing to `database`/`table` in batches of
    /// `batch_size` records.
    pub fn new(
        writer: W,
        database: impl Into<String>,
        table: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            writer,
            database: database.into(),
            table: table.into(),
            batch_size: batch_size.max(1),
            buffer: VecDeque::new(),
            last_flush: Instant::now(),
        }
    }

    /// Number of records awaiting transmission.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends the points to the buffer and evaluates the flush decision.
    pub async fn enqueue(&mut self, points: Vec<Point>) {
        self.enqueue_at(points, Instant::now()).await;
    }

    /// Deterministic variant of [`enqueue`](Self::enqueue) for callers
    /// that track their own clock.
    pub async fn enqueue_at(&mut self, points: Vec<Point>, now: Instant) {
        for point in points {
            self.buffer.push_back(point.to_record());
        }

        if self.buffer.is_empty() {
            return;
        }

        // Size trigger first, then the interval trigger.
        if self.buffer.len() >= self.batch_size {
            debug!(buffered = self.buffer.len(), "buffer reached batch size, flushing");
            self.flush(now).await;
        } else if now.duration_since(self.last_flush) >= FLUSH_INTERVAL {
            debug!(buffered = self.buffer.len(), "flush interval elapsed, flushing");
            self.flush(now).await;
        }
    }

    /// Drains whatever is buffered, regardless of the flush triggers.
    /// Called on shutdown so pending records are not left to the next
    /// restore.
    pub async fn flush_remaining(&mut self) {
        self.flush(Instant::now()).await;
    }

    /// Drains the buffer in FIFO chunks of at most `batch_size`, one
    /// write call per chunk.
    ///
    /// Every drained chunk leaves the buffer for good: a rejected or
    /// failed batch is logged and dropped rather than re-enqueued, so a
    /// poison record can never stall the partition.
    async fn flush(&mut self, now: Instant) {
        while !self.buffer.is_empty() {
            let take = self.batch_size.min(self.buffer.len());
            let chunk: Vec<Record> = self.buffer.drain(..take).collect();

            let outcome = self
                .writer
                .write(WriteRequest {
                    database: &self.database,
                    table: &self.table,
                    records: &chunk,
                })
                .await;

            match outcome {
                Ok(()) => {
                    self.last_flush = now;
                    debug!(records = chunk.len(), "batch written");
                }
                Err(WriteError::Rejected(rejected)) => {
                    warn!(
                        rejected = rejected.len(),
                        discarded = chunk.len(),
                        "store rejected records, discarding batch",
                    );
                    for record in &rejected {
                        warn!(index = record.index, reason = %record.reason, "rejected record");
                    }
                }
                Err(WriteError::Transport(err)) => {
                    error!(
                        error = %err,
                        discarded = chunk.len(),
                        "batch write failed, discarding batch",
                    );
                }
            }
        }
    }

    /// Replaces the persisted mirror with the current buffer contents.
    ///
    /// The mirror is rebuilt from an immutable copy, so a snapshot always
    /// reflects a consistent buffer state.
    pub fn snapshot(&self, store: &mut impl CheckpointStore) -> anyhow::Result<()> {
        let records: Vec<Record> = self.buffer.iter().cloned().collect();
        store.persist(&records)
    }

    /// Repopulates the buffer from the persisted mirror, if one exists.
    /// Restored records precede anything already buffered.
    pub fn restore(&mut self, store: &mut impl CheckpointStore) -> anyhow::Result<()> {
        let Some(records) = store.load()? else {
            return Ok(());
        };

        debug!(records = records.len(), "restoring pending records from checkpoint");
        let mut restored: VecDeque<Record> = records.into();
        restored.extend(self.buffer.drain(..));
        self.buffer = restored;
        Ok(())
    }
}
