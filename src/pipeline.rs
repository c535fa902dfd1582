//! Per-partition wiring of the three processing stages.
//!
//! One pipeline instance owns one partition's sink; partitions scale by
//! running independent pipelines, never by sharing buffer state.

use std::time::Instant;

use chrono::Utc;
use tracing::warn;

use crate::correct;
use crate::sink::checkpoint::CheckpointStore;
use crate::sink::{BufferedBatchSink, StoreWriter};
use crate::transform;

/// transform → correct → sink for one partition.
pub struct Pipeline<W> {
    sink: BufferedBatchSink<W>,
}

impl<W: StoreWriter> Pipeline<W> {
    pub fn new(sink: BufferedBatchSink<W>) -> Self {
        Self { sink }
    }

    /// Processes one raw event end to end.
    ///
    /// A malformed event is logged and dropped; every other event reaches
    /// the sink, including ones that map to zero points, so the sink's
    /// flush decision is still evaluated.
    pub async fn handle_event(&mut self, raw: &str) {
        self.handle_event_at(raw, Utc::now().timestamp_millis(), Instant::now())
            .await;
    }

    /// Deterministic variant of [`handle_event`](Self::handle_event).
    /// `processing_time_ms` serves as both the transformer's wall clock
    /// and the corrector's logical time.
    pub async fn handle_event_at(&mut self, raw: &str, processing_time_ms: i64, now: Instant) {
        let points = match transform::transform_at(raw, processing_time_ms) {
            Ok(points) => points,
            Err(err) => {
                warn!(error = %err, "dropping malformed event");
                return;
            }
        };

        let corrected =
            correct::clamp_future_points_at(points, processing_time_ms, processing_time_ms);
        self.sink.enqueue_at(corrected, now).await;
    }

    /// Records awaiting transmission in this partition's sink.
    pub fn buffered(&self) -> usize {
        self.sink.buffered()
    }

    /// Drains the sink regardless of its flush triggers.
    pub async fn flush_remaining(&mut self) {
        self.sink.flush_remaining().await;
    }

    /// Mirrors the sink's pending buffer into the checkpoint store.
    pub fn snapshot(&self, store: &mut impl CheckpointStore) -> anyhow::Result<()> {
        self.sink.snapshot(store)
    }

    /// Repopulates the sink's buffer from a persisted mirror.
    pub fn restore(&mut self, store: &mut impl CheckpointStore) -> anyhow::Result<()> {
        self.sink.restore(store)
    }
}
