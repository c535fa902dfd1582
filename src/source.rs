//! Local stand-in for the upstream stream connector.
//!
//! Replays newline-delimited JSON events from a file or stdin, strictly
//! in order, pacing reads the way the upstream consumer's knobs describe:
//! at most `getrecords_max` events per burst, one `getrecords_interval`
//! pause between bursts, no pacing at all under adaptive reads.

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SourceConfig;

/// Reads raw events and forwards them to the pipeline in arrival order.
pub struct EventSource {
    cfg: SourceConfig,
}

impl EventSource {
    pub fn new(cfg: SourceConfig) -> Self {
        Self { cfg }
    }

    /// Runs until the input ends, the receiver is dropped, or `cancel`
    /// fires.
    pub async fn run(self, tx: mpsc::Sender<String>, cancel: CancellationToken) -> Result<()> {
        match self.cfg.path.clone() {
            Some(path) => {
                let file = File::open(&path)
                    .await
                    .with_context(|| format!("opening event file {}", path.display()))?;
                info!(path = %path.display(), stream = %self.cfg.name, "replaying events from file");
                self.pump(BufReader::new(file), tx, cancel).await
            }
            None => {
                info!(stream = %self.cfg.name, "reading events from stdin");
                self.pump(BufReader::new(tokio::io::stdin()), tx, cancel).await
            }
        }
    }

    async fn pump<R>(
        &self,
        reader: R,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut burst = 0usize;

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line.context("reading event line")?,
            };

            let Some(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if tx.send(line.to_string()).await.is_err() {
                // Pipeline shut down; stop reading.
                break;
            }

            burst += 1;
            if burst >= self.cfg.getrecords_max {
                burst = 0;
                if !self.cfg.adaptive_reads {
                    debug!(interval = ?self.cfg.getrecords_interval, "pacing reads");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.cfg.getrecords_interval) => {}
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn source(cfg: SourceConfig) -> EventSource {
        EventSource::new(cfg)
    }

    fn fast_cfg() -> SourceConfig {
        SourceConfig {
            getrecords_interval: Duration::from_millis(1),
            ..SourceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_pump_forwards_lines_in_order() {
        let input = b"{\"a\":\"1\"}\n\n{\"b\":\"2\"}\n   \n{\"c\":\"3\"}\n";
        let (tx, mut rx) = mpsc::channel(16);

        source(fast_cfg())
            .pump(&input[..], tx, CancellationToken::new())
            .await
            .expect("pump");

        assert_eq!(rx.recv().await.as_deref(), Some("{\"a\":\"1\"}"));
        assert_eq!(rx.recv().await.as_deref(), Some("{\"b\":\"2\"}"));
        assert_eq!(rx.recv().await.as_deref(), Some("{\"c\":\"3\"}"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_pump_paces_after_burst_limit() {
        let cfg = SourceConfig {
            getrecords_max: 2,
            getrecords_interval: Duration::from_millis(1),
            ..SourceConfig::default()
        };

        let input = b"{\"a\":\"1\"}\n{\"b\":\"2\"}\n{\"c\":\"3\"}\n";
        let (tx, mut rx) = mpsc::channel(16);

        source(cfg)
            .pump(&input[..], tx, CancellationToken::new())
            .await
            .expect("pump");

        let mut received = Vec::new();
        while let Some(line) = rx.recv().await {
            received.push(line);
        }
        assert_eq!(received.len(), 3);
    }

    #[tokio::test]
    async fn test_pump_stops_when_receiver_is_dropped() {
        let input = b"{\"a\":\"1\"}\n{\"b\":\"2\"}\n";
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        source(fast_cfg())
            .pump(&input[..], tx, CancellationToken::new())
            .await
            .expect("pump exits cleanly");
    }

    #[tokio::test]
    async fn test_pump_stops_on_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let input = b"{\"a\":\"1\"}\n";
        let (tx, mut rx) = mpsc::channel(16);

        source(fast_cfg())
            .pump(&input[..], tx, cancel)
            .await
            .expect("pump exits cleanly");
        assert!(rx.recv().await.is_none());
    }
}
