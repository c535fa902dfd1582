//! HTTP/JSON write client for the time-series store.
//!
//! Submits one POST per batch, decodes the store's partial-rejection
//! response, and retries transport-level failures with a bounded linear
//! backoff. Rejections are never retried; the sink discards that batch.

use std::io::Write;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use flate2::write::GzEncoder;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Compression, StoreConfig};
use crate::point::Record;

use super::{RejectedRecord, StoreWriter, WriteError, WriteRequest};

/// Base delay between transport retries; grows linearly per attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// JSON body of one batched write call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WriteBody<'a> {
    database_name: &'a str,
    table_name: &'a str,
    records: &'a [Record],
}

/// Error body the store returns when it refuses specific records.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RejectionBody {
    #[serde(default)]
    rejected_records: Vec<RejectedRecordBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RejectedRecordBody {
    record_index: usize,
    #[serde(default)]
    reason: String,
}

/// Write client over the store's HTTP ingest endpoint.
pub struct HttpStoreWriter {
    client: reqwest::Client,
    endpoint: String,
    region: String,
    compression: Compression,
    max_retries: u32,
}

enum Disposition {
    Accepted,
    Rejected(Vec<RejectedRecord>),
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl HttpStoreWriter {
    pub fn new(cfg: &StoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            region: cfg.region.clone(),
            compression: cfg.compression,
            max_retries: cfg.max_retries,
        })
    }

    async fn attempt(&self, payload: &[u8]) -> Disposition {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec());

        if self.compression == Compression::Gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }

        if !self.region.is_empty() {
            request = request.header("x-store-region", &self.region);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                return Disposition::Retryable(
                    anyhow::Error::new(err).context("sending write request"),
                )
            }
        };

        let status = response.status();
        if status.is_success() {
            return Disposition::Accepted;
        }

        let body = response.text().await.unwrap_or_default();
        if let Some(rejected) = decode_rejections(&body) {
            return Disposition::Rejected(rejected);
        }

        let err = anyhow!("store returned {status}: {}", snippet(&body));
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Disposition::Retryable(err)
        } else {
            Disposition::Fatal(err)
        }
    }
}

impl StoreWriter for HttpStoreWriter {
    async fn write(&self, request: WriteRequest<'_>) -> Result<(), WriteError> {
        let body = WriteBody {
            database_name: request.database,
            table_name: request.table,
            records: request.records,
        };
        let payload = encode_body(&body, self.compression).map_err(WriteError::Transport)?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            match self.attempt(&payload).await {
                Disposition::Accepted => {
                    debug!(records = request.records.len(), "write accepted");
                    return Ok(());
                }
                Disposition::Rejected(rejected) => return Err(WriteError::Rejected(rejected)),
                Disposition::Fatal(err) => return Err(WriteError::Transport(err)),
                Disposition::Retryable(err) => {
                    if attempt > self.max_retries {
                        return Err(WriteError::Transport(err));
                    }
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "write attempt failed, retrying",
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
            }
        }
    }
}

fn encode_body(body: &WriteBody<'_>, compression: Compression) -> Result<Vec<u8>> {
    let raw = serde_json::to_vec(body).context("serializing write request")?;

    match compression {
        Compression::None => Ok(raw),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&raw).context("gzip encode")?;
            encoder.finish().context("gzip finish")
        }
    }
}

fn decode_rejections(body: &str) -> Option<Vec<RejectedRecord>> {
    let parsed: RejectionBody = serde_json::from_str(body).ok()?;
    if parsed.rejected_records.is_empty() {
        return None;
    }

    Some(
        parsed
            .rejected_records
            .into_iter()
            .map(|r| RejectedRecord {
                index: r.record_index,
                reason: r.reason,
            })
            .collect(),
    )
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}
