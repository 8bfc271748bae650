//! Resumable HTTP transfer of a single manifest entry.
//!
//! A transfer streams into `<name>.part` and only promotes the partial to
//! its final name when the on-disk byte count matches the size the server
//! reported. The `.part` file is never deleted on failure; its length is
//! the resume offset for the next attempt.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::manifest::ManifestEntry;
use crate::progress::{Disposition, ProgressEvent, ProgressTx};

/// Connection timeout: time to establish a TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(9);

/// Read timeout: maximum time to wait for data between chunks.
const READ_TIMEOUT: Duration = Duration::from_secs(27);

/// Shared HTTP client carrying the timeouts every listing and transfer
/// request uses.
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("siphon/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Get the underlying reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Why a single transfer did not complete.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("unexpected HTTP status {0}")]
    BadStatus(StatusCode),

    #[error("response did not report a total size")]
    NoSize,

    #[error("{got} of {expected} bytes on disk")]
    Incomplete { got: u64, expected: u64 },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Terminal state of one manifest entry.
#[derive(Debug)]
pub enum TransferOutcome {
    Completed,
    Skipped,
    Failed(TransferError),
}

impl From<&TransferOutcome> for Disposition {
    fn from(outcome: &TransferOutcome) -> Self {
        match outcome {
            TransferOutcome::Completed => Disposition::Completed,
            TransferOutcome::Skipped => Disposition::Skipped,
            TransferOutcome::Failed(err) => Disposition::Failed(err.to_string()),
        }
    }
}

/// Download one manifest entry, resuming from an existing `.part` file.
///
/// Always reaches a terminal outcome; every error is folded into
/// `TransferOutcome::Failed` instead of propagating to the pool.
pub async fn transfer_entry(
    http: &HttpClient,
    extra_headers: &HeaderMap,
    entry: &ManifestEntry,
    events: &ProgressTx,
) -> TransferOutcome {
    let final_path = entry.final_path();
    if let Ok(meta) = tokio::fs::metadata(&final_path).await {
        if meta.len() > 0 {
            debug!("{} already present, skipping", final_path.display());
            return TransferOutcome::Skipped;
        }
    }

    let part_path = entry.part_path();
    let part_size = match tokio::fs::metadata(&part_path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    let mut request = http.inner().get(&entry.link).headers(extra_headers.clone());
    if part_size > 0 {
        request = request.header(RANGE, format!("bytes={part_size}-"));
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => return TransferOutcome::Failed(err.into()),
    };

    let status = response.status();
    let hard_failure = matches!(status.as_u16(), 403 | 404 | 405 | 500);
    if hard_failure
        || (part_size == 0 && status != StatusCode::OK)
        || (part_size > 0 && status != StatusCode::PARTIAL_CONTENT)
    {
        return TransferOutcome::Failed(TransferError::BadStatus(status));
    }

    let Some(expected) = expected_total(&response, part_size) else {
        return TransferOutcome::Failed(TransferError::NoSize);
    };

    events.send(ProgressEvent::Started {
        index: entry.index,
        filename: entry.filename.clone(),
        total: expected,
    });

    // A stream error leaves the partial in place for the next attempt; the
    // completion check below runs either way.
    let streamed = append_body(response, &part_path, part_size, expected, entry.index, events).await;
    if let Err(err) = &streamed {
        warn!("{}: stream interrupted: {}", entry.filename, err);
    }

    let on_disk = match tokio::fs::metadata(&part_path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    if on_disk == expected {
        if let Err(err) = tokio::fs::rename(&part_path, &final_path).await {
            return TransferOutcome::Failed(err.into());
        }
        return TransferOutcome::Completed;
    }

    TransferOutcome::Failed(match streamed {
        Err(err) => err,
        Ok(()) => TransferError::Incomplete {
            got: on_disk,
            expected,
        },
    })
}

async fn append_body(
    response: reqwest::Response,
    part_path: &Path,
    start: u64,
    total: u64,
    index: u64,
    events: &ProgressTx,
) -> Result<(), TransferError> {
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(part_path)
        .await?;

    let mut done = start;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        done += chunk.len() as u64;
        events.send(ProgressEvent::Advanced {
            index,
            bytes_done: done,
            total,
        });
    }

    file.flush().await?;
    Ok(())
}

/// Total size reported by the server: `Content-Length` for a fresh
/// request, the `/total` suffix of `Content-Range` for a resumed one.
fn expected_total(response: &reqwest::Response, part_size: u64) -> Option<u64> {
    if part_size == 0 {
        return response.content_length();
    }
    let raw = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
    total_from_content_range(raw)
}

fn total_from_content_range(raw: &str) -> Option<u64> {
    raw.rsplit('/').next()?.trim().parse().ok()
}
