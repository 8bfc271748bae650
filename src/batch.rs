//! Bounded concurrent fan-out of transfer units across the manifest.

use futures::stream::{self, StreamExt};
use reqwest::header::HeaderMap;
use tracing::info;

use crate::manifest::Manifest;
use crate::progress::{Disposition, ProgressEvent, ProgressTx};
use crate::transfer::{transfer_entry, HttpClient, TransferError, TransferOutcome};

/// Typed result of a whole transfer batch, one bucket per terminal
/// outcome, sorted by manifest index.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<u64>,
    pub skipped: Vec<u64>,
    pub failed: Vec<FailedTransfer>,
}

#[derive(Debug)]
pub struct FailedTransfer {
    pub index: u64,
    pub filename: String,
    pub error: TransferError,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.skipped.len() + self.failed.len()
    }
}

/// Run every manifest entry through a transfer unit, at most
/// `max_workers` in flight.
///
/// Entries are submitted in index order; completion order is up to the
/// network. A failed entry never cancels its siblings - the pool only
/// returns once every entry has reached a terminal outcome.
pub async fn run_transfers(
    http: &HttpClient,
    headers: &HeaderMap,
    manifest: &Manifest,
    max_workers: usize,
    events: ProgressTx,
) -> BatchReport {
    let outcomes: Vec<(u64, String, TransferOutcome)> = stream::iter(manifest.entries())
        .map(|entry| {
            let events = events.clone();
            async move {
                let outcome = transfer_entry(http, headers, entry, &events).await;
                events.send(ProgressEvent::Finished {
                    index: entry.index,
                    filename: entry.filename.clone(),
                    disposition: Disposition::from(&outcome),
                });
                (entry.index, entry.filename.clone(), outcome)
            }
        })
        .buffer_unordered(max_workers.max(1))
        .collect()
        .await;

    let mut report = BatchReport::default();
    for (index, filename, outcome) in outcomes {
        match outcome {
            TransferOutcome::Completed => report.completed.push(index),
            TransferOutcome::Skipped => report.skipped.push(index),
            TransferOutcome::Failed(error) => report.failed.push(FailedTransfer {
                index,
                filename,
                error,
            }),
        }
    }
    report.completed.sort_unstable();
    report.skipped.sort_unstable();
    report.failed.sort_by_key(|f| f.index);

    info!(
        "batch finished: {} completed, {} skipped, {} failed",
        report.completed.len(),
        report.skipped.len(),
        report.failed.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use crate::progress;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_report_buckets_every_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"abc".to_vec(), "application/octet-stream"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut manifest = Manifest::new();
        manifest
            .push(dir.path(), "ok.bin", format!("{}/ok", server.uri()), None)
            .unwrap();
        manifest
            .push(dir.path(), "done.bin", format!("{}/gone", server.uri()), None)
            .unwrap();
        manifest
            .push(dir.path(), "gone.bin", format!("{}/gone", server.uri()), None)
            .unwrap();
        std::fs::write(dir.path().join("done.bin"), b"x").unwrap();

        let http = HttpClient::new().unwrap();
        let (tx, _rx) = progress::channel();
        let report = run_transfers(&http, &HeaderMap::new(), &manifest, 2, tx).await;

        assert_eq!(report.completed, vec![1]);
        assert_eq!(report.skipped, vec![2]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 3);
        assert_eq!(report.failed[0].filename, "gone.bin");
        assert!(matches!(
            report.failed[0].error,
            TransferError::BadStatus(_)
        ));
        assert_eq!(report.total(), 3);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_rerun_skips_everything_without_new_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(b"aaaa".to_vec(), "application/octet-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"bb".to_vec(), "application/octet-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut manifest = Manifest::new();
        manifest
            .push(dir.path(), "a.bin", format!("{}/a", server.uri()), None)
            .unwrap();
        manifest
            .push(dir.path(), "b.bin", format!("{}/b", server.uri()), None)
            .unwrap();

        let http = HttpClient::new().unwrap();

        let (tx, _rx) = progress::channel();
        let first = run_transfers(&http, &HeaderMap::new(), &manifest, 4, tx).await;
        assert_eq!(first.completed, vec![1, 2]);

        // `expect(1)` on each mock verifies the rerun touched the network
        // zero times.
        let (tx, _rx) = progress::channel();
        let second = run_transfers(&http, &HeaderMap::new(), &manifest, 4, tx).await;
        assert!(second.completed.is_empty());
        assert_eq!(second.skipped, vec![1, 2]);
    }
}
