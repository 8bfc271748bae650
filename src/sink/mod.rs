//! Artifact sink boundary and the drain pass that feeds it.
//!
//! The drain walks a finished tree, hands each regular file to the sink,
//! and deletes the local copy only when the sink accepted it. A per-file
//! sink failure leaves that file on disk and moves on to the next one.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

mod outbox;
mod webhook;

pub use outbox::OutboxSink;
pub use webhook::WebhookSink;

/// External consumer that takes ownership of finished files.
pub trait ArtifactSink {
    /// Deliver one file to `destination`. An error means the local copy
    /// must be kept.
    async fn accept(&self, destination: &str, file: &Path) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("sink endpoint returned HTTP {0}")]
    Endpoint(reqwest::StatusCode),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// What happens to the tree root after the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Remove the root only when every file was delivered; failed
    /// deliveries stay on disk for a later run.
    KeepOnFailure,
    /// Remove the root unconditionally, discarding undelivered files.
    RemoveAlways,
}

#[derive(Debug, Default)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: Vec<(PathBuf, SinkError)>,
    pub root_removed: bool,
}

/// Drain every regular file under `root` into the sink, then apply the
/// root-removal policy. Files are visited in filesystem order; no
/// ordering is guaranteed.
pub async fn drain_tree<S: ArtifactSink>(
    root: &Path,
    destination: &str,
    sink: &S,
    policy: DrainPolicy,
) -> DrainReport {
    let mut report = DrainReport::default();

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("walk error under {}: {}", root.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        deliver(entry.path(), destination, sink, &mut report).await;
    }

    if report.failed.is_empty() || policy == DrainPolicy::RemoveAlways {
        match std::fs::remove_dir_all(root) {
            Ok(()) => report.root_removed = true,
            Err(err) => warn!("could not remove {}: {}", root.display(), err),
        }
    }

    report
}

/// Drain an explicit set of files, used when a share had no wrapper
/// directory. Missing paths are skipped; nothing else is touched.
pub async fn drain_files<S: ArtifactSink>(
    files: &[PathBuf],
    destination: &str,
    sink: &S,
) -> DrainReport {
    let mut report = DrainReport::default();
    for file in files {
        if !file.is_file() {
            debug!("{} not on disk, nothing to drain", file.display());
            continue;
        }
        deliver(file, destination, sink, &mut report).await;
    }
    report
}

async fn deliver<S: ArtifactSink>(
    file: &Path,
    destination: &str,
    sink: &S,
    report: &mut DrainReport,
) {
    match sink.accept(destination, file).await {
        Ok(()) => {
            if let Err(err) = std::fs::remove_file(file) {
                warn!("delivered but could not delete {}: {}", file.display(), err);
            }
            report.delivered += 1;
        }
        Err(err) => {
            warn!("sink rejected {}: {}", file.display(), err);
            report.failed.push((file.to_path_buf(), err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Test sink that rejects files whose name contains a needle.
    struct Picky {
        reject: &'static str,
    }

    impl ArtifactSink for Picky {
        async fn accept(&self, _destination: &str, file: &Path) -> Result<(), SinkError> {
            let name = file.file_name().unwrap().to_string_lossy().into_owned();
            if name.contains(self.reject) {
                return Err(SinkError::Io(io::Error::other("rejected")));
            }
            Ok(())
        }
    }

    fn seed_tree(reject_name: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("share");
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(root.join(reject_name), b"x").unwrap();
        std::fs::write(root.join("nested").join("good.bin"), b"y").unwrap();
        (dir, root)
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_file_and_root() {
        let (_dir, root) = seed_tree("bad.bin");
        let sink = Picky { reject: "bad" };

        let report = drain_tree(&root, "", &sink, DrainPolicy::KeepOnFailure).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.root_removed);
        assert!(root.join("bad.bin").exists());
        assert!(!root.join("nested").join("good.bin").exists());
    }

    #[tokio::test]
    async fn test_discard_policy_removes_root_despite_failures() {
        let (_dir, root) = seed_tree("bad.bin");
        let sink = Picky { reject: "bad" };

        let report = drain_tree(&root, "", &sink, DrainPolicy::RemoveAlways).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.root_removed);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_clean_drain_removes_root() {
        let (_dir, root) = seed_tree("fine.bin");
        let sink = Picky { reject: "zzz" };

        let report = drain_tree(&root, "", &sink, DrainPolicy::KeepOnFailure).await;

        assert_eq!(report.delivered, 2);
        assert!(report.failed.is_empty());
        assert!(report.root_removed);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_drain_files_skips_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("here.bin");
        std::fs::write(&present, b"x").unwrap();
        let missing = dir.path().join("gone.bin");

        let sink = Picky { reject: "zzz" };
        let report = drain_files(&[present.clone(), missing], "", &sink).await;

        assert_eq!(report.delivered, 1);
        assert!(report.failed.is_empty());
        assert!(!present.exists());
    }
}
