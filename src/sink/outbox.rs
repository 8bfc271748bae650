//! Outbox sink: relays artifacts by copying them into a local directory
//! for an external forwarder to pick up.

use std::path::{Path, PathBuf};

use super::{ArtifactSink, SinkError};

/// Drops artifacts into an outbox directory, one subdirectory per
/// non-empty destination identifier.
pub struct OutboxSink {
    dir: PathBuf,
}

impl OutboxSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArtifactSink for OutboxSink {
    async fn accept(&self, destination: &str, file: &Path) -> Result<(), SinkError> {
        let target_dir = if destination.is_empty() {
            self.dir.clone()
        } else {
            self.dir.join(destination)
        };
        tokio::fs::create_dir_all(&target_dir).await?;

        let name = file
            .file_name()
            .ok_or_else(|| std::io::Error::other("artifact has no file name"))?;
        tokio::fs::copy(file, target_dir.join(name)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_copies_into_destination_dir() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let file = src.path().join("a.bin");
        std::fs::write(&file, b"payload").unwrap();

        let sink = OutboxSink::new(out.path());
        sink.accept("chat-42", &file).await.unwrap();

        assert_eq!(
            std::fs::read(out.path().join("chat-42").join("a.bin")).unwrap(),
            b"payload"
        );
        // the drain, not the sink, owns deletion of the source
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_empty_destination_uses_outbox_root() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let file = src.path().join("b.bin");
        std::fs::write(&file, b"data").unwrap();

        let sink = OutboxSink::new(out.path());
        sink.accept("", &file).await.unwrap();

        assert_eq!(std::fs::read(out.path().join("b.bin")).unwrap(), b"data");
    }
}
