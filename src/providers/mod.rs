//! Share providers: URL classification and container resolution.

pub mod cloudmail;
pub mod gofile;

use std::path::PathBuf;

use crate::manifest::{DuplicateDestination, Manifest};

/// Which file-share service a URL belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GoFile,
    CloudMail,
}

/// Classify a share URL by provider. `None` means unsupported.
pub fn detect_provider(url: &str) -> Option<Provider> {
    let lower = url.to_ascii_lowercase();
    if lower.contains("gofile.io") {
        Some(Provider::GoFile)
    } else if lower.contains("cloud.mail.ru") {
        Some(Provider::CloudMail)
    } else {
        None
    }
}

/// A resolved container: the mirrored directory tree plus the flat list
/// of files waiting for transfer.
#[derive(Debug)]
pub struct Resolution {
    /// Dedicated content directory. `None` when the share is a single
    /// top-level file that lands directly in the download root.
    pub content_dir: Option<PathBuf>,
    pub manifest: Manifest,
}

/// Why a container could not be resolved. A failure below the container
/// root only skips that subtree; these surface for the root itself.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("provider reported status {0:?}")]
    BadStatus(String),

    #[error("listing endpoint returned HTTP {0}")]
    Http(reqwest::StatusCode),

    #[error("share is password protected and the password did not verify")]
    PasswordRequired,

    #[error("container is empty")]
    EmptyContainer,

    #[error("could not parse provider response: {0}")]
    Parse(String),

    #[error(transparent)]
    Duplicate(#[from] DuplicateDestination),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
