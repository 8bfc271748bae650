//! Fetch configuration shared by the CLI commands.

use std::path::PathBuf;

/// Settings for one resolve + transfer pass.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Directory the mirrored tree is created under.
    pub root_dir: PathBuf,

    /// Maximum concurrent transfers.
    pub max_workers: usize,

    /// Pre-provisioned GoFile account token; a guest account is created
    /// when absent.
    pub gofile_token: Option<String>,
}

impl FetchConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root_dir.is_dir() {
            return Err(ConfigError::RootNotFound(self.root_dir.clone()));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("download directory not found: {0}")]
    RootNotFound(PathBuf),

    #[error("worker count must be at least 1")]
    NoWorkers,
}
