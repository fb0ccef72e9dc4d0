//! Error taxonomy for the patch pipeline.
//!
//! Most functions return `anyhow::Result`; these typed errors cover the
//! conditions the pipeline branches on (not found, missing tool, incomplete
//! download, timeouts) so callers can tell an expected short-circuit apart
//! from a real failure.

use std::path::PathBuf;
use std::time::Duration;

/// Pipeline-level failures.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Install directory or run settings rejected
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(#[from] crate::config::ConfigError),

    /// Nothing published inside the search window
    #[error("No patch found in the last {window_days} day(s)")]
    PatchNotFound { window_days: u32 },

    /// Downloader or extractor binary is absent
    #[error("{tool} not found at {}", path.display())]
    ToolMissing { tool: &'static str, path: PathBuf },

    /// Downloader exited but the archive is not on disk
    #[error("Download incomplete: {} does not exist (exit code {exit_code:?})", path.display())]
    DownloadIncomplete {
        path: PathBuf,
        exit_code: Option<i32>,
    },

    /// A subprocess phase ran past its deadline and was killed
    #[error("{phase} timed out after {}s", timeout.as_secs())]
    Timeout {
        phase: &'static str,
        timeout: Duration,
    },
}

impl PatchError {
    /// Whether this condition ends the run cleanly (not an error exit).
    pub fn is_clean_exit(&self) -> bool {
        matches!(self, PatchError::PatchNotFound { .. })
    }
}
