//! Patch run configuration
//!
//! Defines the configuration for a patch run and validation of the
//! install directory it writes into.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Release host the dated patch archives are published under
pub const DEFAULT_RELEASE_HOST: &str = "https://github.com/GTNH-UCN/ClientPatch/releases/download";

/// Archive extension of published patches
pub const DEFAULT_ARCHIVE_EXT: &str = "7z";

/// Number of trailing days searched for a published patch
pub const DEFAULT_WINDOW_DAYS: u32 = 3;

/// Browser-like user agent for HEAD requests
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// Per-request timeout for a single HEAD request
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(20);

/// Suffix every valid install directory must end with
pub const INSTALL_DIR_SUFFIX: &str = ".minecraft";

/// Configuration for a patch run
#[derive(Debug, Clone)]
pub struct PatchConfig {
    /// Base URL of the release host (no trailing slash needed)
    pub release_host: String,

    /// Archive extension, without the dot
    pub archive_ext: String,

    /// How many days back (including today) to search
    pub window_days: u32,

    /// Timeout for each HEAD request
    pub check_timeout: Duration,

    /// User agent sent with HEAD requests
    pub user_agent: String,

    /// Explicit downloader binary (aria2c); discovered when None
    pub downloader_path: Option<PathBuf>,

    /// Explicit extractor binary (7zr/7z/7zz); discovered when None
    pub extractor_path: Option<PathBuf>,

    /// Directory holding bundled tool binaries to provision from
    pub tools_source_dir: Option<PathBuf>,

    /// Connections per server and number of splits for the downloader
    pub connections: u32,

    /// Seconds between downloader progress summaries
    pub summary_interval: u32,

    /// Wall-clock limit for each subprocess phase (None = unbounded)
    pub phase_timeout: Option<Duration>,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            release_host: DEFAULT_RELEASE_HOST.to_string(),
            archive_ext: DEFAULT_ARCHIVE_EXT.to_string(),
            window_days: DEFAULT_WINDOW_DAYS,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            downloader_path: None,
            extractor_path: None,
            tools_source_dir: None,
            connections: 16,
            summary_interval: 1,
            phase_timeout: None,
        }
    }
}

impl PatchConfig {
    /// Build the patch URL for a given release date.
    ///
    /// `<host>/patch-YYYY-MM-DD/patch-YYYY-MM-DD.<ext>`
    pub fn patch_url(&self, date: NaiveDate) -> String {
        let date_str = date.format("%Y-%m-%d");
        format!(
            "{}/patch-{}/patch-{}.{}",
            self.release_host.trim_end_matches('/'),
            date_str,
            date_str,
            self.archive_ext
        )
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_days == 0 {
            return Err(ConfigError::EmptyWindow);
        }

        if !self.release_host.starts_with("http://") && !self.release_host.starts_with("https://") {
            return Err(ConfigError::InvalidReleaseHost(self.release_host.clone()));
        }

        if self.connections == 0 {
            return Err(ConfigError::InvalidConnections);
        }

        Ok(())
    }
}

/// A validated install directory.
///
/// Never owned by the run; only the extractor writes into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallDir(PathBuf);

impl InstallDir {
    /// Validate a user-supplied path: trimmed, ends with `.minecraft`
    /// (case-insensitive) and exists as a directory.
    pub fn new(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InstallDirEmpty);
        }

        // Trailing separators are allowed, so `.minecraft/` passes
        let trimmed_sep = trimmed.trim_end_matches(['/', '\\']);
        if !trimmed_sep.to_lowercase().ends_with(INSTALL_DIR_SUFFIX) {
            return Err(ConfigError::InstallDirNaming(PathBuf::from(trimmed)));
        }

        let path = PathBuf::from(trimmed);
        if !path.is_dir() {
            return Err(ConfigError::InstallDirNotFound(path));
        }

        Ok(Self(path))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Install directory is empty")]
    InstallDirEmpty,

    #[error("Install directory must end with .minecraft: {0}")]
    InstallDirNaming(PathBuf),

    #[error("Install directory not found: {0}")]
    InstallDirNotFound(PathBuf),

    #[error("Search window must cover at least one day")]
    EmptyWindow,

    #[error("Release host must be an http(s) URL: {0}")]
    InvalidReleaseHost(String),

    #[error("Downloader connection count must be positive")]
    InvalidConnections,
}
