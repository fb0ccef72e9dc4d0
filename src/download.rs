//! Patch download via aria2c.
//!
//! The archive is fetched by an external multi-connection downloader. Its
//! summary lines are parsed into a single overwritten status line. Success is
//! decided by whether the target file exists once the child has exited; the
//! exit code is only kept for diagnostics, since aria2c can report non-zero
//! after a completed transfer and zero after writing nothing.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, trace, warn};

use crate::config::PatchConfig;
use crate::process::run_draining;
use crate::progress::{parse_download_progress, StatusLine};
use crate::proxy::ProxyConfig;
use crate::tools::{self, Tool};

/// Result of a download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// Downloader exit code (None when killed by a signal)
    pub exit_code: Option<i32>,
    /// Whether the destination file exists after the child exited
    pub target_exists: bool,
}

impl DownloadOutcome {
    pub fn success(&self) -> bool {
        self.target_exists
    }
}

/// Drives the external downloader for one archive.
pub struct DownloadOrchestrator<'a> {
    config: &'a PatchConfig,
    working_dir: Option<PathBuf>,
    status: StatusLine,
}

impl<'a> DownloadOrchestrator<'a> {
    pub fn new(config: &'a PatchConfig) -> Self {
        Self {
            config,
            working_dir: None,
            status: StatusLine::download(),
        }
    }

    /// Also look for the downloader in a provisioned working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Render progress somewhere other than the default status line
    pub fn with_status(mut self, status: StatusLine) -> Self {
        self.status = status;
        self
    }

    /// Command-line arguments for fetching `url` into `dest`.
    pub fn build_args(&self, url: &str, dest: &Path, proxy: &ProxyConfig) -> Vec<String> {
        let dir = dest
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());
        let out = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut args = Vec::new();
        if let Some(uri) = &proxy.uri {
            args.push(format!("--all-proxy={}", uri));
        }
        args.extend([
            "-x".to_string(),
            self.config.connections.to_string(), // connections per server
            "-s".to_string(),
            self.config.connections.to_string(), // splits
            "--check-certificate=false".to_string(),
            "--enable-color=false".to_string(),
            format!("--summary-interval={}", self.config.summary_interval),
            "--dir".to_string(),
            dir,
            "--out".to_string(),
            out,
            url.to_string(),
        ]);
        args
    }

    /// Download `url` to `dest`.
    ///
    /// Returns [`crate::error::PatchError::ToolMissing`] without spawning
    /// anything when the downloader cannot be found.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        proxy: &ProxyConfig,
    ) -> Result<DownloadOutcome> {
        let downloader = tools::locate(
            Tool::Downloader,
            self.config.downloader_path.as_deref(),
            self.working_dir.as_deref(),
        )?;

        if let Some(uri) = &proxy.uri {
            println!("Using proxy: {}", uri);
        }

        let args = self.build_args(url, dest, proxy);
        info!("Downloading {} to {}", url, dest.display());
        debug!("{} {}", downloader.display(), args.join(" "));

        let mut cmd = Command::new(&downloader);
        cmd.args(&args);

        let status = self.status.clone();
        let outcome = run_draining(
            cmd,
            "download",
            self.config.phase_timeout,
            move |kind, line| match parse_download_progress(line) {
                Some(progress) => status.show_download(&progress),
                None => trace!("aria2c {:?}: {}", kind, line),
            },
        )
        .await;
        self.status.finish();
        let outcome = outcome?;

        let target_exists = dest.is_file();
        if !outcome.success() {
            warn!("Downloader exited with {:?}", outcome.exit_code);
        }
        debug!(
            "Downloader finished: {} stdout / {} stderr lines, target present: {}",
            outcome.stdout_lines, outcome.stderr_lines, target_exists
        );

        Ok(DownloadOutcome {
            exit_code: outcome.exit_code,
            target_exists,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PatchError;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    #[test]
    fn test_build_args_direct() {
        let config = PatchConfig::default();
        let orch = DownloadOrchestrator::new(&config).with_status(StatusLine::hidden());
        let args = orch.build_args(
            "https://host/patch-2025-01-02/patch-2025-01-02.7z",
            Path::new("/tmp/patch_abc.7z"),
            &ProxyConfig::default(),
        );
        assert_eq!(
            args,
            vec![
                "-x",
                "16",
                "-s",
                "16",
                "--check-certificate=false",
                "--enable-color=false",
                "--summary-interval=1",
                "--dir",
                "/tmp",
                "--out",
                "patch_abc.7z",
                "https://host/patch-2025-01-02/patch-2025-01-02.7z",
            ]
        );
    }

    #[test]
    fn test_build_args_proxy_first() {
        let config = PatchConfig::default();
        let orch = DownloadOrchestrator::new(&config).with_status(StatusLine::hidden());
        let proxy = ProxyConfig {
            uri: Some("http://127.0.0.1:7890".into()),
        };
        let args = orch.build_args("https://host/a.7z", Path::new("/tmp/a.7z"), &proxy);
        assert_eq!(args[0], "--all-proxy=http://127.0.0.1:7890");
        assert_eq!(args.last().map(String::as_str), Some("https://host/a.7z"));
    }

    #[tokio::test]
    async fn test_missing_downloader_not_spawned() {
        let dir = tempdir().unwrap();
        let config = PatchConfig {
            downloader_path: Some(dir.path().join("aria2c-missing")),
            ..Default::default()
        };
        let orch = DownloadOrchestrator::new(&config).with_status(StatusLine::hidden());
        let dest = dir.path().join("patch.7z");

        let err = orch
            .download("https://host/a.7z", &dest, &ProxyConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PatchError>(),
            Some(PatchError::ToolMissing { tool: "aria2c", .. })
        ));
        assert!(!dest.exists());
    }

    /// Fake aria2c: parses `--dir`/`--out` and runs `body` with `$target` set
    #[cfg(unix)]
    fn fake_downloader(body: &str) -> (TempDir, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let script = dir.path().join("aria2c");
        let content = format!(
            "#!/bin/sh\n\
             dir=.\n\
             out=\n\
             while [ $# -gt 0 ]; do\n\
               case \"$1\" in\n\
                 --dir) dir=\"$2\"; shift ;;\n\
                 --out) out=\"$2\"; shift ;;\n\
               esac\n\
               shift\n\
             done\n\
             target=\"$dir/$out\"\n\
             {}\n",
            body
        );
        std::fs::write(&script, content).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, script)
    }

    #[cfg(unix)]
    async fn run_fake(body: &str) -> (TempDir, DownloadOutcome, StatusLine) {
        let (dir, script) = fake_downloader(body);
        let config = PatchConfig {
            downloader_path: Some(script),
            ..Default::default()
        };
        let status = StatusLine::hidden();
        let orch = DownloadOrchestrator::new(&config).with_status(status.clone());
        let dest = dir.path().join("patch_test.7z");

        let outcome = orch
            .download("https://host/a.7z", &dest, &ProxyConfig::default())
            .await
            .unwrap();
        (dir, outcome, status)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_zero_without_file_is_failure() {
        let (_dir, outcome, _) = run_fake("exit 0").await;
        assert_eq!(outcome.exit_code, Some(0));
        assert!(!outcome.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_present_with_nonzero_exit_is_success() {
        let (_dir, outcome, _) = run_fake("echo data > \"$target\"\nexit 3").await;
        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_lines_update_status() {
        let body = "echo '*** Download Progress Summary ***'\n\
                    echo ' - [#70a74d 32MiB/120MiB(26%) CN:16 DL:1.2MiB ETA:1m]'\n\
                    echo ' - [#70a74d 90MiB/120MiB(75%) CN:16 DL:1.5MiB ETA:20s]'\n\
                    echo done > \"$target\"";
        let (_dir, outcome, status) = run_fake(body).await;
        assert!(outcome.success());
        assert_eq!(status.position(), 75);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_heavy_stderr_before_stdout_does_not_hang() {
        // ~128KB on stderr before anything on stdout: overflows the pipe buffer
        let body = "yes 'noise written to the error stream' | head -n 4000 >&2\n\
                    echo ' - [#1 1MiB/1MiB(100%) CN:1 DL:1MiB]'\n\
                    echo data > \"$target\"";
        let result = tokio::time::timeout(Duration::from_secs(30), run_fake(body)).await;
        let (_dir, outcome, status) = result.expect("download hung on a full stderr pipe");
        assert!(outcome.success());
        assert_eq!(status.position(), 100);
    }
}
