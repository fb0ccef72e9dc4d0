//! Patch extraction via 7-Zip.
//!
//! Extracts the downloaded archive over the install directory with full
//! paths, overwriting everything. Percentages on stdout drive the status
//! line; anything on stderr is shown to the user as an error line but does
//! not by itself decide the outcome.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, info, trace, warn};

use crate::config::PatchConfig;
use crate::process::{run_draining, StreamKind};
use crate::progress::{parse_extraction_progress, StatusLine};
use crate::tools::{self, Tool};

/// Completion report of an extraction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOutcome {
    /// Extractor exit code (None when killed by a signal)
    pub exit_code: Option<i32>,
    /// Lines the extractor wrote to stderr, verbatim
    pub error_lines: Vec<String>,
}

impl ExtractOutcome {
    /// Clean exit and nothing reported on stderr
    pub fn is_clean(&self) -> bool {
        self.exit_code == Some(0) && self.error_lines.is_empty()
    }
}

/// Drives the external extractor.
pub struct ExtractionOrchestrator<'a> {
    config: &'a PatchConfig,
    working_dir: Option<PathBuf>,
    status: StatusLine,
}

impl<'a> ExtractionOrchestrator<'a> {
    pub fn new(config: &'a PatchConfig) -> Self {
        Self {
            config,
            working_dir: None,
            status: StatusLine::extraction(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_status(mut self, status: StatusLine) -> Self {
        self.status = status;
        self
    }

    /// `x <archive> -o<dir> -y -bsp1 -bb0`
    pub fn build_args(archive: &Path, target_dir: &Path) -> Vec<String> {
        vec![
            "x".to_string(),
            archive.to_string_lossy().to_string(),
            format!("-o{}", target_dir.display()),
            "-y".to_string(),   // Yes to all prompts
            "-bsp1".to_string(), // Progress to stdout
            "-bb0".to_string(),  // No per-file listing
        ]
    }

    /// Extract `archive` into `target_dir`.
    ///
    /// A missing extractor is reported as
    /// [`crate::error::PatchError::ToolMissing`] before anything is spawned,
    /// so `target_dir` is left untouched.
    pub async fn extract(&self, archive: &Path, target_dir: &Path) -> Result<ExtractOutcome> {
        let extractor = tools::locate(
            Tool::Extractor,
            self.config.extractor_path.as_deref(),
            self.working_dir.as_deref(),
        )?;

        let args = Self::build_args(archive, target_dir);
        info!("Extracting {} to {}", archive.display(), target_dir.display());
        debug!("{} {}", extractor.display(), args.join(" "));

        let mut cmd = Command::new(&extractor);
        cmd.args(&args);

        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let status = self.status.clone();

        let result = run_draining(
            cmd,
            "extraction",
            self.config.phase_timeout,
            move |kind, line| match kind {
                StreamKind::Stdout => match parse_extraction_progress(line) {
                    Some(progress) => status.show_extraction(progress),
                    None => trace!("7z: {}", line),
                },
                StreamKind::Stderr => {
                    status.println(format!("[error] {}", line.trim_end()));
                    if let Ok(mut errors) = sink.lock() {
                        errors.push(line.trim_end().to_string());
                    }
                }
            },
        )
        .await;
        self.status.finish();
        let outcome = result?;

        let error_lines = errors
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());

        if !outcome.success() {
            warn!("Extractor exited with {:?}", outcome.exit_code);
        }

        Ok(ExtractOutcome {
            exit_code: outcome.exit_code,
            error_lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PatchError;
    use tempfile::{tempdir, TempDir};

    #[test]
    fn test_build_args() {
        let args = ExtractionOrchestrator::build_args(
            Path::new("/tmp/patch_1.7z"),
            Path::new("/games/GTNH/.minecraft"),
        );
        assert_eq!(
            args,
            vec![
                "x",
                "/tmp/patch_1.7z",
                "-o/games/GTNH/.minecraft",
                "-y",
                "-bsp1",
                "-bb0"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_extractor_leaves_target_untouched() {
        let dir = tempdir().unwrap();
        let target = dir.path().join(".minecraft");
        std::fs::create_dir_all(&target).unwrap();

        let config = PatchConfig {
            extractor_path: Some(dir.path().join("no-7zr")),
            ..Default::default()
        };
        let orch = ExtractionOrchestrator::new(&config).with_status(StatusLine::hidden());

        let err = orch
            .extract(&dir.path().join("patch.7z"), &target)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PatchError>(),
            Some(PatchError::ToolMissing { tool: "7-Zip", .. })
        ));
        assert_eq!(std::fs::read_dir(&target).unwrap().count(), 0);
    }

    /// Fake 7z: `$out` is the directory from `-o<dir>`
    #[cfg(unix)]
    fn fake_extractor(body: &str) -> (TempDir, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let script = dir.path().join("7zr");
        let content = format!(
            "#!/bin/sh\n\
             out=\n\
             for arg in \"$@\"; do\n\
               case \"$arg\" in\n\
                 -o*) out=\"${{arg#-o}}\" ;;\n\
               esac\n\
             done\n\
             {}\n",
            body
        );
        std::fs::write(&script, content).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, script)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extract_progress_and_output() {
        let body = "printf '  5%%\\b\\b\\b\\b 45%%\\b\\b\\b\\b100%%\\n'\n\
                    echo patched > \"$out/config.txt\"\n\
                    echo 'Everything is Ok'";
        let (dir, script) = fake_extractor(body);
        let target = dir.path().join(".minecraft");
        std::fs::create_dir_all(&target).unwrap();

        let config = PatchConfig {
            extractor_path: Some(script),
            ..Default::default()
        };
        let status = StatusLine::hidden();
        let orch = ExtractionOrchestrator::new(&config).with_status(status.clone());

        let outcome = orch
            .extract(&dir.path().join("patch.7z"), &target)
            .await
            .unwrap();
        assert!(outcome.is_clean());
        assert_eq!(status.position(), 100);
        assert!(target.join("config.txt").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extract_stderr_surfaced_not_fatal() {
        let body = "echo 'ERROR: Data Error : mods/broken.jar' >&2\n\
                    echo ' 50%'\n\
                    exit 2";
        let (dir, script) = fake_extractor(body);
        let target = dir.path().join(".minecraft");
        std::fs::create_dir_all(&target).unwrap();

        let config = PatchConfig {
            extractor_path: Some(script),
            ..Default::default()
        };
        let orch = ExtractionOrchestrator::new(&config).with_status(StatusLine::hidden());

        let outcome = orch
            .extract(&dir.path().join("patch.7z"), &target)
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, Some(2));
        assert_eq!(outcome.error_lines, vec!["ERROR: Data Error : mods/broken.jar"]);
        assert!(!outcome.is_clean());
    }
}
