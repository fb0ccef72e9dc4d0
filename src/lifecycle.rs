//! Working paths and guaranteed cleanup for a patch run.
//!
//! A run owns exactly one temporary archive path (`patch_<uuid>.<ext>` in
//! the system temp dir) and may provision auxiliary tool binaries into a
//! hidden working directory. [`RunGuard`] is registered before any other
//! work and removes both when the run ends: explicitly via
//! [`RunGuard::cleanup`], on Ctrl-C, or when the last handle is dropped
//! (which also covers panics). Cleanup runs at most once.
//!
//! The working directory may be shared with other runs, so it is only
//! removed when it is empty after our known auxiliary files are deleted.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::InstallDir;

/// Name of the hidden working directory for provisioned tools
pub const WORKING_DIR_NAME: &str = ".patch-updater-tools";

/// Filesystem locations used by one run
#[derive(Debug, Clone)]
pub struct WorkingPaths {
    /// Unique per-run download target, owned exclusively by this run
    pub temp_archive: PathBuf,
    /// Hidden directory for provisioned tool binaries (may be shared)
    pub working_dir: PathBuf,
    /// Validated target directory, never owned
    pub install_dir: InstallDir,
}

impl WorkingPaths {
    /// Paths rooted in the system temp dir, working dir next to the executable.
    pub fn new(install_dir: InstallDir, archive_ext: &str) -> Result<Self> {
        let exe_dir = std::env::current_exe()
            .context("Failed to determine executable path")?
            .parent()
            .map(Path::to_path_buf)
            .context("Executable has no parent directory")?;

        Ok(Self::with_roots(
            install_dir,
            &std::env::temp_dir(),
            &exe_dir,
            archive_ext,
        ))
    }

    /// Paths under explicit temp and working-dir roots.
    pub fn with_roots(
        install_dir: InstallDir,
        temp_root: &Path,
        working_root: &Path,
        archive_ext: &str,
    ) -> Self {
        let temp_archive = temp_root.join(format!("patch_{}.{}", Uuid::new_v4(), archive_ext));
        Self {
            temp_archive,
            working_dir: working_root.join(WORKING_DIR_NAME),
            install_dir,
        }
    }

    /// Directory the downloader writes into
    pub fn archive_dir(&self) -> &Path {
        self.temp_archive.parent().unwrap_or_else(|| Path::new("."))
    }

    /// File name the downloader writes
    pub fn archive_file_name(&self) -> String {
        self.temp_archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Result of provisioning auxiliary binaries
#[derive(Debug, Default, Clone)]
pub struct ProvisionReport {
    pub provisioned: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// What cleanup actually removed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_archive: bool,
    pub removed_aux_files: usize,
    pub removed_working_dir: bool,
    pub warnings: usize,
}

struct GuardInner {
    temp_archive: PathBuf,
    working_dir: PathBuf,
    aux_names: Mutex<Vec<String>>,
    done: AtomicBool,
}

/// Scoped owner of a run's temporary resources.
#[derive(Clone)]
pub struct RunGuard {
    inner: Arc<GuardInner>,
}

impl RunGuard {
    /// Register cleanup for `paths`. Call before any fallible work.
    pub fn register(paths: &WorkingPaths) -> Self {
        debug!("Registered cleanup for {}", paths.temp_archive.display());
        Self {
            inner: Arc::new(GuardInner {
                temp_archive: paths.temp_archive.clone(),
                working_dir: paths.working_dir.clone(),
                aux_names: Mutex::new(Vec::new()),
                done: AtomicBool::new(false),
            }),
        }
    }

    /// Copy bundled tool binaries into the working directory.
    ///
    /// Existing copies are replaced. A copy that cannot be removed (held open
    /// by another running instance) is skipped and left as is.
    pub fn provision(&self, sources: &[PathBuf]) -> Result<ProvisionReport> {
        let working_dir = &self.inner.working_dir;
        fs::create_dir_all(working_dir)
            .with_context(|| format!("Failed to create {}", working_dir.display()))?;

        let mut report = ProvisionReport::default();

        for source in sources {
            let Some(name) = source.file_name() else {
                continue;
            };
            let name_str = name.to_string_lossy().to_string();
            self.remember_aux(&name_str);

            let target = working_dir.join(name);
            if target.exists() {
                if let Err(e) = fs::remove_file(&target) {
                    warn!("{} is in use, keeping existing copy: {}", target.display(), e);
                    report.skipped.push(target);
                    continue;
                }
            }

            match fs::copy(source, &target) {
                Ok(_) => {
                    make_executable(&target);
                    debug!("Provisioned {}", target.display());
                    report.provisioned.push(target);
                }
                Err(e) => {
                    warn!("Failed to provision {}: {}", source.display(), e);
                    report.skipped.push(target);
                }
            }
        }

        Ok(report)
    }

    /// Working directory tools are provisioned into
    pub fn working_dir(&self) -> &Path {
        &self.inner.working_dir
    }

    /// Remove the temp archive and provisioned files. Only the first call
    /// does anything; later calls return an empty report.
    pub fn cleanup(&self) -> CleanupReport {
        self.inner.cleanup()
    }

    /// Whether cleanup already ran
    pub fn is_cleaned(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }

    fn remember_aux(&self, name: &str) {
        let mut names = self
            .inner
            .aux_names
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
}

impl GuardInner {
    fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        if self.done.swap(true, Ordering::SeqCst) {
            return report;
        }

        if self.temp_archive.exists() {
            match fs::remove_file(&self.temp_archive) {
                Ok(()) => {
                    info!("Removed temporary file {}", self.temp_archive.display());
                    report.removed_archive = true;
                }
                Err(e) => {
                    warn!(
                        "Could not remove temporary file {}: {}",
                        self.temp_archive.display(),
                        e
                    );
                    report.warnings += 1;
                }
            }
        }

        // aria2c leaves a control file next to an unfinished download
        let control = PathBuf::from(format!("{}.aria2", self.temp_archive.display()));
        if control.exists() && fs::remove_file(&control).is_err() {
            report.warnings += 1;
        }

        if !self.working_dir.is_dir() {
            return report;
        }

        let names = self
            .aux_names
            .lock()
            .map(|n| n.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());

        for name in &names {
            let path = self.working_dir.join(name);
            if !path.exists() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => report.removed_aux_files += 1,
                Err(e) => {
                    warn!("Could not remove {}: {}", path.display(), e);
                    report.warnings += 1;
                }
            }
        }

        let is_empty = fs::read_dir(&self.working_dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);

        if is_empty {
            match fs::remove_dir(&self.working_dir) {
                Ok(()) => {
                    info!("Removed working directory {}", self.working_dir.display());
                    report.removed_working_dir = true;
                }
                Err(e) => {
                    warn!(
                        "Could not remove working directory {}: {}",
                        self.working_dir.display(),
                        e
                    );
                    report.warnings += 1;
                }
            }
        }

        report
    }
}

impl Drop for GuardInner {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms).ok();
    }
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}
