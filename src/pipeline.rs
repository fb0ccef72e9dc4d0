//! The update pipeline: locate → download → extract.
//!
//! Stages run strictly in sequence on one task. The caller registers a
//! [`RunGuard`] for the run's [`WorkingPaths`] before calling
//! [`PatchPipeline::run`], so cleanup happens whichever way the run ends.
//!
//! An interrupt drops the in-flight stage future, which kills the running
//! subprocess (`kill_on_drop`), before control returns to the caller. Only
//! then is it safe to clean up: a still-running downloader would recreate
//! the temp archive.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use std::future::Future;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::PatchConfig;
use crate::download::DownloadOrchestrator;
use crate::error::PatchError;
use crate::extract::{ExtractOutcome, ExtractionOrchestrator};
use crate::lifecycle::{RunGuard, WorkingPaths};
use crate::locator::{HttpCheck, PatchLocator, UrlCheck};
use crate::progress::StatusLine;
use crate::proxy::{ProxyConfig, ProxyResolver};
use crate::tools::Tool;

/// How a run ended, when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing published in the search window
    NoPatch { window_days: u32 },
    /// Patch downloaded and extracted
    Updated {
        url: String,
        extraction: ExtractOutcome,
    },
    /// Stopped by an interrupt; any subprocess has been killed
    Interrupted,
}

impl RunOutcome {
    /// Whether the run should exit with status 0
    pub fn is_success(&self) -> bool {
        match self {
            RunOutcome::NoPatch { .. } => true,
            RunOutcome::Updated { extraction, .. } => extraction.exit_code == Some(0),
            RunOutcome::Interrupted => false,
        }
    }
}

/// One patch run over a fixed configuration.
pub struct PatchPipeline<'a, P: UrlCheck> {
    config: &'a PatchConfig,
    checker: P,
    proxy: ProxyConfig,
    show_progress: bool,
}

impl<'a> PatchPipeline<'a, HttpCheck> {
    /// Pipeline using the host's proxy settings and real HEAD requests
    pub fn from_system(config: &'a PatchConfig) -> Result<Self> {
        let proxy = ProxyResolver::from_system().resolve();
        let checker = HttpCheck::new(config, &proxy)?;
        Ok(Self::new(config, checker, proxy))
    }
}

impl<'a, P: UrlCheck> PatchPipeline<'a, P> {
    pub fn new(config: &'a PatchConfig, checker: P, proxy: ProxyConfig) -> Self {
        Self {
            config,
            checker,
            proxy,
            show_progress: true,
        }
    }

    /// Suppress the console progress bars
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn proxy(&self) -> &ProxyConfig {
        &self.proxy
    }

    /// Run the pipeline for today's UTC date until done or `interrupt` fires.
    pub async fn run<I>(
        &self,
        paths: &WorkingPaths,
        guard: &RunGuard,
        interrupt: I,
    ) -> Result<RunOutcome>
    where
        I: Future<Output = ()>,
    {
        self.run_until(Utc::now().date_naive(), paths, guard, interrupt)
            .await
    }

    /// Race the pipeline against `interrupt`.
    ///
    /// When `interrupt` wins, the pipeline future is dropped here, so any
    /// downloader or extractor child is killed before this returns.
    pub async fn run_until<I>(
        &self,
        today: NaiveDate,
        paths: &WorkingPaths,
        guard: &RunGuard,
        interrupt: I,
    ) -> Result<RunOutcome>
    where
        I: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run_on(today, paths, guard) => result,
            _ = interrupt => {
                warn!("Run interrupted");
                Ok(RunOutcome::Interrupted)
            }
        }
    }

    /// Run the pipeline with the search window ending at `today`.
    pub async fn run_on(
        &self,
        today: NaiveDate,
        paths: &WorkingPaths,
        guard: &RunGuard,
    ) -> Result<RunOutcome> {
        self.config.validate().map_err(PatchError::from)?;

        if let Some(source_dir) = &self.config.tools_source_dir {
            let sources = bundled_tools(source_dir);
            let report = guard.provision(&sources)?;
            info!(
                "Provisioned {} tool(s), skipped {}",
                report.provisioned.len(),
                report.skipped.len()
            );
        }

        let locator = PatchLocator::new(self.config, &self.checker);
        let candidate = match locator.locate(today, self.config.window_days).await {
            Ok(candidate) => candidate,
            Err(e) => match e.downcast_ref::<PatchError>() {
                Some(PatchError::PatchNotFound { window_days }) => {
                    println!("No patch found in the last {} day(s).", window_days);
                    return Ok(RunOutcome::NoPatch {
                        window_days: *window_days,
                    });
                }
                _ => return Err(e),
            },
        };

        let downloader = DownloadOrchestrator::new(self.config)
            .with_working_dir(guard.working_dir())
            .with_status(self.status(StatusLine::download));
        let download = downloader
            .download(&candidate.url, &paths.temp_archive, &self.proxy)
            .await?;

        if !download.success() {
            return Err(PatchError::DownloadIncomplete {
                path: paths.temp_archive.clone(),
                exit_code: download.exit_code,
            }
            .into());
        }
        println!("Download complete.");

        let extractor = ExtractionOrchestrator::new(self.config)
            .with_working_dir(guard.working_dir())
            .with_status(self.status(StatusLine::extraction));
        let extraction = extractor
            .extract(&paths.temp_archive, paths.install_dir.path())
            .await?;

        if extraction.exit_code == Some(0) {
            println!("Patch extracted to {}", paths.install_dir.path().display());
        } else {
            warn!("Extractor exited with {:?}", extraction.exit_code);
            println!(
                "Extraction completed with errors ({} error line(s)).",
                extraction.error_lines.len()
            );
        }

        Ok(RunOutcome::Updated {
            url: candidate.url,
            extraction,
        })
    }

    fn status(&self, visible: fn() -> StatusLine) -> StatusLine {
        if self.show_progress {
            visible()
        } else {
            StatusLine::hidden()
        }
    }
}

/// Tool binaries present in a bundle directory
fn bundled_tools(source_dir: &std::path::Path) -> Vec<PathBuf> {
    [Tool::Downloader, Tool::Extractor]
        .iter()
        .flat_map(|tool| tool.file_names().iter())
        .map(|name| source_dir.join(name))
        .filter(|path| path.is_file())
        .collect()
}
