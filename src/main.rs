//! patch-updater - keeps a game client on the latest dated patch
//!
//! Finds the newest patch published in the last few days, downloads it with
//! aria2c and extracts it over the `.minecraft` directory with 7-Zip.

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use patch_updater::config::{InstallDir, PatchConfig, DEFAULT_RELEASE_HOST, DEFAULT_WINDOW_DAYS};
use patch_updater::error::PatchError;
use patch_updater::lifecycle::{CleanupReport, RunGuard, WorkingPaths};
use patch_updater::locator::{HttpCheck, PatchLocator};
use patch_updater::pipeline::{PatchPipeline, RunOutcome};
use patch_updater::proxy::ProxyResolver;
use patch_updater::settings::Settings;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "patch-updater")]
#[command(version)]
#[command(about = "Download and apply the latest dated client patch")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Path to the .minecraft directory to patch
    #[arg(long, env = "GTNHDir", global = true)]
    game_dir: Option<String>,

    /// Number of days (including today) to look back for a patch
    #[arg(long, default_value_t = DEFAULT_WINDOW_DAYS, global = true)]
    window: u32,

    /// Base URL patches are published under
    #[arg(long, default_value = DEFAULT_RELEASE_HOST, global = true)]
    release_host: String,

    /// Path to the aria2c binary
    #[arg(long)]
    aria2c: Option<PathBuf>,

    /// Path to the 7-Zip binary (7zr, 7z or 7zz)
    #[arg(long)]
    sevenzip: Option<PathBuf>,

    /// Directory with bundled aria2c/7zr to provision for this run
    #[arg(long)]
    tools_dir: Option<PathBuf>,

    /// Kill the downloader or extractor after this many seconds
    #[arg(long)]
    phase_timeout: Option<u64>,

    /// Don't wait for Enter before exiting
    #[arg(short, long)]
    yes: bool,
}

impl RunArgs {
    fn to_config(&self) -> PatchConfig {
        PatchConfig {
            release_host: self.release_host.clone(),
            window_days: self.window,
            downloader_path: self.aria2c.clone(),
            extractor_path: self.sevenzip.clone(),
            tools_source_dir: self.tools_dir.clone(),
            phase_timeout: self.phase_timeout.map(Duration::from_secs),
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Only find the newest published patch and print its URL
    Locate,

    /// Show or change persisted settings
    Settings {
        /// Validate and store a new install directory
        #[arg(long)]
        install_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(if cli.verbose {
                "patch_updater=debug".parse()?
            } else {
                "patch_updater=warn".parse()?
            }))
            .init();
    }

    match cli.command {
        Some(Commands::Locate) => {
            let config = cli.run.to_config();
            config.validate().map_err(PatchError::from)?;

            let proxy = ProxyResolver::from_system().resolve();
            let checker = HttpCheck::new(&config, &proxy)?;
            let locator = PatchLocator::new(&config, &checker);

            match locator.locate_latest().await {
                Ok(candidate) => println!("{}", candidate.url),
                Err(e) => match e.downcast_ref::<PatchError>() {
                    Some(err) if err.is_clean_exit() => println!("{}", err),
                    _ => return Err(e),
                },
            }
        }

        Some(Commands::Settings { install_dir }) => {
            let mut settings = Settings::load();
            if let Some(raw) = install_dir {
                let dir = InstallDir::new(&raw).map_err(PatchError::from)?;
                settings.set_install_dir(&dir);
                settings.save()?;
                println!("Install directory set to {}", dir.path().display());
            } else {
                println!("Settings file:     {}", Settings::settings_path()?.display());
                let shown = if settings.install_dir.is_empty() {
                    "(not set)"
                } else {
                    settings.install_dir.as_str()
                };
                println!("Install directory: {}", shown);
            }
        }

        None => {
            let outcome = run_update(&cli.run).await?;
            if outcome == RunOutcome::Interrupted {
                std::process::exit(130);
            }
            if !cli.run.yes {
                pause();
            }
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Full update run. Cleanup has already happened when this returns.
async fn run_update(args: &RunArgs) -> Result<RunOutcome> {
    let config = args.to_config();
    let install_dir = resolve_install_dir(args.game_dir.as_deref())?;

    println!("Patch Updater");
    println!("Install directory: {}", install_dir.path().display());
    println!();

    let paths = WorkingPaths::new(install_dir, &config.archive_ext)?;
    let guard = RunGuard::register(&paths);

    let result = async {
        let pipeline = PatchPipeline::from_system(&config)?;
        pipeline.run(&paths, &guard, ctrl_c()).await
    }
    .await;

    if matches!(result, Ok(RunOutcome::Interrupted)) {
        println!("\nInterrupted, cleaning up...");
    }
    print_cleanup(&guard.cleanup());

    let outcome = result?;
    if let RunOutcome::Updated { extraction, .. } = &outcome {
        if extraction.exit_code == Some(0) {
            println!("\nUpdate complete!");
        }
    }
    Ok(outcome)
}

/// Resolves on Ctrl-C; never resolves if the handler can't be installed
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// `--game-dir`/`GTNHDir` first, then the stored setting, then ask.
fn resolve_install_dir(explicit: Option<&str>) -> Result<InstallDir> {
    if let Some(raw) = explicit {
        match InstallDir::new(raw) {
            Ok(dir) => return Ok(dir),
            Err(e) => println!("{}", e),
        }
    }

    let mut settings = Settings::load();
    if let Some(dir) = settings.valid_install_dir() {
        return Ok(dir);
    }

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("Enter the path to your .minecraft directory: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else {
            bail!("No install directory given");
        };

        match InstallDir::new(&line?) {
            Ok(dir) => {
                settings.set_install_dir(&dir);
                if let Err(e) = settings.save() {
                    warn!("Could not save install directory: {:#}", e);
                }
                return Ok(dir);
            }
            Err(e) => println!("{}", e),
        }
    }
}

fn print_cleanup(report: &CleanupReport) {
    if report.removed_archive {
        println!("Removed temporary download.");
    }
    if report.removed_working_dir {
        println!("Removed tool directory.");
    }
    if report.warnings > 0 {
        println!("{} item(s) could not be cleaned up.", report.warnings);
    }
}

fn pause() {
    print!("Press Enter to exit...");
    std::io::stdout().flush().ok();
    let mut input = String::new();
    std::io::stdin().read_line(&mut input).ok();
}
