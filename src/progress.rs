//! Progress line parsing and console status rendering.
//!
//! The downloader (aria2c) emits periodic summary lines like
//!
//! ```text
//! *** Download Progress Summary as of Sat, 27 Jan 2024 20:18:24 GMT ***
//! - [#70a74d 32MiB/120MiB(26%) CN:16 DL:1.2MiB ETA:1m]
//! ```
//!
//! and the extractor (7z with `-bsp1`) emits bare percentages like ` 45%`.
//! Parsers here are stateless; anything that does not match is simply not
//! progress.

use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use regex::Regex;

static DOWNLOAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[#\w+\s+([\d.]+[KMGT]?i?B)/([\d.]+[KMGT]?i?B)\((\d+)%\).*?DL:([\d.]+[KMGT]?i?B)")
        .expect("download progress pattern")
});

static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)(\d{1,3})%").expect("percent pattern"));

/// Snapshot of a transfer, as reported by the downloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded: String,
    pub total: String,
    pub percent: u8,
    pub speed: String,
}

/// Snapshot of an extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionProgress {
    pub percent: u8,
}

/// Parse a downloader summary line.
pub fn parse_download_progress(line: &str) -> Option<DownloadProgress> {
    let caps = DOWNLOAD_RE.captures(line)?;
    let percent = parse_percent(caps.get(3)?.as_str())?;

    Some(DownloadProgress {
        downloaded: caps.get(1)?.as_str().to_string(),
        total: caps.get(2)?.as_str().to_string(),
        percent,
        speed: caps.get(4)?.as_str().to_string(),
    })
}

/// Parse the first standalone percentage in an extractor line.
pub fn parse_extraction_progress(line: &str) -> Option<ExtractionProgress> {
    let caps = PERCENT_RE.captures(line)?;
    let percent = parse_percent(caps.get(1)?.as_str())?;
    Some(ExtractionProgress { percent })
}

fn parse_percent(s: &str) -> Option<u8> {
    s.parse::<u8>().ok().filter(|p| *p <= 100)
}

/// Single overwritten console status line.
///
/// Backed by an indicatif bar so concurrent writers from both stream
/// readers never interleave partial lines.
#[derive(Clone)]
pub struct StatusLine {
    bar: ProgressBar,
}

impl StatusLine {
    /// Status line for download progress
    pub fn download() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("Downloading: [{bar:30.cyan/blue}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }

    /// Status line for extraction progress
    pub fn extraction() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("Extracting:  [{bar:30.green/white}] {pos}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }

    /// A status line that renders nothing (tests, non-interactive use)
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn show_download(&self, progress: &DownloadProgress) {
        self.bar.set_position(progress.percent as u64);
        self.bar.set_message(format!(
            "{}/{} ({}%) speed: {}/s",
            progress.downloaded, progress.total, progress.percent, progress.speed
        ));
    }

    pub fn show_extraction(&self, progress: ExtractionProgress) {
        self.bar.set_position(progress.percent as u64);
    }

    /// Print a full line above the status line without clobbering it
    pub fn println(&self, line: impl AsRef<str>) {
        self.bar.println(line);
    }

    /// Last rendered position (0-100)
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Leave the last state on screen and move to a fresh line
    pub fn finish(&self) {
        self.bar.abandon();
    }
}
