//! External process runner.
//!
//! Every tool we drive (downloader, extractor) is run through
//! [`run_draining`]: stdout and stderr are each drained by their own task
//! until end-of-stream, both readers are joined, and only then is the child
//! reaped. Draining only one pipe while the child fills the other one's OS
//! buffer would block the child forever.
//!
//! Output is split into segments on `\n`, `\r` and backspace, since progress
//! printers (7z `-bsp1`) redraw in place instead of emitting newlines.
//! Bytes are decoded lossily so a non-UTF-8 line never stops a reader.

use anyhow::{Context, Result};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::PatchError;

const READ_CHUNK: usize = 8 * 1024;

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Result of a fully drained subprocess
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code (None when killed by a signal)
    pub exit_code: Option<i32>,
    /// Non-empty lines seen on stdout
    pub stdout_lines: usize,
    /// Non-empty lines seen on stderr
    pub stderr_lines: usize,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Spawn `cmd`, feed every non-empty output line to `on_line`, and wait for
/// both readers and the child to finish.
///
/// With a `timeout`, the child is killed once the deadline passes and
/// [`PatchError::Timeout`] is returned.
pub async fn run_draining<F>(
    mut cmd: Command,
    phase: &'static str,
    timeout: Option<Duration>,
    on_line: F,
) -> Result<ProcessOutcome>
where
    F: Fn(StreamKind, &str) + Send + Sync + 'static,
{
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", phase))?;

    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let handler = Arc::new(on_line);
    let mut stdout_task = spawn_reader(stdout, StreamKind::Stdout, handler.clone());
    let mut stderr_task = spawn_reader(stderr, StreamKind::Stderr, handler);

    let finished = async {
        let (out, err) = tokio::join!(&mut stdout_task, &mut stderr_task);
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, out.unwrap_or(0), err.unwrap_or(0)))
    };

    let result = match timeout {
        Some(limit) => {
            let timed = tokio::time::timeout(limit, finished).await;
            match timed {
                Ok(result) => result,
                Err(_) => {
                    warn!("{} exceeded {}s, killing", phase, limit.as_secs());
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill {}: {}", phase, e);
                    }
                    stdout_task.abort();
                    stderr_task.abort();
                    return Err(PatchError::Timeout {
                        phase,
                        timeout: limit,
                    }
                    .into());
                }
            }
        }
        None => finished.await,
    };

    let (status, stdout_lines, stderr_lines) =
        result.with_context(|| format!("Failed to wait for {}", phase))?;

    debug!(
        "{} exited with {:?} ({} stdout / {} stderr lines)",
        phase,
        status.code(),
        stdout_lines,
        stderr_lines
    );

    Ok(ProcessOutcome {
        exit_code: status.code(),
        stdout_lines,
        stderr_lines,
    })
}

fn spawn_reader<R, F>(reader: R, kind: StreamKind, handler: Arc<F>) -> JoinHandle<usize>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: Fn(StreamKind, &str) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut count = 0usize;
        let result = drain_segments(reader, |segment| {
            count += 1;
            handler(kind, segment);
        })
        .await;

        if let Err(e) = result {
            warn!("Error reading {:?}: {}", kind, e);
        }
        count
    })
}

/// Read `reader` to end, calling `emit` for each non-blank segment.
async fn drain_segments<R, E>(mut reader: R, mut emit: E) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    E: FnMut(&str),
{
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        for &byte in &chunk[..n] {
            if matches!(byte, b'\n' | b'\r' | 0x08) {
                flush_segment(&mut pending, &mut emit);
            } else {
                pending.push(byte);
            }
        }
    }

    flush_segment(&mut pending, &mut emit);
    Ok(())
}

fn flush_segment<E: FnMut(&str)>(pending: &mut Vec<u8>, emit: &mut E) {
    if pending.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(pending);
    if !text.trim().is_empty() {
        emit(&text);
    }
    pending.clear();
}
