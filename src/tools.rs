//! Locating the external tool binaries.
//!
//! Looks for each tool in the following locations:
//! 1. An explicitly configured path (no fallback when it is missing)
//! 2. The provisioned working directory
//! 3. `Assets/` and `bin/` next to the executable, then the executable's directory
//! 4. System PATH

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::PatchError;

/// External tools the pipeline drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// Multi-connection downloader (aria2c)
    Downloader,
    /// Archive extractor (7zr / 7z / 7zz)
    Extractor,
}

impl Tool {
    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Downloader => "aria2c",
            Tool::Extractor => "7-Zip",
        }
    }

    /// Binary file names to try, most preferred first
    pub fn file_names(&self) -> &'static [&'static str] {
        if cfg!(windows) {
            match self {
                Tool::Downloader => &["aria2c.exe"],
                Tool::Extractor => &["7zr.exe", "7z.exe", "7za.exe"],
            }
        } else {
            match self {
                Tool::Downloader => &["aria2c"],
                Tool::Extractor => &["7zr", "7zz", "7z", "7za"],
            }
        }
    }
}

/// Resolve a tool binary.
///
/// An explicit path is authoritative: if it does not exist the tool is
/// reported missing rather than silently replaced by something on PATH.
pub fn locate(
    tool: Tool,
    explicit: Option<&Path>,
    working_dir: Option<&Path>,
) -> Result<PathBuf, PatchError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(PatchError::ToolMissing {
            tool: tool.name(),
            path: path.to_path_buf(),
        });
    }

    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(dir) = working_dir {
        dirs.push(dir.to_path_buf());
    }
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir.join("Assets"));
        dirs.push(exe_dir.join("bin"));
        dirs.push(exe_dir);
    }

    if let Some(found) = find_in_dirs(tool, &dirs) {
        debug!("Found {} at {}", tool.name(), found.display());
        return Ok(found);
    }

    for name in tool.file_names() {
        if let Ok(path) = which::which(name) {
            debug!("Found {} on PATH at {}", tool.name(), path.display());
            return Ok(path);
        }
    }

    let expected = working_dir
        .map(Path::to_path_buf)
        .unwrap_or_default()
        .join(tool.file_names()[0]);
    Err(PatchError::ToolMissing {
        tool: tool.name(),
        path: expected,
    })
}

fn find_in_dirs(tool: Tool, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter().find_map(|dir| {
        tool.file_names()
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_explicit_path_used() {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("my-aria2c");
        std::fs::write(&bin, b"").unwrap();

        let found = locate(Tool::Downloader, Some(&bin), None).unwrap();
        assert_eq!(found, bin);
    }

    #[test]
    fn test_explicit_missing_is_tool_missing() {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("nope").join("aria2c");

        let err = locate(Tool::Downloader, Some(&bin), None).unwrap_err();
        match err {
            PatchError::ToolMissing { tool, path } => {
                assert_eq!(tool, "aria2c");
                assert_eq!(path, bin);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_working_dir_preferred() {
        let dir = tempdir().unwrap();
        let name = Tool::Extractor.file_names()[0];
        let bin = dir.path().join(name);
        std::fs::write(&bin, b"").unwrap();

        let found = locate(Tool::Extractor, None, Some(dir.path())).unwrap();
        assert_eq!(found, bin);
    }

    #[test]
    fn test_find_in_dirs_order() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        let names = Tool::Extractor.file_names();
        // Less preferred name in the first dir still wins over the second dir
        std::fs::write(first.path().join(names[names.len() - 1]), b"").unwrap();
        std::fs::write(second.path().join(names[0]), b"").unwrap();

        let found = find_in_dirs(
            Tool::Extractor,
            &[first.path().to_path_buf(), second.path().to_path_buf()],
        )
        .unwrap();
        assert_eq!(found, first.path().join(names[names.len() - 1]));
    }
}
