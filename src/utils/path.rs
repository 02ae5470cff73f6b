//! Path helpers for output directories and file names

use std::path::{Path, PathBuf};

use crate::error::EventCamResult;

/// Reduce a stream name to characters that are safe in every file system
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "stream".to_string()
    } else {
        cleaned
    }
}

/// Make sure `dir` exists, creating parents as needed
pub fn ensure_directory(dir: &Path) -> EventCamResult<()> {
    if !dir.as_os_str().is_empty() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Directory a file lives in, `.` for bare file names
pub fn parent_or_current(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Move a file, falling back to copy + delete across devices
pub fn move_file(from: &Path, to: &Path) -> EventCamResult<()> {
    if let Some(parent) = to.parent() {
        ensure_directory(parent)?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)?;
    Ok(())
}
