//! Atomic file output
//!
//! Files are written to a sibling temp file and renamed into place, so a
//! reader never sees a half-written document.

use crate::{Error, Result};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("output"));
    name.push(".tmp");
    target.with_file_name(name)
}

/// Write `content` to `target` via temp file + rename, creating parent dirs
pub fn write_atomic(target: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp = temp_path(target);
    std::fs::write(&temp, content)?;

    if let Err(e) = std::fs::rename(&temp, target) {
        let _ = std::fs::remove_file(&temp);
        return Err(Error::Io(e));
    }
    Ok(())
}

/// Serialize `value` as pretty-printed JSON and write it atomically
pub fn write_json_file<T: Serialize>(value: &T, target: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(target, json.as_bytes())?;
    debug!(path = %target.display(), bytes = json.len(), "Wrote JSON file");
    Ok(())
}
