//! File-tree snapshot of the sandbox root, taken once before the loop starts.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::core::types::FileEntry;

/// Walk `root` recursively and list every file, sorted by relative path.
///
/// A missing root yields an empty snapshot.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn snapshot(root: &Path) -> Result<Vec<FileEntry>> {
    if !root.is_dir() {
        warn!("allowed root is not a directory; file tree is empty");
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    walk(root, root, &mut entries)?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(files = entries.len(), "file tree snapshot taken");
    Ok(entries)
}

fn walk(root: &Path, dir: &Path, entries: &mut Vec<FileEntry>) -> Result<()> {
    let read_dir = fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    for entry in read_dir {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", path.display()))?;
        if file_type.is_dir() {
            walk(root, &path, entries)?;
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let metadata = fs::metadata(&path).ok();
        entries.push(FileEntry {
            path: relative_string(relative),
            length: metadata.as_ref().map(fs::Metadata::len),
            last_write: metadata
                .and_then(|m| m.modified().ok())
                .map(|modified| format_timestamp(DateTime::<Utc>::from(modified))),
        });
    }
    Ok(())
}

fn relative_string(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Read a file and encode it as standard base64.
pub fn read_base64(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}
