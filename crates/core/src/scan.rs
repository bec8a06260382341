//! Working-tree scanner
//!
//! Walks the repository root and produces the current set of capturable
//! entries in deterministic (lexicographic) path order. Every call rescans
//! from disk; no state is carried between invocations.
//!
//! Policy decisions, held consistent because they affect digest
//! reproducibility:
//! - `.capsy/` and `.git/` are always excluded, plus any configured ignore
//!   prefixes.
//! - Symlinks are never followed; they are recorded as a distinct entry kind
//!   whose content is the link target path.
//! - Other special files (fifos, sockets, devices) are skipped.
//! - Empty directories are not captured; directories exist implicitly through
//!   the paths of their children.

use crate::error::{Error, Result};
use crate::store::always_ignored;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Kind of scanned entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    File,
    Symlink,
}

/// One capturable working-tree entry
#[derive(Debug, Clone)]
pub struct ScanEntry {
    /// Path relative to the repository root
    pub path: PathBuf,
    pub kind: ScanKind,
    /// Unix permission bits
    pub mode: u32,
    /// File size in bytes
    pub size: u64,
    /// Modification time, Unix milliseconds
    pub mtime_ms: u64,
}

/// Scan the working tree rooted at `root`
///
/// `exclusions` are path prefixes relative to `root`, on top of the always
/// excluded `.capsy/` and `.git/`.
pub fn scan(root: &Path, exclusions: &[PathBuf]) -> Result<Vec<ScanEntry>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let rel = match e.path().strip_prefix(root) {
                Ok(rel) => rel,
                Err(_) => return true,
            };
            if rel.as_os_str().is_empty() {
                return true; // the root itself
            }
            if always_ignored(rel) {
                return false;
            }
            !exclusions.iter().any(|ex| rel.starts_with(ex))
        });

    for entry in walker {
        let entry = entry.map_err(walk_error)?;
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => continue,
        };

        let file_type = entry.file_type();

        if file_type.is_symlink() {
            let metadata = entry
                .metadata()
                .map_err(|e| walk_error_at(&rel, e))?;
            entries.push(ScanEntry {
                path: rel,
                kind: ScanKind::Symlink,
                mode: 0o120000,
                size: metadata.len(),
                mtime_ms: mtime_ms(&metadata),
            });
        } else if file_type.is_file() {
            let metadata = entry
                .metadata()
                .map_err(|e| walk_error_at(&rel, e))?;
            entries.push(ScanEntry {
                mode: file_mode(&metadata),
                size: metadata.len(),
                mtime_ms: mtime_ms(&metadata),
                path: rel,
                kind: ScanKind::File,
            });
        }
        // Directories are implicit; other special files are skipped.
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn walk_error(err: walkdir::Error) -> Error {
    let path = err
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
    Error::capture(path, source)
}

fn walk_error_at(path: &Path, err: walkdir::Error) -> Error {
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("metadata unavailable"));
    Error::capture(path, source)
}

fn mtime_ms(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        metadata.mode()
    }
    #[cfg(not(unix))]
    {
        if metadata.permissions().readonly() {
            0o444
        } else {
            0o644
        }
    }
}
