//! Contained traversal of an untrusted directory tree.
//!
//! The walk keeps an explicit frontier of directories. Each pending directory
//! carries the real paths of its ancestors, and a symlinked directory that
//! points back into that chain is not entered, so cycles terminate. Entries
//! are visited in name order, and a directory reachable through two names is
//! walked under both, so the relative paths never depend on listing order.
//!
//! Symlinks are resolved and followed only while their real target stays
//! under the real root. Unreadable entries, broken links and oversized files
//! are skipped; nothing here aborts the walk.

use crate::error::{CoreError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files above this size are neither hashed nor scanned.
pub const MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainedFile {
    /// Real location on disk, safe to open.
    pub path: PathBuf,
    /// `/`-separated path relative to the root, as seen through the tree.
    pub relative: String,
    pub size: u64,
}

struct PendingDir {
    real: PathBuf,
    relative: String,
    /// Real paths from the root down to and including `real`.
    ancestors: Vec<PathBuf>,
}

/// Exact-equality or component-prefix containment.
pub fn is_within(candidate: &Path, root: &Path) -> bool {
    candidate == root || candidate.starts_with(root)
}

/// Resolve `path` and require its real target to sit under `real_root`.
pub fn resolve_within(path: &Path, real_root: &Path) -> Result<PathBuf> {
    let real = fs::canonicalize(path).map_err(|e| CoreError::io("resolve link", path, e))?;
    if is_within(&real, real_root) {
        Ok(real)
    } else {
        Err(CoreError::BoundaryViolation {
            path: path.to_path_buf(),
            root: real_root.to_path_buf(),
        })
    }
}

/// All regular files reachable under `root`, sorted by relative path.
/// A root that is itself a file yields that single file.
pub fn contained_files(root: &Path) -> Vec<ContainedFile> {
    let real_root = match fs::canonicalize(root) {
        Ok(p) => p,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "walk root unavailable");
            return Vec::new();
        }
    };
    let root_meta = match fs::metadata(&real_root) {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };
    if root_meta.is_file() {
        let name = real_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if root_meta.len() > MAX_FILE_BYTES {
            debug!(path = %real_root.display(), "skipping oversized file");
            return Vec::new();
        }
        return vec![ContainedFile {
            path: real_root,
            relative: name,
            size: root_meta.len(),
        }];
    }

    let mut files = Vec::new();
    let mut frontier = vec![PendingDir {
        real: real_root.clone(),
        relative: String::new(),
        ancestors: vec![real_root.clone()],
    }];

    while let Some(PendingDir {
        real: dir,
        relative: prefix,
        ancestors,
    }) = frontier.pop()
    {
        let mut entries: Vec<fs::DirEntry> = match fs::read_dir(&dir) {
            Ok(e) => e.flatten().collect(),
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "unreadable directory");
                continue;
            }
        };
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };

            // `dir` is always a real path, so plain children are real too.
            let real = if file_type.is_symlink() {
                match resolve_within(&entry.path(), &real_root) {
                    Ok(real) => real,
                    Err(e) => {
                        debug!(%relative, error = %e, "skipping symlink");
                        continue;
                    }
                }
            } else {
                entry.path()
            };
            let meta = match fs::metadata(&real) {
                Ok(m) => m,
                Err(_) => continue,
            };

            if meta.is_dir() {
                if ancestors.contains(&real) {
                    debug!(%relative, "skipping symlink cycle");
                    continue;
                }
                let mut chain = ancestors.clone();
                chain.push(real.clone());
                frontier.push(PendingDir {
                    real,
                    relative,
                    ancestors: chain,
                });
            } else if meta.is_file() {
                if meta.len() > MAX_FILE_BYTES {
                    debug!(%relative, size = meta.len(), "skipping oversized file");
                    continue;
                }
                files.push(ContainedFile {
                    path: real,
                    relative,
                    size: meta.len(),
                });
            }
        }
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    files
}
