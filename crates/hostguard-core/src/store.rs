//! Crash-safe persistence for the file-backed ledgers.
//!
//! Every write goes to a staging file in the same directory as the target,
//! is fsynced, and is then renamed into place. A crash mid-write leaves
//! either the old file or the new one, never a torn mix. There is no locking:
//! two concurrent writers race and the last rename wins.

use crate::error::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const STAGING_SUFFIX: &str = ".staging";

/// Read and decode a JSON document. `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path, what: &'static str) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CoreError::io("read", path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| CoreError::Parse {
            what,
            path: path.to_path_buf(),
            source,
        })
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T, what: &'static str) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| CoreError::Parse {
        what,
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &json)
}

/// Replace `dest` with `bytes` via staging file + rename.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| CoreError::io("create parent dir", &parent, e))?;

    let staging = staging_path(&parent, dest);
    let written = (|| -> io::Result<()> {
        let mut file = File::create(&staging)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&staging);
        return Err(CoreError::io("write staging file", &staging, e));
    }

    if let Err(e) = fs::rename(&staging, dest) {
        let _ = fs::remove_file(&staging);
        return Err(CoreError::io("rename into place", dest, e));
    }
    fsync_dir(&parent);
    Ok(())
}

fn staging_path(parent: &Path, dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "ledger".to_string());
    parent.join(format!(".{}.{}{}", name, Uuid::new_v4().simple(), STAGING_SUFFIX))
}

#[cfg(unix)]
fn fsync_dir(path: &Path) {
    if let Ok(dir) = fs::OpenOptions::new().read(true).open(path) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn fsync_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        version: u32,
        name: String,
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let got: Option<Doc> = read_json(&dir.path().join("nope.json"), "doc").unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_staging() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, b"old").unwrap();

        let doc = Doc { version: 1, name: "a".into() };
        write_json_atomic(&path, &doc, "doc").unwrap();

        let back: Doc = read_json(&path, "doc").unwrap().unwrap();
        assert_eq!(back, doc);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(STAGING_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, b"{not json").unwrap();
        let err = read_json::<Doc>(&path, "doc").unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
    }
}
