//! SHA-256 content snapshots of an extension tree, a persisted baseline, and
//! drift against it.
//!
//! The baseline is a trust anchor written explicitly by the caller after
//! content has been installed or approved. Writing replaces it wholesale.

use crate::error::Result;
use crate::store::{read_json, write_json_atomic};
use crate::walk::contained_files;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const BASELINE_VERSION: u32 = 1;
const BUFFER_SIZE: usize = 64 * 1024;

/// Relative path to hex SHA-256. Ordered, so iteration is deterministic.
pub type Snapshot = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeHash {
    pub hash: String,
    pub file_count: usize,
    pub files: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityBaseline {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub root_dir: String,
    pub files: Snapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityDrift {
    pub baseline_present: bool,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl IntegrityDrift {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Stream a file through SHA-256.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash every contained file under `root`. Files that vanish or cannot be
/// read mid-walk are left out.
pub fn snapshot(root: &Path) -> Snapshot {
    let mut files = Snapshot::new();
    for file in contained_files(root) {
        match hash_file(&file.path) {
            Ok(hash) => {
                files.insert(file.relative, hash);
            }
            Err(e) => debug!(path = %file.path.display(), error = %e, "unhashable file"),
        }
    }
    files
}

/// Hash of `"<hash>  <path>\n"` lines in path order.
pub fn aggregate_hash(files: &Snapshot) -> String {
    let mut hasher = Sha256::new();
    for (relative, hash) in files {
        hasher.update(hash.as_bytes());
        hasher.update(b"  ");
        hasher.update(relative.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

pub fn hash_tree(root: &Path) -> TreeHash {
    let files = snapshot(root);
    TreeHash {
        hash: aggregate_hash(&files),
        file_count: files.len(),
        files,
    }
}

/// Compare a fresh snapshot against baseline hashes. Lists come out sorted.
pub fn diff(baseline: &Snapshot, current: &Snapshot) -> IntegrityDrift {
    let mut drift = IntegrityDrift {
        baseline_present: true,
        ..Default::default()
    };
    for (path, expected) in baseline {
        match current.get(path) {
            Some(actual) if actual != expected => drift.modified.push(path.clone()),
            Some(_) => {}
            None => drift.removed.push(path.clone()),
        }
    }
    drift.added = current
        .keys()
        .filter(|p| !baseline.contains_key(*p))
        .cloned()
        .collect();
    drift
}

fn root_key(root: &Path) -> String {
    fs::canonicalize(root)
        .unwrap_or_else(|_| root.to_path_buf())
        .display()
        .to_string()
}

/// Owner of `integrity-baseline.json`.
pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when missing, malformed, or written by another version.
    pub fn load(&self) -> Option<IntegrityBaseline> {
        match read_json::<IntegrityBaseline>(&self.path, "integrity baseline") {
            Ok(Some(b)) if b.version == BASELINE_VERSION => Some(b),
            Ok(Some(b)) => {
                warn!(found = b.version, expected = BASELINE_VERSION, "ignoring baseline with unknown version");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable baseline");
                None
            }
        }
    }

    pub fn save(&self, baseline: &IntegrityBaseline) -> Result<()> {
        write_json_atomic(&self.path, baseline, "integrity baseline")
    }

    /// Snapshot `root` and persist it as the new baseline.
    pub fn write_baseline(&self, root: &Path) -> Result<IntegrityBaseline> {
        let baseline = IntegrityBaseline {
            version: BASELINE_VERSION,
            updated_at: Utc::now(),
            root_dir: root_key(root),
            files: snapshot(root),
        };
        self.save(&baseline)?;
        info!(root = %baseline.root_dir, files = baseline.files.len(), "integrity baseline written");
        Ok(baseline)
    }

    pub fn detect_drift(&self, root: &Path) -> IntegrityDrift {
        let baseline = match self.load() {
            Some(b) => b,
            None => return IntegrityDrift::default(),
        };
        let key = root_key(root);
        if baseline.root_dir != key {
            warn!(baseline_root = %baseline.root_dir, root = %key, "baseline belongs to another root");
            return IntegrityDrift::default();
        }

        let drift = diff(&baseline.files, &snapshot(root));
        if drift.is_clean() {
            info!(root = %key, files = baseline.files.len(), "integrity check passed");
        } else {
            error!(
                root = %key,
                added = drift.added.len(),
                removed = drift.removed.len(),
                modified = drift.modified.len(),
                "integrity drift detected"
            );
        }
        drift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hash_file_matches_known_digest() {
        let dir = tempdir().unwrap();
        let f = dir.path().join("hello.txt");
        fs::write(&f, b"hello world").unwrap();
        assert_eq!(
            hash_file(&f).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn aggregate_hash_uses_sorted_lines() {
        let mut files = Snapshot::new();
        files.insert("b".into(), "22".into());
        files.insert("a".into(), "11".into());
        let expected = hex::encode(Sha256::digest(b"11  a\n22  b\n"));
        assert_eq!(aggregate_hash(&files), expected);
    }

    #[test]
    fn diff_classifies_changes() {
        let mut base = Snapshot::new();
        base.insert("keep".into(), "1".into());
        base.insert("gone".into(), "2".into());
        base.insert("edit".into(), "3".into());
        let mut now = Snapshot::new();
        now.insert("keep".into(), "1".into());
        now.insert("edit".into(), "X".into());
        now.insert("new".into(), "4".into());

        let drift = diff(&base, &now);
        assert!(drift.baseline_present);
        assert_eq!(drift.added, vec!["new"]);
        assert_eq!(drift.removed, vec!["gone"]);
        assert_eq!(drift.modified, vec!["edit"]);
    }

    #[test]
    fn missing_baseline_reports_absent() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("integrity-baseline.json"));
        let drift = store.detect_drift(dir.path());
        assert!(!drift.baseline_present);
        assert!(drift.is_clean());
    }

    #[test]
    fn version_mismatch_and_garbage_load_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("integrity-baseline.json");
        let store = BaselineStore::new(&path);

        fs::write(&path, b"not json at all").unwrap();
        assert!(store.load().is_none());

        let future = serde_json::json!({
            "version": 99,
            "updatedAt": "2026-01-01T00:00:00Z",
            "rootDir": "/x",
            "files": {}
        });
        fs::write(&path, serde_json::to_vec(&future).unwrap()).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn baseline_of_other_root_is_ignored() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        let store = BaselineStore::new(dir.path().join("integrity-baseline.json"));
        store.write_baseline(&a).unwrap();
        assert!(!store.detect_drift(&b).baseline_present);
    }
}
