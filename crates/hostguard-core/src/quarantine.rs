//! Quarantine zone for flagged extension trees.
//!
//! Items are moved, never copied-and-kept, into the quarantine root under
//! `{YYYYMMDD}-{name}-{random}`. The ledger in `quarantine-records.json` is
//! the only authority on whether an item is still quarantined.
//!
//! The ledger is load/mutate/replace with no locking. Sequential callers are
//! safe; two processes mutating it at once can lose a record.

use crate::error::{CoreError, Result};
use crate::store::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantineRecord {
    pub id: String,
    pub item_name: String,
    pub original_path: PathBuf,
    pub quarantine_path: PathBuf,
    pub detected_rule_ids: BTreeSet<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_at: Option<DateTime<Utc>>,
}

impl QuarantineRecord {
    pub fn is_active(&self) -> bool {
        self.restored_at.is_none()
    }

    fn matches(&self, identifier: &str) -> bool {
        self.id == identifier || self.item_name == identifier
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFile {
    pub version: u32,
    pub records: Vec<QuarantineRecord>,
}

impl Default for LedgerFile {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            records: Vec::new(),
        }
    }
}

/// Owner of `quarantine-records.json`.
pub struct QuarantineLedger {
    path: PathBuf,
}

impl QuarantineLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Missing, malformed, or foreign-version ledgers read as empty.
    pub fn load(&self) -> LedgerFile {
        match read_json::<LedgerFile>(&self.path, "quarantine ledger") {
            Ok(Some(ledger)) if ledger.version == LEDGER_VERSION => ledger,
            Ok(Some(ledger)) => {
                warn!(found = ledger.version, expected = LEDGER_VERSION, "ignoring quarantine ledger with unknown version");
                LedgerFile::default()
            }
            Ok(None) => LedgerFile::default(),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable quarantine ledger");
                LedgerFile::default()
            }
        }
    }

    pub fn save(&self, ledger: &LedgerFile) -> Result<()> {
        write_json_atomic(&self.path, ledger, "quarantine ledger")
    }
}

pub struct Quarantine {
    root: PathBuf,
    ledger: QuarantineLedger,
}

impl Quarantine {
    pub fn new(root: impl Into<PathBuf>, ledger: QuarantineLedger) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| CoreError::io("create quarantine dir", &root, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&root, fs::Permissions::from_mode(0o700));
        }
        Ok(Self { root, ledger })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move `item` (file or directory) into quarantine and record it.
    pub fn quarantine<I, S>(&self, item: &Path, detected_rule_ids: I, reason: &str) -> Result<QuarantineRecord>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        fs::symlink_metadata(item).map_err(|e| CoreError::io("quarantine source", item, e))?;
        let original_path = absolute_item_path(item)?;
        let item_name = original_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
        let dest_name = format!("{}-{}-{:06x}", Utc::now().format("%Y%m%d"), item_name, suffix);
        let quarantine_path = self.root.join(dest_name);
        if quarantine_path.exists() {
            return Err(CoreError::DestinationOccupied(quarantine_path));
        }

        move_item(&original_path, &quarantine_path)?;

        let record = QuarantineRecord {
            id: Uuid::new_v4().to_string(),
            item_name,
            original_path,
            quarantine_path,
            detected_rule_ids: detected_rule_ids.into_iter().map(Into::into).collect(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
            restored_at: None,
        };

        let mut ledger = self.ledger.load();
        ledger.records.push(record.clone());
        if let Err(e) = self.ledger.save(&ledger) {
            // Without a record the item could never be restored; put it back.
            if let Err(undo) = move_item(&record.quarantine_path, &record.original_path) {
                warn!(error = %undo, path = %record.quarantine_path.display(), "could not undo quarantine move");
            }
            return Err(e);
        }

        info!(
            id = %record.id,
            from = %record.original_path.display(),
            to = %record.quarantine_path.display(),
            rules = record.detected_rule_ids.len(),
            "item quarantined"
        );
        Ok(record)
    }

    /// Move the most recent active item matching `identifier` (record id or
    /// item name) back to where it came from.
    pub fn restore(&self, identifier: &str) -> Result<QuarantineRecord> {
        let mut ledger = self.ledger.load();
        let idx = latest_active(&ledger, identifier)
            .ok_or_else(|| CoreError::NotFound(identifier.to_string()))?;

        let original = ledger.records[idx].original_path.clone();
        if fs::symlink_metadata(&original).is_ok() {
            return Err(CoreError::DestinationOccupied(original));
        }
        if let Some(parent) = original.parent() {
            fs::create_dir_all(parent).map_err(|e| CoreError::io("recreate parent", parent, e))?;
        }
        move_item(&ledger.records[idx].quarantine_path, &original)?;

        ledger.records[idx].restored_at = Some(Utc::now());
        let record = ledger.records[idx].clone();
        self.ledger.save(&ledger)?;
        info!(id = %record.id, to = %original.display(), "item restored from quarantine");
        Ok(record)
    }

    /// Destroy a quarantined item and drop its record.
    pub fn delete_permanently(&self, identifier: &str) -> Result<QuarantineRecord> {
        let mut ledger = self.ledger.load();
        let idx = latest_active(&ledger, identifier)
            .ok_or_else(|| CoreError::NotFound(identifier.to_string()))?;

        let path = ledger.records[idx].quarantine_path.clone();
        let removed = match remove_path(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        };
        removed.map_err(|e| CoreError::io("delete quarantined item", &path, e))?;

        let record = ledger.records.remove(idx);
        self.ledger.save(&ledger)?;
        info!(id = %record.id, path = %path.display(), "quarantined item deleted");
        Ok(record)
    }

    pub fn list_active(&self) -> Vec<QuarantineRecord> {
        self.ledger
            .load()
            .records
            .into_iter()
            .filter(QuarantineRecord::is_active)
            .collect()
    }

    pub fn list_all(&self) -> Vec<QuarantineRecord> {
        self.ledger.load().records
    }
}

fn latest_active(ledger: &LedgerFile, identifier: &str) -> Option<usize> {
    ledger
        .records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_active() && r.matches(identifier))
        .max_by_key(|(_, r)| r.timestamp)
        .map(|(i, _)| i)
}

/// Absolute path of `item` without resolving `item` itself, which may be a
/// symlink.
fn absolute_item_path(item: &Path) -> Result<PathBuf> {
    let name = item.file_name().ok_or_else(|| {
        CoreError::io(
            "quarantine source",
            item,
            io::Error::new(io::ErrorKind::InvalidInput, "path has no final component"),
        )
    })?;
    let parent = match item.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let parent = fs::canonicalize(&parent).map_err(|e| CoreError::io("resolve parent", &parent, e))?;
    Ok(parent.join(name))
}

/// Rename, falling back to copy + delete across filesystems.
fn move_item(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            warn!(error = %rename_err, from = %from.display(), "rename failed, copying instead");
            copy_then_remove(from, to)
        }
    }
}

/// A failed copy leaves nothing behind at `to`, and `from` is only removed
/// once the copy is complete.
fn copy_then_remove(from: &Path, to: &Path) -> Result<()> {
    if let Err(e) = copy_tree(from, to) {
        if let Err(cleanup) = remove_path(to) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(error = %cleanup, path = %to.display(), "could not remove partial copy");
            }
        }
        return Err(CoreError::io("copy item", from, e));
    }
    remove_path(from).map_err(|e| CoreError::io("remove moved item", from, e))
}

fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry.path().strip_prefix(from).unwrap_or(Path::new(""));
        let dest = if rel.as_os_str().is_empty() {
            to.to_path_buf()
        } else {
            to.join(rel)
        };
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn zone(dir: &Path) -> Quarantine {
        let ledger = QuarantineLedger::new(dir.join("quarantine-records.json"));
        Quarantine::new(dir.join("quarantine"), ledger).unwrap()
    }

    #[test]
    fn quarantine_moves_item_and_records_sorted_rules() {
        let dir = tempdir().unwrap();
        let ext = dir.path().join("extensions/evil-plugin");
        fs::create_dir_all(&ext).unwrap();
        fs::write(ext.join("index.js"), b"payload").unwrap();

        let q = zone(dir.path());
        let rec = q
            .quarantine(&ext, ["malware.b", "malware.a", "malware.b"], "matched malware rules")
            .unwrap();

        assert!(!ext.exists());
        assert!(rec.quarantine_path.join("index.js").exists());
        assert!(rec.quarantine_path.starts_with(q.root()));
        let name = rec.quarantine_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.contains("-evil-plugin-"));
        assert_eq!(
            rec.detected_rule_ids.iter().cloned().collect::<Vec<_>>(),
            vec!["malware.a".to_string(), "malware.b".to_string()]
        );
        assert_eq!(q.list_active(), vec![rec]);
    }

    #[test]
    fn restore_by_name_round_trips_and_resolves_record() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("skill.md");
        fs::write(&file, b"exact bytes \x00\x01").unwrap();

        let q = zone(dir.path());
        q.quarantine(&file, Vec::<String>::new(), "manual").unwrap();
        let restored = q.restore("skill.md").unwrap();

        assert!(restored.restored_at.is_some());
        assert_eq!(fs::read(&file).unwrap(), b"exact bytes \x00\x01");
        assert!(q.list_active().is_empty());
        assert_eq!(q.list_all().len(), 1);
        assert!(matches!(q.restore("skill.md"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn restore_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("tool.py");
        fs::write(&file, b"v1").unwrap();

        let q = zone(dir.path());
        let rec = q.quarantine(&file, ["r"], "x").unwrap();
        fs::write(&file, b"reinstalled").unwrap();

        assert!(matches!(q.restore(&rec.id), Err(CoreError::DestinationOccupied(_))));
        assert!(q.list_active().len() == 1);
    }

    #[test]
    fn delete_permanently_removes_item_and_record() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.sh");
        fs::write(&file, b"rm -rf").unwrap();

        let q = zone(dir.path());
        let rec = q.quarantine(&file, ["r"], "x").unwrap();
        let deleted = q.delete_permanently(&rec.id).unwrap();
        assert_eq!(deleted.id, rec.id);
        assert!(!rec.quarantine_path.exists());
        assert!(q.list_all().is_empty());
        assert!(matches!(q.delete_permanently(&rec.id), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn unknown_identifier_is_not_found() {
        let dir = tempdir().unwrap();
        let q = zone(dir.path());
        assert!(matches!(q.restore("nope"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn corrupt_ledger_reads_as_empty() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("quarantine-records.json"), b"[[[").unwrap();
        let q = zone(dir.path());
        assert!(q.list_all().is_empty());
    }

    #[test]
    fn missing_item_is_an_io_failure() {
        let dir = tempdir().unwrap();
        let q = zone(dir.path());
        let err = q.quarantine(&dir.path().join("ghost"), ["r"], "x").unwrap_err();
        assert!(matches!(err, CoreError::Io { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn failed_copy_leaves_no_partial_item() {
        use std::os::unix::net::UnixListener;
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join("lib/a.js"), b"a").unwrap();
        // sockets cannot be copied as regular files
        let _listener = UnixListener::bind(src.join("ctl.sock")).unwrap();

        let dst = dir.path().join("dst");
        assert!(copy_then_remove(&src, &dst).is_err());
        assert!(!dst.exists());
        assert_eq!(fs::read(src.join("lib/a.js")).unwrap(), b"a");
    }

    #[test]
    fn copy_then_remove_moves_a_tree() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/a.txt"), b"a").unwrap();
        let dst = dir.path().join("dst");
        copy_then_remove(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("nested/a.txt")).unwrap(), b"a");
    }
}
