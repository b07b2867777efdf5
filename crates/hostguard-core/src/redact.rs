//! Apply per-violation redaction decisions to session log files.
//!
//! Violations carry a rule id but no match span, so a `Redact` decision
//! re-runs that rule over the current text of the target entry and masks
//! every match it finds. Two occurrences of the same secret in one entry
//! are therefore redacted together even if only one was selected.
//!
//! Each touched file is copied to `.<name>.<unix millis>` next to itself
//! before it is modified. A failing file never stops the others.

use crate::detect::Detector;
use crate::error::{CoreError, Result};
use crate::session::{SessionLog, SessionViolation};
use crate::store::write_atomic;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Redact,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionDecision {
    pub violation: SessionViolation,
    pub decision: Decision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRedactionResult {
    pub file: PathBuf,
    pub success: bool,
    pub items_redacted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileRedactionResult {
    fn failed(file: &Path, backup_path: Option<PathBuf>, error: impl ToString) -> Self {
        Self {
            file: file.to_path_buf(),
            success: false,
            items_redacted: 0,
            backup_path,
            error: Some(error.to_string()),
        }
    }
}

/// Group decisions by file and redact each file independently. Files whose
/// decisions are all `Skip` are reported as successful and left untouched,
/// without a backup.
pub fn apply_redactions(
    decisions: &[RedactionDecision],
    detector: &Detector,
    role: &str,
) -> Vec<FileRedactionResult> {
    let mut by_file: BTreeMap<&Path, Vec<&SessionViolation>> = BTreeMap::new();
    for d in decisions {
        let targets = by_file.entry(d.violation.source_file.as_path()).or_default();
        if d.decision == Decision::Redact {
            targets.push(&d.violation);
        }
    }

    by_file
        .into_iter()
        .map(|(file, targets)| {
            if targets.is_empty() {
                return FileRedactionResult {
                    file: file.to_path_buf(),
                    success: true,
                    items_redacted: 0,
                    backup_path: None,
                    error: None,
                };
            }
            redact_file(file, &targets, detector, role)
        })
        .collect()
}

fn redact_file(
    file: &Path,
    targets: &[&SessionViolation],
    detector: &Detector,
    role: &str,
) -> FileRedactionResult {
    let backup = match create_backup(file) {
        Ok(b) => b,
        Err(e) => {
            warn!(file = %file.display(), error = %e, "backup failed, file left untouched");
            return FileRedactionResult::failed(file, None, e);
        }
    };

    let mut log = match SessionLog::read(file) {
        Ok(l) => l,
        Err(e) => return FileRedactionResult::failed(file, Some(backup), e),
    };

    let mut items_redacted = 0;
    for target in targets {
        let rule_id = &target.violation.rule_id;
        let text = match log.text_of(role, target.entry_index) {
            Some(t) => t.to_string(),
            None => {
                warn!(file = %file.display(), entry = target.entry_index, "redaction target entry not found");
                continue;
            }
        };
        let (redacted, count) = detector.redact_rule(rule_id, &text);
        if count > 0 && log.set_text(role, target.entry_index, redacted) {
            items_redacted += count;
        }
    }

    if items_redacted > 0 {
        if let Err(e) = write_atomic(file, log.render().as_bytes()) {
            return FileRedactionResult::failed(file, Some(backup), e);
        }
    }
    info!(file = %file.display(), items_redacted, backup = %backup.display(), "redaction applied");

    FileRedactionResult {
        file: file.to_path_buf(),
        success: true,
        items_redacted,
        backup_path: Some(backup),
        error: None,
    }
}

fn backup_prefix(file: &Path) -> Option<String> {
    file.file_name()
        .map(|n| format!(".{}.", n.to_string_lossy()))
}

/// Copy `file` to a fresh `.<name>.<millis>`. An existing backup is never
/// overwritten; on a name clash the timestamp is bumped until one is free.
fn create_backup(file: &Path) -> Result<PathBuf> {
    let prefix = backup_prefix(file).ok_or_else(|| {
        CoreError::io(
            "backup",
            file,
            io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        )
    })?;
    let mut source = File::open(file).map_err(|e| CoreError::io("backup", file, e))?;

    let mut millis = Utc::now().timestamp_millis();
    loop {
        let backup = file.with_file_name(format!("{}{}", prefix, millis));
        let mut dest = match OpenOptions::new().write(true).create_new(true).open(&backup) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                millis += 1;
                continue;
            }
            Err(e) => return Err(CoreError::io("create backup", &backup, e)),
        };
        if let Err(e) = io::copy(&mut source, &mut dest).and_then(|_| dest.sync_all()) {
            let _ = fs::remove_file(&backup);
            return Err(CoreError::io("write backup", &backup, e));
        }
        return Ok(backup);
    }
}

/// Backups of `file`, newest first.
pub fn list_backups(file: &Path) -> Vec<PathBuf> {
    let (prefix, dir) = match (backup_prefix(file), file.parent()) {
        (Some(p), Some(d)) => (p, if d.as_os_str().is_empty() { Path::new(".") } else { d }),
        _ => return Vec::new(),
    };
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };
    let mut found: Vec<(i64, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let millis = name.strip_prefix(&prefix)?.parse::<i64>().ok()?;
            Some((millis, entry.path()))
        })
        .collect();
    found.sort_by(|a, b| b.0.cmp(&a.0));
    found.into_iter().map(|(_, p)| p).collect()
}

/// Put a backup's bytes back in place of `file`.
pub fn restore_backup(backup: &Path, file: &Path) -> Result<()> {
    let bytes = fs::read(backup).map_err(|e| CoreError::io("read backup", backup, e))?;
    write_atomic(file, &bytes)?;
    info!(file = %file.display(), backup = %backup.display(), "session log restored from backup");
    Ok(())
}
