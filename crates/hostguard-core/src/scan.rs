//! Detection over an installed extension tree, and the hand-off to
//! quarantine when the verdict is severe enough.

use crate::detect::{max_action, Detector, Violation};
use crate::error::Result;
use crate::quarantine::{Quarantine, QuarantineRecord};
use crate::rules::Action;
use crate::walk::contained_files;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileViolation {
    pub relative_path: String,
    #[serde(flatten)]
    pub violation: Violation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeScanReport {
    pub root: PathBuf,
    pub files_scanned: usize,
    pub violations: Vec<FileViolation>,
    pub action: Action,
}

impl TreeScanReport {
    pub fn rule_ids(&self) -> BTreeSet<String> {
        self.violations
            .iter()
            .map(|v| v.violation.rule_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementOutcome {
    pub report: TreeScanReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantined: Option<QuarantineRecord>,
}

/// Evaluate every contained file of `root`. Binary content is decoded
/// lossily; unreadable files are skipped.
pub fn scan_tree(root: &Path, detector: &Detector) -> TreeScanReport {
    let mut files_scanned = 0;
    let mut violations = Vec::new();
    for file in contained_files(root) {
        let bytes = match fs::read(&file.path) {
            Ok(b) => b,
            Err(e) => {
                debug!(path = %file.path.display(), error = %e, "unreadable file skipped");
                continue;
            }
        };
        files_scanned += 1;
        let text = String::from_utf8_lossy(&bytes);
        violations.extend(detector.evaluate(&text).into_iter().map(|violation| FileViolation {
            relative_path: file.relative.clone(),
            violation,
        }));
    }

    let action = max_action(violations.iter().map(|v| v.violation.action));
    TreeScanReport {
        root: root.to_path_buf(),
        files_scanned,
        violations,
        action,
    }
}

/// Scan `root` and quarantine it when the resolved action reaches
/// `threshold`. A tree without violations is never quarantined.
pub fn enforce(
    root: &Path,
    detector: &Detector,
    quarantine: &Quarantine,
    threshold: Action,
) -> Result<EnforcementOutcome> {
    let report = scan_tree(root, detector);
    if report.violations.is_empty() || report.action < threshold {
        info!(root = %root.display(), violations = report.violations.len(), action = %report.action, "extension allowed");
        return Ok(EnforcementOutcome {
            report,
            quarantined: None,
        });
    }

    let rule_ids = report.rule_ids();
    let reason = format!(
        "{} violation(s) resolved to {} across {} file(s)",
        report.violations.len(),
        report.action,
        report.files_scanned
    );
    warn!(root = %root.display(), action = %report.action, "extension exceeds threshold, quarantining");
    let record = quarantine.quarantine(root, rule_ids, &reason)?;
    Ok(EnforcementOutcome {
        report,
        quarantined: Some(record),
    })
}
