//! Content-safety core for an AI-agent host: rule-based detection over
//! conversation logs and extension trees, redaction with backups, and
//! integrity baselines plus quarantine for installed extensions.

pub mod detect;
pub mod error;
pub mod integrity;
pub mod paths;
pub mod quarantine;
pub mod redact;
pub mod rules;
pub mod scan;
pub mod session;
pub mod settings;
pub mod store;
pub mod walk;

pub use detect::{evaluate, resolve_action, Detector, Violation};
pub use error::{CoreError, Result};
pub use integrity::{hash_tree, snapshot, BaselineStore, IntegrityBaseline, IntegrityDrift, TreeHash};
pub use quarantine::{Quarantine, QuarantineLedger, QuarantineRecord};
pub use redact::{apply_redactions, Decision, FileRedactionResult, RedactionDecision};
pub use rules::{Action, Matcher, PiiKind, Rule, RuleFamily};
pub use session::SessionViolation;
