use crate::error::Result;
use crate::rules::{default_rules, validate, Action, Rule};
use crate::session::DEFAULT_ROLE;
use crate::store::{read_json, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const SETTINGS_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardSettings {
    pub version: u32,
    #[serde(default = "default_rules")]
    pub rules: Vec<Rule>,
    /// Extensions resolving to this action or worse are quarantined.
    #[serde(default = "default_threshold")]
    pub quarantine_threshold: Action,
    /// Role of the session log entries that are scanned and redacted.
    #[serde(default = "default_role")]
    pub scan_role: String,
}

fn default_threshold() -> Action {
    Action::Block
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            rules: default_rules(),
            quarantine_threshold: default_threshold(),
            scan_role: default_role(),
        }
    }
}

/// Missing settings mean defaults. Malformed settings, or a rule list that
/// fails validation, are logged and replaced by defaults.
pub fn load_settings(path: &Path) -> GuardSettings {
    match read_json::<GuardSettings>(path, "settings") {
        Ok(Some(settings)) => match validate(&settings.rules) {
            Ok(()) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid rules in settings, using defaults");
                GuardSettings::default()
            }
        },
        Ok(None) => GuardSettings::default(),
        Err(e) => {
            warn!(error = %e, "unreadable settings, using defaults");
            GuardSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &GuardSettings) -> Result<()> {
    validate(&settings.rules)?;
    write_json_atomic(path, settings, "settings")
}
