use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "darklock";
pub const APP_NAME: &str = "hostguard";

pub const HOME_ENV: &str = "HOSTGUARD_HOME";
pub const BASELINE_FILE: &str = "integrity-baseline.json";
pub const QUARANTINE_LEDGER_FILE: &str = "quarantine-records.json";
pub const QUARANTINE_DIR: &str = "quarantine";
pub const SETTINGS_FILE: &str = "settings.json";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(HOME_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn baseline_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join(BASELINE_FILE))
}

pub fn quarantine_ledger_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join(QUARANTINE_LEDGER_FILE))
}

pub fn quarantine_dir() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join(QUARANTINE_DIR))
}

pub fn settings_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join(SETTINGS_FILE))
}
