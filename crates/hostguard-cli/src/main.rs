use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hostguard_core::detect::Detector;
use hostguard_core::integrity::{hash_tree, BaselineStore};
use hostguard_core::paths::{
    data_dir, BASELINE_FILE, QUARANTINE_DIR, QUARANTINE_LEDGER_FILE, SETTINGS_FILE,
};
use hostguard_core::quarantine::{Quarantine, QuarantineLedger};
use hostguard_core::redact::{apply_redactions, Decision, RedactionDecision};
use hostguard_core::scan::{enforce, scan_tree};
use hostguard_core::session::{scan_session_file, SessionViolation};
use hostguard_core::settings::{load_settings, GuardSettings};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "hostguard")]
#[command(author, version, about = "Content-safety checks for an AI-agent host", long_about = None)]
struct Cli {
    /// Override the data directory (also HOSTGUARD_HOME)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan every *.jsonl session log under a directory
    ScanLogs { dir: PathBuf },

    /// Redact violations in session logs, backing each file up first
    Redact {
        dir: PathBuf,
        /// Only redact these rule ids (default: all)
        #[arg(long = "rule")]
        rules: Vec<String>,
    },

    /// Scan an extension tree
    ScanExt {
        path: PathBuf,
        /// Quarantine the tree if it reaches the configured threshold
        #[arg(long)]
        enforce: bool,
    },

    /// Record the integrity baseline for a tree
    Baseline { root: PathBuf },

    /// Compare a tree against its baseline
    Drift { root: PathBuf },

    /// Print the aggregate content hash of a tree
    Hash { root: PathBuf },

    /// Move an item into quarantine
    Quarantine {
        path: PathBuf,
        #[arg(long, default_value = "manual")]
        reason: String,
        #[arg(long = "rule")]
        rules: Vec<String>,
    },

    /// Restore a quarantined item by record id or item name
    Restore { identifier: String },

    /// Permanently delete a quarantined item
    Delete { identifier: String },

    /// List quarantine records
    List {
        /// Include restored records
        #[arg(long)]
        all: bool,
    },
}

struct Workspace {
    data: PathBuf,
    settings: GuardSettings,
}

impl Workspace {
    fn load(data_override: Option<PathBuf>) -> Result<Self> {
        let data = match data_override {
            Some(d) => d,
            None => data_dir()?,
        };
        std::fs::create_dir_all(&data)
            .with_context(|| format!("create data dir {}", data.display()))?;
        let settings = load_settings(&data.join(SETTINGS_FILE));
        Ok(Self { data, settings })
    }

    fn detector(&self) -> Detector {
        Detector::new(&self.settings.rules)
    }

    fn baselines(&self) -> BaselineStore {
        BaselineStore::new(self.data.join(BASELINE_FILE))
    }

    fn quarantine(&self) -> Result<Quarantine> {
        let ledger = QuarantineLedger::new(self.data.join(QUARANTINE_LEDGER_FILE));
        Ok(Quarantine::new(self.data.join(QUARANTINE_DIR), ledger)?)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ws = Workspace::load(cli.data_dir)?;

    match cli.command {
        Commands::ScanLogs { dir } => {
            let detector = ws.detector();
            print_json(&scan_logs(&dir, &detector, &ws.settings.scan_role))
        }
        Commands::Redact { dir, rules } => {
            let detector = ws.detector();
            let role = &ws.settings.scan_role;
            let selected: HashSet<String> = rules.into_iter().collect();
            let decisions: Vec<RedactionDecision> = scan_logs(&dir, &detector, role)
                .into_iter()
                .map(|violation| {
                    let decision = if selected.is_empty() || selected.contains(&violation.violation.rule_id) {
                        Decision::Redact
                    } else {
                        Decision::Skip
                    };
                    RedactionDecision { violation, decision }
                })
                .collect();
            print_json(&apply_redactions(&decisions, &detector, role))
        }
        Commands::ScanExt { path, enforce: false } => print_json(&scan_tree(&path, &ws.detector())),
        Commands::ScanExt { path, enforce: true } => {
            let outcome = enforce(
                &path,
                &ws.detector(),
                &ws.quarantine()?,
                ws.settings.quarantine_threshold,
            )?;
            print_json(&outcome)
        }
        Commands::Baseline { root } => print_json(&ws.baselines().write_baseline(&root)?),
        Commands::Drift { root } => print_json(&ws.baselines().detect_drift(&root)),
        Commands::Hash { root } => print_json(&hash_tree(&root)),
        Commands::Quarantine { path, reason, rules } => {
            let record = ws.quarantine()?.quarantine(&path, rules, &reason)?;
            print_json(&record)
        }
        Commands::Restore { identifier } => print_json(&ws.quarantine()?.restore(&identifier)?),
        Commands::Delete { identifier } => {
            print_json(&ws.quarantine()?.delete_permanently(&identifier)?)
        }
        Commands::List { all } => {
            let q = ws.quarantine()?;
            let records = if all { q.list_all() } else { q.list_active() };
            print_json(&records)
        }
    }
}

/// Session logs are discovered here, not in the core.
fn scan_logs(dir: &Path, detector: &Detector, role: &str) -> Vec<SessionViolation> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).into_iter().flatten() {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "jsonl") {
            continue;
        }
        match scan_session_file(path, detector, role) {
            Ok(found) => out.extend(found),
            Err(e) => warn!(path = %path.display(), error = %e, "session log skipped"),
        }
    }
    out
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
