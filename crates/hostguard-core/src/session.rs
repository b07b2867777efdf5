//! JSONL conversation logs as an ordered list of entries.
//!
//! Lines that are not valid JSON are carried through untouched, and lines
//! that are never modified are written back byte-for-byte, so a parse/render
//! cycle reproduces the original file exactly.

use crate::detect::{Detector, Violation};
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_ROLE: &str = "assistant";

#[derive(Debug, Clone)]
pub enum Entry {
    Record { raw: String, value: Value, dirty: bool },
    Passthrough(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionViolation {
    #[serde(flatten)]
    pub violation: Violation,
    pub source_id: String,
    pub source_file: PathBuf,
    pub timestamp: Option<String>,
    /// Index among the log's entries of the scanned role.
    pub entry_index: usize,
}

#[derive(Debug, Clone)]
pub struct SessionLog {
    entries: Vec<Entry>,
}

impl SessionLog {
    pub fn parse(text: &str) -> Self {
        let entries = text
            .split('\n')
            .map(|line| {
                if line.trim().is_empty() {
                    return Entry::Passthrough(line.to_string());
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(value) => Entry::Record {
                        raw: line.to_string(),
                        value,
                        dirty: false,
                    },
                    Err(_) => Entry::Passthrough(line.to_string()),
                }
            })
            .collect();
        Self { entries }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| CoreError::io("read session log", path, e))?;
        Ok(Self::parse(&text))
    }

    pub fn render(&self) -> String {
        let lines: Vec<String> = self
            .entries
            .iter()
            .map(|entry| match entry {
                Entry::Record { raw, value, dirty: true } => {
                    let mut line = value.to_string();
                    if raw.ends_with('\r') {
                        line.push('\r');
                    }
                    line
                }
                Entry::Record { raw, .. } => raw.clone(),
                Entry::Passthrough(raw) => raw.clone(),
            })
            .collect();
        lines.join("\n")
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Values of the given role, in file order. Position in the iterator is
    /// the entry index recorded on violations.
    pub fn role_entries(&self, role: &str) -> impl Iterator<Item = &Value> + '_ {
        let role = role.to_string();
        self.entries.iter().filter_map(move |entry| match entry {
            Entry::Record { value, .. } if entry_role(value) == Some(role.as_str()) => Some(value),
            _ => None,
        })
    }

    pub fn text_of(&self, role: &str, index: usize) -> Option<&str> {
        self.role_entries(role).nth(index).and_then(extract_text)
    }

    /// Overwrite the first text-bearing slot of the `index`-th `role` entry.
    pub fn set_text(&mut self, role: &str, index: usize, text: String) -> bool {
        let entry = self
            .entries
            .iter_mut()
            .filter(|e| matches!(e, Entry::Record { value, .. } if entry_role(value) == Some(role)))
            .nth(index);
        match entry {
            Some(Entry::Record { value, dirty, .. }) => match text_slot_mut(value) {
                Some(slot) => {
                    *slot = text;
                    *dirty = true;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

/// `role` or `message.role`.
pub fn entry_role(value: &Value) -> Option<&str> {
    value
        .get("role")
        .or_else(|| value.get("message").and_then(|m| m.get("role")))
        .and_then(Value::as_str)
}

fn content(value: &Value) -> Option<&Value> {
    value
        .get("content")
        .or_else(|| value.get("message").and_then(|m| m.get("content")))
}

fn content_mut(value: &mut Value) -> Option<&mut Value> {
    if value.get("content").is_some() {
        return value.get_mut("content");
    }
    value.get_mut("message")?.get_mut("content")
}

/// A string content, or the first block of a block list that carries `text`.
pub fn extract_text(value: &Value) -> Option<&str> {
    match content(value)? {
        Value::String(s) => Some(s),
        Value::Array(blocks) => blocks
            .iter()
            .find_map(|b| b.get("text").and_then(Value::as_str)),
        _ => None,
    }
}

fn text_slot_mut(value: &mut Value) -> Option<&mut String> {
    match content_mut(value)? {
        Value::String(s) => Some(s),
        Value::Array(blocks) => blocks.iter_mut().find_map(|b| match b.get_mut("text") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }),
        _ => None,
    }
}

fn source_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Evaluate every `role` entry of a parsed log.
pub fn scan_session(log: &SessionLog, source_file: &Path, detector: &Detector, role: &str) -> Vec<SessionViolation> {
    let source_id = source_id(source_file);
    let mut out = Vec::new();
    for (entry_index, value) in log.role_entries(role).enumerate() {
        let text = match extract_text(value) {
            Some(t) => t,
            None => continue,
        };
        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string);
        for violation in detector.evaluate(text) {
            out.push(SessionViolation {
                violation,
                source_id: source_id.clone(),
                source_file: source_file.to_path_buf(),
                timestamp: timestamp.clone(),
                entry_index,
            });
        }
    }
    out
}

pub fn scan_session_file(path: &Path, detector: &Detector, role: &str) -> Result<Vec<SessionViolation>> {
    let log = SessionLog::read(path)?;
    Ok(scan_session(&log, path, detector, role))
}
