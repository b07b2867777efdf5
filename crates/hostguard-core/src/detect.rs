//! Rule evaluation against a text blob.
//!
//! Detection is infallible: a pattern that does not compile is dropped when
//! the [`Detector`] is built, and any input is scanned as plain characters.

use crate::rules::{Action, Matcher, PiiKind, Rule, RuleFamily};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::warn;

pub const MASK_CHAR: char = '*';
/// Matches of this many characters or fewer are masked completely.
pub const MASK_THRESHOLD: usize = 6;
const PREVIEW_KEEP: usize = 2;

const CARD_MIN_DIGITS: usize = 13;
const CARD_MAX_DIGITS: usize = 19;
const PHONE_MIN_DIGITS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub rule_id: String,
    pub family: RuleFamily,
    pub action: Action,
    pub redacted_preview: String,
    /// Byte offset of the match in the scanned text.
    pub offset: usize,
}

/// Post-match filter for loosely bounded numeric patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    None,
    Luhn,
    MinDigits(usize),
}

impl Filter {
    fn for_kind(kind: PiiKind) -> Self {
        match kind {
            PiiKind::CreditCard => Filter::Luhn,
            PiiKind::Phone => Filter::MinDigits(PHONE_MIN_DIGITS),
            _ => Filter::None,
        }
    }

    fn keep(&self, candidate: &str) -> bool {
        match self {
            Filter::None => true,
            Filter::Luhn => {
                let digits: String = candidate.chars().filter(|c| c.is_ascii_digit()).collect();
                (CARD_MIN_DIGITS..=CARD_MAX_DIGITS).contains(&digits.len()) && luhn_valid(&digits)
            }
            Filter::MinDigits(min) => candidate.chars().filter(|c| c.is_ascii_digit()).count() >= *min,
        }
    }
}

struct CompiledPattern {
    regex: Regex,
    filter: Filter,
}

struct CompiledRule {
    id: String,
    family: RuleFamily,
    action: Action,
    patterns: Vec<CompiledPattern>,
}

impl CompiledRule {
    fn compile(rule: &Rule) -> Self {
        let patterns = match &rule.matcher {
            Matcher::Pii(kinds) => kinds
                .iter()
                .map(|kind| CompiledPattern {
                    regex: kind.pattern().clone(),
                    filter: Filter::for_kind(*kind),
                })
                .collect(),
            Matcher::Regex(sources) => sources
                .iter()
                .filter_map(|src| match Regex::new(src) {
                    Ok(regex) => Some(CompiledPattern {
                        regex,
                        filter: Filter::None,
                    }),
                    Err(e) => {
                        warn!(rule = %rule.id, pattern = %src, error = %e, "dropping invalid rule pattern");
                        None
                    }
                })
                .collect(),
            Matcher::Keywords(words) => words
                .iter()
                .filter(|w| !w.is_empty())
                .filter_map(|word| {
                    RegexBuilder::new(&regex::escape(word))
                        .case_insensitive(true)
                        .build()
                        .ok()
                        .map(|regex| CompiledPattern {
                            regex,
                            filter: Filter::None,
                        })
                })
                .collect(),
        };

        Self {
            id: rule.id.clone(),
            family: rule.family,
            action: rule.action,
            patterns,
        }
    }

    /// Every accepted match span, sorted and de-duplicated. Each pattern is
    /// applied globally; matches of one pattern never overlap each other.
    fn spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans: Vec<Range<usize>> = self
            .patterns
            .iter()
            .flat_map(|p| {
                p.regex
                    .find_iter(text)
                    .filter(move |m| p.filter.keep(m.as_str()))
                    .map(|m| m.range())
            })
            .collect();
        spans.sort_by_key(|r| (r.start, r.end));
        spans.dedup();
        spans
    }
}

/// A compiled, ready-to-run rule set. Disabled rules are left out entirely.
pub struct Detector {
    rules: Vec<CompiledRule>,
}

impl Detector {
    pub fn new(rules: &[Rule]) -> Self {
        let rules = rules
            .iter()
            .filter(|r| r.enabled)
            .map(CompiledRule::compile)
            .collect();
        Self { rules }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn evaluate(&self, text: &str) -> Vec<Violation> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            for span in rule.spans(text) {
                violations.push(Violation {
                    rule_id: rule.id.clone(),
                    family: rule.family,
                    action: rule.action,
                    redacted_preview: redact_preview(&text[span.clone()]),
                    offset: span.start,
                });
            }
        }
        violations
    }

    /// Raw match spans of one rule, or `None` if the rule is unknown or disabled.
    pub fn matches_for(&self, rule_id: &str, text: &str) -> Option<Vec<Range<usize>>> {
        self.rules
            .iter()
            .find(|r| r.id == rule_id)
            .map(|r| r.spans(text))
    }

    /// Replace every match of `rule_id` in `text` with its preview form.
    /// Returns the new text and the number of replacements.
    pub fn redact_rule(&self, rule_id: &str, text: &str) -> (String, usize) {
        let spans = match self.matches_for(rule_id, text) {
            Some(s) => s,
            None => return (text.to_string(), 0),
        };
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        let mut replaced = 0;
        for span in spans {
            // Spans from different patterns of one rule may overlap.
            if span.start < cursor {
                continue;
            }
            out.push_str(&text[cursor..span.start]);
            out.push_str(&redact_preview(&text[span.clone()]));
            cursor = span.end;
            replaced += 1;
        }
        out.push_str(&text[cursor..]);
        (out, replaced)
    }
}

/// One-shot evaluation of `text` against `rules`.
pub fn evaluate(text: &str, rules: &[Rule]) -> Vec<Violation> {
    Detector::new(rules).evaluate(text)
}

/// Most severe action in the set, `Warn` when empty.
pub fn resolve_action(violations: &[Violation]) -> Action {
    max_action(violations.iter().map(|v| v.action))
}

pub fn max_action(actions: impl IntoIterator<Item = Action>) -> Action {
    actions.into_iter().max().unwrap_or(Action::Warn)
}

/// Mask the interior of a match, keeping a short prefix and suffix.
pub fn redact_preview(raw: &str) -> String {
    let len = raw.chars().count();
    if len <= MASK_THRESHOLD {
        return MASK_CHAR.to_string().repeat(len);
    }
    raw.chars()
        .enumerate()
        .map(|(i, c)| {
            if i < PREVIEW_KEEP || i >= len - PREVIEW_KEEP {
                c
            } else {
                MASK_CHAR
            }
        })
        .collect()
}

/// Luhn checksum over an ASCII digit string.
pub fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
