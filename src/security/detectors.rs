//! Shared detection types.
//!
//! Defines the severity scale, the worst-child-wins status roll-up, and the
//! [`DetectionPattern`] table row used by both the tool scanner and the
//! output sanitizer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a single detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, never changes a status.
    Info,
    /// Has legitimate uses; review before trusting.
    Warning,
    /// Injection attempt; do not trust.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Roll-up status of a tool, server or catalog.
///
/// Totally ordered so that aggregation is a plain `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// No warning or critical issue.
    #[default]
    Clean,
    /// At least one warning, no critical issue.
    Warning,
    /// At least one critical issue.
    Critical,
}

impl ScanStatus {
    /// Status contributed by a single severity.
    pub fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Info => ScanStatus::Clean,
            Severity::Warning => ScanStatus::Warning,
            Severity::Critical => ScanStatus::Critical,
        }
    }

    /// Worst status over a set of severities.
    pub fn from_severities<I>(severities: I) -> Self
    where
        I: IntoIterator<Item = Severity>,
    {
        Self::worst(severities.into_iter().map(Self::from_severity))
    }

    /// Worst status over a set of child statuses.
    pub fn worst<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = ScanStatus>,
    {
        statuses.into_iter().max().unwrap_or(ScanStatus::Clean)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Clean => write!(f, "clean"),
            ScanStatus::Warning => write!(f, "warning"),
            ScanStatus::Critical => write!(f, "critical"),
        }
    }
}

/// One row of a static pattern table.
#[derive(Debug, Clone, Copy)]
pub struct DetectionPattern {
    /// Regex source. Compiled case-insensitively.
    pub pattern: &'static str,
    /// Taxonomy category reported on a match.
    pub category: &'static str,
    /// Severity reported on a match.
    pub severity: Severity,
    /// Human-readable description of what the pattern catches.
    pub description: &'static str,
}

/// A table row with its compiled matcher.
#[derive(Debug)]
pub struct CompiledPattern {
    /// Compiled matcher.
    pub regex: regex::Regex,
    /// Source row.
    pub source: DetectionPattern,
}

/// A single match of a compiled pattern, with a character offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    /// Category from the table row.
    pub category: &'static str,
    /// Severity from the table row.
    pub severity: Severity,
    /// Description from the table row.
    pub description: &'static str,
    /// Matched text.
    pub matched_text: String,
    /// Offset of the match in characters (Unicode scalar values).
    pub position: usize,
}

/// Run every pattern against `text` and collect every match.
///
/// Patterns never short-circuit each other; overlapping matches from
/// different rows are all reported. Output order is table order, then
/// position, so repeated runs are identical.
pub fn match_all(patterns: &[CompiledPattern], text: &str) -> Vec<PatternMatch> {
    let mut matches = Vec::new();
    if text.is_empty() {
        return matches;
    }

    let offsets = CharOffsets::new(text);
    for compiled in patterns {
        for m in compiled.regex.find_iter(text) {
            matches.push(PatternMatch {
                category: compiled.source.category,
                severity: compiled.source.severity,
                description: compiled.source.description,
                matched_text: truncate(m.as_str(), 200),
                position: offsets.char_index(m.start()),
            });
        }
    }
    matches
}

/// Byte-offset to char-offset conversion for one text.
///
/// Remembers the last conversion so ascending lookups (as produced by
/// `find_iter`) cost one pass over the text per pattern.
pub(crate) struct CharOffsets<'a> {
    text: &'a str,
    cursor: std::cell::Cell<(usize, usize)>,
}

impl<'a> CharOffsets<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self {
            text,
            cursor: std::cell::Cell::new((0, 0)),
        }
    }

    /// Char index of a byte offset that lies on a char boundary.
    pub(crate) fn char_index(&self, byte_offset: usize) -> usize {
        let (mut byte, mut chars) = self.cursor.get();
        if byte_offset < byte {
            byte = 0;
            chars = 0;
        }
        chars += self.text[byte..byte_offset].chars().count();
        self.cursor.set((byte_offset, chars));
        chars
    }
}

/// Truncate on a char boundary, appending `...` when shortened.
pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
