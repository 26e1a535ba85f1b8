//! Audit trail for guarded tool invocations.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::permissions::{PermissionCheck, ToolZone, ZoneSource};

/// Default number of retained entries.
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Refused by the zone check.
    Denied,
    /// Handler returned successfully.
    Succeeded,
    /// Handler returned an error.
    Failed,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Denied => write!(f, "denied"),
            AuditOutcome::Succeeded => write!(f, "succeeded"),
            AuditOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// When the invocation finished.
    pub timestamp: DateTime<Utc>,
    /// Tool invoked.
    pub tool: String,
    /// Resolved zone.
    pub zone: ToolZone,
    /// Where the zone came from.
    pub source: ZoneSource,
    /// Whether the caller passed `force`.
    pub forced: bool,
    /// Outcome.
    pub outcome: AuditOutcome,
    /// Handler run time. `None` for denials.
    pub duration_ms: Option<u64>,
    /// Zone message or handler error.
    pub message: Option<String>,
}

impl AuditEntry {
    /// Entry for a refused invocation.
    pub fn denied(check: &PermissionCheck, forced: bool) -> Self {
        Self::from_check(check, forced, AuditOutcome::Denied, None, check.message.clone())
    }

    /// Entry for a handler that ran.
    pub fn completed(
        check: &PermissionCheck,
        forced: bool,
        elapsed: Duration,
        error: Option<String>,
    ) -> Self {
        let (outcome, message) = match error {
            Some(e) => (AuditOutcome::Failed, Some(e)),
            None => (AuditOutcome::Succeeded, check.message.clone()),
        };
        Self::from_check(
            check,
            forced,
            outcome,
            Some(elapsed.as_millis() as u64),
            message,
        )
    }

    fn from_check(
        check: &PermissionCheck,
        forced: bool,
        outcome: AuditOutcome,
        duration_ms: Option<u64>,
        message: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            tool: check.tool.clone(),
            zone: check.zone,
            source: check.source,
            forced,
            outcome,
            duration_ms,
            message,
        }
    }
}

/// Bounded in-memory audit log. The oldest entry is evicted when full.
#[derive(Debug)]
pub struct AuditLog {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    /// Log holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry and emit it as a tracing event.
    pub fn record(&self, entry: AuditEntry) {
        match entry.outcome {
            AuditOutcome::Succeeded => tracing::info!(
                tool = %entry.tool,
                zone = %entry.zone,
                source = %entry.source,
                forced = entry.forced,
                duration_ms = ?entry.duration_ms,
                "Tool invocation succeeded"
            ),
            AuditOutcome::Failed => tracing::warn!(
                tool = %entry.tool,
                zone = %entry.zone,
                forced = entry.forced,
                duration_ms = ?entry.duration_ms,
                error = ?entry.message,
                "Tool invocation failed"
            ),
            AuditOutcome::Denied => tracing::warn!(
                tool = %entry.tool,
                zone = %entry.zone,
                source = %entry.source,
                forced = entry.forced,
                reason = ?entry.message,
                "Tool invocation denied"
            ),
        }

        let mut entries = self.entries.write();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().iter().cloned().collect()
    }

    /// Entries for one tool, oldest first.
    pub fn entries_for(&self, tool: &str) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.tool == tool)
            .cloned()
            .collect()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<AuditEntry> {
        self.entries.read().back().cloned()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(tool: &str, zone: ToolZone, force: bool) -> PermissionCheck {
        PermissionCheck::decide(tool, zone, ZoneSource::Default, force)
    }

    #[test]
    fn test_denied_entry() {
        let c = check("execute_javascript", ToolZone::Red, false);
        let entry = AuditEntry::denied(&c, false);
        assert_eq!(entry.outcome, AuditOutcome::Denied);
        assert!(entry.duration_ms.is_none());
        assert!(entry.message.unwrap().contains("force: true"));
    }

    #[test]
    fn test_completed_entries() {
        let c = check("navigate", ToolZone::Green, false);
        let ok = AuditEntry::completed(&c, false, Duration::from_millis(42), None);
        assert_eq!(ok.outcome, AuditOutcome::Succeeded);
        assert_eq!(ok.duration_ms, Some(42));

        let failed =
            AuditEntry::completed(&c, false, Duration::from_millis(5), Some("timeout".into()));
        assert_eq!(failed.outcome, AuditOutcome::Failed);
        assert_eq!(failed.message.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_log_is_bounded() {
        let log = AuditLog::new(3);
        for i in 0..5 {
            let c = check(&format!("tool_{}", i), ToolZone::Yellow, false);
            log.record(AuditEntry::completed(&c, false, Duration::ZERO, None));
        }
        let tools: Vec<String> = log.entries().into_iter().map(|e| e.tool).collect();
        assert_eq!(tools, vec!["tool_2", "tool_3", "tool_4"]);
        assert_eq!(log.last().unwrap().tool, "tool_4");
    }

    #[test]
    fn test_filter_and_clear() {
        let log = AuditLog::default();
        let nav = check("navigate", ToolZone::Green, false);
        let js = check("execute_javascript", ToolZone::Red, false);
        log.record(AuditEntry::completed(&nav, false, Duration::ZERO, None));
        log.record(AuditEntry::denied(&js, false));
        log.record(AuditEntry::completed(&nav, false, Duration::ZERO, None));

        assert_eq!(log.entries_for("navigate").len(), 2);
        assert_eq!(log.entries_for("execute_javascript").len(), 1);

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let c = check("fill", ToolZone::Yellow, false);
        let json = serde_json::to_value(AuditEntry::completed(&c, true, Duration::ZERO, None)).unwrap();
        assert_eq!(json["outcome"], "succeeded");
        assert_eq!(json["source"], "default");
        assert_eq!(json["durationMs"], 0);
        assert_eq!(json["forced"], true);
    }
}
