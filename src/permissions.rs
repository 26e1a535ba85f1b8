//! Per-tool permission zones.
//!
//! Every tool resolves to one of five zones, ordered by the friction they
//! impose before execution:
//!
//! | Zone   | Execution                          |
//! |--------|------------------------------------|
//! | green  | always allowed                     |
//! | yellow | always allowed                     |
//! | orange | allowed, with a warning message    |
//! | red    | allowed only with `force: true`    |
//! | black  | never allowed                      |
//!
//! ## Resolution
//!
//! 1. A valid user override in `tool-permissions.json`
//! 2. The built-in default table
//! 3. `yellow` for unknown tools
//!
//! The override file is read on every check. There is no cache, so edits made
//! by another process apply to the next check.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cbrowser_guard::permissions::{ToolPermissionStore, ToolZone};
//!
//! let store = ToolPermissionStore::new("/var/lib/cbrowser/tool-permissions.json");
//! store.set_tool_zone("execute_javascript", ToolZone::Black, Some("admin"))?;
//!
//! let check = store.check_permission("execute_javascript", true);
//! assert!(!check.allowed);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::PermissionsConfig;
use crate::error::{Error, Result};

/// Risk tier of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolZone {
    /// Read-only.
    Green,
    /// Interactive, non-destructive.
    Yellow,
    /// Mutates state; runs with a warning.
    Orange,
    /// Sensitive or autonomous; needs `force`.
    Red,
    /// Prohibited.
    Black,
}

impl ToolZone {
    /// All zones in ascending friction order.
    pub const ALL: [ToolZone; 5] = [
        ToolZone::Green,
        ToolZone::Yellow,
        ToolZone::Orange,
        ToolZone::Red,
        ToolZone::Black,
    ];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolZone::Green => "green",
            ToolZone::Yellow => "yellow",
            ToolZone::Orange => "orange",
            ToolZone::Red => "red",
            ToolZone::Black => "black",
        }
    }

    /// Whether the zone only runs with the force flag.
    pub fn requires_force(&self) -> bool {
        *self == ToolZone::Red
    }

    /// Whether the zone never runs.
    pub fn is_blocked(&self) -> bool {
        *self == ToolZone::Black
    }
}

impl fmt::Display for ToolZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolZone {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ToolZone::ALL
            .into_iter()
            .find(|z| z.as_str() == s)
            .ok_or_else(|| Error::InvalidZone(s.to_string()))
    }
}

/// Where a resolved zone came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneSource {
    /// Built-in table, or the unknown-tool fallback.
    Default,
    /// Persisted override.
    UserOverride,
}

impl fmt::Display for ZoneSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneSource::Default => write!(f, "default"),
            ZoneSource::UserOverride => write!(f, "user_override"),
        }
    }
}

/// An override value as found on disk.
///
/// Decoding never fails on an unknown zone string; the raw value is kept so
/// the resolver can log it and fall back to the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredZone {
    /// One of the five zone names.
    Valid(ToolZone),
    /// Anything else.
    Invalid(serde_json::Value),
}

impl StoredZone {
    /// The zone, if valid.
    pub fn zone(&self) -> Option<ToolZone> {
        match self {
            StoredZone::Valid(zone) => Some(*zone),
            StoredZone::Invalid(_) => None,
        }
    }
}

impl From<ToolZone> for StoredZone {
    fn from(zone: ToolZone) -> Self {
        StoredZone::Valid(zone)
    }
}

/// Contents of `tool-permissions.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPermissionConfig {
    /// Overrides by tool name.
    #[serde(default)]
    pub tool_permissions: BTreeMap<String, StoredZone>,
    /// Time of the last write. Unparseable values read as `None`.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Who made the last change.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub set_by: Option<String>,
}

// Metadata fields never decide a zone, so a malformed value must not fail the
// decode of `toolPermissions`.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|v| v.as_str()).and_then(parse_timestamp))
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_str().map(str::to_string)))
}

/// RFC 3339, a naive `T` datetime (read as UTC) or a bare date.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

impl Default for ToolPermissionConfig {
    fn default() -> Self {
        Self {
            tool_permissions: BTreeMap::new(),
            last_updated: Some(Utc::now()),
            set_by: None,
        }
    }
}

/// Built-in zones for the browser automation tools.
pub const DEFAULT_TOOL_ZONES: &[(&str, ToolZone)] = &[
    // Read-only
    ("navigate", ToolZone::Green),
    ("screenshot", ToolZone::Green),
    ("extract", ToolZone::Green),
    ("get_page_info", ToolZone::Green),
    ("find_element_by_intent", ToolZone::Green),
    ("list_sessions", ToolZone::Green),
    ("list_baselines", ToolZone::Green),
    ("get_console_logs", ToolZone::Green),
    ("accessibility_audit", ToolZone::Green),
    ("performance_audit", ToolZone::Green),
    ("health_check", ToolZone::Green),
    ("status", ToolZone::Green),
    // Interactive
    ("smart_click", ToolZone::Yellow),
    ("fill", ToolZone::Yellow),
    ("scroll", ToolZone::Yellow),
    ("hover", ToolZone::Yellow),
    ("press_key", ToolZone::Yellow),
    ("select_option", ToolZone::Yellow),
    ("dismiss_overlay", ToolZone::Yellow),
    ("wait_for", ToolZone::Yellow),
    ("go_back", ToolZone::Yellow),
    ("go_forward", ToolZone::Yellow),
    ("reload", ToolZone::Yellow),
    ("assert", ToolZone::Yellow),
    // State-mutating
    ("save_session", ToolZone::Orange),
    ("load_session", ToolZone::Orange),
    ("delete_session", ToolZone::Orange),
    ("upload_file", ToolZone::Orange),
    ("set_cookie", ToolZone::Orange),
    ("clear_cookies", ToolZone::Orange),
    ("set_local_storage", ToolZone::Orange),
    ("reset_browser", ToolZone::Orange),
    // Sensitive or autonomous
    ("execute_javascript", ToolZone::Red),
    ("stealth_enable", ToolZone::Red),
    ("stealth_disable", ToolZone::Red),
    ("hunt_bugs", ToolZone::Red),
    ("run_journey", ToolZone::Red),
    ("run_test_suite", ToolZone::Red),
    ("autonomous_explore", ToolZone::Red),
];

/// Zone for tools missing from the default table.
pub const UNKNOWN_TOOL_ZONE: ToolZone = ToolZone::Yellow;

/// Built-in zone of a tool, if it has one.
pub fn default_zone(tool: &str) -> Option<ToolZone> {
    DEFAULT_TOOL_ZONES
        .iter()
        .find(|(name, _)| *name == tool)
        .map(|(_, zone)| *zone)
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionCheck {
    /// Tool checked.
    pub tool: String,
    /// Resolved zone.
    pub zone: ToolZone,
    /// Where the zone came from.
    pub source: ZoneSource,
    /// Whether the tool may run now.
    pub allowed: bool,
    /// Whether the zone needs the force flag.
    pub requires_force: bool,
    /// Warning or denial text for the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PermissionCheck {
    /// Decide for a resolved zone.
    pub fn decide(tool: &str, zone: ToolZone, source: ZoneSource, force: bool) -> Self {
        let (allowed, message) = match zone {
            ToolZone::Green | ToolZone::Yellow => (true, None),
            ToolZone::Orange => (
                true,
                Some(format!(
                    "Warning: '{}' is an orange-zone tool and changes browser or session state.",
                    tool
                )),
            ),
            ToolZone::Red if force => (
                true,
                Some(format!("Running red-zone tool '{}' with force.", tool)),
            ),
            ToolZone::Red => (
                false,
                Some(format!(
                    "'{}' is a red-zone tool and needs explicit confirmation. Retry with force: true to run it.",
                    tool
                )),
            ),
            ToolZone::Black => (
                false,
                Some(format!(
                    "'{}' is in the black zone and is never allowed to run.",
                    tool
                )),
            ),
        };

        Self {
            tool: tool.to_string(),
            zone,
            source,
            allowed,
            requires_force: zone.requires_force(),
            message,
        }
    }

    /// Turn a denial into an error.
    pub fn require(self) -> Result<Self> {
        if self.allowed {
            return Ok(self);
        }
        let message = self.message.clone().unwrap_or_default();
        if self.zone.requires_force() {
            Err(Error::ForceRequired {
                tool: self.tool,
                message,
            })
        } else {
            Err(Error::PermissionDenied {
                tool: self.tool,
                zone: self.zone,
                message,
            })
        }
    }
}

/// One row of [`ToolPermissionStore::list_tool_zones`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolZoneEntry {
    /// Tool name.
    pub tool: String,
    /// Effective zone.
    pub zone: ToolZone,
    /// Where the zone came from.
    pub source: ZoneSource,
}

/// File-backed override store.
#[derive(Debug, Clone)]
pub struct ToolPermissionStore {
    path: PathBuf,
}

impl ToolPermissionStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the configured data directory.
    pub fn from_config(config: &PermissionsConfig) -> Self {
        Self::new(config.permissions_file())
    }

    /// Path of the override file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the override file. `None` when it does not exist.
    pub fn load(&self) -> Result<Option<ToolPermissionConfig>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Effective zone of a tool and its source.
    pub fn resolve_zone(&self, tool: &str) -> (ToolZone, ZoneSource) {
        resolve_against(self.load_overrides().as_ref(), tool)
    }

    /// Override file for a lookup; unreadable files count as absent.
    fn load_overrides(&self) -> Option<ToolPermissionConfig> {
        match self.load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Unreadable tool permission file, using defaults"
                );
                None
            }
        }
    }

    /// Decide whether `tool` may run.
    pub fn check_permission(&self, tool: &str, force: bool) -> PermissionCheck {
        let (zone, source) = self.resolve_zone(tool);
        let check = PermissionCheck::decide(tool, zone, source, force);

        if check.allowed {
            tracing::debug!(
                tool = %tool,
                zone = %zone,
                source = %source,
                forced = force,
                "Tool permitted"
            );
        } else {
            tracing::warn!(
                tool = %tool,
                zone = %zone,
                source = %source,
                forced = force,
                "Tool denied"
            );
        }
        check
    }

    /// Persist an override for one tool.
    ///
    /// A damaged override file is reported, not overwritten.
    pub fn set_tool_zone(&self, tool: &str, zone: ToolZone, set_by: Option<&str>) -> Result<()> {
        let mut config = self.load()?.unwrap_or_default();
        config
            .tool_permissions
            .insert(tool.to_string(), StoredZone::Valid(zone));
        config.last_updated = Some(Utc::now());
        if let Some(who) = set_by {
            config.set_by = Some(who.to_string());
        }
        self.write(&config)?;

        tracing::info!(
            tool = %tool,
            zone = %zone,
            set_by = ?set_by,
            "Tool zone override saved"
        );
        Ok(())
    }

    /// Delete the override file, reverting every tool to its default.
    pub fn reset_tool_zones(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Tool zone overrides reset");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every known tool with its effective zone, sorted by name.
    ///
    /// All rows come from one read of the override file.
    pub fn list_tool_zones(&self) -> Vec<ToolZoneEntry> {
        let overrides = self.load_overrides();

        let mut names: BTreeSet<String> = DEFAULT_TOOL_ZONES
            .iter()
            .map(|(name, _)| name.to_string())
            .collect();
        if let Some(ref config) = overrides {
            names.extend(config.tool_permissions.keys().cloned());
        }

        names
            .into_iter()
            .map(|tool| {
                let (zone, source) = resolve_against(overrides.as_ref(), &tool);
                ToolZoneEntry { tool, zone, source }
            })
            .collect()
    }

    fn write(&self, config: &ToolPermissionConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn resolve_against(overrides: Option<&ToolPermissionConfig>, tool: &str) -> (ToolZone, ZoneSource) {
    if let Some(stored) = overrides.and_then(|c| c.tool_permissions.get(tool)) {
        match stored {
            StoredZone::Valid(zone) => return (*zone, ZoneSource::UserOverride),
            StoredZone::Invalid(value) => tracing::warn!(
                tool = %tool,
                value = %value,
                "Ignoring invalid zone override"
            ),
        }
    }

    (
        default_zone(tool).unwrap_or(UNKNOWN_TOOL_ZONE),
        ZoneSource::Default,
    )
}
