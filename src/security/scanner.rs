//! Tool description scanning.
//!
//! Scans the descriptions an MCP server advertises for its tools, before the
//! catalog is offered to the agent. Every pattern in the table runs against
//! every field; issues accumulate and the worst severity decides the status
//! of the tool, the server and the whole catalog.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::detectors::{match_all, CompiledPattern, ScanStatus, Severity};
use super::patterns;
use crate::config::ScannerConfig;

/// A tool as advertised by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Free-text description shown to the agent.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the tool arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

impl ToolDefinition {
    /// Create a tool definition without an input schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
        }
    }

    /// Attach an input schema.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }
}

/// The tools one server exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTools {
    /// Server name.
    pub server_name: String,
    /// Advertised tools.
    pub tools: Vec<ToolDefinition>,
}

/// A single pattern match in a tool definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanIssue {
    /// Field that matched (`description` or a schema path).
    pub field: String,
    /// Taxonomy category.
    pub category: String,
    /// Severity of the matching pattern.
    pub severity: Severity,
    /// What the pattern catches.
    pub description: String,
    /// Matched text.
    pub matched_text: String,
    /// Character offset within the field.
    pub position: usize,
}

/// Scan outcome for one tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolScanResult {
    /// Tool name.
    pub tool_name: String,
    /// Worst severity among `issues`.
    pub status: ScanStatus,
    /// Every match, in scan order.
    pub issues: Vec<ScanIssue>,
}

impl ToolScanResult {
    /// True when no warning or critical issue was found.
    pub fn is_clean(&self) -> bool {
        self.status == ScanStatus::Clean
    }

    /// Distinct categories among the issues, in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for issue in &self.issues {
            if !seen.contains(&issue.category.as_str()) {
                seen.push(&issue.category);
            }
        }
        seen
    }
}

/// Scan outcome for one server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerScanResult {
    /// Server name.
    pub server_name: String,
    /// Worst status among `tools`.
    pub status: ScanStatus,
    /// Per-tool results.
    pub tools: Vec<ToolScanResult>,
}

/// Scan outcome for a whole catalog.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    /// Worst status among `servers`.
    pub status: ScanStatus,
    /// Per-server results.
    pub servers: Vec<ServerScanResult>,
    /// Number of tools scanned.
    pub total_tools: usize,
    /// Tools with status clean.
    pub clean_tools: usize,
    /// Tools with status warning.
    pub warning_tools: usize,
    /// Tools with status critical.
    pub critical_tools: usize,
}

impl ScanSummary {
    /// Iterate `(server, tool)` pairs whose status is not clean.
    pub fn flagged_tools(&self) -> impl Iterator<Item = (&str, &ToolScanResult)> {
        self.servers.iter().flat_map(|server| {
            server
                .tools
                .iter()
                .filter(|t| !t.is_clean())
                .map(move |t| (server.server_name.as_str(), t))
        })
    }
}

/// Stateless pattern scanner over a static table.
pub struct PatternScanner {
    config: ScannerConfig,
    patterns: &'static [CompiledPattern],
}

impl PatternScanner {
    /// Scanner over the tool-description table with default configuration.
    pub fn new() -> Self {
        Self::with_config(ScannerConfig::default())
    }

    /// Scanner over the tool-description table.
    pub fn with_config(config: ScannerConfig) -> Self {
        Self {
            config,
            patterns: patterns::tool_description_patterns(),
        }
    }

    /// Scanner over an arbitrary compiled table.
    pub fn with_patterns(config: ScannerConfig, patterns: &'static [CompiledPattern]) -> Self {
        Self { config, patterns }
    }

    /// Scan free text. Issues report `text` as their field.
    pub fn scan(&self, text: &str) -> Vec<ScanIssue> {
        self.scan_field(text, "text")
    }

    /// Worst status of `text`.
    pub fn status(&self, text: &str) -> ScanStatus {
        status_of(&self.scan(text))
    }

    /// Scan one tool: its description, then schema descriptions.
    pub fn scan_tool(&self, tool: &ToolDefinition) -> ToolScanResult {
        let mut issues = self.scan_field(&tool.description, "description");

        if self.config.scan_input_schema {
            if let Some(ref schema) = tool.input_schema {
                let mut fields = Vec::new();
                collect_schema_descriptions(schema, "inputSchema", &mut fields);
                for (path, text) in fields {
                    issues.extend(self.scan_field(text, &path));
                }
            }
        }

        let status = status_of(&issues);
        if status != ScanStatus::Clean {
            tracing::warn!(
                tool = %tool.name,
                status = %status,
                issues = issues.len(),
                "Tool description flagged"
            );
        }

        ToolScanResult {
            tool_name: tool.name.clone(),
            status,
            issues,
        }
    }

    /// Scan every tool a server advertises.
    pub fn scan_server(&self, server_name: &str, tools: &[ToolDefinition]) -> ServerScanResult {
        let tools: Vec<ToolScanResult> = tools.iter().map(|t| self.scan_tool(t)).collect();
        ServerScanResult {
            server_name: server_name.to_string(),
            status: ScanStatus::worst(tools.iter().map(|t| t.status)),
            tools,
        }
    }

    /// Scan a full catalog of servers.
    pub fn scan_catalog(&self, servers: &[ServerTools]) -> ScanSummary {
        let servers: Vec<ServerScanResult> = servers
            .iter()
            .map(|s| self.scan_server(&s.server_name, &s.tools))
            .collect();

        let mut summary = ScanSummary {
            status: ScanStatus::worst(servers.iter().map(|s| s.status)),
            servers: Vec::new(),
            total_tools: 0,
            clean_tools: 0,
            warning_tools: 0,
            critical_tools: 0,
        };
        for tool in servers.iter().flat_map(|s| &s.tools) {
            summary.total_tools += 1;
            match tool.status {
                ScanStatus::Clean => summary.clean_tools += 1,
                ScanStatus::Warning => summary.warning_tools += 1,
                ScanStatus::Critical => summary.critical_tools += 1,
            }
        }
        summary.servers = servers;

        tracing::info!(
            status = %summary.status,
            tools = summary.total_tools,
            critical = summary.critical_tools,
            warning = summary.warning_tools,
            "Tool catalog scanned"
        );
        summary
    }

    fn scan_field(&self, text: &str, field: &str) -> Vec<ScanIssue> {
        let (scanned, truncated) = match text.char_indices().nth(self.config.max_scan_chars) {
            Some((idx, _)) => (&text[..idx], true),
            None => (text, false),
        };

        let mut issues: Vec<ScanIssue> = match_all(self.patterns, scanned)
            .into_iter()
            .map(|m| ScanIssue {
                field: field.to_string(),
                category: m.category.to_string(),
                severity: m.severity,
                description: m.description.to_string(),
                matched_text: m.matched_text,
                position: m.position,
            })
            .collect();

        if truncated {
            issues.push(ScanIssue {
                field: field.to_string(),
                category: "scan_truncated".into(),
                severity: Severity::Info,
                description: format!(
                    "Only the first {} characters were scanned",
                    self.config.max_scan_chars
                ),
                matched_text: String::new(),
                position: self.config.max_scan_chars,
            });
        }
        issues
    }
}

impl Default for PatternScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Worst status among a set of issues.
pub fn status_of(issues: &[ScanIssue]) -> ScanStatus {
    ScanStatus::from_severities(issues.iter().map(|i| i.severity))
}

/// Render a catalog summary for operators.
pub fn format_scan_report(summary: &ScanSummary) -> String {
    let mut out = format!(
        "Tool scan: {} ({} tools: {} clean, {} warning, {} critical)\n",
        summary.status.to_string().to_uppercase(),
        summary.total_tools,
        summary.clean_tools,
        summary.warning_tools,
        summary.critical_tools
    );

    for server in &summary.servers {
        let flagged: Vec<&ToolScanResult> =
            server.tools.iter().filter(|t| !t.is_clean()).collect();
        if flagged.is_empty() {
            continue;
        }
        out.push_str(&format!("\n[{}] {}\n", server.server_name, server.status));
        for tool in flagged {
            out.push_str(&format!(
                "  - {} ({}): {}\n",
                tool.tool_name,
                tool.status,
                tool.categories().join(", ")
            ));
        }
    }
    out
}

/// Collect `(path, text)` for every string-valued `description` in a schema.
fn collect_schema_descriptions<'a>(value: &'a Value, path: &str, out: &mut Vec<(String, &'a str)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = format!("{}.{}", path, key);
                match (key.as_str(), child) {
                    ("description", Value::String(text)) => out.push((child_path, text)),
                    _ => collect_schema_descriptions(child, &child_path, out),
                }
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_schema_descriptions(child, &format!("{}[{}]", path, i), out);
            }
        }
        _ => {}
    }
}
