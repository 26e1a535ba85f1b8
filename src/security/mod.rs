//! Detection and request-integrity primitives.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      security                            │
//! │                                                          │
//! │  Catalog ──► PatternScanner ──► ScanSummary              │
//! │              (cross-tool, escalation, exfiltration,      │
//! │               sensitive paths, encoded content)          │
//! │                                                          │
//! │  Page text ──► OutputSanitizer ──► SanitizationResult    │
//! │               (injection, hidden chars, homoglyphs,      │
//! │                encoded payloads, strip, wrap)            │
//! │                                                          │
//! │  Request ──► RequestValidator ──► ValidationOutcome      │
//! │              (HMAC-SHA256, timestamp window,             │
//! │               ReplayLedger)                              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`detectors`] - Severity scale, status roll-up and pattern matching
//! - [`patterns`] - Static pattern and character tables (compiled once)
//! - [`scanner`] - Tool description scanning
//! - [`sanitizer`] - Extracted content sanitization
//! - [`signing`] - Request signing and validation
//! - [`replay`] - Nonce ledger and clocks

pub mod detectors;
pub mod patterns;
pub mod replay;
pub mod sanitizer;
pub mod scanner;
pub mod signing;

// Re-export primary types for convenience
pub use detectors::{DetectionPattern, ScanStatus, Severity};
pub use replay::{Clock, ManualClock, ReplayLedger, SweeperHandle, SystemClock};
pub use sanitizer::{
    detect_hidden_characters, strip_hidden_characters, OutputSanitizer, SanitizationAction,
    SanitizationIssue, SanitizationResult,
};
pub use scanner::{
    format_scan_report, PatternScanner, ScanIssue, ScanSummary, ServerScanResult, ServerTools,
    ToolDefinition, ToolScanResult,
};
pub use signing::{
    compute_signature, RejectionReason, RequestHeaders, RequestSigner, RequestValidator,
    SignedHeaders, ValidationOutcome,
};
