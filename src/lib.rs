//! # cbrowser-guard
//!
//! Trust boundary between an LLM browser-automation agent and the outside
//! world.
//!
//! The agent is offered a catalog of MCP tools and reads text from arbitrary
//! web pages. Both are adversarial inputs. This crate decides what to trust:
//!
//! - **Tool catalog scanning**: flags tool descriptions that chain other
//!   tools, claim elevated roles or point at exfiltration targets
//! - **Output sanitization**: strips invisible characters from extracted page
//!   text, flags injection phrasing and look-alike letters, and wraps the
//!   result in explicit untrusted-content markers
//! - **Request signing**: HMAC-SHA256 over body, timestamp and nonce, with a
//!   five minute window and an in-process replay ledger
//! - **Permission zones**: green/yellow/orange/red/black per tool, with
//!   file-backed user overrides and a `force` path for red tools
//!
//! ## Security Considerations
//!
//! - Detection is heuristic (static regex and lookup tables). A clean scan is
//!   not proof of safety.
//! - The replay ledger lives in process memory. Separate server instances do
//!   not share it, and a restart clears it.
//! - Signature rejection reasons are logged, never returned to the caller.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cbrowser_guard::{GuardedRequest, SecurityGuard, ToolHandler, ToolOutput};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let guard = SecurityGuard::from_env();
//!     let _sweeper = guard.spawn_sweeper();
//!
//!     let request = GuardedRequest::parse(headers, body)?;
//!     let response = guard.invoke(request, &browser_tools).await?;
//!
//!     println!("{}", response.content);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod config;
pub mod error;
pub mod guard;
pub mod permissions;
pub mod security;

pub use audit::{AuditEntry, AuditLog, AuditOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use guard::{
    GuardedRequest, GuardedResponse, SecurityGuard, SecurityGuardBuilder, ToolHandler, ToolOutput,
};
pub use permissions::{
    PermissionCheck, StoredZone, ToolPermissionConfig, ToolPermissionStore, ToolZone, ZoneSource,
};
pub use security::{
    OutputSanitizer, PatternScanner, RequestHeaders, RequestSigner, RequestValidator,
    ReplayLedger, SanitizationResult, ScanStatus, ScanSummary, Severity, ToolDefinition,
    ValidationOutcome,
};
