//! Error types for cbrowser-guard operations.

use thiserror::Error;

use crate::permissions::ToolZone;

/// Result type alias for cbrowser-guard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur at the trust boundary.
///
/// Scanning and sanitization never produce errors; their findings are data.
/// The variants here cover persistence, configuration, and the explicit
/// rejections the orchestration layer turns decisions into.
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound request failed signature validation.
    ///
    /// The reason is for server-side logs only; see [`Error::public_message`].
    #[error("signature rejected: {reason}")]
    SignatureRejected {
        /// Specific rejection reason.
        reason: String,
    },

    /// Tool is not permitted to run in its zone.
    #[error("permission denied for {tool} ({zone} zone): {message}")]
    PermissionDenied {
        /// Tool that was denied.
        tool: String,
        /// Zone the tool resolved to.
        zone: ToolZone,
        /// User-facing explanation.
        message: String,
    },

    /// Red-zone tool invoked without the force flag.
    #[error("{message}")]
    ForceRequired {
        /// Tool that needs confirmation.
        tool: String,
        /// User-facing retry instruction.
        message: String,
    },

    /// A zone string did not name one of the five zones.
    #[error("invalid tool zone '{0}' (expected green, yellow, orange, red or black)")]
    InvalidZone(String),

    /// Tool handler failed.
    #[error("tool handler error for {tool}: {source}")]
    Handler {
        /// Tool whose handler failed.
        tool: String,
        /// Underlying handler error.
        #[source]
        source: anyhow::Error,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error is an authentication failure.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::SignatureRejected { .. })
    }

    /// Returns true if this error is a permission-zone denial.
    pub fn is_permission_denial(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied { .. } | Error::ForceRequired { .. }
        )
    }

    /// Message that may be returned to the untrusted caller.
    ///
    /// Signature rejections collapse to a generic message so the validation
    /// logic cannot be used as an oracle. Permission denials keep their
    /// user-facing text.
    pub fn public_message(&self) -> String {
        match self {
            Error::SignatureRejected { .. } => "authentication failed".to_string(),
            Error::PermissionDenied { message, .. } | Error::ForceRequired { message, .. } => {
                message.clone()
            }
            Error::Handler { tool, .. } => format!("tool {} failed", tool),
            _ => "internal error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_reason_not_public() {
        let err = Error::SignatureRejected {
            reason: "signature mismatch".into(),
        };
        assert!(err.is_auth_failure());
        assert_eq!(err.public_message(), "authentication failed");
        assert!(err.to_string().contains("signature mismatch"));
    }

    #[test]
    fn test_force_required_is_user_facing() {
        let err = Error::ForceRequired {
            tool: "execute_javascript".into(),
            message: "retry with force: true".into(),
        };
        assert!(err.is_permission_denial());
        assert_eq!(err.public_message(), "retry with force: true");
    }
}
