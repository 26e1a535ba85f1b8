//! HMAC-SHA256 request signing and validation.
//!
//! A signed request carries three headers:
//!
//! - `X-Signature`: lowercase hex `HMAC-SHA256(body + "." + timestamp + "." + nonce)`
//! - `X-Timestamp`: epoch milliseconds
//! - `X-Nonce`: single-use random string (UUID v4)
//!
//! Validation checks, in order: header presence, timestamp format, timestamp
//! window, nonce freshness, signature. Each failure has its own
//! [`RejectionReason`]. A verified nonce is consumed in the [`ReplayLedger`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::replay::{Clock, ReplayLedger};
use crate::config::Config;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Signature header name.
pub const SIGNATURE_HEADER: &str = "x-signature";
/// Timestamp header name.
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
/// Nonce header name.
pub const NONCE_HEADER: &str = "x-nonce";

/// Inbound request headers.
///
/// Names compare case-insensitively. Repeated header lines are kept but only
/// the first value is returned.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    entries: Vec<(String, String)>,
}

impl RequestHeaders {
    /// Empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header line.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
    }

    /// Builder form of [`append`](Self::append).
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.append(name, value);
        self
    }

    /// First value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of header lines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no header lines.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// Compute the hex signature of a request.
pub fn compute_signature(body: &str, timestamp_ms: i64, nonce: &str, secret: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Internal(format!("HMAC key error: {}", e)))?;
    mac.update(body.as_bytes());
    mac.update(b".");
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(b".");
    mac.update(nonce.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// The three signing headers for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// Hex signature.
    pub signature: String,
    /// Epoch milliseconds.
    pub timestamp_ms: i64,
    /// Nonce.
    pub nonce: String,
}

impl SignedHeaders {
    /// Add the signing headers to an existing header set.
    pub fn apply(&self, headers: &mut RequestHeaders) {
        headers.append("X-Signature", self.signature.clone());
        headers.append("X-Timestamp", self.timestamp_ms.to_string());
        headers.append("X-Nonce", self.nonce.clone());
    }

    /// Header set holding only the signing headers.
    pub fn to_headers(&self) -> RequestHeaders {
        let mut headers = RequestHeaders::new();
        self.apply(&mut headers);
        headers
    }
}

/// Signs outbound requests.
#[derive(Debug)]
pub struct RequestSigner {
    secret: SecretString,
    clock: Arc<dyn Clock>,
}

impl RequestSigner {
    /// Signer using `clock` for timestamps.
    pub fn new(secret: SecretString, clock: Arc<dyn Clock>) -> Self {
        Self { secret, clock }
    }

    /// Sign with the current time and a fresh UUID v4 nonce.
    pub fn sign(&self, body: &str) -> Result<SignedHeaders> {
        let nonce = uuid::Uuid::new_v4().to_string();
        self.sign_with(body, self.clock.now_millis(), &nonce)
    }

    /// Sign with an explicit timestamp and nonce.
    pub fn sign_with(&self, body: &str, timestamp_ms: i64, nonce: &str) -> Result<SignedHeaders> {
        let signature = compute_signature(
            body,
            timestamp_ms,
            nonce,
            self.secret.expose_secret().as_bytes(),
        )?;
        Ok(SignedHeaders {
            signature,
            timestamp_ms,
            nonce: nonce.to_string(),
        })
    }
}

/// Why a signed request was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// No signing headers and signing is required.
    MissingHeaders,
    /// Some, but not all, signing headers present.
    IncompleteHeaders {
        /// Names of the absent headers.
        missing: Vec<&'static str>,
    },
    /// Timestamp is not an integer.
    InvalidTimestamp(String),
    /// Timestamp too far from now, in either direction.
    OutsideWindow {
        /// `now - timestamp`, negative for future timestamps.
        age_ms: i64,
        /// Accepted skew.
        max_skew_ms: i64,
    },
    /// Nonce already consumed.
    Replay,
    /// Supplied signature has the wrong length.
    LengthMismatch {
        /// Expected hex length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },
    /// Signature does not match.
    SignatureMismatch,
    /// Signature could not be computed.
    Internal(String),
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::MissingHeaders => write!(f, "missing signature headers"),
            RejectionReason::IncompleteHeaders { missing } => {
                write!(f, "incomplete signature headers (missing {})", missing.join(", "))
            }
            RejectionReason::InvalidTimestamp(raw) => {
                write!(f, "invalid timestamp format: {:?}", raw)
            }
            RejectionReason::OutsideWindow {
                age_ms,
                max_skew_ms,
            } => write!(
                f,
                "timestamp outside window: request age {}ms exceeds {}ms",
                age_ms, max_skew_ms
            ),
            RejectionReason::Replay => write!(f, "replay: nonce already used"),
            RejectionReason::LengthMismatch { expected, actual } => write!(
                f,
                "signature length mismatch (expected {}, got {})",
                expected, actual
            ),
            RejectionReason::SignatureMismatch => write!(f, "signature mismatch"),
            RejectionReason::Internal(msg) => write!(f, "signature computation failed: {}", msg),
        }
    }
}

/// Result of validating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Signature verified; the nonce is now consumed.
    Verified {
        /// Consumed nonce.
        nonce: String,
        /// Request timestamp.
        timestamp_ms: i64,
    },
    /// No signing headers, and signing is optional.
    Unsigned,
    /// Rejected.
    Rejected(RejectionReason),
}

impl ValidationOutcome {
    /// Whether the request may proceed.
    pub fn is_valid(&self) -> bool {
        !matches!(self, ValidationOutcome::Rejected(_))
    }

    /// Rejection reason, if any.
    pub fn reason(&self) -> Option<&RejectionReason> {
        match self {
            ValidationOutcome::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    /// Convert a rejection into [`Error::SignatureRejected`].
    pub fn into_result(self) -> Result<Self> {
        match self {
            ValidationOutcome::Rejected(reason) => Err(Error::SignatureRejected {
                reason: reason.to_string(),
            }),
            outcome => Ok(outcome),
        }
    }
}

/// Validates inbound signed requests.
#[derive(Debug)]
pub struct RequestValidator {
    secret: SecretString,
    required: bool,
    max_clock_skew: Duration,
    ledger: Arc<ReplayLedger>,
    clock: Arc<dyn Clock>,
}

impl RequestValidator {
    /// Validator with the default five minute window.
    pub fn new(
        secret: SecretString,
        required: bool,
        ledger: Arc<ReplayLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secret,
            required,
            max_clock_skew: Duration::from_secs(5 * 60),
            ledger,
            clock,
        }
    }

    /// Validator from configuration. `None` when no secret is configured.
    pub fn from_config(
        config: &Config,
        ledger: Arc<ReplayLedger>,
        clock: Arc<dyn Clock>,
    ) -> Option<Self> {
        let secret = config.signing.secret.clone()?;
        Some(
            Self::new(secret, config.signing.required, ledger, clock)
                .with_max_clock_skew(config.replay.max_clock_skew),
        )
    }

    /// Set the accepted clock skew.
    pub fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }

    /// Whether unsigned requests are rejected.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Nonce ledger in use.
    pub fn ledger(&self) -> &Arc<ReplayLedger> {
        &self.ledger
    }

    /// Validate a request against its raw body.
    pub fn validate(&self, headers: &RequestHeaders, body: &str) -> ValidationOutcome {
        let signature = headers.get(SIGNATURE_HEADER);
        let timestamp = headers.get(TIMESTAMP_HEADER);
        let nonce = headers.get(NONCE_HEADER);

        let (signature, timestamp, nonce) = match (signature, timestamp, nonce) {
            (None, None, None) => {
                return if self.required {
                    ValidationOutcome::Rejected(RejectionReason::MissingHeaders)
                } else {
                    ValidationOutcome::Unsigned
                };
            }
            (Some(s), Some(t), Some(n)) => (s, t, n),
            (s, t, n) => {
                let missing = [
                    (SIGNATURE_HEADER, s.is_none()),
                    (TIMESTAMP_HEADER, t.is_none()),
                    (NONCE_HEADER, n.is_none()),
                ]
                .into_iter()
                .filter(|(_, absent)| *absent)
                .map(|(name, _)| name)
                .collect();
                return ValidationOutcome::Rejected(RejectionReason::IncompleteHeaders { missing });
            }
        };

        let timestamp_ms: i64 = match timestamp.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                return ValidationOutcome::Rejected(RejectionReason::InvalidTimestamp(
                    timestamp.to_string(),
                ))
            }
        };

        let max_skew_ms = self.max_clock_skew.as_millis() as i64;
        let age_ms = self.clock.now_millis().saturating_sub(timestamp_ms);
        if age_ms.saturating_abs() > max_skew_ms {
            return ValidationOutcome::Rejected(RejectionReason::OutsideWindow {
                age_ms,
                max_skew_ms,
            });
        }

        if self.ledger.contains(nonce) {
            return ValidationOutcome::Rejected(RejectionReason::Replay);
        }

        let expected = match compute_signature(
            body,
            timestamp_ms,
            nonce,
            self.secret.expose_secret().as_bytes(),
        ) {
            Ok(sig) => sig,
            Err(e) => return ValidationOutcome::Rejected(RejectionReason::Internal(e.to_string())),
        };

        let supplied = signature.trim().to_ascii_lowercase();
        if supplied.len() != expected.len() {
            return ValidationOutcome::Rejected(RejectionReason::LengthMismatch {
                expected: expected.len(),
                actual: supplied.len(),
            });
        }
        if !bool::from(supplied.as_bytes().ct_eq(expected.as_bytes())) {
            return ValidationOutcome::Rejected(RejectionReason::SignatureMismatch);
        }

        if !self.ledger.try_insert(nonce, timestamp_ms) {
            return ValidationOutcome::Rejected(RejectionReason::Replay);
        }

        tracing::debug!(nonce = %nonce, age_ms, "Request signature verified");
        ValidationOutcome::Verified {
            nonce: nonce.to_string(),
            timestamp_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::replay::ManualClock;

    const SECRET: &str = "test-signing-secret";
    const NOW: i64 = 1_700_000_000_000;
    const BODY: &str = r#"{"tool":"navigate","arguments":{"url":"https://example.com"}}"#;

    fn secret() -> SecretString {
        SecretString::new(SECRET.to_string())
    }

    fn setup(required: bool) -> (RequestValidator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let ledger = Arc::new(ReplayLedger::new(Duration::from_secs(600)));
        let validator = RequestValidator::new(secret(), required, ledger, clock.clone());
        (validator, clock)
    }

    fn signed(body: &str, ts: i64, nonce: &str) -> RequestHeaders {
        let signature = compute_signature(body, ts, nonce, SECRET.as_bytes()).unwrap();
        RequestHeaders::new()
            .with("X-Signature", signature)
            .with("X-Timestamp", ts.to_string())
            .with("X-Nonce", nonce)
    }

    #[test]
    fn test_signature_format() {
        let sig = compute_signature("body", 1, "n", b"k").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(sig, compute_signature("body", 2, "n", b"k").unwrap());
    }

    #[test]
    fn test_valid_request_verified() {
        let (validator, _) = setup(true);
        let outcome = validator.validate(&signed(BODY, NOW, "nonce-1"), BODY);
        assert_eq!(
            outcome,
            ValidationOutcome::Verified {
                nonce: "nonce-1".into(),
                timestamp_ms: NOW
            }
        );
        assert!(validator.ledger().contains("nonce-1"));
    }

    #[test]
    fn test_unsigned_allowed_when_optional() {
        let (validator, _) = setup(false);
        let outcome = validator.validate(&RequestHeaders::new(), BODY);
        assert_eq!(outcome, ValidationOutcome::Unsigned);
        assert!(outcome.is_valid());
    }

    #[test]
    fn test_unsigned_rejected_when_required() {
        let (validator, _) = setup(true);
        let outcome = validator.validate(&RequestHeaders::new(), BODY);
        assert_eq!(outcome.reason(), Some(&RejectionReason::MissingHeaders));
    }

    #[test]
    fn test_partial_headers_rejected_even_when_optional() {
        let (validator, _) = setup(false);
        let headers = RequestHeaders::new().with("X-Timestamp", NOW.to_string());
        let outcome = validator.validate(&headers, BODY);
        assert_eq!(
            outcome.reason(),
            Some(&RejectionReason::IncompleteHeaders {
                missing: vec![SIGNATURE_HEADER, NONCE_HEADER]
            })
        );
    }

    #[test]
    fn test_non_numeric_timestamp() {
        let (validator, _) = setup(true);
        let signature = compute_signature(BODY, NOW, "n", SECRET.as_bytes()).unwrap();
        let headers: RequestHeaders = vec![
            ("x-signature", signature),
            ("x-timestamp", "yesterday".to_string()),
            ("x-nonce", "n".to_string()),
        ]
        .into_iter()
        .collect();
        let outcome = validator.validate(&headers, BODY);
        assert!(matches!(
            outcome.reason(),
            Some(RejectionReason::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_timestamp_window_both_directions() {
        let (validator, _) = setup(true);
        let six_minutes = 6 * 60 * 1000;

        let stale = validator.validate(&signed(BODY, NOW - six_minutes, "a"), BODY);
        assert_eq!(
            stale.reason(),
            Some(&RejectionReason::OutsideWindow {
                age_ms: six_minutes,
                max_skew_ms: 300_000
            })
        );
        assert!(stale.reason().unwrap().to_string().contains("360000ms"));

        let future = validator.validate(&signed(BODY, NOW + six_minutes, "b"), BODY);
        assert!(matches!(
            future.reason(),
            Some(RejectionReason::OutsideWindow { age_ms, .. }) if *age_ms < 0
        ));

        let edge = validator.validate(&signed(BODY, NOW - 300_000, "c"), BODY);
        assert!(edge.is_valid());
    }

    #[test]
    fn test_replay_rejected() {
        let (validator, _) = setup(true);
        let headers = signed(BODY, NOW, "once");

        assert!(validator.validate(&headers, BODY).is_valid());
        let second = validator.validate(&headers, BODY);
        assert_eq!(second.reason(), Some(&RejectionReason::Replay));
        assert!(second.reason().unwrap().to_string().contains("replay"));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let (validator, _) = setup(true);
        let headers = signed(BODY, NOW, "n");
        let outcome = validator.validate(&headers, r#"{"tool":"execute_javascript"}"#);
        assert_eq!(outcome.reason(), Some(&RejectionReason::SignatureMismatch));
        assert!(!validator.ledger().contains("n"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let (validator, _) = setup(true);
        let signature = compute_signature(BODY, NOW, "n", b"other-secret").unwrap();
        let headers = RequestHeaders::new()
            .with("x-signature", signature)
            .with("x-timestamp", NOW.to_string())
            .with("x-nonce", "n");
        assert_eq!(
            validator.validate(&headers, BODY).reason(),
            Some(&RejectionReason::SignatureMismatch)
        );
    }

    #[test]
    fn test_length_mismatch_checked_first() {
        let (validator, _) = setup(true);
        let headers = RequestHeaders::new()
            .with("x-signature", "abc123")
            .with("x-timestamp", NOW.to_string())
            .with("x-nonce", "n");
        assert_eq!(
            validator.validate(&headers, BODY).reason(),
            Some(&RejectionReason::LengthMismatch {
                expected: 64,
                actual: 6
            })
        );
    }

    #[test]
    fn test_uppercase_signature_accepted() {
        let (validator, _) = setup(true);
        let signature = compute_signature(BODY, NOW, "n", SECRET.as_bytes())
            .unwrap()
            .to_uppercase();
        let headers = RequestHeaders::new()
            .with("X-SIGNATURE", signature)
            .with("x-Timestamp", NOW.to_string())
            .with("X-nonce", "n");
        assert!(validator.validate(&headers, BODY).is_valid());
    }

    #[test]
    fn test_duplicate_header_first_value_wins() {
        let (validator, _) = setup(true);
        let mut headers = signed(BODY, NOW, "n");
        headers.append("X-Signature", "0".repeat(64));
        assert!(validator.validate(&headers, BODY).is_valid());
    }

    #[test]
    fn test_signer_roundtrip_with_clock() {
        let (validator, clock) = setup(true);
        let signer = RequestSigner::new(secret(), clock.clone());

        let signed = signer.sign(BODY).unwrap();
        assert_eq!(signed.timestamp_ms, NOW);
        assert!(uuid::Uuid::parse_str(&signed.nonce).is_ok());
        assert!(validator.validate(&signed.to_headers(), BODY).is_valid());

        clock.advance(Duration::from_secs(301));
        let late = signer.sign_with(BODY, NOW, "late").unwrap();
        assert!(!validator.validate(&late.to_headers(), BODY).is_valid());
    }

    #[test]
    fn test_rejection_reasons_are_distinct() {
        let reasons = vec![
            RejectionReason::MissingHeaders,
            RejectionReason::IncompleteHeaders {
                missing: vec![NONCE_HEADER],
            },
            RejectionReason::InvalidTimestamp("x".into()),
            RejectionReason::OutsideWindow {
                age_ms: 1,
                max_skew_ms: 0,
            },
            RejectionReason::Replay,
            RejectionReason::LengthMismatch {
                expected: 64,
                actual: 1,
            },
            RejectionReason::SignatureMismatch,
        ];
        let mut messages: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), reasons.len());
    }

    #[test]
    fn test_into_result_maps_to_auth_error() {
        let err = ValidationOutcome::Rejected(RejectionReason::Replay)
            .into_result()
            .unwrap_err();
        assert!(err.is_auth_failure());
        assert_eq!(err.public_message(), "authentication failed");
        assert!(ValidationOutcome::Unsigned.into_result().is_ok());
    }

    #[test]
    fn test_from_config_requires_secret() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(NOW));
        let ledger = Arc::new(ReplayLedger::new(Duration::from_secs(600)));

        assert!(RequestValidator::from_config(&Config::default(), ledger.clone(), clock.clone())
            .is_none());

        let config = Config::builder()
            .signing_secret(SECRET)
            .signing_required(true)
            .max_clock_skew(Duration::from_secs(60))
            .build();
        let validator = RequestValidator::from_config(&config, ledger, clock).unwrap();
        assert!(validator.is_required());
        let outcome = validator.validate(&signed(BODY, NOW - 61_000, "n"), BODY);
        assert!(matches!(
            outcome.reason(),
            Some(RejectionReason::OutsideWindow { max_skew_ms: 60_000, .. })
        ));
    }
}
