//! Configuration for the trust boundary.
//!
//! Settings load from TOML (`Config::from_file`) and can be overlaid with the
//! deployment environment (`Config::from_env` / `Config::apply_env`):
//!
//! - `MCP_SIGNING_SECRET`: shared HMAC key; absence disables signing.
//! - `MCP_SIGNING_REQUIRED`: `"true"` rejects unsigned requests.
//! - `CBROWSER_DATA_DIR`: directory holding `tool-permissions.json`.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the shared signing secret.
pub const ENV_SIGNING_SECRET: &str = "MCP_SIGNING_SECRET";
/// Environment variable that makes signing mandatory when set to `"true"`.
pub const ENV_SIGNING_REQUIRED: &str = "MCP_SIGNING_REQUIRED";
/// Environment variable overriding the data directory.
pub const ENV_DATA_DIR: &str = "CBROWSER_DATA_DIR";

/// File name of the persisted permission overrides.
pub const PERMISSIONS_FILE_NAME: &str = "tool-permissions.json";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Request signing settings.
    pub signing: SigningConfig,
    /// Nonce ledger settings.
    pub replay: ReplayConfig,
    /// Permission zone storage settings.
    pub permissions: PermissionsConfig,
    /// Tool description scanner settings.
    pub scanner: ScannerConfig,
    /// Output sanitizer settings.
    pub sanitizer: SanitizerConfig,
}

/// Request signing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SigningConfig {
    /// Shared HMAC secret. `None` disables signing entirely.
    #[serde(skip_serializing)]
    pub secret: Option<SecretString>,
    /// Reject requests that carry no signature headers.
    pub required: bool,
}

impl SigningConfig {
    /// Whether a secret is configured.
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }
}

/// Replay protection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Maximum accepted distance between request timestamp and now.
    #[serde(with = "humantime_serde")]
    pub max_clock_skew: Duration,
    /// How long a consumed nonce stays in the ledger.
    #[serde(with = "humantime_serde")]
    pub nonce_ttl: Duration,
    /// Interval between ledger sweeps.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_clock_skew: Duration::from_secs(5 * 60),
            nonce_ttl: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Permission zone storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Data directory (defaults to `~/.cbrowser`).
    pub data_dir: Option<PathBuf>,
}

impl PermissionsConfig {
    /// Resolve the data directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Full path of the permission overrides file.
    pub fn permissions_file(&self) -> PathBuf {
        self.resolved_data_dir().join(PERMISSIONS_FILE_NAME)
    }
}

/// Tool description scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Characters scanned per text field; the remainder is skipped.
    pub max_scan_chars: usize,
    /// Also scan `description` strings inside tool input schemas.
    pub scan_input_schema: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_scan_chars: 64 * 1024,
            scan_input_schema: true,
        }
    }
}

/// Output sanitizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Characters of extracted content processed; the remainder is dropped.
    pub max_content_chars: usize,
    /// Flag Cyrillic/Greek look-alikes of Latin letters.
    pub detect_homoglyphs: bool,
    /// Flag base64 and escape-sequence runs.
    pub detect_encoded: bool,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 1_000_000,
            detect_homoglyphs: true,
            detect_encoded: true,
        }
    }
}

impl Config {
    /// Load configuration from file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to file. The signing secret is never written.
    pub fn save(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default configuration overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Overlay values from an environment lookup.
    ///
    /// Taking the lookup as a closure keeps this testable without touching the
    /// process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(ENV_SIGNING_SECRET).filter(|s| !s.is_empty()) {
            self.signing.secret = Some(SecretString::new(secret));
        }
        if let Some(required) = lookup(ENV_SIGNING_REQUIRED) {
            self.signing.required = required == "true";
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|s| !s.is_empty()) {
            self.permissions.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Create a builder for configuration.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the signing secret.
    pub fn signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.signing.secret = Some(SecretString::new(secret.into()));
        self
    }

    /// Require signatures on every request.
    pub fn signing_required(mut self, required: bool) -> Self {
        self.config.signing.required = required;
        self
    }

    /// Set the data directory for permission overrides.
    pub fn data_dir(mut self, path: PathBuf) -> Self {
        self.config.permissions.data_dir = Some(path);
        self
    }

    /// Set the accepted clock skew for signed requests.
    pub fn max_clock_skew(mut self, skew: Duration) -> Self {
        self.config.replay.max_clock_skew = skew;
        self
    }

    /// Set the nonce ledger TTL.
    pub fn nonce_ttl(mut self, ttl: Duration) -> Self {
        self.config.replay.nonce_ttl = ttl;
        self
    }

    /// Set the sanitizer input cap.
    pub fn max_content_chars(mut self, max: usize) -> Self {
        self.config.sanitizer.max_content_chars = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Config {
        self.config
    }
}

/// `~/.cbrowser`, or `./.cbrowser` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cbrowser")
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.signing.is_enabled());
        assert!(!config.signing.required);
        assert_eq!(config.replay.max_clock_skew, Duration::from_secs(300));
        assert_eq!(config.replay.nonce_ttl, Duration::from_secs(600));
        assert_eq!(config.replay.sweep_interval, Duration::from_secs(60));
        assert!(config
            .permissions
            .permissions_file()
            .ends_with(".cbrowser/tool-permissions.json"));
    }

    #[test]
    fn test_env_overlay() {
        let vars = env(&[
            (ENV_SIGNING_SECRET, "s3cret"),
            (ENV_SIGNING_REQUIRED, "true"),
            (ENV_DATA_DIR, "/tmp/cbrowser-test"),
        ]);
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).cloned());

        assert_eq!(
            config.signing.secret.as_ref().map(|s| s.expose_secret().as_str()),
            Some("s3cret")
        );
        assert!(config.signing.required);
        assert_eq!(
            config.permissions.permissions_file(),
            PathBuf::from("/tmp/cbrowser-test/tool-permissions.json")
        );
    }

    #[test]
    fn test_required_only_when_literal_true() {
        let vars = env(&[(ENV_SIGNING_REQUIRED, "yes")]);
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).cloned());
        assert!(!config.signing.required);
    }

    #[test]
    fn test_empty_secret_disables_signing() {
        let vars = env(&[(ENV_SIGNING_SECRET, "")]);
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).cloned());
        assert!(!config.signing.is_enabled());
    }

    #[test]
    fn test_toml_roundtrip_omits_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");

        let config = Config::builder()
            .signing_secret("do-not-persist")
            .signing_required(true)
            .max_clock_skew(Duration::from_secs(120))
            .build();
        config.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("do-not-persist"));
        assert!(raw.contains("2m"));

        let loaded = Config::from_file(&path).unwrap();
        assert!(loaded.signing.required);
        assert!(!loaded.signing.is_enabled());
        assert_eq!(loaded.replay.max_clock_skew, Duration::from_secs(120));
    }
}
