//! Configuration loading and validation.
//!
//! Config location: `~/.tempora/tempora.json` (JSON5).
//! Environment variables override the file for deployment secrets.

use secrecy::SecretBox;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default access token lifetime (15 minutes).
const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;
/// Default refresh token lifetime (7 days).
const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 3600;
/// Default reclaimer interval (hourly).
const DEFAULT_RECLAIM_INTERVAL_SECS: u64 = 3600;
/// Default deadline for a single store call.
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;
/// Default login attempts allowed per identifier per minute.
const DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE: u32 = 10;
/// Minimum signing key length in bytes (HS256).
pub const MIN_SIGNING_KEY_BYTES: usize = 32;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing required field.
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Authentication and token configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Global settings.
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// # Errors
    ///
    /// Returns error if config cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("tempora.json")
    }

    /// Get the Tempora state directory.
    ///
    /// Uses `TEMPORA_STATE_DIR` env var if set, otherwise `~/.tempora`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("TEMPORA_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".tempora")
        } else {
            PathBuf::from(".tempora")
        }
    }

    /// Directory holding the sled databases.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.gateway
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("data"))
    }

    /// Validate the file-level configuration.
    ///
    /// Auth settings are validated separately by [`AuthConfig::validate`]
    /// once environment overrides have been applied.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.port == 0 {
            return Err(ConfigError::Validation(
                "Gateway port cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address mode.
    #[serde(default)]
    pub mode: BindMode,

    /// Enable CORS.
    #[serde(default = "default_true")]
    pub cors: bool,

    /// Per-request deadline in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Data directory override.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            mode: BindMode::default(),
            cors: true,
            timeout_secs: default_timeout(),
            data_dir: None,
        }
    }
}

impl GatewayConfig {
    /// Resolve the bind address for the configured mode.
    #[must_use]
    pub fn bind_address(&self) -> String {
        match &self.mode {
            BindMode::Local => "127.0.0.1".to_string(),
            BindMode::Public => "0.0.0.0".to_string(),
            BindMode::Custom(addr) => addr.clone(),
        }
    }
}

const fn default_port() -> u16 {
    18790
}

const fn default_timeout() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

/// Gateway bind mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    /// Bind to localhost only.
    #[default]
    Local,
    /// Bind to all interfaces.
    Public,
    /// Custom bind address.
    Custom(String),
}

/// Authentication configuration.
///
/// The signing key and TTLs are process-wide and read-only once the
/// gateway has started.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// HMAC signing key for access tokens (hex-encoded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Access token lifetime in seconds.
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,

    /// Refresh token lifetime in seconds.
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,

    /// Interval between expired refresh token sweeps, in seconds.
    #[serde(default = "default_reclaim_interval")]
    pub reclaim_interval_secs: u64,

    /// Deadline for a single store call, in milliseconds.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,

    /// Header carrying the bearer token.
    #[serde(default = "default_token_header")]
    pub token_header: String,

    /// Issue a new refresh token (and revoke the old one) on every refresh.
    #[serde(default)]
    pub rotate_refresh_tokens: bool,

    /// Reload the principal on every request and reject disabled accounts.
    #[serde(default)]
    pub recheck_principal: bool,

    /// Login attempts allowed per identifier per minute.
    #[serde(default = "default_login_attempts")]
    pub login_attempts_per_minute: u32,
}

const fn default_access_ttl() -> u64 {
    DEFAULT_ACCESS_TTL_SECS
}

const fn default_refresh_ttl() -> u64 {
    DEFAULT_REFRESH_TTL_SECS
}

const fn default_reclaim_interval() -> u64 {
    DEFAULT_RECLAIM_INTERVAL_SECS
}

const fn default_store_timeout() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}

fn default_token_header() -> String {
    "authorization".to_string()
}

const fn default_login_attempts() -> u32 {
    DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
            reclaim_interval_secs: default_reclaim_interval(),
            store_timeout_ms: default_store_timeout(),
            token_header: default_token_header(),
            rotate_refresh_tokens: false,
            recheck_principal: false,
            login_attempts_per_minute: default_login_attempts(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "[REDACTED]"))
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("reclaim_interval_secs", &self.reclaim_interval_secs)
            .field("store_timeout_ms", &self.store_timeout_ms)
            .field("token_header", &self.token_header)
            .field("rotate_refresh_tokens", &self.rotate_refresh_tokens)
            .field("recheck_principal", &self.recheck_principal)
            .field("login_attempts_per_minute", &self.login_attempts_per_minute)
            .finish()
    }
}

impl AuthConfig {
    /// Create a new auth config builder.
    #[must_use]
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Access token lifetime.
    #[must_use]
    pub const fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_secs)
    }

    /// Refresh token lifetime.
    #[must_use]
    pub const fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_secs)
    }

    /// Reclaimer interval.
    #[must_use]
    pub const fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }

    /// Store call deadline.
    #[must_use]
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Load overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Unparseable numeric values are ignored with a warning.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("TEMPORA_JWT_SECRET") {
            self.jwt_secret = Some(secret);
        }

        let numeric = |key: &str, target: &mut u64| {
            if let Some(raw) = lookup(key) {
                match raw.parse() {
                    Ok(value) => *target = value,
                    Err(_) => tracing::warn!(key, "Ignoring non-numeric override"),
                }
            }
        };
        numeric("TEMPORA_ACCESS_TTL_SECS", &mut self.access_token_ttl_secs);
        numeric("TEMPORA_REFRESH_TTL_SECS", &mut self.refresh_token_ttl_secs);
        numeric("TEMPORA_RECLAIM_INTERVAL_SECS", &mut self.reclaim_interval_secs);

        self
    }

    /// Validate settings that must hold before the gateway starts.
    ///
    /// # Errors
    ///
    /// Returns error if the signing key is missing or too short, or any
    /// lifetime, interval or limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.signing_key()?;

        let non_zero = [
            ("accessTokenTtlSecs", self.access_token_ttl_secs),
            ("refreshTokenTtlSecs", self.refresh_token_ttl_secs),
            ("reclaimIntervalSecs", self.reclaim_interval_secs),
            ("storeTimeoutMs", self.store_timeout_ms),
            ("loginAttemptsPerMinute", u64::from(self.login_attempts_per_minute)),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} must be > 0")));
            }
        }

        if self.token_header.trim().is_empty() {
            return Err(ConfigError::Validation(
                "tokenHeader cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Decode the signing key.
    ///
    /// # Errors
    ///
    /// Returns error if the key is absent, not hex, or shorter than
    /// [`MIN_SIGNING_KEY_BYTES`].
    pub fn signing_key(&self) -> Result<SecretBox<Vec<u8>>, ConfigError> {
        let hex_secret = self
            .jwt_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingField("auth.jwtSecret".to_string()))?;

        let bytes = hex::decode(hex_secret)
            .map_err(|e| ConfigError::Validation(format!("Invalid hex jwtSecret: {e}")))?;

        if bytes.len() < MIN_SIGNING_KEY_BYTES {
            return Err(ConfigError::Validation(format!(
                "jwtSecret must be at least {MIN_SIGNING_KEY_BYTES} bytes, got {}",
                bytes.len()
            )));
        }

        Ok(SecretBox::new(Box::new(bytes)))
    }
}

/// Builder for `AuthConfig`.
#[derive(Debug, Default)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    /// Set the JWT secret (hex).
    #[must_use]
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt_secret = Some(secret.into());
        self
    }

    /// Set access token lifetime in seconds.
    #[must_use]
    pub const fn access_token_ttl_secs(mut self, secs: u64) -> Self {
        self.config.access_token_ttl_secs = secs;
        self
    }

    /// Set refresh token lifetime in seconds.
    #[must_use]
    pub const fn refresh_token_ttl_secs(mut self, secs: u64) -> Self {
        self.config.refresh_token_ttl_secs = secs;
        self
    }

    /// Set reclaimer interval in seconds.
    #[must_use]
    pub const fn reclaim_interval_secs(mut self, secs: u64) -> Self {
        self.config.reclaim_interval_secs = secs;
        self
    }

    /// Set store call deadline in milliseconds.
    #[must_use]
    pub const fn store_timeout_ms(mut self, ms: u64) -> Self {
        self.config.store_timeout_ms = ms;
        self
    }

    /// Set the bearer token header name.
    #[must_use]
    pub fn token_header(mut self, header: impl Into<String>) -> Self {
        self.config.token_header = header.into();
        self
    }

    /// Enable refresh token rotation.
    #[must_use]
    pub const fn rotate_refresh_tokens(mut self, rotate: bool) -> Self {
        self.config.rotate_refresh_tokens = rotate;
        self
    }

    /// Enable per-request principal recheck.
    #[must_use]
    pub const fn recheck_principal(mut self, recheck: bool) -> Self {
        self.config.recheck_principal = recheck;
        self
    }

    /// Set login attempts per identifier per minute.
    #[must_use]
    pub const fn login_attempts_per_minute(mut self, attempts: u32) -> Self {
        self.config.login_attempts_per_minute = attempts;
        self
    }

    /// Build the config.
    #[must_use]
    pub fn build(self) -> AuthConfig {
        self.config
    }
}

/// Global settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    /// Enable debug logging.
    #[serde(default)]
    pub debug: bool,

    /// Log format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}
