//! Session configuration
//!
//! Configuration is plain serde data persisted as camelCase JSON. The
//! client-id secret must survive restarts, otherwise every cookie issued
//! before the restart stops authenticating, so `SessionConfig::load_or_generate`
//! mints the secret once and writes it back to disk.

use crate::error::{Result, SessionError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default seconds between access-time refreshes and sweeps
pub const DEFAULT_SWEEP_INTERVAL: u64 = 5 * 60;

/// Default seconds before data is considered stale
pub const DEFAULT_TIMEOUT: u64 = 3600;

/// Maximum cookie name length
pub const MAX_COOKIE_NAME_LEN: usize = 30;

/// Offset subtracted from the creation time when deriving a cookie name
const NAMESPACE_EPOCH_OFFSET: i64 = 1_000_000_000;

/// Expiry policy for one session data container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    /// How often stale data is purged, in seconds
    ///
    /// Also bounds how often an entry's access time is refreshed.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,

    /// Advertised staleness bound in seconds
    ///
    /// Advisory only: validated and exposed for callers, but expiry and
    /// sweeps are driven by `sweep_interval` alone.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ContainerConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep interval in seconds
    pub fn with_sweep_interval(mut self, secs: u64) -> Self {
        self.sweep_interval = secs;
        self
    }

    /// Set the advisory staleness timeout in seconds
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    /// Check both intervals are at least one second
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval == 0 {
            return Err(SessionError::Config(
                "Sweep interval must be >= 1 second".to_string(),
            ));
        }
        if self.timeout == 0 {
            return Err(SessionError::Config(
                "Timeout must be >= 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cookie and secret settings for the client id manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdConfig {
    /// Cookie name carrying the client id
    pub namespace: String,

    /// Server-held MAC key; never sent to clients
    pub secret: String,

    /// `None` for a browser-session cookie, `Some(0)` for a cookie that
    /// effectively never expires, `Some(n)` to expire `n` seconds after issue
    #[serde(default)]
    pub cookie_lifetime: Option<u64>,

    /// Optional `Domain` cookie attribute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Emit the `Secure` cookie attribute
    #[serde(default)]
    pub secure: bool,

    /// Emit the `HttpOnly` cookie attribute
    #[serde(default)]
    pub http_only: bool,
}

impl ClientIdConfig {
    /// Generate a configuration with a fresh cookie name and secret
    pub fn generate() -> Self {
        Self::generate_at(chrono::Utc::now().timestamp())
    }

    /// Generate a configuration as if created at `now` (Unix seconds)
    ///
    /// The cookie name embeds the creation time so separate deployments
    /// sharing a domain are unlikely to collide.
    pub fn generate_at(now: i64) -> Self {
        Self {
            namespace: format!("a3s_cs_{:x}", now - NAMESPACE_EPOCH_OFFSET),
            secret: generate_secret(),
            cookie_lifetime: None,
            domain: None,
            secure: false,
            http_only: false,
        }
    }

    /// Set the cookie name
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the MAC secret
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Set the cookie lifetime policy
    pub fn with_cookie_lifetime(mut self, lifetime: Option<u64>) -> Self {
        self.cookie_lifetime = lifetime;
        self
    }

    /// Set the cookie domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Toggle the `Secure` attribute
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Toggle the `HttpOnly` attribute
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Check the cookie name and secret
    pub fn validate(&self) -> Result<()> {
        validate_cookie_name(&self.namespace)?;
        if self.secret.is_empty() {
            return Err(SessionError::Config(
                "Client id secret cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Check a cookie name against `^[A-Za-z0-9_]+$` with 1..=30 characters
pub fn validate_cookie_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_COOKIE_NAME_LEN {
        return Err(SessionError::Config(format!(
            "Cookie name must be 1-{} characters, got {}",
            MAX_COOKIE_NAME_LEN,
            name.len()
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Err(SessionError::Config(format!(
            "Cookie name '{}' may only contain ASCII letters, digits and '_'",
            name
        )));
    }
    Ok(())
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Full deployment configuration: one id manager, named containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Client id manager settings
    pub client_id: ClientIdConfig,

    /// Container policy keyed by namespace
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerConfig>,
}

impl SessionConfig {
    /// Generate a configuration with a fresh secret and one default container
    pub fn generate() -> Self {
        let mut containers = BTreeMap::new();
        containers.insert(String::new(), ContainerConfig::default());
        Self {
            client_id: ClientIdConfig::generate(),
            containers,
        }
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.client_id.validate()?;
        for (name, container) in &self.containers {
            container.validate().map_err(|e| {
                SessionError::Config(format!("Container '{}': {}", name, e))
            })?;
        }
        Ok(())
    }

    /// Read and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SessionError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: SessionConfig = serde_json::from_str(&json).map_err(|e| {
            SessionError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;

        tracing::debug!(
            path = %path.display(),
            containers = config.containers.len(),
            "Session config loaded"
        );
        Ok(config)
    }

    /// Write the configuration atomically (temp file + rename)
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        crate::store::file::write_atomic(path, json.as_bytes())?;
        tracing::debug!(path = %path.display(), "Session config saved");
        Ok(())
    }

    /// Load the configuration, or generate and persist a new one
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        let config = Self::generate();
        config.save(path)?;
        tracing::info!(
            path = %path.display(),
            namespace = %config.client_id.namespace,
            "Generated new session config"
        );
        Ok(config)
    }
}
