//! Unified configuration loading.
//!
//! Sources, highest priority first:
//! 1. `TETHER_*` environment variables (override individual keys)
//! 2. TOML config file (explicit path, or `tether.toml` in the working directory)
//! 3. Built-in defaults

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, ConfigResult};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tether.toml";

/// Default values.
pub mod defaults {
    pub const STORE_PATH: &str = "data/tether.redb";
    /// Refresh a credential this long before it expires.
    pub const REFRESH_BUFFER_SECS: u64 = 5 * 60;
    /// Assumed credential lifetime when the source does not state one.
    pub const CREDENTIAL_TTL_SECS: u64 = 60 * 60;
    pub const TOKEN_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
    pub const PUSH_ENDPOINT: &str = "https://fcm.googleapis.com";
    /// How long a listener waits for a result payload after observing COMPLETED.
    pub const RESULT_GRACE_MS: u64 = 5_000;
    pub const WAIT_TIMEOUT_SECS: u64 = 60;
    pub const CHANGE_FEED_CAPACITY: usize = 1024;
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG_FILE: &str = "TETHER_CONFIG";
    pub const STORE_PATH: &str = "TETHER_STORE_PATH";
    pub const PUSH_ENDPOINT: &str = "TETHER_PUSH_ENDPOINT";
    pub const PUSH_PROJECT_ID: &str = "TETHER_PUSH_PROJECT_ID";
    pub const TOKEN_URL: &str = "TETHER_TOKEN_URL";
    pub const CLIENT_ID: &str = "TETHER_CLIENT_ID";
    pub const CLIENT_SECRET: &str = "TETHER_CLIENT_SECRET";
    pub const TOKEN_SCOPE: &str = "TETHER_TOKEN_SCOPE";
    pub const REFRESH_BUFFER_SECS: &str = "TETHER_REFRESH_BUFFER_SECS";
    pub const CREDENTIAL_TTL_SECS: &str = "TETHER_CREDENTIAL_TTL_SECS";
    pub const RESULT_GRACE_MS: &str = "TETHER_RESULT_GRACE_MS";
    pub const WAIT_TIMEOUT_SECS: &str = "TETHER_WAIT_TIMEOUT_SECS";
    pub const NOTIFY_PARTIAL: &str = "TETHER_NOTIFY_PARTIAL";
    pub const NOTIFY_AUTHORITIES: &str = "TETHER_NOTIFY_AUTHORITIES";
    pub const PRUNE_UNREGISTERED: &str = "TETHER_PRUNE_UNREGISTERED";
    pub const LOG_JSON: &str = "TETHER_LOG_JSON";
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub store: StoreConfig,
    pub push: PushConfig,
    pub credentials: CredentialConfig,
    pub commands: CommandConfig,
    pub approvals: ApprovalConfig,
    pub fanout: FanoutConfig,
}

/// Shared store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the redb database file.
    pub path: String,
    /// Change feed buffer size.
    pub change_feed_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: defaults::STORE_PATH.to_string(),
            change_feed_capacity: defaults::CHANGE_FEED_CAPACITY,
        }
    }
}

/// Push transport settings. No project id means pushes are only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub endpoint: String,
    pub project_id: Option<String>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::PUSH_ENDPOINT.to_string(),
            project_id: None,
        }
    }
}

/// Bearer credential settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: String,
    pub refresh_buffer_secs: u64,
    pub default_ttl_secs: u64,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            token_url: None,
            client_id: None,
            client_secret: None,
            scope: defaults::TOKEN_SCOPE.to_string(),
            refresh_buffer_secs: defaults::REFRESH_BUFFER_SECS,
            default_ttl_secs: defaults::CREDENTIAL_TTL_SECS,
        }
    }
}

impl CredentialConfig {
    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_secs)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Command layer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub result_grace_ms: u64,
    pub wait_timeout_secs: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            result_grace_ms: defaults::RESULT_GRACE_MS,
            wait_timeout_secs: defaults::WAIT_TIMEOUT_SECS,
        }
    }
}

impl CommandConfig {
    pub fn result_grace(&self) -> Duration {
        Duration::from_millis(self.result_grace_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

/// Approval consensus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Tell the subject when a vote left the request PARTIAL.
    pub notify_partial: bool,
    /// Push an approval prompt to every snapshot authority on creation.
    pub notify_authorities_on_create: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            notify_partial: true,
            notify_authorities_on_create: true,
        }
    }
}

/// Fan-out settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Remove tokens the push service reports as unregistered.
    pub prune_unregistered_tokens: bool,
}

impl TetherConfig {
    /// Load configuration from an optional file, then apply environment overrides.
    ///
    /// Without an explicit path, `TETHER_CONFIG` and then `tether.toml` are tried;
    /// a missing default file is not an error.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let explicit = path
            .map(|p| p.to_path_buf())
            .or_else(|| std::env::var(env_vars::CONFIG_FILE).ok().map(Into::into));

        let mut config = match explicit {
            Some(path) => {
                info!(category = "config", path = %path.display(), "Loading config file");
                Self::from_file(&path)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                info!(category = "config", path = DEFAULT_CONFIG_FILE, "Loading config file");
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML content.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `TETHER_*` overrides using the given lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(env_vars::STORE_PATH) {
            self.store.path = v;
        }
        if let Some(v) = lookup(env_vars::PUSH_ENDPOINT) {
            self.push.endpoint = v;
        }
        if let Some(v) = lookup(env_vars::PUSH_PROJECT_ID) {
            self.push.project_id = Some(v);
        }
        if let Some(v) = lookup(env_vars::TOKEN_URL) {
            self.credentials.token_url = Some(v);
        }
        if let Some(v) = lookup(env_vars::CLIENT_ID) {
            self.credentials.client_id = Some(v);
        }
        if let Some(v) = lookup(env_vars::CLIENT_SECRET) {
            self.credentials.client_secret = Some(v);
        }
        if let Some(v) = lookup(env_vars::TOKEN_SCOPE) {
            self.credentials.scope = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::REFRESH_BUFFER_SECS)? {
            self.credentials.refresh_buffer_secs = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::CREDENTIAL_TTL_SECS)? {
            self.credentials.default_ttl_secs = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::RESULT_GRACE_MS)? {
            self.commands.result_grace_ms = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::WAIT_TIMEOUT_SECS)? {
            self.commands.wait_timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::NOTIFY_PARTIAL)? {
            self.approvals.notify_partial = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::NOTIFY_AUTHORITIES)? {
            self.approvals.notify_authorities_on_create = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::PRUNE_UNREGISTERED)? {
            self.fanout.prune_unregistered_tokens = v;
        }
        Ok(())
    }

    /// Reject combinations that cannot work.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.credentials.refresh_buffer_secs >= self.credentials.default_ttl_secs {
            return Err(ConfigError::Invalid(format!(
                "refresh buffer ({}s) must be shorter than the credential lifetime ({}s)",
                self.credentials.refresh_buffer_secs, self.credentials.default_ttl_secs
            )));
        }
        if self.store.change_feed_capacity == 0 {
            return Err(ConfigError::Invalid(
                "change feed capacity must be non-zero".to_string(),
            ));
        }
        let creds = &self.credentials;
        if creds.token_url.is_some() && (creds.client_id.is_none() || creds.client_secret.is_none())
        {
            return Err(ConfigError::Invalid(
                "token_url requires client_id and client_secret".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whether JSON log output was requested.
pub fn log_json() -> bool {
    std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false)
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> ConfigResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        None => Ok(None),
    }
}
