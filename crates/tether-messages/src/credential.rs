//! Bearer credentials for push delivery.
//!
//! [`CredentialCache`] hands out a shared credential until it comes within
//! the refresh buffer of its expiry, then refreshes it from a
//! [`CredentialSource`]. The cache lock is held across the refresh, so
//! concurrent callers during expiry wait for one refresh instead of
//! starting their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tether_core::config::{defaults, CredentialConfig};

use crate::{Error, Result};

/// A bearer token and its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    /// Credential valid for `ttl` from now.
    pub fn valid_for(access_token: impl Into<String>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        Self::new(access_token, Utc::now() + ttl)
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the credential stays valid for longer than `buffer`.
    pub fn is_fresh(&self, buffer: Duration, now: DateTime<Utc>) -> bool {
        self.remaining(now) > buffer
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Where fresh credentials come from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Source name for logs.
    fn name(&self) -> &str;

    /// Obtain a new credential.
    async fn fetch(&self) -> Result<Credential>;
}

/// Fixed token source, for tests and log-only deployments.
pub struct StaticCredentialSource {
    token: String,
    ttl: Duration,
}

impl StaticCredentialSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ttl: Duration::from_secs(defaults::CREDENTIAL_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self) -> Result<Credential> {
        Ok(Credential::valid_for(self.token.clone(), self.ttl))
    }
}

/// OAuth2 client-credentials token endpoint.
#[cfg(feature = "http")]
pub struct HttpCredentialSource {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    default_ttl: Duration,
}

#[cfg(feature = "http")]
#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[cfg(feature = "http")]
impl HttpCredentialSource {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: defaults::TOKEN_SCOPE.to_string(),
            default_ttl: Duration::from_secs(defaults::CREDENTIAL_TTL_SECS),
        }
    }

    /// Build from configuration; `None` when no token endpoint is configured.
    pub fn from_config(config: &CredentialConfig) -> Result<Option<Self>> {
        let Some(token_url) = config.token_url.clone() else {
            return Ok(None);
        };
        let client_id = config
            .client_id
            .clone()
            .ok_or_else(|| Error::InvalidConfiguration("Missing client_id".to_string()))?;
        let client_secret = config
            .client_secret
            .clone()
            .ok_or_else(|| Error::InvalidConfiguration("Missing client_secret".to_string()))?;

        let mut source = Self::new(token_url, client_id, client_secret);
        source.scope = config.scope.clone();
        source.default_ttl = config.default_ttl();
        Ok(Some(source))
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl CredentialSource for HttpCredentialSource {
    fn name(&self) -> &str {
        "oauth2"
    }

    async fn fetch(&self) -> Result<Credential> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Credential(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Credential(format!(
                "Token endpoint returned error: {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Credential(format!("Invalid token response: {}", e)))?;

        let ttl = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(self.default_ttl);
        Ok(Credential::valid_for(token.access_token, ttl))
    }
}

/// Cached credential with single-flight refresh.
pub struct CredentialCache {
    source: Arc<dyn CredentialSource>,
    refresh_buffer: Duration,
    cached: Mutex<Option<Arc<Credential>>>,
    refreshes: AtomicU64,
}

impl CredentialCache {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self::with_refresh_buffer(source, Duration::from_secs(defaults::REFRESH_BUFFER_SECS))
    }

    pub fn with_refresh_buffer(source: Arc<dyn CredentialSource>, refresh_buffer: Duration) -> Self {
        Self {
            source,
            refresh_buffer,
            cached: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Return the cached credential, refreshing it when it expires within the buffer.
    ///
    /// If a refresh fails while the cached credential has not actually
    /// expired yet, the cached one is still returned.
    pub async fn get(&self) -> Result<Arc<Credential>> {
        let mut slot = self.cached.lock().await;
        let now = Utc::now();

        if let Some(credential) = slot.as_ref() {
            if credential.is_fresh(self.refresh_buffer, now) {
                return Ok(credential.clone());
            }
        }

        debug!(source = self.source.name(), "Refreshing push credential");
        match self.source.fetch().await {
            Ok(credential) => {
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                let credential = Arc::new(credential);
                *slot = Some(credential.clone());
                Ok(credential)
            }
            Err(e) => match slot.as_ref() {
                Some(stale) if !stale.is_expired(now) => {
                    warn!(error = %e, "Credential refresh failed, using credential close to expiry");
                    Ok(stale.clone())
                }
                _ => {
                    warn!(error = %e, "Credential refresh failed");
                    Err(match e {
                        Error::Credential(_) => e,
                        other => Error::Credential(other.to_string()),
                    })
                }
            },
        }
    }

    /// Drop the cached credential so the next `get` refreshes.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    /// Drop the cached credential only if it is still `used`.
    ///
    /// Lets many deliveries refused with the same credential trigger a
    /// single refresh.
    pub async fn invalidate_if_current(&self, used: &Arc<Credential>) {
        let mut slot = self.cached.lock().await;
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, used)) {
            *slot = None;
        }
    }

    /// Number of successful refreshes so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn refresh_buffer(&self) -> Duration {
        self.refresh_buffer
    }
}
