//! Access Token Provider
//!
//! Obtains system-level bearer tokens from the Oracle Health authorization
//! server with an OAuth2 `client_credentials` grant and caches the current
//! one until it comes within [`REFRESH_MARGIN_SECS`] of expiry.
//!
//! The token endpoint is taken from the tenant's SMART configuration document
//! when `FHIR_ROOT` is configured, and otherwise built from `AUTH_HOST`:
//!
//! ```text
//! {AUTH_HOST}/tenants/{TENANT_ID}/protocols/oauth2/profiles/smart-v1/token
//! ```

use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::FhirSettings;

/// A cached token is refreshed once it is this close to expiry.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// Scopes requested for every token.
pub const TOKEN_SCOPES: &[&str] = &[
    "system/Patient.read",
    "system/Patient.write",
    "system/Appointment.read",
    "system/Appointment.write",
    "system/Observation.read",
    "system/Observation.write",
    "system/AllergyIntolerance.read",
    "system/AllergyIntolerance.write",
    "system/Condition.read",
    "system/Condition.write",
    "system/Coverage.read",
    "system/Coverage.write",
    "system/Claim.read",
    "system/Claim.write",
];

/// Token provider errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing required configuration: {0}")]
    MissingConfiguration(&'static str),

    #[error("Failed to get access token: {status_text} - {body}")]
    TokenRejected {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("Token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed token response: {0}")]
    MalformedResponse(String),
}

/// Reasons SMART discovery fell back to the constructed URL.
#[derive(Debug, Error)]
enum DiscoveryError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(reqwest::StatusCode),

    #[error("document has no token_endpoint")]
    MissingTokenEndpoint,
}

/// Source of the current time, in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_epoch_seconds(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// The one token held by a provider. Replaced wholesale on refresh.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_in_seconds: i64,
    pub retrieved_at_epoch_seconds: i64,
}

impl CachedToken {
    pub fn expires_at(&self) -> i64 {
        self.retrieved_at_epoch_seconds
            .saturating_add(self.expires_in_seconds)
    }

    /// Usable at `now` when it outlives `now` by at least the refresh margin.
    pub fn is_fresh(&self, now: i64) -> bool {
        self.expires_at() >= now.saturating_add(REFRESH_MARGIN_SECS)
    }
}

/// Token endpoint response body
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// The part of `/.well-known/smart-configuration` this provider reads
#[derive(Debug, Deserialize)]
struct SmartConfiguration {
    token_endpoint: Option<String>,
}

/// Snapshot of the cache for health reporting. Never carries the token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenStatus {
    pub cached: bool,
    pub expires_at: Option<i64>,
    pub seconds_remaining: Option<i64>,
}

struct ClientCredentials<'a> {
    tenant_id: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

/// Supplies bearer tokens to outbound FHIR calls.
///
/// Refreshes are serialized by an async mutex, so a burst of callers arriving
/// on an empty or stale cache share one token request instead of each issuing
/// their own. The token itself lives in a separate slot that is only locked
/// for reads and the final swap, never across a network call.
pub struct TokenProvider {
    settings: FhirSettings,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    slot: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl TokenProvider {
    pub fn with_clock(
        settings: FhirSettings,
        http: reqwest::Client,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            http,
            clock,
            slot: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Return a bearer token valid for at least [`REFRESH_MARGIN_SECS`].
    ///
    /// Fails with [`AuthError::MissingConfiguration`] before touching the
    /// network when the tenant id or client credentials are absent. A
    /// rejected grant is returned as-is and leaves the cache untouched.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let credentials = self.credentials()?;

        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        let _refresh = self.refresh.lock().await;

        // Another caller may have refreshed while this one waited.
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        let token_url = self.resolve_token_endpoint(credentials.tenant_id).await;
        let response = self.request_token(&token_url, &credentials).await?;

        let token = CachedToken {
            access_token: response.access_token,
            expires_in_seconds: response.expires_in,
            retrieved_at_epoch_seconds: self.clock.now_epoch_seconds(),
        };

        info!(
            token_url = %token_url,
            expires_in = token.expires_in_seconds,
            token_type = response.token_type.as_deref().unwrap_or("unknown"),
            scope = response.scope.as_deref().unwrap_or(""),
            "Obtained new access token"
        );

        let access_token = token.access_token.clone();
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
        Ok(access_token)
    }

    /// Report whether a token is cached and when it expires.
    ///
    /// Reads the current slot without waiting on a refresh in flight.
    pub fn status(&self) -> TokenStatus {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(token) => {
                let expires_at = token.expires_at();
                TokenStatus {
                    cached: true,
                    expires_at: Some(expires_at),
                    seconds_remaining: Some(
                        (expires_at - self.clock.now_epoch_seconds()).max(0),
                    ),
                }
            }
            None => TokenStatus {
                cached: false,
                expires_at: None,
                seconds_remaining: None,
            },
        }
    }

    fn fresh_token(&self) -> Option<String> {
        let now = self.clock.now_epoch_seconds();
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().filter(|t| t.is_fresh(now)).map(|token| {
            debug!(expires_at = token.expires_at(), "Using cached access token");
            token.access_token.clone()
        })
    }

    fn credentials(&self) -> Result<ClientCredentials<'_>, AuthError> {
        let tenant_id = self
            .settings
            .tenant_id
            .as_deref()
            .ok_or(AuthError::MissingConfiguration("TENANT_ID"))?;
        let client_id = self
            .settings
            .client_id
            .as_deref()
            .ok_or(AuthError::MissingConfiguration("CLIENT_ID"))?;
        let client_secret = self
            .settings
            .client_secret
            .as_deref()
            .ok_or(AuthError::MissingConfiguration("CLIENT_SECRET"))?;

        Ok(ClientCredentials {
            tenant_id,
            client_id,
            client_secret,
        })
    }

    /// Discovered endpoint when available, otherwise the constructed one.
    async fn resolve_token_endpoint(&self, tenant_id: &str) -> String {
        if let Some(fhir_root) = &self.settings.fhir_root {
            match self.discover_token_endpoint(fhir_root).await {
                Ok(endpoint) => {
                    debug!(token_endpoint = %endpoint, "Discovered token endpoint");
                    return endpoint;
                }
                Err(e) => {
                    warn!(
                        fhir_root = %fhir_root,
                        error = %e,
                        "SMART configuration discovery failed, using constructed token URL"
                    );
                }
            }
        }

        fallback_token_url(&self.settings.auth_host, tenant_id)
    }

    async fn discover_token_endpoint(&self, fhir_root: &str) -> Result<String, DiscoveryError> {
        let url = format!(
            "{}/.well-known/smart-configuration",
            fhir_root.trim_end_matches('/')
        );

        let resp = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(DiscoveryError::Status(resp.status()));
        }

        let document: SmartConfiguration = resp.json().await?;
        document
            .token_endpoint
            .filter(|endpoint| !endpoint.is_empty())
            .ok_or(DiscoveryError::MissingTokenEndpoint)
    }

    async fn request_token(
        &self,
        token_url: &str,
        credentials: &ClientCredentials<'_>,
    ) -> Result<TokenResponse, AuthError> {
        let scope = TOKEN_SCOPES.join(" ");

        let resp = self
            .http
            .post(token_url)
            .basic_auth(credentials.client_id, Some(credentials.client_secret))
            .header(ACCEPT, "application/json")
            .form(&[("grant_type", "client_credentials"), ("scope", scope.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(
                token_url = %token_url,
                status = status.as_u16(),
                "Token endpoint rejected client credentials grant"
            );
            return Err(AuthError::TokenRejected {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
                body,
            });
        }

        resp.json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))
    }
}

/// Token URL used when SMART discovery is not configured or fails.
pub fn fallback_token_url(auth_host: &str, tenant_id: &str) -> String {
    format!(
        "{}/tenants/{}/protocols/oauth2/profiles/smart-v1/token",
        auth_host.trim_end_matches('/'),
        tenant_id
    )
}
