//! Configuration management module
//!
//! Loads environment-based configuration for the HTTP server and the
//! Oracle Health (Cerner) FHIR connection.

use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default Oracle Health FHIR R4 host; the tenant id is appended to it.
pub const DEFAULT_FHIR_ROOT_HOST: &str = "https://fhir-ehr-code.cerner.com/r4";

/// Default Oracle Health authorization server.
pub const DEFAULT_AUTH_HOST: &str = "https://authorization.cerner.com";

/// Configuration errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid number format in environment variable {0}")]
    ParseError(&'static str),
}

/// Server configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Oracle Health tenant, credentials and endpoints.
///
/// Credentials are optional at load time: a missing value is reported per
/// request as a configuration error instead of preventing startup.
#[derive(Debug, Clone, Deserialize)]
pub struct FhirSettings {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Host the tenant id is appended to when no explicit root is set
    pub fhir_root_host: String,
    /// Full FHIR base URL; also enables SMART configuration discovery
    pub fhir_root: Option<String>,
    /// Authorization server used for the fallback token URL
    pub auth_host: String,
    /// Timeout applied to every outbound request, in seconds
    pub timeout_secs: u64,
}

impl FhirSettings {
    /// Base URL of the FHIR API: `FHIR_ROOT`, or `{FHIR_ROOT_HOST}/{TENANT_ID}`.
    ///
    /// Returns `None` when neither a root nor a tenant id is configured.
    pub fn base_url(&self) -> Option<String> {
        if let Some(root) = &self.fhir_root {
            return Some(root.trim_end_matches('/').to_string());
        }
        self.tenant_id.as_ref().map(|tenant| {
            format!("{}/{}", self.fhir_root_host.trim_end_matches('/'), tenant)
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub fhir: FhirSettings,
}

impl Settings {
    /// Load settings from environment variables
    pub fn from_env() -> Result<Self, SettingsError> {
        let port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .map_err(|_| SettingsError::ParseError("SERVER_PORT"))?;

        let timeout_secs = env::var("HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .map_err(|_| SettingsError::ParseError("HTTP_TIMEOUT_SECS"))?;

        Ok(Self {
            server: ServerSettings {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
                port,
            },
            fhir: FhirSettings {
                tenant_id: non_empty_var("TENANT_ID"),
                client_id: non_empty_var("CLIENT_ID"),
                client_secret: non_empty_var("CLIENT_SECRET"),
                fhir_root_host: non_empty_var("FHIR_ROOT_HOST")
                    .unwrap_or_else(|| DEFAULT_FHIR_ROOT_HOST.into()),
                fhir_root: non_empty_var("FHIR_ROOT"),
                auth_host: non_empty_var("AUTH_HOST").unwrap_or_else(|| DEFAULT_AUTH_HOST.into()),
                timeout_secs,
            },
        })
    }
}

/// Read a variable, treating an empty value as unset.
fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
