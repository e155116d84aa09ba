//! Application state management
//!
//! Owns the outbound HTTP client, the token provider and the FHIR client.
//! Built once at startup and shared with every worker through `web::Data`;
//! tests build their own instance against mock servers.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::auth::{Clock, SystemClock, TokenProvider};
use crate::config::FhirSettings;
use crate::fhir::FhirClient;

/// Central application state
pub struct AppState {
    /// Token cache shared by every outbound call
    pub tokens: Arc<TokenProvider>,
    /// Authenticated FHIR client
    pub fhir: FhirClient,
    /// Application start time
    start_time: DateTime<Utc>,
}

impl AppState {
    /// Create application state using the system clock
    pub fn new(settings: &FhirSettings) -> Result<Self, reqwest::Error> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Create application state with an explicit time source
    pub fn with_clock(
        settings: &FhirSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, reqwest::Error> {
        info!(
            base_url = settings.base_url().as_deref().unwrap_or("<unconfigured>"),
            discovery = settings.fhir_root.is_some(),
            timeout_secs = settings.timeout_secs,
            "Initializing application state"
        );

        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let tokens = Arc::new(TokenProvider::with_clock(settings.clone(), http.clone(), clock));
        let fhir = FhirClient::new(http, settings.clone(), tokens.clone());

        Ok(Self {
            tokens,
            fhir,
            start_time: Utc::now(),
        })
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.start_time).num_seconds().max(0) as u64
    }
}
