//! Response models for the dashboard API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::TokenStatus;
use crate::fhir::WriteOutcome;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub token: TokenStatus,
}

/// Acknowledgement for a successful create or update
#[derive(Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl From<WriteOutcome> for WriteResponse {
    fn from(outcome: WriteOutcome) -> Self {
        Self {
            ok: true,
            id: outcome.id,
            location: outcome.location,
            etag: outcome.etag,
        }
    }
}
