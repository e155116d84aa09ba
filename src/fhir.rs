//! FHIR R4 client for the Oracle Health (Cerner) API
//!
//! Every request carries a bearer token from the [`TokenProvider`] and asks
//! for `application/fhir+json`. Responses are passed back unchanged; non-2xx
//! answers become [`AppError::Upstream`] with the upstream status and body.

use reqwest::header::{HeaderName, ACCEPT, CONTENT_TYPE, ETAG, IF_MATCH, LOCATION};
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::{AuthError, TokenProvider};
use crate::config::FhirSettings;
use crate::error::{AppError, AppResult};

pub const FHIR_JSON: &str = "application/fhir+json";

/// FHIR resource types proxied to Oracle Health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Patient,
    Appointment,
    Practitioner,
    Organization,
    Location,
    Account,
    AllergyIntolerance,
    DiagnosticReport,
    MedicationRequest,
    MedicationStatement,
}

impl ResourceType {
    pub const ALL: [ResourceType; 10] = [
        ResourceType::Patient,
        ResourceType::Appointment,
        ResourceType::Practitioner,
        ResourceType::Organization,
        ResourceType::Location,
        ResourceType::Account,
        ResourceType::AllergyIntolerance,
        ResourceType::DiagnosticReport,
        ResourceType::MedicationRequest,
        ResourceType::MedicationStatement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Appointment => "Appointment",
            ResourceType::Practitioner => "Practitioner",
            ResourceType::Organization => "Organization",
            ResourceType::Location => "Location",
            ResourceType::Account => "Account",
            ResourceType::AllergyIntolerance => "AllergyIntolerance",
            ResourceType::DiagnosticReport => "DiagnosticReport",
            ResourceType::MedicationRequest => "MedicationRequest",
            ResourceType::MedicationStatement => "MedicationStatement",
        }
    }

    /// Whether the tenant accepts `POST` for this type
    pub fn supports_create(&self) -> bool {
        matches!(
            self,
            ResourceType::Patient
                | ResourceType::Appointment
                | ResourceType::AllergyIntolerance
                | ResourceType::DiagnosticReport
        )
    }

    /// Whether the tenant accepts `PUT` for this type
    pub fn supports_update(&self) -> bool {
        matches!(
            self,
            ResourceType::Patient | ResourceType::Appointment | ResourceType::AllergyIntolerance
        )
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::NotFound(format!("Unsupported resource type: {s}")))
    }
}

/// Result of a create or update
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub status: u16,
    pub id: Option<String>,
    pub location: Option<String>,
    pub etag: Option<String>,
}

/// Authenticated client for the tenant's FHIR base URL
#[derive(Clone)]
pub struct FhirClient {
    http: reqwest::Client,
    settings: FhirSettings,
    tokens: Arc<TokenProvider>,
}

impl FhirClient {
    pub fn new(http: reqwest::Client, settings: FhirSettings, tokens: Arc<TokenProvider>) -> Self {
        Self {
            http,
            settings,
            tokens,
        }
    }

    /// `GET {base}/{type}?{params}`, returning the searchset Bundle
    pub async fn search(
        &self,
        resource_type: ResourceType,
        params: &[(String, String)],
    ) -> AppResult<Value> {
        let url = format!("{}/{}", self.base_url()?, resource_type);
        debug!(url = %url, params = params.len(), "FHIR search");

        let request = self.http.get(&url).query(params);
        let resp = self.send(request).await?;
        read_json(resp).await
    }

    /// `GET {base}/{type}/{id}`
    pub async fn read(&self, resource_type: ResourceType, id: &str) -> AppResult<Value> {
        let url = format!("{}/{}/{}", self.base_url()?, resource_type, id);
        debug!(url = %url, "FHIR read");

        let resp = self.send(self.http.get(&url)).await?;
        read_json(resp).await
    }

    /// `POST {base}/{type}`
    pub async fn create(
        &self,
        resource_type: ResourceType,
        body: &Value,
    ) -> AppResult<WriteOutcome> {
        let url = format!("{}/{}", self.base_url()?, resource_type);
        debug!(url = %url, "FHIR create");

        let request = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, FHIR_JSON)
            .body(body.to_string());
        let resp = self.send(request).await?;
        Ok(write_outcome(&resp, None))
    }

    /// `PUT {base}/{type}/{id}` guarded by `If-Match`
    pub async fn update(
        &self,
        resource_type: ResourceType,
        id: &str,
        body: &Value,
        if_match: &str,
    ) -> AppResult<WriteOutcome> {
        let url = format!("{}/{}/{}", self.base_url()?, resource_type, id);
        debug!(url = %url, if_match = %if_match, "FHIR update");

        let request = self
            .http
            .put(&url)
            .header(CONTENT_TYPE, FHIR_JSON)
            .header(IF_MATCH, if_match)
            .body(body.to_string());
        let resp = self.send(request).await?;
        Ok(write_outcome(&resp, Some(id)))
    }

    fn base_url(&self) -> AppResult<String> {
        self.settings
            .base_url()
            .ok_or_else(|| AuthError::MissingConfiguration("TENANT_ID").into())
    }

    /// Attach credentials, send, and turn non-2xx answers into errors.
    async fn send(&self, request: RequestBuilder) -> AppResult<Response> {
        let token = self.tokens.access_token().await?;

        let resp = request
            .bearer_auth(token)
            .header(ACCEPT, FHIR_JSON)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("FHIR request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let url = resp.url().to_string();
        let text = resp.text().await.unwrap_or_default();
        warn!(url = %url, status = status.as_u16(), "FHIR request rejected");

        Err(AppError::Upstream {
            status: status.as_u16(),
            message: format!(
                "FHIR server responded {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .trim_end()
            .to_string(),
            details: upstream_details(&text),
        })
    }
}

async fn read_json(resp: Response) -> AppResult<Value> {
    resp.json()
        .await
        .map_err(|e| AppError::Internal(format!("Invalid FHIR response body: {e}")))
}

/// Upstream error body as JSON when it parses, otherwise as a string.
fn upstream_details(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

fn write_outcome(resp: &Response, known_id: Option<&str>) -> WriteOutcome {
    let header = |name: HeaderName| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let location = header(LOCATION);
    let id = known_id
        .map(str::to_string)
        .or_else(|| location.as_deref().and_then(resource_id_from_location));

    WriteOutcome {
        status: resp.status().as_u16(),
        id,
        location,
        etag: header(ETAG),
    }
}

/// Logical id from a `Location` such as `.../Patient/123/_history/1`.
pub fn resource_id_from_location(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    let path = match path.find("/_history/") {
        Some(idx) => &path[..idx],
        None => path,
    };
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
