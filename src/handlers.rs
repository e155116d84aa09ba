//! HTTP request handlers
//!
//! Implements the dashboard's REST API: a health check plus search, read,
//! create and update for every proxied FHIR resource type.

use actix_web::http::header::{IF_MATCH, LOCATION};
use actix_web::{web, HttpRequest, HttpResponse, Result};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::fhir::{ResourceType, FHIR_JSON};
use crate::models::{HealthCheck, WriteResponse};
use crate::state::AppState;
use crate::validation::{
    validate_if_match, validate_resource_body, validate_resource_id, validate_search,
};

/// Configure all application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
    )
    .service(
        web::scope("/api")
            // Health check
            .route("/health", web::get().to(health_check))
            // FHIR proxy
            .route("/fhir/{resource_type}", web::get().to(search_resources))
            .route("/fhir/{resource_type}", web::post().to(create_resource))
            .route("/fhir/{resource_type}/{id}", web::get().to(read_resource))
            .route("/fhir/{resource_type}/{id}", web::put().to(update_resource)),
    );
}

/// Health check endpoint
///
/// GET /api/health
///
/// Returns uptime and the state of the token cache.
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let health = HealthCheck {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        uptime_seconds: state.uptime_seconds(),
        token: state.tokens.status(),
    };

    Ok(HttpResponse::Ok().json(health))
}

/// Search a resource type
///
/// GET /api/fhir/{resource_type}?param=value&...
pub async fn search_resources(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<Vec<(String, String)>>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);
    let resource_type: ResourceType = path.into_inner().parse()?;
    let params = query.into_inner();

    info!(
        correlation_id = %correlation_id,
        resource_type = %resource_type,
        params = params.len(),
        "Search request"
    );

    validate_search(resource_type, &params)?;
    let bundle = state.fhir.search(resource_type, &params).await?;

    Ok(HttpResponse::Ok().content_type(FHIR_JSON).json(bundle))
}

/// Read one resource
///
/// GET /api/fhir/{resource_type}/{id}
pub async fn read_resource(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);
    let (resource_type, id) = path.into_inner();
    let resource_type: ResourceType = resource_type.parse()?;
    validate_resource_id(&id)?;

    info!(
        correlation_id = %correlation_id,
        resource_type = %resource_type,
        id = %id,
        "Read request"
    );

    let resource = state.fhir.read(resource_type, &id).await?;

    Ok(HttpResponse::Ok().content_type(FHIR_JSON).json(resource))
}

/// Create a resource
///
/// POST /api/fhir/{resource_type}
pub async fn create_resource(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<Value>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);
    let resource_type: ResourceType = path.into_inner().parse()?;

    if !resource_type.supports_create() {
        return Err(AppError::NotFound(format!(
            "{} does not support create",
            resource_type
        )));
    }
    validate_resource_body(resource_type, &body, None)?;

    info!(
        correlation_id = %correlation_id,
        resource_type = %resource_type,
        "Create request"
    );

    let outcome = state.fhir.create(resource_type, &body).await?;

    info!(
        correlation_id = %correlation_id,
        resource_type = %resource_type,
        id = outcome.id.as_deref().unwrap_or("unknown"),
        upstream_status = outcome.status,
        "Resource created"
    );

    let mut response = HttpResponse::Created();
    if let Some(location) = &outcome.location {
        response.insert_header((LOCATION, location.as_str()));
    }
    Ok(response.json(WriteResponse::from(outcome)))
}

/// Update a resource
///
/// PUT /api/fhir/{resource_type}/{id}
///
/// Requires `If-Match` with the version being replaced.
pub async fn update_resource(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<Value>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);
    let (resource_type, id) = path.into_inner();
    let resource_type: ResourceType = resource_type.parse()?;

    if !resource_type.supports_update() {
        return Err(AppError::NotFound(format!(
            "{} does not support update",
            resource_type
        )));
    }
    validate_resource_id(&id)?;
    validate_resource_body(resource_type, &body, Some(&id))?;
    let if_match = validate_if_match(req.headers().get(IF_MATCH).and_then(|v| v.to_str().ok()))?;

    info!(
        correlation_id = %correlation_id,
        resource_type = %resource_type,
        id = %id,
        if_match = %if_match,
        "Update request"
    );

    let outcome = state
        .fhir
        .update(resource_type, &id, &body, if_match)
        .await?;

    info!(
        correlation_id = %correlation_id,
        resource_type = %resource_type,
        id = %id,
        upstream_status = outcome.status,
        etag = outcome.etag.as_deref().unwrap_or("none"),
        "Resource updated"
    );

    Ok(HttpResponse::Ok().json(WriteResponse::from(outcome)))
}

/// Extract or generate correlation ID from request headers
fn extract_correlation_id(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
