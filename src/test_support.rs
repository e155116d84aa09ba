//! Shared fixtures for unit tests: a manual clock and in-process mock servers
//! standing in for the Oracle Health authorization server and FHIR API.

use actix_web::http::header::{HeaderName, AUTHORIZATION, ETAG, IF_MATCH, LOCATION};
use actix_web::{web, App, HttpRequest, HttpResponse};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::Clock;
use crate::config::{FhirSettings, DEFAULT_FHIR_ROOT_HOST};

/// `Basic base64("abc:xyz")`
pub const EXPECTED_BASIC_AUTH: &str = "Basic YWJjOnh5eg==";

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self(AtomicI64::new(start))
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_seconds(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Settings for tenant `tenant1` with client `abc` / `xyz`.
pub fn fhir_settings(auth_host: &str, fhir_root: Option<String>) -> FhirSettings {
    FhirSettings {
        tenant_id: Some("tenant1".into()),
        client_id: Some("abc".into()),
        client_secret: Some("xyz".into()),
        fhir_root_host: DEFAULT_FHIR_ROOT_HOST.into(),
        fhir_root,
        auth_host: auth_host.to_string(),
        timeout_secs: 5,
    }
}

// ---------------------------------------------------------------------------
// Token endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum TokenServerMode {
    /// Issue `tok1`, `tok2`, ... with the given lifetime
    Grant { expires_in: i64 },
    /// Like `Grant`, but answer only after `delay_ms`
    SlowGrant { expires_in: i64, delay_ms: u64 },
    /// Answer every grant with `400 invalid_client`
    Reject,
}

/// What the token endpoint saw on one request
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub grant_type: Option<String>,
    pub scope: Option<String>,
}

#[derive(Clone)]
struct TokenEndpointState {
    mode: TokenServerMode,
    requests: Arc<Mutex<Vec<TokenRequest>>>,
}

pub struct MockTokenServer {
    server: actix_test::TestServer,
    requests: Arc<Mutex<Vec<TokenRequest>>>,
}

impl MockTokenServer {
    /// Value for `AUTH_HOST` so the constructed fallback URL lands here.
    pub fn auth_host(&self) -> String {
        self.server.url("").trim_end_matches('/').to_string()
    }

    pub fn url(&self, path: &str) -> String {
        self.server.url(path)
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<TokenRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

async fn token_endpoint(
    state: web::Data<TokenEndpointState>,
    req: HttpRequest,
    form: web::Form<HashMap<String, String>>,
) -> HttpResponse {
    let request = TokenRequest {
        path: req.path().to_string(),
        authorization: req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        grant_type: form.get("grant_type").cloned(),
        scope: form.get("scope").cloned(),
    };

    let issued = {
        let mut requests = state.requests.lock().unwrap();
        requests.push(request.clone());
        requests.len()
    };

    match state.mode {
        TokenServerMode::Reject => HttpResponse::BadRequest().json(json!({
            "error": "invalid_client",
            "error_description": "client authentication failed",
        })),
        TokenServerMode::SlowGrant {
            expires_in,
            delay_ms,
        } => {
            actix_web::rt::time::sleep(Duration::from_millis(delay_ms)).await;
            grant(&request, issued, expires_in)
        }
        TokenServerMode::Grant { expires_in } => grant(&request, issued, expires_in),
    }
}

fn grant(request: &TokenRequest, issued: usize, expires_in: i64) -> HttpResponse {
    if request.authorization.as_deref() != Some(EXPECTED_BASIC_AUTH)
        || request.grant_type.as_deref() != Some("client_credentials")
    {
        return HttpResponse::Unauthorized().finish();
    }
    HttpResponse::Ok().json(json!({
        "access_token": format!("tok{issued}"),
        "expires_in": expires_in,
        "token_type": "Bearer",
        "scope": request.scope,
    }))
}

/// Token endpoint serving both `/token` and the tenant1 fallback path.
pub fn start_token_server(mode: TokenServerMode) -> MockTokenServer {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = TokenEndpointState {
        mode,
        requests: requests.clone(),
    };

    let server = actix_test::start(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/token", web::post().to(token_endpoint))
            .route(
                "/tenants/{tenant}/protocols/oauth2/profiles/smart-v1/token",
                web::post().to(token_endpoint),
            )
    });

    MockTokenServer { server, requests }
}

// ---------------------------------------------------------------------------
// SMART configuration discovery
// ---------------------------------------------------------------------------

pub struct MockDiscoveryServer {
    server: actix_test::TestServer,
    hits: Arc<AtomicUsize>,
}

impl MockDiscoveryServer {
    /// Value for `FHIR_ROOT`
    pub fn fhir_root(&self) -> String {
        self.server.url("/r4/tenant1")
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum DiscoveryMode {
    /// 200 with a document advertising this `token_endpoint`
    Advertise(String),
    /// 500
    Fail,
    /// 200 with a body that is not JSON
    NotJson,
    /// 200 with a document that has no `token_endpoint`
    NoTokenEndpoint,
    /// 200 with `"token_endpoint": ""`
    EmptyTokenEndpoint,
}

#[derive(Clone)]
struct DiscoveryState {
    mode: DiscoveryMode,
    hits: Arc<AtomicUsize>,
}

async fn smart_configuration(state: web::Data<DiscoveryState>) -> HttpResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    match &state.mode {
        DiscoveryMode::Advertise(endpoint) => HttpResponse::Ok().json(json!({
            "token_endpoint": endpoint,
            "grant_types_supported": ["client_credentials"],
        })),
        DiscoveryMode::Fail => HttpResponse::InternalServerError().body("discovery unavailable"),
        DiscoveryMode::NotJson => HttpResponse::Ok()
            .content_type("text/html")
            .body("<html>maintenance</html>"),
        DiscoveryMode::NoTokenEndpoint => HttpResponse::Ok().json(json!({
            "grant_types_supported": ["client_credentials"],
        })),
        DiscoveryMode::EmptyTokenEndpoint => HttpResponse::Ok().json(json!({
            "token_endpoint": "",
        })),
    }
}

/// SMART configuration document served under [`MockDiscoveryServer::fhir_root`].
pub fn start_discovery_server(mode: DiscoveryMode) -> MockDiscoveryServer {
    let hits = Arc::new(AtomicUsize::new(0));
    let state = DiscoveryState {
        mode,
        hits: hits.clone(),
    };

    let server = actix_test::start(move || {
        App::new().app_data(web::Data::new(state.clone())).route(
            "/r4/tenant1/.well-known/smart-configuration",
            web::get().to(smart_configuration),
        )
    });

    MockDiscoveryServer { server, hits }
}

// ---------------------------------------------------------------------------
// FHIR API
// ---------------------------------------------------------------------------

/// What the FHIR API saw on one request
#[derive(Debug, Clone)]
pub struct FhirRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
    pub if_match: Option<String>,
    pub body: Option<Value>,
}

pub struct MockFhirServer {
    server: actix_test::TestServer,
    requests: Arc<Mutex<Vec<FhirRequest>>>,
}

impl MockFhirServer {
    /// Value for `FHIR_ROOT`
    pub fn fhir_root(&self) -> String {
        self.server.url("/r4/tenant1")
    }

    pub fn requests(&self) -> Vec<FhirRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn record(
    requests: &Mutex<Vec<FhirRequest>>,
    req: &HttpRequest,
    body: Option<Value>,
) -> FhirRequest {
    let header = |name: HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let request = FhirRequest {
        method: req.method().to_string(),
        path: req.path().to_string(),
        query: req.query_string().to_string(),
        authorization: header(AUTHORIZATION),
        if_match: header(IF_MATCH),
        body,
    };
    requests.lock().unwrap().push(request.clone());
    request
}

fn operation_outcome(code: &str, diagnostics: &str) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{ "severity": "error", "code": code, "diagnostics": diagnostics }],
    })
}

async fn fhir_search(
    requests: web::Data<Arc<Mutex<Vec<FhirRequest>>>>,
    req: HttpRequest,
    path: web::Path<String>,
) -> HttpResponse {
    record(&requests, &req, None);
    let resource_type = path.into_inner();
    let self_url = format!("https://fhir.example/{resource_type}?{}", req.query_string());
    let next_url = format!("https://fhir.example/{resource_type}?-pageContext=abc");
    HttpResponse::Ok()
        .content_type("application/fhir+json")
        .json(json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "link": [
                { "relation": "self", "url": self_url },
                { "relation": "next", "url": next_url },
            ],
            "entry": [{ "resource": { "resourceType": resource_type, "id": "12724066" } }],
        }))
}

async fn fhir_read(
    requests: web::Data<Arc<Mutex<Vec<FhirRequest>>>>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    record(&requests, &req, None);
    let (resource_type, id) = path.into_inner();
    if id == "missing" {
        return HttpResponse::NotFound()
            .content_type("application/fhir+json")
            .json(operation_outcome("not-found", "Resource not found"));
    }
    HttpResponse::Ok()
        .content_type("application/fhir+json")
        .json(json!({ "resourceType": resource_type, "id": id }))
}

async fn fhir_create(
    requests: web::Data<Arc<Mutex<Vec<FhirRequest>>>>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<Value>,
) -> HttpResponse {
    record(&requests, &req, Some(body.into_inner()));
    let resource_type = path.into_inner();
    HttpResponse::Created()
        .insert_header((
            LOCATION,
            format!("https://fhir.example/r4/tenant1/{resource_type}/12724066"),
        ))
        .insert_header((ETAG, "W/\"0\""))
        .finish()
}

async fn fhir_update(
    requests: web::Data<Arc<Mutex<Vec<FhirRequest>>>>,
    req: HttpRequest,
    body: web::Json<Value>,
) -> HttpResponse {
    let request = record(&requests, &req, Some(body.into_inner()));
    if request.if_match.as_deref() != Some("W/\"1\"") {
        return HttpResponse::PreconditionFailed()
            .content_type("application/fhir+json")
            .json(operation_outcome("conflict", "Version mismatch"));
    }
    HttpResponse::Ok().insert_header((ETAG, "W/\"2\"")).finish()
}

/// FHIR API at `/r4/tenant1` answering search, read, create and update.
///
/// Read of id `missing` answers 404 with an OperationOutcome; update accepts
/// only `If-Match: W/"1"`. SMART discovery answers 404 and is not recorded.
pub fn start_fhir_server() -> MockFhirServer {
    let requests: Arc<Mutex<Vec<FhirRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let shared = requests.clone();

    let server = actix_test::start(move || {
        App::new()
            .app_data(web::Data::new(shared.clone()))
            .app_data(web::JsonConfig::default().content_type(|_| true))
            .service(
                web::scope("/r4/tenant1")
                    .route(
                        "/.well-known/smart-configuration",
                        web::get().to(|| async { HttpResponse::NotFound().finish() }),
                    )
                    .route("/{type}", web::get().to(fhir_search))
                    .route("/{type}", web::post().to(fhir_create))
                    .route("/{type}/{id}", web::get().to(fhir_read))
                    .route("/{type}/{id}", web::put().to(fhir_update)),
            )
    });

    MockFhirServer { server, requests }
}
