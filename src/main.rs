//! EHR Gateway
//!
//! Backend for the EHR dashboard. Validates requests against Oracle Health's
//! search rules and proxies them to the Oracle Health (Cerner) FHIR R4 API
//! with a cached system-account bearer token.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod config;
mod error;
mod fhir;
mod handlers;
mod models;
mod state;
mod validation;

#[cfg(test)]
mod test_support;

use crate::config::Settings;
use crate::state::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenv::dotenv().ok();

    // Logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ehr_gateway=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();

    // Load configuration
    let settings = Settings::from_env().context("Failed to load configuration")?;
    let bind_address = format!("{}:{}", settings.server.host, settings.server.port);

    info!("Starting EHR gateway v{}", env!("CARGO_PKG_VERSION"));

    if settings.fhir.tenant_id.is_none()
        || settings.fhir.client_id.is_none()
        || settings.fhir.client_secret.is_none()
    {
        warn!("TENANT_ID, CLIENT_ID or CLIENT_SECRET is not set; FHIR requests will fail");
    }

    // Shared application state
    let app_state = web::Data::new(
        AppState::new(&settings.fhir).context("Failed to build HTTP client")?,
    );

    info!("Binding server to {}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(handlers::configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
