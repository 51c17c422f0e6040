//! HTTP server assembly.

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::backend::HttpBackend;
use crate::config::{AppConfig, ServerConfig};
use crate::error::{ConfigError, Result};
use crate::signup::{SessionRegistry, signup_routes, spawn_session_sweeper};

/// Session registry backed by the marketplace backend in `config`.
pub fn build_registry(config: &AppConfig) -> Result<Arc<SessionRegistry>> {
    let backend = Arc::new(HttpBackend::new(&config.backend)?);
    Ok(SessionRegistry::new(backend.clone(), backend, config.wizard.clone()))
}

/// Build the signup API around `registry`.
pub fn build_app(registry: Arc<SessionRegistry>, server: &ServerConfig) -> Result<Router> {
    Ok(signup_routes(registry).layer(cors_layer(server)?))
}

/// Bind the configured port and serve until the process exits. Idle
/// sessions are swept in the background.
pub async fn run(config: AppConfig) -> Result<()> {
    let registry = build_registry(&config)?;
    let app = build_app(Arc::clone(&registry), &config.server)?;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port)).await?;
    let sweeper = spawn_session_sweeper(registry);
    info!(port = config.server.port, "Signup API started");
    let served = axum::serve(listener, app).await;
    sweeper.abort();
    served?;
    Ok(())
}

/// CORS for the browser UI: a single configured origin, or any origin when
/// none is set.
fn cors_layer(server: &ServerConfig) -> std::result::Result<CorsLayer, ConfigError> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match server.allowed_origin.as_deref() {
        Some(origin) => {
            let origin =
                HeaderValue::from_str(origin).map_err(|e| ConfigError::InvalidValue {
                    key: "SIGNUP_ALLOWED_ORIGIN".into(),
                    message: e.to_string(),
                })?;
            Ok(layer.allow_origin(origin))
        }
        None => Ok(layer.allow_origin(Any)),
    }
}
