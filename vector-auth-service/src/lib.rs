pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use service_core::axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

use crate::config::AuthConfig;
use crate::services::{Authenticator, SessionStore, UserRepository};
use service_core::error::AppError;
use std::sync::Arc;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::metrics::metrics,
        handlers::auth::login,
        handlers::auth::callback,
        handlers::auth::logout,
        handlers::user::get_me,
    ),
    components(schemas(models::User)),
    tags(
        (name = "Authentication", description = "OAuth login and session management"),
        (name = "User", description = "Authenticated user profile"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub users: Arc<dyn UserRepository>,
    pub authenticator: Arc<Authenticator>,
    pub sessions: SessionStore,
}

fn cors_layer(config: &AuthConfig) -> CorsLayer {
    let origins = &config.security.allowed_origins;

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    // Credentialed CORS cannot use a wildcard origin.
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(AllowOrigin::any());
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();

    layer
        .allow_origin(AllowOrigin::list(parsed))
        .allow_credentials(true)
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let protected = Router::new()
        .route("/users/me", get(handlers::user::get_me))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::session_auth_middleware,
        ));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(|| async { service_core::axum::Json(ApiDoc::openapi()) }),
        )
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/:strategy", get(handlers::auth::login))
        .route("/auth/:strategy/callback", get(handlers::auth::callback))
        .merge(protected)
        .with_state(state.clone())
        // Add tracing layer
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        // Add security headers middleware
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config));

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    service_core::axum::extract::State(state): service_core::axum::extract::State<AppState>,
) -> Result<service_core::axum::Json<serde_json::Value>, AppError> {
    state.users.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Metadata store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(service_core::axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "strategies": state.authenticator.strategy_names(),
        "checks": {
            "postgres": "up"
        }
    })))
}
