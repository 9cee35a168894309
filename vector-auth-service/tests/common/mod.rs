//! Shared setup for vector-auth-service integration tests.
//!
//! Builds the full router over in-memory doubles so the HTTP flow can be
//! driven with `tower::ServiceExt::oneshot` without external services.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use http_body_util::BodyExt;
use secrecy::Secret;
use std::sync::Arc;
use tower::util::ServiceExt;
use vector_auth_service::{
    build_router,
    config::{
        AuthConfig, BootstrapConfig, DatabaseConfig, Environment, GoogleOAuthConfig, NeonConfig,
        SecurityConfig, SessionConfig, MIN_SESSION_SECRET_LEN,
    },
    models::Identity,
    services::{
        Authenticator, AuthenticatorOptions, InMemoryRepository, MockProvisioner,
        MockSchemaBootstrapper, MockStrategy, ProvisioningCoordinator, SessionStore,
    },
    AppState,
};

pub const FRONTEND_URL: &str = "http://localhost:3000";
pub const STRATEGY: &str = "google";

/// Callback code that the mock provider resolves to `ada@x.com`.
pub const GOOD_CODE: &str = "good-code";
pub const GOOD_EMAIL: &str = "ada@x.com";

pub fn test_config() -> AuthConfig {
    AuthConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "vector-auth-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://localhost/vector_auth_test".to_string()),
            max_connections: 5,
            min_connections: 1,
        },
        google: GoogleOAuthConfig {
            client_id: "client-id".to_string(),
            client_secret: Secret::new("client-secret".to_string()),
            callback_url: "http://localhost:8080/auth/google/callback".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            frontend_url: FRONTEND_URL.to_string(),
            timeout_seconds: 10,
        },
        neon: NeonConfig {
            api_key: Secret::new("neon-key".to_string()),
            api_url: "https://console.neon.tech/api/v2".to_string(),
            timeout_seconds: 5,
        },
        bootstrap: BootstrapConfig {
            timeout_seconds: 5,
            max_retries: 0,
        },
        session: SessionConfig {
            cookie_name: "__session".to_string(),
            secret: Secret::new("t".repeat(MIN_SESSION_SECRET_LEN)),
            secure: false,
        },
        security: SecurityConfig {
            allowed_origins: vec![FRONTEND_URL.to_string()],
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub repo: Arc<InMemoryRepository>,
    pub provisioner: Arc<MockProvisioner>,
    pub bootstrapper: Arc<MockSchemaBootstrapper>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let config = test_config();
        let repo = Arc::new(InMemoryRepository::new());
        let provisioner = Arc::new(MockProvisioner::new());
        let bootstrapper = Arc::new(MockSchemaBootstrapper::new());

        let coordinator = ProvisioningCoordinator::new(
            repo.clone(),
            repo.clone(),
            provisioner.clone(),
            bootstrapper.clone(),
        );
        let strategy = MockStrategy::new(STRATEGY).with_identity(
            GOOD_CODE,
            Identity::new(GOOD_EMAIL, Some("Ada".to_string()), None),
        );
        let authenticator = Authenticator::builder(coordinator)
            .with_strategy(Arc::new(strategy))
            .options(AuthenticatorOptions::default())
            .build();

        let state = AppState {
            sessions: SessionStore::new(&config.session),
            config,
            users: repo.clone(),
            authenticator: Arc::new(authenticator),
        };

        let router = build_router(state)
            .await
            .expect("Failed to build router");

        Self {
            router,
            repo,
            provisioner,
            bootstrapper,
        }
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Run the challenge step and return `(session cookie, state)`.
    pub async fn start_login(&self) -> (String, String) {
        let response = self.get(&format!("/auth/{}", STRATEGY), None).await;
        let cookie = session_cookie(&response).expect("challenge sets a session cookie");
        let state = location(&response)
            .split("state=")
            .nth(1)
            .expect("authorization url carries state")
            .to_string();
        (cookie, state)
    }

    /// Full login with `code`; returns the callback response.
    pub async fn login_with(&self, code: &str) -> Response<Body> {
        let (cookie, state) = self.start_login().await;
        self.get(
            &format!("/auth/{}/callback?code={}&state={}", STRATEGY, code, state),
            Some(&cookie),
        )
        .await
    }
}

/// `name=value` pair of the session cookie set on `response`, if any.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("__session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub fn raw_set_cookie(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
