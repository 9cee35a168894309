//! Strategy registry driving the OAuth challenge/callback cycle.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::coordinator::ProvisioningCoordinator;
use super::error::{AuthError, IdentityError};
use super::metrics;
use super::session::Session;
use crate::config::GoogleOAuthConfig;
use crate::models::{Identity, User};

/// Query parameters delivered to an OAuth callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// An identity provider.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// URL the browser is sent to in order to start a login.
    fn authorization_url(&self, state: &str) -> String;

    /// Turn a provider callback into a verified identity.
    async fn verify(&self, callback: &CallbackParams) -> Result<Identity, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: Option<String>,
    #[serde(default)]
    verified_email: bool,
    name: Option<String>,
    picture: Option<String>,
}

/// Google OAuth 2.0 authorization-code flow.
#[derive(Clone)]
pub struct GoogleStrategy {
    client: Client,
    config: GoogleOAuthConfig,
}

impl GoogleStrategy {
    pub const NAME: &'static str = "google";

    pub fn new(config: GoogleOAuthConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build Google HTTP client: {}", e))?;

        Ok(Self { client, config })
    }

    async fn exchange_code(&self, code: &str) -> Result<String, IdentityError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret().as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.config.callback_url.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to exchange Google code");
                IdentityError::TokenExchange(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Google token exchange error");
            return Err(IdentityError::TokenExchange(format!("status {}", status)));
        }

        let token: GoogleTokenResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Google token response");
            IdentityError::TokenExchange(e.to_string())
        })?;
        Ok(token.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<GoogleUserInfo, IdentityError> {
        let response = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to fetch Google user info");
                IdentityError::Profile(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(IdentityError::Profile(format!(
                "status {}",
                response.status()
            )));
        }

        response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Google user info");
            IdentityError::Profile(e.to_string())
        })
    }
}

#[async_trait]
impl Strategy for GoogleStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope=openid%20email%20profile&state={}",
            self.config.auth_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.callback_url),
            urlencoding::encode(state),
        )
    }

    async fn verify(&self, callback: &CallbackParams) -> Result<Identity, IdentityError> {
        if let Some(error) = &callback.error {
            return Err(IdentityError::ProviderDenied(error.clone()));
        }
        let code = callback
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(IdentityError::MissingCode)?;

        let access_token = self.exchange_code(code).await?;
        let profile = self.fetch_profile(&access_token).await?;

        let email = profile
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or(IdentityError::MissingEmail)?;
        if !profile.verified_email {
            return Err(IdentityError::EmailNotVerified);
        }

        Ok(Identity::new(&email, profile.name, profile.picture))
    }
}

/// Strategy that maps callback codes to canned identities.
pub struct MockStrategy {
    name: String,
    identities: Mutex<HashMap<String, Identity>>,
}

impl MockStrategy {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            identities: Mutex::new(HashMap::new()),
        }
    }

    /// A callback carrying `code` verifies as `identity`.
    pub fn with_identity(self, code: &str, identity: Identity) -> Self {
        self.identities
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(code.to_string(), identity);
        self
    }
}

#[async_trait]
impl Strategy for MockStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorization_url(&self, state: &str) -> String {
        format!("https://idp.test/{}/authorize?state={}", self.name, state)
    }

    async fn verify(&self, callback: &CallbackParams) -> Result<Identity, IdentityError> {
        if let Some(error) = &callback.error {
            return Err(IdentityError::ProviderDenied(error.clone()));
        }
        let code = callback.code.as_deref().ok_or(IdentityError::MissingCode)?;
        self.identities
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(code)
            .cloned()
            .ok_or_else(|| IdentityError::TokenExchange(format!("unknown code {}", code)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthenticatorOptions {
    /// Return resolution failures to the caller instead of only recording
    /// them in the session.
    pub throw_on_error: bool,
}

impl Default for AuthenticatorOptions {
    fn default() -> Self {
        Self {
            throw_on_error: true,
        }
    }
}

pub struct AuthenticatorBuilder {
    coordinator: ProvisioningCoordinator,
    strategies: HashMap<String, Arc<dyn Strategy>>,
    options: AuthenticatorOptions,
}

impl AuthenticatorBuilder {
    pub fn with_strategy(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.strategies.insert(strategy.name().to_string(), strategy);
        self
    }

    pub fn options(mut self, options: AuthenticatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Authenticator {
        Authenticator {
            strategies: self.strategies,
            options: self.options,
            coordinator: self.coordinator,
        }
    }
}

/// Immutable registry of strategies, built once at startup.
pub struct Authenticator {
    strategies: HashMap<String, Arc<dyn Strategy>>,
    options: AuthenticatorOptions,
    coordinator: ProvisioningCoordinator,
}

impl Authenticator {
    pub fn builder(coordinator: ProvisioningCoordinator) -> AuthenticatorBuilder {
        AuthenticatorBuilder {
            coordinator,
            strategies: HashMap::new(),
            options: AuthenticatorOptions::default(),
        }
    }

    pub fn strategy(&self, name: &str) -> Option<&Arc<dyn Strategy>> {
        self.strategies.get(name)
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn options(&self) -> AuthenticatorOptions {
        self.options
    }

    /// Begin a login: record a fresh state token and return the provider URL.
    pub fn challenge(&self, name: &str, session: &mut Session) -> Result<String, AuthError> {
        let strategy = self
            .strategy(name)
            .ok_or_else(|| AuthError::UnknownStrategy(name.to_string()))?;

        let state = Uuid::new_v4();
        session.oauth_state = Some(state);
        session.strategy = Some(name.to_string());

        Ok(strategy.authorization_url(&state.to_string()))
    }

    /// Complete a login from a provider callback.
    ///
    /// The session only gains a user when every step succeeds. The pending
    /// state token is consumed either way.
    #[tracing::instrument(skip(self, callback, session))]
    pub async fn authenticate(
        &self,
        name: &str,
        callback: &CallbackParams,
        session: &mut Session,
    ) -> Result<User, AuthError> {
        let result = self.run_callback(name, callback, session).await;
        session.oauth_state = None;

        match result {
            Ok(user) => {
                session.set_user(user.clone());
                session.strategy = Some(name.to_string());
                metrics::record_login("success");
                tracing::info!(user_id = %user.user_id, "User authenticated");
                Ok(user)
            }
            Err(e) => {
                // A signed-in user keeps the strategy it logged in with.
                if session.user.is_none() {
                    session.strategy = None;
                }
                metrics::record_login(e.outcome());
                tracing::warn!(outcome = e.outcome(), error = %e, "Authentication failed");
                if !self.options.throw_on_error {
                    session.flash_error(e.public_message());
                }
                Err(e)
            }
        }
    }

    async fn run_callback(
        &self,
        name: &str,
        callback: &CallbackParams,
        session: &Session,
    ) -> Result<User, AuthError> {
        let strategy = self
            .strategy(name)
            .ok_or_else(|| AuthError::UnknownStrategy(name.to_string()))?;

        let returned_state = callback
            .state
            .as_deref()
            .and_then(|s| Uuid::parse_str(s).ok());
        if returned_state.is_none()
            || returned_state != session.oauth_state
            || session.strategy.as_deref() != Some(name)
        {
            return Err(AuthError::InvalidState);
        }

        let identity = strategy.verify(callback).await?;
        let user = self.coordinator.resolve(&identity).await?;
        Ok(user)
    }

    pub fn is_authenticated(&self, session: &Session) -> Option<User> {
        session.user.clone()
    }

    pub fn logout(&self, session: &mut Session) {
        if let Some(user) = &session.user {
            tracing::info!(user_id = %user.user_id, "User logged out");
        }
        session.clear();
    }
}
