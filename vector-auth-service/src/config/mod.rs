use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

/// Minimum length of the session signing secret, in bytes.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub google: GoogleOAuthConfig,
    pub neon: NeonConfig,
    pub bootstrap: BootstrapConfig,
    pub session: SessionConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub callback_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    /// Where the browser lands after a successful login.
    pub frontend_url: String,
    pub timeout_seconds: u64,
}

/// Resource-provisioning provider (Neon) settings.
#[derive(Debug, Clone)]
pub struct NeonConfig {
    pub api_key: Secret<String>,
    pub api_url: String,
    pub timeout_seconds: u64,
}

/// Schema bootstrap against a freshly provisioned database.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub secret: Secret<String>,
    pub secure: bool,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl GoogleOAuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl NeonConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl BootstrapConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("vector-auth-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", None, is_prod)?),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            google: GoogleOAuthConfig {
                client_id: get_env("GOOGLE_CLIENT_ID", None, is_prod)?,
                client_secret: Secret::new(get_env("GOOGLE_CLIENT_SECRET", None, is_prod)?),
                callback_url: get_env("GOOGLE_CALLBACK_URL", None, is_prod)?,
                auth_url: get_env(
                    "GOOGLE_AUTH_URL",
                    Some("https://accounts.google.com/o/oauth2/v2/auth"),
                    false,
                )?,
                token_url: get_env(
                    "GOOGLE_TOKEN_URL",
                    Some("https://oauth2.googleapis.com/token"),
                    false,
                )?,
                userinfo_url: get_env(
                    "GOOGLE_USERINFO_URL",
                    Some("https://www.googleapis.com/oauth2/v2/userinfo"),
                    false,
                )?,
                frontend_url: get_env("FRONTEND_URL", Some("http://localhost:3000"), is_prod)?,
                timeout_seconds: parse_env("IDENTITY_TIMEOUT_SECONDS", "10", false)?,
            },
            neon: NeonConfig {
                api_key: Secret::new(get_env("NEON_API_KEY", None, is_prod)?),
                api_url: get_env(
                    "NEON_API_URL",
                    Some("https://console.neon.tech/api/v2"),
                    false,
                )?,
                timeout_seconds: parse_env("PROVIDER_TIMEOUT_SECONDS", "30", false)?,
            },
            bootstrap: BootstrapConfig {
                timeout_seconds: parse_env("BOOTSTRAP_TIMEOUT_SECONDS", "30", false)?,
                max_retries: parse_env("BOOTSTRAP_MAX_RETRIES", "2", false)?,
            },
            session: SessionConfig {
                cookie_name: get_env("SESSION_COOKIE_NAME", Some("__session"), false)?,
                secret: Secret::new(get_env("SESSION_SECRET", None, is_prod)?),
                secure: is_prod,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.session.secret.expose_secret().len() < MIN_SESSION_SECRET_LEN {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_SECRET must be at least {} bytes",
                MIN_SESSION_SECRET_LEN
            )));
        }

        if self.neon.timeout_seconds == 0
            || self.bootstrap.timeout_seconds == 0
            || self.google.timeout_seconds == 0
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PROVIDER_TIMEOUT_SECONDS, BOOTSTRAP_TIMEOUT_SECONDS and IDENTITY_TIMEOUT_SECONDS must be positive"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS cannot exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> AuthConfig {
        AuthConfig {
            common: core_config::Config::default(),
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
                frontend_url: "http://localhost:3000".to_string(),
                timeout_seconds: 10,
            },
            neon: NeonConfig {
                api_key: Secret::new("neon-key".to_string()),
                api_url: "https://console.neon.tech/api/v2".to_string(),
                timeout_seconds: 30,
            },
            bootstrap: BootstrapConfig {
                timeout_seconds: 30,
                max_retries: 2,
            },
            session: SessionConfig {
                cookie_name: "__session".to_string(),
                secret: Secret::new("s".repeat(MIN_SESSION_SECRET_LEN)),
                secure: false,
            },
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
        }
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_short_session_secret_rejected() {
        let mut config = test_config();
        config.session.secret = Secret::new("short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_identity_timeout_rejected() {
        let mut config = test_config();
        config.google.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_origin_rejected_in_prod() {
        let mut config = test_config();
        config.environment = Environment::Prod;
        config.security.allowed_origins = vec!["*".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = test_config();
        config.bootstrap.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }
}
