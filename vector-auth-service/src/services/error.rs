use service_core::error::AppError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The identity provider callback was invalid or the identity could not be verified.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Provider returned an error: {0}")]
    ProviderDenied(String),

    #[error("Missing authorization code")]
    MissingCode,

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Failed to fetch user profile: {0}")]
    Profile(String),

    #[error("Identity has no email address")]
    MissingEmail,

    #[error("Email address is not verified")]
    EmailNotVerified,
}

/// The external resource-provisioning call failed or returned malformed data.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Bootstrap statements failed against the newly provisioned database.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to connect to provisioned database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Bootstrap statement '{statement}' failed: {source}")]
    Statement {
        statement: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to commit bootstrap transaction: {0}")]
    Commit(#[source] sqlx::Error),

    #[error("Bootstrap timed out after {0:?}")]
    Timeout(Duration),
}

/// A metadata-store read or write failed.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Row for {0} vanished after a conflicting insert")]
    MissingAfterConflict(String),

    #[error("Resource already linked for user {0}")]
    AlreadyLinked(uuid::Uuid),
}

/// Steps of first-login provisioning, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStep {
    Lookup,
    CreateResource,
    BootstrapSchema,
    PersistUser,
    LinkResource,
}

impl ProvisioningStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningStep::Lookup => "lookup",
            ProvisioningStep::CreateResource => "create_resource",
            ProvisioningStep::BootstrapSchema => "bootstrap_schema",
            ProvisioningStep::PersistUser => "persist_user",
            ProvisioningStep::LinkResource => "link_resource",
        }
    }
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged outcome of a failed resolution, one variant per failing step.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("user lookup failed: {0}")]
    Lookup(#[source] PersistenceError),

    #[error("resource creation failed: {0}")]
    CreateResource(#[source] ProviderError),

    #[error("schema bootstrap failed for resource {resource_id}: {source}")]
    BootstrapSchema {
        resource_id: String,
        #[source]
        source: SchemaError,
    },

    #[error("persisting user failed after resource {resource_id} was created: {source}")]
    PersistUser {
        resource_id: String,
        #[source]
        source: PersistenceError,
    },

    #[error("linking resource {resource_id} to user failed: {source}")]
    LinkResource {
        resource_id: String,
        #[source]
        source: PersistenceError,
    },
}

impl ProvisioningError {
    pub fn step(&self) -> ProvisioningStep {
        match self {
            ProvisioningError::Lookup(_) => ProvisioningStep::Lookup,
            ProvisioningError::CreateResource(_) => ProvisioningStep::CreateResource,
            ProvisioningError::BootstrapSchema { .. } => ProvisioningStep::BootstrapSchema,
            ProvisioningError::PersistUser { .. } => ProvisioningStep::PersistUser,
            ProvisioningError::LinkResource { .. } => ProvisioningStep::LinkResource,
        }
    }

    /// External resource left behind without a complete local record, if any.
    pub fn orphaned_resource(&self) -> Option<&str> {
        match self {
            ProvisioningError::Lookup(_) | ProvisioningError::CreateResource(_) => None,
            ProvisioningError::BootstrapSchema { resource_id, .. }
            | ProvisioningError::PersistUser { resource_id, .. }
            | ProvisioningError::LinkResource { resource_id, .. } => Some(resource_id),
        }
    }

    /// Local metadata was (partially) written or attempted after the external
    /// resource existed. Worse than a bootstrap failure.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            ProvisioningError::PersistUser { .. } | ProvisioningError::LinkResource { .. }
        )
    }
}

/// Failure of an authentication attempt as seen by the authenticator.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Unknown authentication strategy: {0}")]
    UnknownStrategy(String),

    #[error("OAuth state mismatch")]
    InvalidState,

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
}

impl AuthError {
    /// Message safe to place in the session and show to the end user.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::UnknownStrategy(_) => "Unsupported login method".to_string(),
            AuthError::InvalidState => "Login session expired, please try again".to_string(),
            AuthError::Identity(IdentityError::EmailNotVerified) => {
                "Your email address is not verified with the provider".to_string()
            }
            AuthError::Identity(_) => "Authentication failed".to_string(),
            AuthError::Provisioning(_) => {
                "We could not set up your account, please try again".to_string()
            }
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            AuthError::UnknownStrategy(_) | AuthError::InvalidState => "rejected",
            AuthError::Identity(_) => "identity_error",
            AuthError::Provisioning(_) => "provisioning_error",
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UnknownStrategy(name) => {
                AppError::NotFound(anyhow::anyhow!("Unknown authentication strategy: {}", name))
            }
            AuthError::InvalidState => AppError::BadRequest(anyhow::anyhow!("Invalid OAuth state")),
            AuthError::Identity(e) => AppError::AuthError(anyhow::anyhow!(e.to_string())),
            AuthError::Provisioning(ProvisioningError::CreateResource(e)) => {
                AppError::BadGateway(e.to_string())
            }
            AuthError::Provisioning(e) => AppError::InternalError(anyhow::Error::new(e)),
        }
    }
}
