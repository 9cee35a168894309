//! Services layer for vector-auth-service.
//!
//! Leaf capabilities (metadata store, resource provisioner, schema
//! bootstrapper) are traits with a production implementation and an
//! in-memory double. The coordinator and authenticator compose them.

pub mod authenticator;
pub mod coordinator;
mod database;
pub mod error;
pub mod metrics;
mod provisioner;
mod schema;
pub mod session;

pub use authenticator::{
    Authenticator, AuthenticatorBuilder, AuthenticatorOptions, CallbackParams, GoogleStrategy,
    MockStrategy, Strategy,
};
pub use coordinator::ProvisioningCoordinator;
pub use database::{Database, InMemoryRepository, ResourceRepository, UserRepository};
pub use error::{
    AuthError, IdentityError, PersistenceError, ProviderError, ProvisioningError,
    ProvisioningStep, SchemaError,
};
pub use provisioner::{MockProvisioner, NeonClient, ProvisionedResource, ResourceProvisioner};
pub use schema::{
    MockSchemaBootstrapper, PgSchemaBootstrapper, SchemaBootstrapper, BOOTSTRAP_STATEMENTS,
    EMBEDDING_DIMENSIONS,
};
pub use session::{AuthErrorMessage, Session, SessionStore};
