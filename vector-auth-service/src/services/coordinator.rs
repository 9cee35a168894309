//! First-login orchestration.
//!
//! Maps a verified [`Identity`] to a persisted [`User`], provisioning and
//! bootstrapping a vector database the first time an email is seen.
//!
//! Order of effects on a new email:
//!
//! 1. create the external resource
//! 2. bootstrap its embedding schema
//! 3. insert the user, tolerating a concurrent insert of the same email
//! 4. link the resource to the user, tolerating a concurrent link
//!
//! Steps are never reordered and never run in parallel. A failure after step 1
//! leaves the external resource orphaned; it is logged with its id so it can be
//! reconciled out of band.
//!
//! A user found without a link (an earlier attempt failed at step 4) gets
//! steps 1, 2 and 4 again on the next login.

use std::sync::Arc;
use std::time::Instant;

use super::database::{ResourceRepository, UserRepository};
use super::error::{PersistenceError, ProvisioningError};
use super::metrics;
use super::provisioner::{ProvisionedResource, ResourceProvisioner};
use super::schema::SchemaBootstrapper;
use crate::models::{Identity, User, VectorDatabase};

#[derive(Clone)]
pub struct ProvisioningCoordinator {
    users: Arc<dyn UserRepository>,
    resources: Arc<dyn ResourceRepository>,
    provisioner: Arc<dyn ResourceProvisioner>,
    bootstrapper: Arc<dyn SchemaBootstrapper>,
}

impl ProvisioningCoordinator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        resources: Arc<dyn ResourceRepository>,
        provisioner: Arc<dyn ResourceProvisioner>,
        bootstrapper: Arc<dyn SchemaBootstrapper>,
    ) -> Self {
        Self {
            users,
            resources,
            provisioner,
            bootstrapper,
        }
    }

    /// Return the user for `identity`, provisioning on first sight.
    ///
    /// Linked users cost two lookups and touch nothing external.
    #[tracing::instrument(skip(self, identity), fields(email = %identity.email))]
    pub async fn resolve(&self, identity: &Identity) -> Result<User, ProvisioningError> {
        let existing = self
            .users
            .find_by_email(&identity.email)
            .await
            .map_err(ProvisioningError::Lookup)?;

        if let Some(user) = &existing {
            let link = self
                .resources
                .find_by_user(user.id)
                .await
                .map_err(ProvisioningError::Lookup)?;
            if link.is_some() {
                tracing::debug!(user_id = %user.user_id, "Existing user, skipping provisioning");
                return Ok(user.clone());
            }
            tracing::warn!(user_id = %user.user_id, "Existing user has no vector database, provisioning");
        }

        let started = Instant::now();
        let result = match existing {
            Some(user) => self.repair(user).await,
            None => self.provision(identity).await,
        };

        if let Err(e) = &result {
            let step = e.step();
            match e.orphaned_resource() {
                Some(resource_id) if e.is_persistence_failure() => tracing::error!(
                    step = %step,
                    resource_id,
                    orphaned = true,
                    error = %e,
                    "Provisioning failed after resource creation; local record incomplete"
                ),
                Some(resource_id) => tracing::error!(
                    step = %step,
                    resource_id,
                    orphaned = true,
                    error = %e,
                    "Provisioning failed; resource left without schema"
                ),
                None => tracing::error!(step = %step, error = %e, "Provisioning failed"),
            }
            metrics::record_provisioning(step.as_str(), started.elapsed());
        }

        result
    }

    async fn provision(&self, identity: &Identity) -> Result<User, ProvisioningError> {
        let started = Instant::now();
        let resource = self.create_resource().await?;
        let resource_id = resource.resource_id;

        let candidate = User::from_identity(identity);
        let user = self
            .users
            .insert_if_absent(&candidate)
            .await
            .map_err(|source| ProvisioningError::PersistUser {
                resource_id: resource_id.clone(),
                source,
            })?;

        let lost_race = user.id != candidate.id;
        if lost_race {
            tracing::info!(
                user_id = %user.user_id,
                resource_id = %resource_id,
                "Concurrent login inserted this user first"
            );
        }

        let linked = self.link(&user, &resource_id).await?;
        let outcome = if linked && !lost_race {
            "success"
        } else {
            "race_lost"
        };
        metrics::record_provisioning(outcome, started.elapsed());
        Ok(user)
    }

    async fn repair(&self, user: User) -> Result<User, ProvisioningError> {
        let started = Instant::now();
        let resource = self.create_resource().await?;
        self.link(&user, &resource.resource_id).await?;
        metrics::record_provisioning("repaired", started.elapsed());
        Ok(user)
    }

    async fn create_resource(&self) -> Result<ProvisionedResource, ProvisioningError> {
        let resource = self
            .provisioner
            .create()
            .await
            .map_err(ProvisioningError::CreateResource)?;

        self.bootstrapper
            .bootstrap(&resource.connection_uri)
            .await
            .map_err(|source| ProvisioningError::BootstrapSchema {
                resource_id: resource.resource_id.clone(),
                source,
            })?;

        Ok(resource)
    }

    /// Link `resource_id` to `user`. Returns `false` when another attempt
    /// linked first; `resource_id` is then orphaned.
    async fn link(&self, user: &User, resource_id: &str) -> Result<bool, ProvisioningError> {
        match self
            .resources
            .insert_link(&VectorDatabase::new(resource_id.to_string(), user.id))
            .await
        {
            Ok(()) => {
                tracing::info!(
                    user_id = %user.user_id,
                    resource_id = %resource_id,
                    "Linked vector database to user"
                );
                Ok(true)
            }
            Err(PersistenceError::AlreadyLinked(_)) => {
                tracing::warn!(
                    user_id = %user.user_id,
                    resource_id = %resource_id,
                    orphaned = true,
                    "User already linked by a concurrent login"
                );
                Ok(false)
            }
            Err(source) => Err(ProvisioningError::LinkResource {
                resource_id: resource_id.to_string(),
                source,
            }),
        }
    }
}
