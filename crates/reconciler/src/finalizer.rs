//! Finalizer gate: holds a resource in the store until its owned workers
//! are torn down.

use rocketlab_core::{Client, Resource, StoreResult};
use tracing::info;

#[derive(Clone)]
pub struct FinalizerGate {
    client: Client,
}

impl FinalizerGate {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Add `token` and persist. No store call when already present.
    ///
    /// On success `resource` is replaced by the stored copy. Returns `true`
    /// if the finalizer set changed.
    ///
    /// # Errors
    ///
    /// Propagates the update failure; `resource` is left as it was.
    pub async fn register<R: Resource>(&self, resource: &mut R, token: &str) -> StoreResult<bool> {
        if resource.meta().has_finalizer(token) {
            return Ok(false);
        }

        let mut updated = resource.clone();
        updated.meta_mut().add_finalizer(token);
        *resource = self.client.update(updated).await?;
        info!(kind = %R::KIND, key = %resource.key(), finalizer = token, "Finalizer registered");
        Ok(true)
    }

    /// Remove `token` and persist. No store call when already absent.
    ///
    /// Returns `true` if the finalizer set changed. Removing the last
    /// finalizer of a deleting resource lets the store drop it.
    ///
    /// # Errors
    ///
    /// Propagates the update failure; `resource` is left as it was.
    pub async fn unregister<R: Resource>(
        &self,
        resource: &mut R,
        token: &str,
    ) -> StoreResult<bool> {
        if !resource.meta().has_finalizer(token) {
            return Ok(false);
        }

        let mut updated = resource.clone();
        updated.meta_mut().remove_finalizer(token);
        *resource = self.client.update(updated).await?;
        info!(kind = %R::KIND, key = %resource.key(), finalizer = token, "Finalizer unregistered");
        Ok(true)
    }
}
