//! Worker store adapter.
//!
//! Single-attempt primitives over the object store. None of them retries;
//! a failure goes back to the dispatcher through the reconciler's error.

use std::time::Duration;

use rocketlab_core::{Client, NamespacedName, StoreResult, Worker};
use tracing::{debug, info};

use crate::descriptor::WorkerDescriptor;

#[derive(Clone)]
pub struct WorkerStore {
    client: Client,
}

impl WorkerStore {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Whether a worker is currently retrievable.
    ///
    /// # Errors
    ///
    /// Propagates store failures other than `NotFound`.
    pub async fn exists(&self, key: &NamespacedName) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// The observed worker, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Propagates store failures other than `NotFound`.
    pub async fn get(&self, key: &NamespacedName) -> StoreResult<Option<Worker>> {
        self.client.get_opt::<Worker>(key).await
    }

    /// Submit a worker.
    ///
    /// `AlreadyExists` is returned as-is; call sites decide whether a
    /// duplicate is benign.
    ///
    /// # Errors
    ///
    /// Propagates every store failure.
    pub async fn create(&self, worker: Worker) -> StoreResult<()> {
        let key = worker.metadata.key();
        self.client.create(worker).await?;
        info!(worker = %key, "Worker created");
        Ok(())
    }

    /// Request deletion. A worker that is already gone counts as deleted.
    ///
    /// # Errors
    ///
    /// Propagates store failures other than `NotFound`.
    pub async fn delete(&self, key: &NamespacedName) -> StoreResult<()> {
        match self.client.delete::<Worker>(key).await {
            Ok(()) => {
                info!(worker = %key, "Worker deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(worker = %key, "Worker already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Create the described worker unless one is already there.
    ///
    /// Returns `true` if a worker was created.
    ///
    /// # Errors
    ///
    /// Propagates store failures other than `AlreadyExists`.
    pub async fn ensure_present(&self, descriptor: &WorkerDescriptor) -> StoreResult<bool> {
        if self.exists(descriptor.key()).await? {
            debug!(worker = %descriptor.key(), "Worker already up");
            return Ok(false);
        }
        match self.create(descriptor.to_worker()).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_already_exists() => {
                debug!(worker = %descriptor.key(), "Worker appeared concurrently");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the worker if one is there.
    ///
    /// Returns `true` if a delete was issued.
    ///
    /// # Errors
    ///
    /// Propagates store failures other than `NotFound`.
    pub async fn ensure_absent(&self, key: &NamespacedName) -> StoreResult<bool> {
        if !self.exists(key).await? {
            debug!(worker = %key, "Worker already down");
            return Ok(false);
        }
        self.delete(key).await?;
        Ok(true)
    }

    /// Poll until the worker disappears, at most `polls` times.
    ///
    /// Returns `false` when the bound is reached with the worker still
    /// visible. Dropping the future cancels the wait.
    ///
    /// # Errors
    ///
    /// Propagates store failures other than `NotFound`.
    pub async fn wait_for_absence(
        &self,
        key: &NamespacedName,
        interval: Duration,
        polls: u32,
    ) -> StoreResult<bool> {
        for attempt in 0..=polls {
            if !self.exists(key).await? {
                return Ok(true);
            }
            if attempt < polls {
                debug!(worker = %key, attempt, "Waiting for worker termination");
                tokio::time::sleep(interval).await;
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::descriptor;
    use rocketlab_core::{
        InMemoryObjectStore, ResourceKind, StoreError, StoreOp, TmSource, WorkerTemplate,
    };
    use std::sync::Arc;

    fn setup(store: InMemoryObjectStore) -> (Arc<InMemoryObjectStore>, WorkerStore) {
        let store = Arc::new(store);
        let workers = WorkerStore::new(Client::new(store.clone()));
        (store, workers)
    }

    fn descriptor(metric: &str) -> WorkerDescriptor {
        descriptor::build(
            &WorkerTemplate::default(),
            &TmSource::new("lab", "a", "", metric),
        )
    }

    #[tokio::test]
    async fn test_exists_treats_not_found_as_false() {
        let (_, workers) = setup(InMemoryObjectStore::new());
        assert!(!workers.exists(descriptor("t").key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_surfaces_other_faults() {
        let (store, workers) = setup(InMemoryObjectStore::new());
        store
            .inject_fault(
                StoreOp::Get,
                ResourceKind::Worker,
                StoreError::backend("get", "connection reset"),
            )
            .await;
        assert!(workers.exists(descriptor("t").key()).await.is_err());
    }

    #[tokio::test]
    async fn test_create_reports_duplicates() {
        let (_, workers) = setup(InMemoryObjectStore::new());
        let desired = descriptor("t");
        workers.create(desired.to_worker()).await.unwrap();
        let err = workers.create(desired.to_worker()).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_, workers) = setup(InMemoryObjectStore::new());
        let desired = descriptor("t");
        workers.create(desired.to_worker()).await.unwrap();
        workers.delete(desired.key()).await.unwrap();
        workers.delete(desired.key()).await.unwrap();
        assert!(!workers.exists(desired.key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_present_and_absent() {
        let (store, workers) = setup(InMemoryObjectStore::new());
        let desired = descriptor("t");

        assert!(workers.ensure_present(&desired).await.unwrap());
        assert!(!workers.ensure_present(&desired).await.unwrap());
        assert_eq!(store.count(ResourceKind::Worker).await, 1);

        assert!(workers.ensure_absent(desired.key()).await.unwrap());
        assert!(!workers.ensure_absent(desired.key()).await.unwrap());
        assert_eq!(store.count(ResourceKind::Worker).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_once_worker_is_gone() {
        let (_, workers) = setup(InMemoryObjectStore::new().linger_workers(3));
        let desired = descriptor("t");
        workers.create(desired.to_worker()).await.unwrap();
        workers.delete(desired.key()).await.unwrap();

        let gone = workers
            .wait_for_absence(desired.key(), Duration::from_secs(1), 20)
            .await
            .unwrap();
        assert!(gone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_after_bound() {
        let (_, workers) = setup(InMemoryObjectStore::new().linger_workers(50));
        let desired = descriptor("t");
        workers.create(desired.to_worker()).await.unwrap();
        workers.delete(desired.key()).await.unwrap();

        let started = tokio::time::Instant::now();
        let gone = workers
            .wait_for_absence(desired.key(), Duration::from_secs(1), 20)
            .await
            .unwrap();
        assert!(!gone);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }
}
