//! Reconciler seam and the collaborators shared by both reconcilers.

use std::sync::Arc;

use async_trait::async_trait;
use rocketlab_core::{
    Client, ControllerConfig, NamespacedName, ObjectStore, ResourceKind, TmSource,
};

use crate::descriptor::{self, WorkerDescriptor};
use crate::error::{Error, Result};
use crate::finalizer::FinalizerGate;
use crate::site::SiteReconciler;
use crate::tmsource::TmSourceReconciler;
use crate::types::ReconcileOutcome;
use crate::worker::WorkerStore;

/// Trait implemented by every reconciler the dispatcher can drive.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// The kind of resource this reconciler handles.
    fn kind(&self) -> ResourceKind;

    /// Converge one resource. Errors are retried by the caller.
    async fn reconcile(&self, key: &NamespacedName) -> Result<ReconcileOutcome>;
}

/// Collaborators shared by the reconcilers.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub workers: WorkerStore,
    pub finalizers: FinalizerGate,
    pub config: Arc<ControllerConfig>,
}

impl Context {
    pub fn new(store: Arc<dyn ObjectStore>, config: Arc<ControllerConfig>) -> Self {
        let client = Client::new(store);
        Self {
            workers: WorkerStore::new(client.clone()),
            finalizers: FinalizerGate::new(client.clone()),
            client,
            config,
        }
    }

    /// Descriptor of the worker `source` should have.
    pub fn descriptor(&self, source: &TmSource) -> WorkerDescriptor {
        descriptor::build(&self.config.worker, source)
    }
}

/// Both reconcilers, wired to the same store and configuration.
#[derive(Clone)]
pub struct Reconcilers {
    pub tmsource: Arc<TmSourceReconciler>,
    pub site: Arc<SiteReconciler>,
}

impl Reconcilers {
    /// Every reconciler as a trait object, for registration with a dispatcher.
    pub fn all(&self) -> Vec<Arc<dyn Reconcile>> {
        let tmsource: Arc<dyn Reconcile> = self.tmsource.clone();
        let site: Arc<dyn Reconcile> = self.site.clone();
        vec![tmsource, site]
    }
}

/// Builder for [`Reconcilers`].
pub struct ReconcilerBuilder {
    store: Option<Arc<dyn ObjectStore>>,
    config: ControllerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            config: ControllerConfig::default(),
        }
    }

    /// Set the object store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the reconcilers.
    ///
    /// # Errors
    ///
    /// Returns an error if no store was set or the configuration is invalid.
    pub fn build(self) -> Result<Reconcilers> {
        let store = self
            .store
            .ok_or_else(|| Error::reconcile_failed("an object store is required"))?;
        self.config.validate()?;

        let context = Context::new(store, Arc::new(self.config));
        Ok(Reconcilers {
            tmsource: Arc::new(TmSourceReconciler::new(context.clone())),
            site: Arc::new(SiteReconciler::new(context)),
        })
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
