//! Object store seam and implementations.
//!
//! The platform owns the real store; the controller only talks to it
//! through [`ObjectStore`]. [`Client`] adds a typed facade and
//! [`InMemoryObjectStore`] reproduces the platform semantics the
//! reconcilers depend on (finalizer-gated deletion, optimistic
//! concurrency, change notifications).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock, broadcast};

use crate::error::{StoreError, StoreResult};
use crate::meta::NamespacedName;
use crate::resource::{Object, Resource, ResourceKind, Worker};

/// Trait for object store backends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object.
    async fn get(&self, kind: ResourceKind, key: &NamespacedName) -> StoreResult<Object>;

    /// List every object of a kind in a namespace.
    async fn list(&self, kind: ResourceKind, namespace: &str) -> StoreResult<Vec<Object>>;

    /// Create an object. Fails with `AlreadyExists` if the identity is taken.
    async fn create(&self, object: Object) -> StoreResult<Object>;

    /// Replace an object. Fails with `Conflict` on a stale resource version.
    async fn update(&self, object: Object) -> StoreResult<Object>;

    /// Request deletion. Objects holding finalizers are only marked.
    async fn delete(&self, kind: ResourceKind, key: &NamespacedName) -> StoreResult<()>;
}

/// Reference to a changed object, published on every store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub kind: ResourceKind,
    pub key: NamespacedName,
}

impl ObjectRef {
    pub const fn new(kind: ResourceKind, key: NamespacedName) -> Self {
        Self { kind, key }
    }
}

/// Typed client over an [`ObjectStore`].
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn ObjectStore>,
}

impl Client {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// # Errors
    ///
    /// Propagates store failures, including `NotFound`.
    pub async fn get<R: Resource>(&self, key: &NamespacedName) -> StoreResult<R> {
        let object = self.store.get(R::KIND, key).await?;
        R::try_from_object(object)
    }

    /// Like [`Client::get`] but maps `NotFound` to `None`.
    ///
    /// # Errors
    ///
    /// Propagates every store failure except `NotFound`.
    pub async fn get_opt<R: Resource>(&self, key: &NamespacedName) -> StoreResult<Option<R>> {
        match self.get::<R>(key).await {
            Ok(resource) => Ok(Some(resource)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List objects of a kind in `namespace` that satisfy `filter`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list<R, F>(&self, namespace: &str, filter: F) -> StoreResult<Vec<R>>
    where
        R: Resource,
        F: Fn(&R) -> bool + Send,
    {
        let objects = self.store.list(R::KIND, namespace).await?;
        let mut matched = Vec::new();
        for object in objects {
            let resource = R::try_from_object(object)?;
            if filter(&resource) {
                matched.push(resource);
            }
        }
        Ok(matched)
    }

    /// # Errors
    ///
    /// Propagates store failures, including `AlreadyExists`.
    pub async fn create<R: Resource>(&self, resource: R) -> StoreResult<R> {
        let object = self.store.create(resource.into_object()).await?;
        R::try_from_object(object)
    }

    /// # Errors
    ///
    /// Propagates store failures, including `Conflict`.
    pub async fn update<R: Resource>(&self, resource: R) -> StoreResult<R> {
        let object = self.store.update(resource.into_object()).await?;
        R::try_from_object(object)
    }

    /// # Errors
    ///
    /// Propagates store failures, including `NotFound`.
    pub async fn delete<R: Resource>(&self, key: &NamespacedName) -> StoreResult<()> {
        self.store.delete(R::KIND, key).await
    }
}

/// Store operation selector for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    List,
    Create,
    Update,
    Delete,
}

#[derive(Debug)]
struct Fault {
    op: StoreOp,
    kind: ResourceKind,
    error: StoreError,
}

/// A deleted worker that is still visible while it terminates.
#[derive(Debug)]
struct Lingering {
    worker: Worker,
    reads_left: u32,
}

type ObjectMap = BTreeMap<(ResourceKind, NamespacedName), Object>;

/// In-memory object store for tests and the simulator.
pub struct InMemoryObjectStore {
    objects: RwLock<ObjectMap>,
    terminating: Mutex<HashMap<NamespacedName, Lingering>>,
    faults: Mutex<Vec<Fault>>,
    worker_linger_reads: u32,
    changes: broadcast::Sender<ObjectRef>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            terminating: Mutex::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
            worker_linger_reads: 0,
            changes,
        }
    }

    /// Create a new store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Keep deleted workers visible for `reads` further lookups, like a pod
    /// inside its termination grace period.
    #[must_use]
    pub const fn linger_workers(mut self, reads: u32) -> Self {
        self.worker_linger_reads = reads;
        self
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ObjectRef> {
        self.changes.subscribe()
    }

    /// Fail the next `op` on `kind` with `error`.
    pub async fn inject_fault(&self, op: StoreOp, kind: ResourceKind, error: StoreError) {
        self.faults.lock().await.push(Fault { op, kind, error });
    }

    /// Number of stored objects of a kind across all namespaces.
    pub async fn count(&self, kind: ResourceKind) -> usize {
        self.objects
            .read()
            .await
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    async fn take_fault(&self, op: StoreOp, kind: ResourceKind) -> StoreResult<()> {
        let mut faults = self.faults.lock().await;
        match faults.iter().position(|f| f.op == op && f.kind == kind) {
            Some(pos) => Err(faults.remove(pos).error),
            None => Ok(()),
        }
    }

    fn notify(&self, kind: ResourceKind, key: NamespacedName) {
        // No receivers is fine.
        let _ = self.changes.send(ObjectRef::new(kind, key));
    }

    /// A lingering worker, consuming one read of its grace period.
    async fn read_lingering(&self, key: &NamespacedName) -> Option<Worker> {
        let mut terminating = self.terminating.lock().await;
        let lingering = terminating.get_mut(key)?;
        if lingering.reads_left == 0 {
            terminating.remove(key);
            return None;
        }
        lingering.reads_left = lingering.reads_left.saturating_sub(1);
        Some(lingering.worker.clone())
    }

    async fn is_lingering(&self, key: &NamespacedName) -> bool {
        self.terminating
            .lock()
            .await
            .get(key)
            .is_some_and(|l| l.reads_left > 0)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, kind: ResourceKind, key: &NamespacedName) -> StoreResult<Object> {
        self.take_fault(StoreOp::Get, kind).await?;

        let found = self
            .objects
            .read()
            .await
            .get(&(kind, key.clone()))
            .cloned();
        if let Some(object) = found {
            return Ok(object);
        }

        if kind == ResourceKind::Worker {
            if let Some(worker) = self.read_lingering(key).await {
                return Ok(Object::Worker(worker));
            }
        }

        Err(StoreError::not_found(kind, key.clone()))
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> StoreResult<Vec<Object>> {
        self.take_fault(StoreOp::List, kind).await?;

        Ok(self
            .objects
            .read()
            .await
            .iter()
            .filter(|((k, key), _)| *k == kind && key.namespace == namespace)
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, mut object: Object) -> StoreResult<Object> {
        let kind = object.kind();
        self.take_fault(StoreOp::Create, kind).await?;

        let key = object.meta().key();
        if kind == ResourceKind::Worker && self.is_lingering(&key).await {
            return Err(StoreError::already_exists(kind, key));
        }

        {
            let mut objects = self.objects.write().await;
            if objects.contains_key(&(kind, key.clone())) {
                return Err(StoreError::already_exists(kind, key));
            }
            let meta = object.meta_mut();
            meta.resource_version = 1;
            meta.deletion_timestamp = None;
            objects.insert((kind, key.clone()), object.clone());
        }

        tracing::trace!(kind = %kind, key = %key, "Object created");
        self.notify(kind, key);
        Ok(object)
    }

    async fn update(&self, mut object: Object) -> StoreResult<Object> {
        let kind = object.kind();
        self.take_fault(StoreOp::Update, kind).await?;

        let key = object.meta().key();
        let removed = {
            let mut objects = self.objects.write().await;
            let current = objects
                .get(&(kind, key.clone()))
                .ok_or_else(|| StoreError::not_found(kind, key.clone()))?;

            let current_version = current.meta().resource_version;
            if object.meta().resource_version != current_version {
                return Err(StoreError::conflict(
                    kind,
                    key,
                    format!(
                        "resource version {} is stale (current {current_version})",
                        object.meta().resource_version
                    ),
                ));
            }

            let deletion_timestamp = current.meta().deletion_timestamp;
            let meta = object.meta_mut();
            meta.resource_version = current_version.saturating_add(1);
            meta.deletion_timestamp = deletion_timestamp;

            // Deletion completes once the last finalizer is gone.
            if meta.is_deleting() && meta.finalizers.is_empty() {
                objects.remove(&(kind, key.clone()));
                true
            } else {
                objects.insert((kind, key.clone()), object.clone());
                false
            }
        };

        if removed {
            tracing::trace!(kind = %kind, key = %key, "Object finalized and removed");
        }
        self.notify(kind, key);
        Ok(object)
    }

    async fn delete(&self, kind: ResourceKind, key: &NamespacedName) -> StoreResult<()> {
        self.take_fault(StoreOp::Delete, kind).await?;

        let removed = {
            let mut objects = self.objects.write().await;
            let entry = (kind, key.clone());
            let Some(current) = objects.get_mut(&entry) else {
                drop(objects);
                if kind == ResourceKind::Worker && self.is_lingering(key).await {
                    return Ok(());
                }
                return Err(StoreError::not_found(kind, key.clone()));
            };

            if current.meta().finalizers.is_empty() {
                objects.remove(&entry)
            } else {
                let meta = current.meta_mut();
                if meta.deletion_timestamp.is_none() {
                    meta.deletion_timestamp = Some(Utc::now());
                    meta.resource_version = meta.resource_version.saturating_add(1);
                }
                None
            }
        };

        if let Some(Object::Worker(mut worker)) = removed {
            if self.worker_linger_reads > 0 {
                worker.metadata.deletion_timestamp = Some(Utc::now());
                self.terminating.lock().await.insert(
                    key.clone(),
                    Lingering {
                        worker,
                        reads_left: self.worker_linger_reads,
                    },
                );
            }
        }

        self.notify(kind, key.clone());
        Ok(())
    }
}
