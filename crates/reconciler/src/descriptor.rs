//! Worker descriptor builder.
//!
//! The descriptor is a pure function of the source spec and the process
//! configuration; nothing about it is persisted on its own.

use std::collections::BTreeMap;

use rocketlab_core::{
    Container, EnvVar, NamespacedName, ObjectMeta, TmSource, Worker, WorkerSpec, WorkerTemplate,
};

/// The worker a source should have.
#[derive(Debug, Clone)]
pub struct WorkerDescriptor {
    key: NamespacedName,
    labels: BTreeMap<String, String>,
    container: Container,
}

/// Descriptors compare by environment only: the environment is the sole
/// part derived from the source, everything else comes from the template.
impl PartialEq for WorkerDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.container.env == other.container.env
    }
}

impl Eq for WorkerDescriptor {}

/// Identity of the worker owned by `source`.
pub fn worker_key(template: &WorkerTemplate, source: &TmSource) -> NamespacedName {
    NamespacedName::new(
        source.metadata.namespace.clone(),
        format!("{}{}", template.name_prefix, source.metadata.name),
    )
}

/// Build the descriptor for `source`.
pub fn build(template: &WorkerTemplate, source: &TmSource) -> WorkerDescriptor {
    let labels = BTreeMap::from([(
        template.app_label_key.clone(),
        template.app_label_value.clone(),
    )]);

    let container = Container {
        name: template.container_name.clone(),
        image: template.image.clone(),
        image_pull_policy: template.pull_policy,
        env: vec![
            EnvVar::new(&template.endpoint_env_key, &template.endpoint),
            EnvVar::new(&template.metric_env_key, &source.spec.metric_name),
        ],
    };

    WorkerDescriptor {
        key: worker_key(template, source),
        labels,
        container,
    }
}

impl WorkerDescriptor {
    pub const fn key(&self) -> &NamespacedName {
        &self.key
    }

    /// Whether an observed worker still runs with this environment.
    pub fn matches(&self, observed: &Worker) -> bool {
        observed.spec.container.env == self.container.env
    }

    /// The object to submit to the store.
    pub fn to_worker(&self) -> Worker {
        let mut metadata = ObjectMeta::new(self.key.namespace.clone(), self.key.name.clone());
        metadata.labels = self.labels.clone();
        Worker {
            metadata,
            spec: WorkerSpec {
                container: self.container.clone(),
            },
        }
    }
}
