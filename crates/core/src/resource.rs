//! Resource kinds managed by the controller.
//!
//! `Site` and `TmSource` are declared by operators; `Worker` is the
//! single-container runtime unit the controller materializes for each
//! `TmSource`. All three travel through the object store as [`Object`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::meta::{NamespacedName, ObjectMeta};

/// The kinds of object the store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Site,
    TmSource,
    Worker,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Site => "Site",
            Self::TmSource => "TmSource",
            Self::Worker => "Worker",
        };
        f.write_str(name)
    }
}

/// A region that can be switched on and off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: SiteSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSpec {
    #[serde(default)]
    pub enabled: bool,
}

impl Site {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, enabled: bool) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: SiteSpec { enabled },
        }
    }
}

/// One data-collection task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmSource {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: TmSourceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmSourceSpec {
    /// Name of the bound `Site` in the same namespace. Empty means unbound;
    /// a name that resolves to nothing is also treated as unbound.
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub metric_name: String,
}

impl TmSource {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        site: impl Into<String>,
        metric_name: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: TmSourceSpec {
                site: site.into(),
                metric_name: metric_name.into(),
            },
        }
    }

    /// Identity of the `Site` this source points at, if any.
    pub fn site_key(&self) -> Option<NamespacedName> {
        if self.spec.site.is_empty() {
            None
        } else {
            Some(NamespacedName::new(
                self.metadata.namespace.clone(),
                self.spec.site.clone(),
            ))
        }
    }
}

/// Image pull policy of the worker container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullPolicy {
    #[default]
    Always,
    IfNotPresent,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub image_pull_policy: PullPolicy,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

impl Container {
    /// Value of the named environment entry.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }
}

/// The runtime unit backing a `TmSource`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub metadata: ObjectMeta,
    pub spec: WorkerSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub container: Container,
}

/// Any object the store can hold, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Object {
    Site(Site),
    TmSource(TmSource),
    Worker(Worker),
}

impl Object {
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Site(_) => ResourceKind::Site,
            Self::TmSource(_) => ResourceKind::TmSource,
            Self::Worker(_) => ResourceKind::Worker,
        }
    }

    pub const fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Site(site) => &site.metadata,
            Self::TmSource(source) => &source.metadata,
            Self::Worker(worker) => &worker.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Site(site) => &mut site.metadata,
            Self::TmSource(source) => &mut source.metadata,
            Self::Worker(worker) => &mut worker.metadata,
        }
    }
}

/// A typed view over [`Object`].
pub trait Resource: Clone + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn into_object(self) -> Object;

    /// Narrow an untyped object to this kind.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KindMismatch`] when the object is of another kind.
    fn try_from_object(object: Object) -> StoreResult<Self>;

    fn key(&self) -> NamespacedName {
        self.meta().key()
    }
}

macro_rules! impl_resource {
    ($ty:ident) => {
        impl Resource for $ty {
            const KIND: ResourceKind = ResourceKind::$ty;

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }

            fn into_object(self) -> Object {
                Object::$ty(self)
            }

            fn try_from_object(object: Object) -> StoreResult<Self> {
                match object {
                    Object::$ty(inner) => Ok(inner),
                    other => Err(StoreError::KindMismatch {
                        expected: Self::KIND,
                        found: other.kind(),
                    }),
                }
            }
        }
    };
}

impl_resource!(Site);
impl_resource!(TmSource);
impl_resource!(Worker);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_key_empty_means_unbound() {
        let source = TmSource::new("lab", "a", "", "temp");
        assert_eq!(source.site_key(), None);

        let bound = TmSource::new("lab", "b", "north", "temp");
        assert_eq!(bound.site_key(), Some(NamespacedName::new("lab", "north")));
    }

    #[test]
    fn test_kind_mismatch() {
        let object = Site::new("lab", "north", true).into_object();
        let result = TmSource::try_from_object(object);
        assert!(matches!(
            result,
            Err(StoreError::KindMismatch {
                expected: ResourceKind::TmSource,
                found: ResourceKind::Site,
            })
        ));
    }

    #[test]
    fn test_object_manifest_parses_camel_case() {
        let yaml = r"
kind: TmSource
metadata:
  name: a
  namespace: lab
spec:
  site: north
  metricName: temp
";
        let object: Result<Object, _> = serde_yaml::from_str(yaml);
        let source = object.ok().map(TmSource::try_from_object);
        let metric = source.and_then(Result::ok).map(|s| s.spec.metric_name);
        assert_eq!(metric.as_deref(), Some("temp"));
    }
}
