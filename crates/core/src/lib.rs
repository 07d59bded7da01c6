//! Core types for the Rocketlab controller.
//!
//! - **Resources**: `Site`, `TmSource` and the `Worker` materialized for each source
//! - **Store**: the `ObjectStore` seam to the platform, a typed `Client`, and an
//!   in-memory store with platform deletion semantics
//! - **Config**: the immutable `ControllerConfig` shared by every reconciler

#![forbid(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod config;
pub mod error;
pub mod manifest;
pub mod meta;
pub mod resource;
pub mod store;

pub use config::{ControllerConfig, FinalizerNames, MAX_TIMING, TimingConfig, WorkerTemplate};
pub use error::{Error, Result, StoreError, StoreResult};
pub use manifest::{load_manifest, parse_manifest};
pub use meta::{NamespacedName, ObjectMeta};
pub use resource::{
    Container, EnvVar, Object, PullPolicy, Resource, ResourceKind, Site, SiteSpec, TmSource,
    TmSourceSpec, Worker, WorkerSpec,
};
pub use store::{Client, InMemoryObjectStore, ObjectRef, ObjectStore, StoreOp};
