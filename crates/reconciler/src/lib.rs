//! Reconcilers that keep telemetry workers in line with sites and sources.
//!
//! Two reconcilers share one object store:
//!
//! - **TmSource**: every source owns exactly one worker, named after it and
//!   carrying its metric. The worker exists only while the source is alive
//!   and bound to an enabled site (or bound to no site at all).
//! - **Site**: cascades its `enabled` flag to the workers of every bound
//!   source, and its deletion to the sources themselves.
//!
//! Both guard deletion with a finalizer so teardown always runs before the
//! store forgets the resource.
//!
//! # Key Concepts
//!
//! ## Reconciliation
//!
//! Each pass reads current state, decides a [`WorkerAction`], and applies
//! it. Passes are idempotent: running one twice against an unchanged store
//! changes nothing the second time.
//!
//! ## Dispatch
//!
//! The [`Dispatcher`] queues `(kind, key)` requests from store change
//! notifications and retries failures. [`ReconciliationLoop`] drives it on
//! an interval.
//!
//! # Example
//!
//! ```ignore
//! use rocketlab_core::{Client, InMemoryObjectStore, Site, TmSource};
//! use rocketlab_reconciler::{Dispatcher, ReconcilerBuilder};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryObjectStore::new_arc();
//!     let reconcilers = ReconcilerBuilder::new()
//!         .with_store(store.clone())
//!         .build()?;
//!
//!     let mut dispatcher = Dispatcher::default().watch(store.subscribe());
//!     for reconciler in reconcilers.all() {
//!         dispatcher = dispatcher.register(reconciler);
//!     }
//!
//!     let client = Client::new(store);
//!     client.create(Site::new("lab", "north", true)).await?;
//!     client.create(TmSource::new("lab", "temp", "north", "temperature")).await?;
//!
//!     let report = dispatcher.run_until_idle(1_000).await;
//!     assert!(report.idle);
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod finalizer;
pub mod r#loop;
pub mod reconciler;
pub mod site;
pub mod tmsource;
pub mod types;
pub mod worker;

// Re-export main types
pub use descriptor::WorkerDescriptor;
pub use dispatch::{DispatchReport, Dispatcher, DispatcherConfig, Step};
pub use error::{Error, Result};
pub use finalizer::FinalizerGate;
pub use r#loop::{LoopConfig, LoopStopper, ReconciliationLoop};
pub use reconciler::{Context, Reconcile, ReconcilerBuilder, Reconcilers};
pub use site::SiteReconciler;
pub use tmsource::TmSourceReconciler;
pub use types::{Convergence, Lifecycle, ReconcileOutcome, SiteLinkage, WorkerAction};
pub use worker::WorkerStore;
