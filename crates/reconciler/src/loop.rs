//! Continuous reconciliation loop.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::dispatch::{DispatchReport, Dispatcher};
use crate::error::{Error, Result};

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Interval between reconciliation cycles.
    pub interval: Duration,
    /// Maximum consecutive failing cycles before stopping.
    pub max_errors: usize,
    /// Whether to stop on the first failing cycle.
    pub stop_on_error: bool,
    /// Requests handled per cycle at most.
    pub batch: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_errors: 10,
            stop_on_error: false,
            batch: 64,
        }
    }
}

/// Continuous reconciliation loop.
///
/// Drives a [`Dispatcher`] on a fixed interval until stopped.
pub struct ReconciliationLoop {
    dispatcher: Dispatcher,
    config: LoopConfig,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
}

impl ReconciliationLoop {
    /// Create a new reconciliation loop.
    pub fn new(dispatcher: Dispatcher, config: LoopConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            dispatcher,
            config,
            stop_rx,
            stop_tx,
        }
    }

    /// Run the reconciliation loop.
    ///
    /// This runs until stopped or max errors reached.
    ///
    /// # Errors
    ///
    /// Returns an error when `stop_on_error` is set and a cycle fails, or
    /// when `max_errors` consecutive cycles fail.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            interval_ms = self.config.interval.as_millis(),
            "Starting reconciliation loop"
        );

        let mut consecutive_errors = 0usize;
        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.reconcile_once().await;
                    let progressed = report.reconciled > 0 || report.requeued > 0;
                    if report.failed == 0 || progressed {
                        consecutive_errors = 0;
                        if report.idle {
                            debug!("System converged");
                        }
                    } else {
                        consecutive_errors = consecutive_errors.saturating_add(1);
                    }
                    if report.failed > 0 {
                        error!(
                            failed = report.failed,
                            consecutive = consecutive_errors,
                            "Reconciliation errors"
                        );

                        if self.config.stop_on_error {
                            return Err(Error::reconcile_failed(format!(
                                "{} request(s) failed",
                                report.failed
                            )));
                        }

                        if consecutive_errors >= self.config.max_errors {
                            error!("Max errors reached, stopping loop");
                            return Err(Error::reconcile_failed(format!(
                                "Max errors ({}) reached",
                                self.config.max_errors
                            )));
                        }
                    }
                }
                _ = self.stop_rx.changed() => {
                    if *self.stop_rx.borrow() {
                        info!("Reconciliation loop stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run a single reconciliation cycle.
    async fn reconcile_once(&mut self) -> DispatchReport {
        self.dispatcher.run_ready(self.config.batch).await
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::dispatch::DispatcherConfig;
    use crate::reconciler::{Reconcile, ReconcilerBuilder};
    use crate::types::ReconcileOutcome;
    use async_trait::async_trait;
    use rocketlab_core::{
        Client, InMemoryObjectStore, NamespacedName, ObjectRef, ResourceKind, Site, StoreError,
        StoreOp, TmSource, Worker,
    };
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryObjectStore>, Client, Dispatcher) {
        let store = InMemoryObjectStore::new_arc();
        let reconcilers = ReconcilerBuilder::new()
            .with_store(store.clone())
            .build()
            .expect("default config is valid");
        let mut dispatcher = Dispatcher::default().watch(store.subscribe());
        for reconciler in reconcilers.all() {
            dispatcher = dispatcher.register(reconciler);
        }
        (store.clone(), Client::new(store), dispatcher)
    }

    fn config() -> LoopConfig {
        LoopConfig {
            interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    /// Given a store with an enabled site and a bound tmsource
    /// When the loop runs for a few cycles
    /// Then the source's worker should exist
    #[tokio::test]
    async fn loop_converges_created_resources() {
        let (_, client, dispatcher) = setup();
        client.create(Site::new("lab", "S", true)).await.unwrap();
        client
            .create(TmSource::new("lab", "A", "S", "temp"))
            .await
            .unwrap();

        let mut loop_runner = ReconciliationLoop::new(dispatcher, config());
        let stopper = loop_runner.stopper();
        let handle = tokio::spawn(async move { loop_runner.run().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        stopper.stop();
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));

        let worker = client
            .get_opt::<Worker>(&NamespacedName::new("lab", "rocket-source-pod-A"))
            .await
            .unwrap();
        assert!(worker.is_some());
    }

    /// Given a loop that is running
    /// When stop() is called
    /// Then the loop should exit gracefully
    #[tokio::test]
    async fn stop_signal_terminates_loop() {
        let (_, _, dispatcher) = setup();
        let mut loop_runner = ReconciliationLoop::new(
            dispatcher,
            LoopConfig {
                interval: Duration::from_millis(100),
                ..Default::default()
            },
        );
        let stopper = loop_runner.stopper();

        let handle = tokio::spawn(async move { loop_runner.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "Loop should stop within timeout");
        let inner = result.ok().and_then(|r| r.ok());
        assert!(matches!(inner, Some(Ok(()))));
    }

    /// Given a loop configured with stop_on_error=true
    /// When a reconcile fails
    /// Then the loop should return the failure
    #[tokio::test]
    async fn stop_on_error_terminates_on_first_failure() {
        let (store, client, mut dispatcher) = setup();
        client
            .create(TmSource::new("lab", "A", "", "temp"))
            .await
            .unwrap();
        store
            .inject_fault(
                StoreOp::Update,
                ResourceKind::TmSource,
                StoreError::backend("update", "unavailable"),
            )
            .await;
        dispatcher.enqueue(ObjectRef::new(
            ResourceKind::TmSource,
            NamespacedName::new("lab", "A"),
        ));

        let mut loop_runner = ReconciliationLoop::new(
            dispatcher,
            LoopConfig {
                stop_on_error: true,
                ..config()
            },
        );

        let result = tokio::time::timeout(Duration::from_secs(1), loop_runner.run()).await;
        assert!(matches!(result, Ok(Err(Error::ReconcileFailed { .. }))));
    }

    /// Given an empty store
    /// When one cycle runs
    /// Then the report should be idle with no work done
    #[tokio::test]
    async fn empty_system_is_converged() {
        let (_, _, dispatcher) = setup();
        let mut loop_runner = ReconciliationLoop::new(dispatcher, config());

        let report = loop_runner.reconcile_once().await;
        assert!(report.idle);
        assert_eq!(report.steps, 0);
    }

    struct AlwaysFails;

    #[async_trait]
    impl Reconcile for AlwaysFails {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Site
        }

        async fn reconcile(&self, _key: &NamespacedName) -> Result<ReconcileOutcome> {
            Err(Error::reconcile_failed("site backend down"))
        }
    }

    /// Given a reconciler that fails on every attempt
    /// When the loop runs with max_errors=2
    /// Then the loop should stop after two failing cycles
    #[tokio::test]
    async fn max_errors_stops_loop() {
        let mut dispatcher = Dispatcher::new(DispatcherConfig {
            max_attempts: u32::MAX,
            error_backoff: Duration::ZERO,
            ..Default::default()
        })
        .register(Arc::new(AlwaysFails));
        dispatcher.enqueue(ObjectRef::new(
            ResourceKind::Site,
            NamespacedName::new("lab", "S"),
        ));

        let mut loop_runner = ReconciliationLoop::new(
            dispatcher,
            LoopConfig {
                max_errors: 2,
                batch: 1,
                ..config()
            },
        );

        let result = tokio::time::timeout(Duration::from_secs(1), loop_runner.run()).await;
        assert!(matches!(
            &result,
            Ok(Err(Error::ReconcileFailed { reason })) if reason.contains("Max errors (2)")
        ));
    }
}
