//! In-process dispatcher.
//!
//! A single-consumer work queue of `(kind, key)` requests fed by store
//! change notifications. One request is reconciled at a time, so the same
//! key is never in flight twice. Errors are retried with a linear backoff
//! up to `max_attempts`; requeue outcomes are scheduled after their delay.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rocketlab_core::{MAX_TIMING, ObjectRef, ResourceKind};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::reconciler::Reconcile;

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Attempts per request before it is dropped.
    pub max_attempts: u32,
    /// Base delay before retrying a failed request; multiplied by the attempt.
    pub error_backoff: Duration,
    /// Longest delay a request is scheduled for, whatever was asked.
    pub max_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            error_backoff: Duration::from_secs(1),
            max_delay: MAX_TIMING,
        }
    }
}

/// What happened to one dequeued request.
#[derive(Debug, Clone)]
pub enum Step {
    Reconciled(ObjectRef),
    Requeued(ObjectRef, Duration),
    Failed {
        request: ObjectRef,
        error: Error,
        retrying: bool,
    },
}

/// Summary of a dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub steps: usize,
    pub reconciled: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Requests dropped after exhausting their attempts.
    pub dropped: usize,
    /// Whether the queue was empty with nothing scheduled when the run ended.
    pub idle: bool,
}

impl DispatchReport {
    fn record(&mut self, step: &Step) {
        self.steps = self.steps.saturating_add(1);
        match step {
            Step::Reconciled(_) => self.reconciled = self.reconciled.saturating_add(1),
            Step::Requeued(..) => self.requeued = self.requeued.saturating_add(1),
            Step::Failed { retrying, .. } => {
                self.failed = self.failed.saturating_add(1);
                if !retrying {
                    self.dropped = self.dropped.saturating_add(1);
                }
            }
        }
    }
}

pub struct Dispatcher {
    reconcilers: HashMap<ResourceKind, Arc<dyn Reconcile>>,
    queue: VecDeque<ObjectRef>,
    queued: HashSet<ObjectRef>,
    delayed: Vec<(Instant, ObjectRef)>,
    attempts: HashMap<ObjectRef, u32>,
    changes: Option<broadcast::Receiver<ObjectRef>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            reconcilers: HashMap::new(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            delayed: Vec::new(),
            attempts: HashMap::new(),
            changes: None,
            config,
        }
    }

    /// Register a reconciler for its kind, replacing any previous one.
    #[must_use]
    pub fn register(mut self, reconciler: Arc<dyn Reconcile>) -> Self {
        self.reconcilers.insert(reconciler.kind(), reconciler);
        self
    }

    /// Feed the queue from store change notifications.
    #[must_use]
    pub fn watch(mut self, changes: broadcast::Receiver<ObjectRef>) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Queue a request. Returns `false` for unhandled kinds and duplicates.
    pub fn enqueue(&mut self, request: ObjectRef) -> bool {
        if !self.reconcilers.contains_key(&request.kind) {
            return false;
        }
        if !self.queued.insert(request.clone()) {
            return false;
        }
        self.queue.push_back(request);
        true
    }

    /// Requests ready to run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Requests waiting for their delay.
    pub fn scheduled(&self) -> usize {
        self.delayed.len()
    }

    fn drain_changes(&mut self) {
        let mut received = Vec::new();
        if let Some(changes) = self.changes.as_mut() {
            loop {
                match changes.try_recv() {
                    Ok(change) => received.push(change),
                    Err(TryRecvError::Lagged(missed)) => {
                        warn!(missed, "Change notifications lagged");
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }
        for change in received {
            self.enqueue(change);
        }
    }

    fn schedule(&mut self, request: ObjectRef, after: Duration) {
        let now = Instant::now();
        let at = now
            .checked_add(after.min(self.config.max_delay))
            .unwrap_or(now);
        self.delayed.push((at, request));
    }

    fn promote_due(&mut self) {
        let now = Instant::now();
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.delayed = later;
        for (_, request) in due {
            self.enqueue(request);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }

    /// Reconcile the request at the head of the queue.
    pub async fn process_next(&mut self) -> Option<Step> {
        let request = self.queue.pop_front()?;
        self.queued.remove(&request);

        let Some(reconciler) = self.reconcilers.get(&request.kind).cloned() else {
            return Some(Step::Failed {
                error: Error::unknown_kind(request.kind),
                request,
                retrying: false,
            });
        };

        debug!(kind = %request.kind, key = %request.key, "Reconciling");
        match reconciler.reconcile(&request.key).await {
            Ok(outcome) => {
                self.attempts.remove(&request);
                match outcome.requeue_after {
                    Some(after) => {
                        self.schedule(request.clone(), after);
                        Some(Step::Requeued(request, after))
                    }
                    None => Some(Step::Reconciled(request)),
                }
            }
            Err(e) => {
                let attempt = {
                    let count = self.attempts.entry(request.clone()).or_insert(0);
                    *count = count.saturating_add(1);
                    *count
                };
                let retrying = attempt < self.config.max_attempts;
                if retrying {
                    if e.is_conflict() {
                        debug!(
                            kind = %request.kind,
                            key = %request.key,
                            attempt,
                            "Stale write, retrying"
                        );
                    } else {
                        warn!(
                            kind = %request.kind,
                            key = %request.key,
                            attempt,
                            error = %e,
                            "Reconcile failed, retrying"
                        );
                    }
                    self.schedule(
                        request.clone(),
                        self.config.error_backoff.saturating_mul(attempt),
                    );
                } else {
                    error!(
                        kind = %request.kind,
                        key = %request.key,
                        attempt,
                        error = %e,
                        "Reconcile failed, giving up"
                    );
                    self.attempts.remove(&request);
                }
                Some(Step::Failed {
                    request,
                    error: e,
                    retrying,
                })
            }
        }
    }

    /// Process requests that are ready now, without waiting for delayed ones.
    pub async fn run_ready(&mut self, max_steps: usize) -> DispatchReport {
        let mut report = DispatchReport::default();
        while report.steps < max_steps {
            self.drain_changes();
            self.promote_due();
            match self.process_next().await {
                Some(step) => report.record(&step),
                None => break,
            }
        }
        self.drain_changes();
        report.idle = self.queue.is_empty() && self.delayed.is_empty();
        report
    }

    /// Process until nothing is queued or scheduled, sleeping through
    /// delays, or until `max_steps` requests have been handled.
    pub async fn run_until_idle(&mut self, max_steps: usize) -> DispatchReport {
        let mut report = DispatchReport::default();
        loop {
            self.drain_changes();
            self.promote_due();

            if self.queue.is_empty() {
                match self.next_deadline() {
                    Some(at) if report.steps < max_steps => {
                        tokio::time::sleep_until(at).await;
                        continue;
                    }
                    Some(_) => break,
                    None => {
                        report.idle = true;
                        break;
                    }
                }
            }

            if report.steps >= max_steps {
                break;
            }
            if let Some(step) = self.process_next().await {
                report.record(&step);
            }
        }
        report
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::types::ReconcileOutcome;
    use async_trait::async_trait;
    use rocketlab_core::NamespacedName;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails a fixed number of times, then succeeds; optionally requeues once.
    struct Scripted {
        failures_left: AtomicU32,
        requeues_left: AtomicU32,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(failures: u32, requeues: u32) -> Arc<Self> {
            Arc::new(Self {
                failures_left: AtomicU32::new(failures),
                requeues_left: AtomicU32::new(requeues),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Reconcile for Scripted {
        fn kind(&self) -> ResourceKind {
            ResourceKind::TmSource
        }

        async fn reconcile(&self, _key: &NamespacedName) -> Result<ReconcileOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::reconcile_failed("scripted failure"));
            }
            if self
                .requeues_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Ok(ReconcileOutcome::requeue(Duration::from_secs(5)));
            }
            Ok(ReconcileOutcome::done())
        }
    }

    fn request(name: &str) -> ObjectRef {
        ObjectRef::new(ResourceKind::TmSource, NamespacedName::new("lab", name))
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates_and_filters_kinds() {
        let mut dispatcher = Dispatcher::default().register(Scripted::new(0, 0));
        assert!(dispatcher.enqueue(request("a")));
        assert!(!dispatcher.enqueue(request("a")));
        assert!(!dispatcher.enqueue(ObjectRef::new(
            ResourceKind::Worker,
            NamespacedName::new("lab", "w")
        )));
        assert_eq!(dispatcher.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_retried_until_success() {
        let reconciler = Scripted::new(2, 0);
        let mut dispatcher = Dispatcher::default().register(reconciler.clone());
        dispatcher.enqueue(request("a"));

        let report = dispatcher.run_until_idle(100).await;
        assert!(report.idle);
        assert_eq!(report.failed, 2);
        assert_eq!(report.reconciled, 1);
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_error_is_dropped() {
        let reconciler = Scripted::new(u32::MAX, 0);
        let config = DispatcherConfig {
            max_attempts: 3,
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::new(config).register(reconciler.clone());
        dispatcher.enqueue(request("a"));

        let report = dispatcher.run_until_idle(100).await;
        assert!(report.idle);
        assert_eq!(report.failed, 3);
        assert_eq!(report.dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_waits_for_delay() {
        let reconciler = Scripted::new(0, 1);
        let mut dispatcher = Dispatcher::default().register(reconciler.clone());
        dispatcher.enqueue(request("a"));

        let ready = dispatcher.run_ready(10).await;
        assert_eq!(ready.requeued, 1);
        assert!(!ready.idle);
        assert_eq!(dispatcher.scheduled(), 1);

        let started = Instant::now();
        let report = dispatcher.run_until_idle(10).await;
        assert!(report.idle);
        assert_eq!(report.reconciled, 1);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    struct RequeueForever(Duration);

    #[async_trait]
    impl Reconcile for RequeueForever {
        fn kind(&self) -> ResourceKind {
            ResourceKind::TmSource
        }

        async fn reconcile(&self, _key: &NamespacedName) -> Result<ReconcileOutcome> {
            Ok(ReconcileOutcome::requeue(self.0))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delays_are_clamped() {
        let config = DispatcherConfig {
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };
        let mut dispatcher =
            Dispatcher::new(config).register(Arc::new(RequeueForever(Duration::MAX)));
        dispatcher.enqueue(request("a"));

        let started = Instant::now();
        let ready = dispatcher.run_ready(1).await;
        assert_eq!(ready.requeued, 1);
        assert_eq!(dispatcher.scheduled(), 1);
        assert_eq!(
            dispatcher.next_deadline(),
            started.checked_add(Duration::from_secs(60))
        );

        let report = dispatcher.run_until_idle(2).await;
        assert_eq!(report.requeued, 2);
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_saturates_on_huge_base() {
        let config = DispatcherConfig {
            error_backoff: Duration::MAX,
            max_delay: Duration::from_secs(30),
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::new(config).register(Scripted::new(2, 0));
        dispatcher.enqueue(request("a"));

        let report = dispatcher.run_until_idle(10).await;
        assert!(report.idle);
        assert_eq!(report.failed, 2);
        assert_eq!(report.reconciled, 1);
    }

    #[tokio::test]
    async fn test_step_budget_bounds_run() {
        let mut dispatcher = Dispatcher::default().register(Scripted::new(0, 0));
        for name in ["a", "b", "c"] {
            dispatcher.enqueue(request(name));
        }
        let report = dispatcher.run_until_idle(2).await;
        assert_eq!(report.steps, 2);
        assert!(!report.idle);
        assert_eq!(dispatcher.pending(), 1);
    }

    #[tokio::test]
    async fn test_changes_feed_the_queue() {
        let (tx, rx) = broadcast::channel(16);
        let reconciler = Scripted::new(0, 0);
        let mut dispatcher = Dispatcher::default().register(reconciler.clone()).watch(rx);

        tx.send(request("a")).unwrap();
        tx.send(request("a")).unwrap();
        tx.send(request("b")).unwrap();

        let report = dispatcher.run_until_idle(10).await;
        assert_eq!(report.reconciled, 2);
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 2);
    }
}
