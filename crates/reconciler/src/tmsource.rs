//! TmSource reconciler: converges one worker toward its source and the
//! enabled flag of the bound site.

use async_trait::async_trait;
use rocketlab_core::{NamespacedName, ResourceKind, Site, TmSource, Worker};
use tracing::{debug, info, warn};

use crate::descriptor::WorkerDescriptor;
use crate::error::Result;
use crate::reconciler::{Context, Reconcile};
use crate::types::{Convergence, Lifecycle, ReconcileOutcome, SiteLinkage, WorkerAction};

/// Decide what to do with the worker of one source.
///
/// | linkage          | observed | matches | action  |
/// |------------------|----------|---------|---------|
/// | unbound/enabled  | absent   |         | Create  |
/// | unbound/enabled  | present  | yes     | Keep    |
/// | unbound/enabled  | present  | no      | Replace |
/// | disabled         | present  |         | Delete  |
/// | disabled         | absent   |         | Nothing |
pub fn plan(
    linkage: SiteLinkage,
    observed: Option<&Worker>,
    desired: &WorkerDescriptor,
) -> WorkerAction {
    match (linkage.wants_worker(), observed) {
        (true, None) => WorkerAction::Create,
        (true, Some(worker)) if desired.matches(worker) => WorkerAction::Keep,
        (true, Some(_)) => WorkerAction::Replace,
        (false, Some(_)) => WorkerAction::Delete,
        (false, None) => WorkerAction::Nothing,
    }
}

pub struct TmSourceReconciler {
    ctx: Context,
}

impl TmSourceReconciler {
    pub const fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    fn finalizer(&self) -> &str {
        &self.ctx.config.finalizers.tmsource
    }

    /// Resolve the bound site. A missing site is not an error.
    async fn linkage(&self, source: &TmSource) -> Result<SiteLinkage> {
        let Some(site_key) = source.site_key() else {
            return Ok(SiteLinkage::Unbound);
        };

        let site = self.ctx.client.get_opt::<Site>(&site_key).await?;
        if site.is_none() {
            debug!(source = %source.metadata.key(), site = %site_key, "No site linked to the source");
        }
        Ok(SiteLinkage::of(site.as_ref()))
    }

    /// Converge the worker of an active source.
    async fn bootstrap(&self, source: &TmSource) -> Result<Convergence> {
        let linkage = self.linkage(source).await?;
        let desired = self.ctx.descriptor(source);
        let observed = self.ctx.workers.get(desired.key()).await?;
        let action = plan(linkage, observed.as_ref(), &desired);

        debug!(
            source = %source.metadata.key(),
            worker = %desired.key(),
            linkage = ?linkage,
            action = action.description(),
            "Planned worker action"
        );

        match action {
            WorkerAction::Create => {
                self.create_worker(&desired).await?;
                Ok(Convergence::Converged)
            }
            WorkerAction::Replace => self.replace_worker(&desired).await,
            WorkerAction::Delete => {
                self.ctx.workers.delete(desired.key()).await?;
                Ok(Convergence::Converged)
            }
            WorkerAction::Keep | WorkerAction::Nothing => Ok(Convergence::Converged),
        }
    }

    async fn create_worker(&self, desired: &WorkerDescriptor) -> Result<()> {
        match self.ctx.workers.create(desired.to_worker()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => {
                warn!(worker = %desired.key(), "Worker already exists, leaving it in place");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the drifted worker, wait for it to go, then recreate it.
    async fn replace_worker(&self, desired: &WorkerDescriptor) -> Result<Convergence> {
        info!(worker = %desired.key(), "Worker environment drifted, replacing");
        self.ctx.workers.delete(desired.key()).await?;

        let timing = &self.ctx.config.timing;
        let gone = self
            .ctx
            .workers
            .wait_for_absence(
                desired.key(),
                timing.termination_poll_interval,
                timing.termination_polls(),
            )
            .await?;

        if !gone {
            warn!(
                worker = %desired.key(),
                waited_secs = timing.termination_wait_max.as_secs(),
                "Worker still terminating, requeueing"
            );
            return Ok(Convergence::Requeue);
        }

        self.create_worker(desired).await?;
        Ok(Convergence::Converged)
    }

    /// Tear down the worker of a terminating source.
    async fn takedown(&self, source: &TmSource) -> Result<()> {
        let key = crate::descriptor::worker_key(&self.ctx.config.worker, source);
        self.ctx.workers.delete(&key).await?;
        Ok(())
    }
}

#[async_trait]
impl Reconcile for TmSourceReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::TmSource
    }

    async fn reconcile(&self, key: &NamespacedName) -> Result<ReconcileOutcome> {
        let Some(mut source) = self.ctx.client.get_opt::<TmSource>(key).await? else {
            debug!(source = %key, "TmSource not found, nothing to do");
            return Ok(ReconcileOutcome::done());
        };

        match Lifecycle::of(&source.metadata, self.finalizer()) {
            Lifecycle::Active => {
                self.ctx
                    .finalizers
                    .register(&mut source, self.finalizer())
                    .await?;
                match self.bootstrap(&source).await? {
                    Convergence::Converged => Ok(ReconcileOutcome::done()),
                    Convergence::Requeue => Ok(ReconcileOutcome::requeue(
                        self.ctx.config.timing.requeue_delay,
                    )),
                }
            }
            Lifecycle::Terminating => {
                // The finalizer may only go once the delete went through.
                self.takedown(&source).await?;
                self.ctx
                    .finalizers
                    .unregister(&mut source, self.finalizer())
                    .await?;
                info!(source = %key, "TmSource torn down");
                Ok(ReconcileOutcome::done())
            }
            Lifecycle::Gone => Ok(ReconcileOutcome::done()),
        }
    }
}
