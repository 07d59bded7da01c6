//! Site reconciler: cascades a site's enabled flag and its deletion to
//! every TmSource bound to it.
//!
//! Binding is a plain name comparison (`TmSource.spec.site == Site.name`),
//! discovered by scanning the namespace's sources on every pass.

use async_trait::async_trait;
use itertools::Itertools;
use rocketlab_core::{NamespacedName, ResourceKind, Site, TmSource};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::reconciler::{Context, Reconcile};
use crate::types::{Lifecycle, ReconcileOutcome};

pub struct SiteReconciler {
    ctx: Context,
}

impl SiteReconciler {
    pub const fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    fn finalizer(&self) -> &str {
        &self.ctx.config.finalizers.site
    }

    /// Sources whose `site` field names this site.
    async fn bound_sources(&self, site: &Site) -> Result<Vec<TmSource>> {
        let name = site.metadata.name.clone();
        let sources = self
            .ctx
            .client
            .list(&site.metadata.namespace, move |s: &TmSource| s.spec.site == name)
            .await?;
        debug!(
            site = %site.metadata.key(),
            count = sources.len(),
            "Fetched bound tmsources"
        );
        Ok(sources)
    }

    /// Bring every bound source's worker in line with `enabled`.
    ///
    /// Sources that are themselves being deleted are left to their own
    /// teardown. Every source is attempted before failures are reported.
    async fn bootstrap(&self, site: &Site) -> Result<()> {
        let sources = self.bound_sources(site).await?;
        let enabled = site.spec.enabled;
        if enabled {
            info!(site = %site.metadata.key(), "Site is enabled, activating tmsources");
        } else {
            info!(site = %site.metadata.key(), "Site is disabled, deactivating tmsources");
        }

        let (active, deleting): (Vec<_>, Vec<_>) = sources
            .into_iter()
            .partition(|s| !s.metadata.is_deleting());
        if !deleting.is_empty() {
            debug!(
                site = %site.metadata.key(),
                skipped = %deleting.iter().map(|s| s.metadata.name.as_str()).join(","),
                "Skipping tmsources being deleted"
            );
        }

        let mut failures = Vec::new();
        for source in &active {
            let desired = self.ctx.descriptor(source);
            let result = if enabled {
                self.ctx.workers.ensure_present(&desired).await
            } else {
                self.ctx.workers.ensure_absent(desired.key()).await
            };
            if let Err(e) = result {
                warn!(source = %source.metadata.key(), error = %e, "Could not converge worker");
                failures.push((source.metadata.key(), Error::from(e)));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::cascade_failed(site.metadata.key(), &failures))
        }
    }

    /// Request deletion of every bound source.
    ///
    /// Each source's own finalizer keeps it around until its worker is gone;
    /// this pass does not wait for that.
    async fn takedown(&self, site: &Site) -> Result<()> {
        let sources = self.bound_sources(site).await?;

        let mut failures = Vec::new();
        for source in &sources {
            let key = source.metadata.key();
            match self.ctx.client.delete::<TmSource>(&key).await {
                Ok(()) => info!(site = %site.metadata.key(), source = %key, "Deleting TmSource"),
                Err(e) if e.is_not_found() => {
                    debug!(source = %key, "TmSource already gone");
                }
                Err(e) => {
                    warn!(source = %key, error = %e, "Could not delete TmSource");
                    failures.push((key, Error::from(e)));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::cascade_failed(site.metadata.key(), &failures))
        }
    }
}

#[async_trait]
impl Reconcile for SiteReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Site
    }

    async fn reconcile(&self, key: &NamespacedName) -> Result<ReconcileOutcome> {
        let Some(mut site) = self.ctx.client.get_opt::<Site>(key).await? else {
            debug!(site = %key, "Site not found, nothing to do");
            return Ok(ReconcileOutcome::done());
        };

        match Lifecycle::of(&site.metadata, self.finalizer()) {
            Lifecycle::Active => {
                self.ctx
                    .finalizers
                    .register(&mut site, self.finalizer())
                    .await?;
                self.bootstrap(&site).await?;
            }
            Lifecycle::Terminating => {
                self.takedown(&site).await?;
                self.ctx
                    .finalizers
                    .unregister(&mut site, self.finalizer())
                    .await?;
                info!(site = %key, "Site taken down");
            }
            Lifecycle::Gone => {}
        }

        Ok(ReconcileOutcome::done())
    }
}
