//! # Rocketlab - Reconciliation Simulator
//!
//! Runs the Site and TmSource reconcilers against an in-memory object store
//! seeded from a YAML manifest, then prints the workers the system converged
//! to.
//!
//! ```text
//! rocketlab --manifest lab.yaml [--config controller.toml] [--max-steps 10000] [--output yaml|json]
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`). Configuration values
//! may be overridden through `ROCKETLAB_*` environment variables.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use rocketlab_core::{
    Client, ControllerConfig, InMemoryObjectStore, Object, ObjectStore, Resource, Worker,
    load_manifest,
};
use rocketlab_reconciler::{DispatchReport, Dispatcher, ReconcilerBuilder};

/// Rocketlab controller simulator
#[derive(Parser, Debug)]
#[command(name = "rocketlab")]
#[command(version)]
#[command(about = "Converge sites and telemetry sources to workers in memory")]
struct Cli {
    /// YAML manifest of Site and TmSource documents
    #[arg(short, long)]
    manifest: PathBuf,

    /// Controller configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upper bound on reconcile steps
    #[arg(long, default_value_t = 10_000)]
    max_steps: usize,

    /// Output format for the converged workers
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
    output: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Yaml,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    let objects = load_manifest(&cli.manifest)
        .with_context(|| format!("Failed to load manifest {}", cli.manifest.display()))?;
    info!(objects = objects.len(), "Manifest loaded");

    let (workers, report) = simulate(objects, config, cli.max_steps).await?;
    if !report.idle {
        warn!(steps = report.steps, "Step budget exhausted before the system settled");
    }
    info!(
        reconciled = report.reconciled,
        requeued = report.requeued,
        failed = report.failed,
        workers = workers.len(),
        "Simulation finished"
    );

    println!("{}", render(workers, cli.output)?);
    Ok(())
}

fn render(workers: Vec<Worker>, format: OutputFormat) -> Result<String> {
    let objects: Vec<Object> = workers.into_iter().map(Resource::into_object).collect();
    let rendered = match format {
        OutputFormat::Yaml => serde_yaml::to_string(&objects)?,
        OutputFormat::Json => serde_json::to_string_pretty(&objects)?,
    };
    Ok(rendered)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ControllerConfig> {
    let config = match path {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    config
        .with_env()
        .context("Invalid ROCKETLAB_* environment override")
}

/// Seed a fresh store with `objects` and run both reconcilers until idle.
///
/// Returns every worker left in the store, ordered by namespace and name.
async fn simulate(
    objects: Vec<Object>,
    config: ControllerConfig,
    max_steps: usize,
) -> Result<(Vec<Worker>, DispatchReport)> {
    let store = InMemoryObjectStore::new_arc();
    let reconcilers = ReconcilerBuilder::new()
        .with_store(store.clone())
        .with_config(config)
        .build()
        .context("Failed to build reconcilers")?;

    let mut dispatcher = Dispatcher::default().watch(store.subscribe());
    for reconciler in reconcilers.all() {
        dispatcher = dispatcher.register(reconciler);
    }

    let namespaces: BTreeSet<String> = objects
        .iter()
        .map(|o| o.meta().namespace.clone())
        .collect();
    for object in objects {
        let key = object.meta().key();
        store
            .create(object)
            .await
            .with_context(|| format!("Failed to seed {key}"))?;
    }

    let report = dispatcher.run_until_idle(max_steps).await;

    let client = Client::new(Arc::clone(&store) as Arc<dyn ObjectStore>);
    let mut workers = Vec::new();
    for namespace in &namespaces {
        workers.extend(client.list(namespace, |_: &Worker| true).await?);
    }
    Ok((workers, report))
}
