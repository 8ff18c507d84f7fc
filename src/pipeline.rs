//! Run orchestration.
//!
//! One run is a fixed sequence of phases:
//!
//! ```text
//! catalog ─▶ select ─▶ begin run ─▶ baseline ─▶ detect ─▶ aggregate ─▶ persist ─▶ report
//! ```
//!
//! Per-resource failures are data and never abort the run. Only a catalog
//! that cannot be listed or a store that rejects a write does.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::aggregate::aggregate_and_classify;
use crate::catalog::Catalog;
use crate::classify::AgingPolicy;
use crate::config::Config;
use crate::detect::{detect_changes, DetectOptions};
use crate::error::FreshnessError;
use crate::models::{DatasetRecord, ResourceRecord, Run};
use crate::progress::{RunProgressEvent, RunProgressReporter};
use crate::report::{report, Counts};
use crate::selector::{select, ProvenanceRules, Selection};
use crate::store::RunStore;
use crate::transport::Transport;

/// Policy and limits for a run, resolved from config.
pub struct RunSettings {
    pub rules: ProvenanceRules,
    pub aging: AgingPolicy,
    pub workers: usize,
    pub deadline: Option<Duration>,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let rules = ProvenanceRules::new(&config.freshness.internal_hosts)
            .map_err(|e| FreshnessError::config(format!("internal_hosts: {}", e)))?;
        let aging = AgingPolicy::from_config(&config.aging)
            .map_err(|e| FreshnessError::config(e.to_string()))?;
        Ok(Self {
            rules,
            aging,
            workers: config.freshness.workers,
            deadline: config.freshness.run_deadline_secs.map(Duration::from_secs),
        })
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: Run,
    pub datasets: Vec<DatasetRecord>,
    pub resources: Vec<ResourceRecord>,
    pub counts: Counts,
}

/// Execute one run end to end.
pub async fn run_freshness(
    catalog: &dyn Catalog,
    transport: &dyn Transport,
    store: &dyn RunStore,
    settings: &RunSettings,
    forced_hash_ids: &HashSet<String>,
    now: DateTime<Utc>,
    progress: &dyn RunProgressReporter,
) -> Result<RunOutcome> {
    progress.report(RunProgressEvent::Listing {
        catalog: catalog.name().to_string(),
    });
    let snapshot = catalog
        .list_datasets_and_resources(now)
        .await
        .map_err(|e| FreshnessError::catalog(format!("{:#}", e)))?;
    info!(
        catalog = catalog.name(),
        datasets = snapshot.datasets.len(),
        resources = snapshot.resource_count(),
        "catalog listed"
    );

    let selection = select(&snapshot, forced_hash_ids, &settings.rules);
    info!(
        datasets = selection.datasets_to_check.len(),
        resources = selection.resources_to_check.len(),
        network = selection.network_count(),
        "selection complete"
    );

    let run = store.begin_run(now).await.context("Failed to begin run")?;
    let baseline = store
        .baseline(run.number)
        .await
        .context("Failed to load baseline")?;
    info!(
        run = run.number,
        baseline_run = ?baseline.run_number(),
        baseline_resources = baseline.resource_count(),
        "run started"
    );

    let options = DetectOptions {
        run_number: run.number,
        now,
        workers: settings.workers,
        deadline: settings.deadline,
    };
    let resources = detect_changes(
        &selection.resources_to_check,
        &baseline,
        transport,
        &options,
        progress,
    )
    .await;

    let datasets = aggregate_and_classify(
        &selection.datasets_to_check,
        &resources,
        &baseline,
        &settings.aging,
        run.number,
        now,
    );

    persist(store, &run, &selection, &datasets, &resources).await?;

    let counts = report(&datasets, &resources);
    info!(
        run = run.number,
        datasets = counts.total_datasets,
        resources = counts.total_resources,
        "run complete"
    );

    Ok(RunOutcome {
        run,
        datasets,
        resources,
        counts,
    })
}

/// Write a run's results.
///
/// Organizations and dataset descriptions go first, then each dataset with
/// its resources in its own transaction. A failed dataset aborts the
/// remaining writes; datasets already written stay committed.
pub async fn persist(
    store: &dyn RunStore,
    run: &Run,
    selection: &Selection,
    datasets: &[DatasetRecord],
    resources: &[ResourceRecord],
) -> Result<()> {
    let mut by_dataset: HashMap<&str, Vec<ResourceRecord>> = HashMap::new();
    for r in resources {
        by_dataset
            .entry(r.dataset_id.as_str())
            .or_default()
            .push(r.clone());
    }

    let dataset_ids: HashSet<&str> = datasets.iter().map(|d| d.id.as_str()).collect();
    if let Some(orphan) = by_dataset.keys().find(|id| !dataset_ids.contains(*id)) {
        bail!("resources reference dataset {} which is not part of run {}", orphan, run.number);
    }
    if let Some(d) = datasets.iter().find(|d| d.run_number != run.number) {
        bail!("dataset {} belongs to run {}, not run {}", d.id, d.run_number, run.number);
    }

    for org in &selection.organizations {
        store
            .upsert_organization(org)
            .await
            .with_context(|| format!("Failed to persist organization {}", org.id))?;
    }
    for info in &selection.info_datasets {
        store
            .upsert_info_dataset(info)
            .await
            .with_context(|| format!("Failed to persist dataset info {}", info.id))?;
    }

    for d in datasets {
        let rs = by_dataset.remove(d.id.as_str()).unwrap_or_default();
        store
            .insert_dataset_with_resources(d, &rs)
            .await
            .with_context(|| format!("Failed to persist dataset {}", d.id))?;
    }

    info!(run = run.number, datasets = datasets.len(), resources = resources.len(), "run persisted");
    Ok(())
}
