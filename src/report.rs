//! Run summary counts.
//!
//! Pivots one run's records into:
//!
//! - resources grouped by `what_updated` combination,
//! - datasets grouped by freshness then `what_updated` combination,
//! - the number of datasets with a Live, Never, or Adhoc cadence.
//!
//! Combinations are keyed by their rendered form (`nothing` when empty) and
//! sorted lexicographically; freshness categories sort by ordinal with
//! `Freshness Unavailable` last. The text form is what `fresh run` and
//! `fresh report` print; `--json` prints the serialized [`Counts`].

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use serde::Serialize;

use crate::models::{DatasetRecord, Freshness, ResourceRecord, UpdateFrequency};
use crate::store::{DatasetFilter, ResourceFilter, RunStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub total_resources: usize,
    pub resources: BTreeMap<String, usize>,
    pub total_datasets: usize,
    pub datasets: BTreeMap<Freshness, BTreeMap<String, usize>>,
    pub live: usize,
    pub never: usize,
    pub adhoc: usize,
}

impl Counts {
    /// Datasets in one freshness category, across all combinations.
    pub fn datasets_in(&self, fresh: Freshness) -> usize {
        self.datasets
            .get(&fresh)
            .map_or(0, |combos| combos.values().sum())
    }

    pub fn resources_with(&self, combination: &str) -> usize {
        self.resources.get(combination).copied().unwrap_or(0)
    }
}

/// Count a run's records.
pub fn report(datasets: &[DatasetRecord], resources: &[ResourceRecord]) -> Counts {
    let mut counts = Counts {
        total_resources: resources.len(),
        total_datasets: datasets.len(),
        ..Counts::default()
    };

    for r in resources {
        *counts
            .resources
            .entry(r.what_updated.to_string())
            .or_insert(0) += 1;
    }

    for d in datasets {
        *counts
            .datasets
            .entry(d.fresh)
            .or_default()
            .entry(d.what_updated.to_string())
            .or_insert(0) += 1;

        match d.update_frequency {
            Some(UpdateFrequency::Live) => counts.live += 1,
            Some(UpdateFrequency::Never) => counts.never += 1,
            Some(UpdateFrequency::Adhoc) => counts.adhoc += 1,
            _ => {}
        }
    }

    counts
}

/// Rebuild the counts of a persisted run.
pub async fn report_for_run(store: &dyn RunStore, run_number: i64) -> Result<Counts> {
    let datasets = store.datasets(run_number, &DatasetFilter::default()).await?;
    let resources = store
        .resources(run_number, &ResourceFilter::default())
        .await?;
    Ok(report(&datasets, &resources))
}

impl fmt::Display for Counts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = vec![format!("* total: {} *", self.total_resources)];
        lines.extend(
            self.resources
                .iter()
                .map(|(combo, n)| format!("{}: {}", combo, n)),
        );
        writeln!(f, "*** Resources ***")?;
        writeln!(f, "{}", lines.join(",\n"))?;
        writeln!(f)?;

        let mut lines = vec![format!("* total: {} *", self.total_datasets)];
        for (fresh, combos) in &self.datasets {
            lines.extend(
                combos
                    .iter()
                    .map(|(combo, n)| format!("{}, Updated {}: {}", fresh.label(), combo, n)),
            );
        }
        writeln!(f, "*** Datasets ***")?;
        writeln!(f, "{}", lines.join(",\n"))?;
        writeln!(f)?;

        writeln!(f, "{} datasets have update frequency of Live", self.live)?;
        writeln!(f, "{} datasets have update frequency of Never", self.never)?;
        write!(f, "{} datasets have update frequency of Adhoc", self.adhoc)
    }
}
