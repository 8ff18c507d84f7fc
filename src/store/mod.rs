//! Run-over-run persistence.
//!
//! The [`RunStore`] trait is the repository for every record a run
//! produces, enabling pluggable backends: [`SqliteRunStore`] for production
//! and [`InMemoryRunStore`] for tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`latest_run`](RunStore::latest_run) | Most recent run, if any |
//! | [`begin_run`](RunStore::begin_run) | Allocate the next run number |
//! | [`list_runs`](RunStore::list_runs) | All runs, oldest first |
//! | [`upsert_organization`](RunStore::upsert_organization) | Organization reference data |
//! | [`upsert_info_dataset`](RunStore::upsert_info_dataset) | Dataset descriptive data |
//! | [`insert_dataset_with_resources`](RunStore::insert_dataset_with_resources) | One dataset and its resources, atomically |
//! | [`datasets`](RunStore::datasets) / [`resources`](RunStore::resources) | Query a run's records by filter |
//! | [`baseline`](RunStore::baseline) | The previous run's records, keyed by id |

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    DatasetRecord, Freshness, InfoDataset, Organization, ResourceRecord, Run,
};
use crate::whatupdated::WhatUpdated;

pub use memory::InMemoryRunStore;
pub use sqlite::SqliteRunStore;

/// Dataset query filter. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetFilter {
    pub fresh: Option<Freshness>,
    /// Exact tag combination.
    pub what_updated: Option<WhatUpdated>,
    pub error: Option<bool>,
}

impl DatasetFilter {
    pub fn matches(&self, record: &DatasetRecord) -> bool {
        self.fresh.map_or(true, |f| record.fresh == f)
            && self
                .what_updated
                .as_ref()
                .map_or(true, |w| &record.what_updated == w)
            && self.error.map_or(true, |e| record.error == e)
    }
}

/// Resource query filter. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceFilter {
    pub dataset_id: Option<String>,
    /// Exact tag combination.
    pub what_updated: Option<WhatUpdated>,
    pub has_error: Option<bool>,
    /// Matches only resources hashed this run with this verdict.
    pub api: Option<bool>,
}

impl ResourceFilter {
    pub fn for_dataset(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: Some(dataset_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &ResourceRecord) -> bool {
        self.dataset_id
            .as_deref()
            .map_or(true, |id| record.dataset_id == id)
            && self
                .what_updated
                .as_ref()
                .map_or(true, |w| &record.what_updated == w)
            && self
                .has_error
                .map_or(true, |e| record.error.is_some() == e)
            && self.api.map_or(true, |a| record.api == Some(a))
    }
}

/// Immutable snapshot of one run's records, keyed by id.
///
/// The change detector and aggregator read the previous run through this
/// type; it is never written during a run.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    run_number: Option<i64>,
    datasets: HashMap<String, DatasetRecord>,
    resources: HashMap<String, ResourceRecord>,
}

impl Baseline {
    /// Baseline for the very first run.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_records(
        run_number: i64,
        datasets: Vec<DatasetRecord>,
        resources: Vec<ResourceRecord>,
    ) -> Self {
        Self {
            run_number: Some(run_number),
            datasets: datasets.into_iter().map(|d| (d.id.clone(), d)).collect(),
            resources: resources.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    /// The run these records belong to; `None` for an empty baseline.
    pub fn run_number(&self) -> Option<i64> {
        self.run_number
    }

    pub fn dataset(&self, id: &str) -> Option<&DatasetRecord> {
        self.datasets.get(id)
    }

    pub fn resource(&self, id: &str) -> Option<&ResourceRecord> {
        self.resources.get(id)
    }

    pub fn dataset_count(&self) -> usize {
        self.datasets.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

/// Repository for runs and their records.
#[async_trait]
pub trait RunStore: Send + Sync {
    // Runs

    async fn latest_run(&self) -> Result<Option<Run>>;

    /// Allocate `latest + 1` (or 0 for an empty store) and record it.
    async fn begin_run(&self, date: DateTime<Utc>) -> Result<Run>;

    async fn list_runs(&self) -> Result<Vec<Run>>;

    // Organizations

    async fn upsert_organization(&self, org: &Organization) -> Result<()>;

    async fn get_organization(&self, id: &str) -> Result<Option<Organization>>;

    async fn count_organizations(&self) -> Result<u64>;

    // Dataset descriptive data

    async fn upsert_info_dataset(&self, info: &InfoDataset) -> Result<()>;

    async fn get_info_dataset(&self, id: &str) -> Result<Option<InfoDataset>>;

    async fn count_info_datasets(&self) -> Result<u64>;

    // Per-run records

    /// Write a dataset and all of its resources in one transaction.
    ///
    /// Every resource must belong to `dataset` and share its run number.
    async fn insert_dataset_with_resources(
        &self,
        dataset: &DatasetRecord,
        resources: &[ResourceRecord],
    ) -> Result<()>;

    /// A run's datasets matching `filter`, ordered by id.
    async fn datasets(&self, run_number: i64, filter: &DatasetFilter)
        -> Result<Vec<DatasetRecord>>;

    async fn count_datasets(&self, run_number: i64, filter: &DatasetFilter) -> Result<u64>;

    /// A run's resources matching `filter`, ordered by id.
    async fn resources(
        &self,
        run_number: i64,
        filter: &ResourceFilter,
    ) -> Result<Vec<ResourceRecord>>;

    async fn count_resources(&self, run_number: i64, filter: &ResourceFilter) -> Result<u64>;

    /// Records of `run_number - 1`; empty for run 0.
    async fn baseline(&self, run_number: i64) -> Result<Baseline> {
        if run_number <= 0 {
            return Ok(Baseline::empty());
        }
        let prior = run_number - 1;
        let datasets = self.datasets(prior, &DatasetFilter::default()).await?;
        let resources = self.resources(prior, &ResourceFilter::default()).await?;
        Ok(Baseline::from_records(prior, datasets, resources))
    }
}

/// Reject resources that would be orphaned by `dataset`.
pub(crate) fn check_membership(dataset: &DatasetRecord, resources: &[ResourceRecord]) -> Result<()> {
    for r in resources {
        if r.dataset_id != dataset.id || r.run_number != dataset.run_number {
            anyhow::bail!(
                "resource {} (run {}, dataset {}) does not belong to dataset {} of run {}",
                r.id,
                r.run_number,
                r.dataset_id,
                dataset.id,
                dataset.run_number
            );
        }
    }
    Ok(())
}
