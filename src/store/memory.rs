//! In-memory [`RunStore`] implementation for tests.
//!
//! Uses `BTreeMap`s behind one `std::sync::RwLock`, so a dataset and its
//! resources become visible together.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{DatasetRecord, InfoDataset, Organization, ResourceRecord, Run};

use super::{check_membership, DatasetFilter, ResourceFilter, RunStore};

#[derive(Default)]
struct Inner {
    runs: BTreeMap<i64, Run>,
    organizations: BTreeMap<String, Organization>,
    info_datasets: BTreeMap<String, InfoDataset>,
    datasets: BTreeMap<(i64, String), DatasetRecord>,
    resources: BTreeMap<(i64, String), ResourceRecord>,
}

/// In-memory run store.
#[derive(Default)]
pub struct InMemoryRunStore {
    inner: RwLock<Inner>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn run_range<V: Clone>(
    map: &BTreeMap<(i64, String), V>,
    run_number: i64,
) -> impl Iterator<Item = &V> {
    map.range((run_number, String::new())..)
        .take_while(move |((run, _), _)| *run == run_number)
        .map(|(_, v)| v)
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn latest_run(&self) -> Result<Option<Run>> {
        Ok(self.read()?.runs.values().next_back().cloned())
    }

    async fn begin_run(&self, date: DateTime<Utc>) -> Result<Run> {
        let mut inner = self.write()?;
        let number = inner.runs.keys().next_back().map_or(0, |n| n + 1);
        let run = Run { number, date };
        inner.runs.insert(number, run.clone());
        Ok(run)
    }

    async fn list_runs(&self) -> Result<Vec<Run>> {
        Ok(self.read()?.runs.values().cloned().collect())
    }

    async fn upsert_organization(&self, org: &Organization) -> Result<()> {
        self.write()?
            .organizations
            .insert(org.id.clone(), org.clone());
        Ok(())
    }

    async fn get_organization(&self, id: &str) -> Result<Option<Organization>> {
        Ok(self.read()?.organizations.get(id).cloned())
    }

    async fn count_organizations(&self) -> Result<u64> {
        Ok(self.read()?.organizations.len() as u64)
    }

    async fn upsert_info_dataset(&self, info: &InfoDataset) -> Result<()> {
        self.write()?
            .info_datasets
            .insert(info.id.clone(), info.clone());
        Ok(())
    }

    async fn get_info_dataset(&self, id: &str) -> Result<Option<InfoDataset>> {
        Ok(self.read()?.info_datasets.get(id).cloned())
    }

    async fn count_info_datasets(&self) -> Result<u64> {
        Ok(self.read()?.info_datasets.len() as u64)
    }

    async fn insert_dataset_with_resources(
        &self,
        dataset: &DatasetRecord,
        resources: &[ResourceRecord],
    ) -> Result<()> {
        check_membership(dataset, resources)?;

        let mut inner = self.write()?;
        if !inner.runs.contains_key(&dataset.run_number) {
            bail!("run {} does not exist", dataset.run_number);
        }
        let key = (dataset.run_number, dataset.id.clone());
        if inner.datasets.contains_key(&key) {
            bail!(
                "dataset {} already recorded for run {}",
                dataset.id,
                dataset.run_number
            );
        }
        for r in resources {
            if inner.resources.contains_key(&(r.run_number, r.id.clone())) {
                bail!("resource {} already recorded for run {}", r.id, r.run_number);
            }
        }

        inner.datasets.insert(key, dataset.clone());
        for r in resources {
            inner
                .resources
                .insert((r.run_number, r.id.clone()), r.clone());
        }
        Ok(())
    }

    async fn datasets(
        &self,
        run_number: i64,
        filter: &DatasetFilter,
    ) -> Result<Vec<DatasetRecord>> {
        let inner = self.read()?;
        Ok(run_range(&inner.datasets, run_number)
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    async fn count_datasets(&self, run_number: i64, filter: &DatasetFilter) -> Result<u64> {
        let inner = self.read()?;
        Ok(run_range(&inner.datasets, run_number)
            .filter(|d| filter.matches(d))
            .count() as u64)
    }

    async fn resources(
        &self,
        run_number: i64,
        filter: &ResourceFilter,
    ) -> Result<Vec<ResourceRecord>> {
        let inner = self.read()?;
        Ok(run_range(&inner.resources, run_number)
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn count_resources(&self, run_number: i64, filter: &ResourceFilter) -> Result<u64> {
        let inner = self.read()?;
        Ok(run_range(&inner.resources, run_number)
            .filter(|r| filter.matches(r))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Freshness;
    use crate::whatupdated::{UpdateTag, WhatUpdated};
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 12, 18, 16, 3, 33).unwrap()
    }

    fn dataset(run: i64, id: &str) -> DatasetRecord {
        DatasetRecord {
            run_number: run,
            id: id.to_string(),
            dataset_date: None,
            update_frequency: None,
            last_modified: ts(),
            what_updated: WhatUpdated::from([UpdateTag::Metadata]),
            metadata_modified: ts(),
            fresh: Freshness::Unavailable,
            error: false,
        }
    }

    fn resource(run: i64, id: &str, dataset_id: &str) -> ResourceRecord {
        ResourceRecord {
            run_number: run,
            id: id.to_string(),
            name: id.to_string(),
            dataset_id: dataset_id.to_string(),
            url: format!("https://example.org/{}", id),
            format: None,
            error: None,
            last_modified: ts(),
            what_updated: WhatUpdated::new(),
            revision_last_updated: None,
            http_last_modified: None,
            hash: None,
            when_hashed: None,
            when_checked: ts(),
            api: None,
        }
    }

    #[tokio::test]
    async fn run_numbers_increase_from_zero() {
        let store = InMemoryRunStore::new();
        assert!(store.latest_run().await.unwrap().is_none());
        assert_eq!(store.begin_run(ts()).await.unwrap().number, 0);
        assert_eq!(store.begin_run(ts()).await.unwrap().number, 1);
        assert_eq!(store.latest_run().await.unwrap().unwrap().number, 1);
        assert_eq!(store.list_runs().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn records_are_scoped_by_run() {
        let store = InMemoryRunStore::new();
        store.begin_run(ts()).await.unwrap();
        store.begin_run(ts()).await.unwrap();
        store
            .insert_dataset_with_resources(&dataset(0, "d1"), &[resource(0, "r1", "d1")])
            .await
            .unwrap();
        store
            .insert_dataset_with_resources(&dataset(1, "d1"), &[])
            .await
            .unwrap();

        assert_eq!(store.count_resources(0, &ResourceFilter::default()).await.unwrap(), 1);
        assert_eq!(store.count_resources(1, &ResourceFilter::default()).await.unwrap(), 0);

        let baseline = store.baseline(1).await.unwrap();
        assert_eq!(baseline.run_number(), Some(0));
        assert!(baseline.resource("r1").is_some());
        assert_eq!(store.baseline(0).await.unwrap().resource_count(), 0);
    }

    #[tokio::test]
    async fn orphan_resources_rejected() {
        let store = InMemoryRunStore::new();
        store.begin_run(ts()).await.unwrap();
        let err = store
            .insert_dataset_with_resources(&dataset(0, "d1"), &[resource(0, "r1", "d2")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not belong"));
        assert_eq!(store.count_datasets(0, &DatasetFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_run_rejected() {
        let store = InMemoryRunStore::new();
        assert!(store
            .insert_dataset_with_resources(&dataset(3, "d1"), &[])
            .await
            .is_err());
    }
}
