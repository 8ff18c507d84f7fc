use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use data_freshness::catalog::{Catalog, CatalogDataset, CatalogResource, CatalogSnapshot};
use data_freshness::classify::AgingPolicy;
use data_freshness::error::TransportError;
use data_freshness::models::{DatasetRecord, Freshness, InfoDataset, Organization, ResourceRecord, Run};
use data_freshness::pipeline::{run_freshness, RunSettings};
use data_freshness::progress::NoProgress;
use data_freshness::report::report_for_run;
use data_freshness::selector::ProvenanceRules;
use data_freshness::store::{DatasetFilter, InMemoryRunStore, ResourceFilter, RunStore};
use data_freshness::transport::Transport;
use data_freshness::whatupdated::{UpdateTag, WhatUpdated};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 12, 18, 16, 3, 33).unwrap()
}

/// How the scripted transport answers for one URL.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Behavior {
    /// No Last-Modified, stable content.
    Quiet,
    /// Every request fails.
    Down,
    /// Fixed Last-Modified, stable content.
    Header(DateTime<Utc>),
    /// Content differs on every fetch.
    Generated,
    /// Requests never finish in time.
    Slow,
}

#[derive(Default)]
struct ScriptedTransport {
    behaviors: HashMap<String, Behavior>,
    fetches: AtomicUsize,
}

impl ScriptedTransport {
    fn behavior(&self, url: &str) -> Behavior {
        self.behaviors.get(url).copied().unwrap_or(Behavior::Quiet)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn last_modified(&self, url: &str) -> Result<Option<DateTime<Utc>>, TransportError> {
        match self.behavior(url) {
            Behavior::Down => Err(TransportError::Status(503)),
            Behavior::Header(ts) => Ok(Some(ts)),
            Behavior::Slow => {
                tokio::time::sleep(StdDuration::from_secs(10)).await;
                Ok(None)
            }
            Behavior::Quiet | Behavior::Generated => Ok(None),
        }
    }

    async fn digest(&self, url: &str) -> Result<String, TransportError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.behavior(url) {
            Behavior::Down => Err(TransportError::Timeout(30)),
            Behavior::Generated => Ok(format!("{}#{}", url, n)),
            Behavior::Slow => {
                tokio::time::sleep(StdDuration::from_secs(10)).await;
                Ok(url.to_string())
            }
            Behavior::Quiet | Behavior::Header(_) => Ok(format!("stable:{}", url)),
        }
    }
}

struct StaticCatalog(CatalogSnapshot);

#[async_trait]
impl Catalog for StaticCatalog {
    fn name(&self) -> &str {
        "static"
    }

    async fn list_datasets_and_resources(&self, _as_of: DateTime<Utc>) -> Result<CatalogSnapshot> {
        Ok(self.0.clone())
    }
}

struct BrokenCatalog;

#[async_trait]
impl Catalog for BrokenCatalog {
    fn name(&self) -> &str {
        "broken"
    }

    async fn list_datasets_and_resources(&self, _as_of: DateTime<Utc>) -> Result<CatalogSnapshot> {
        anyhow::bail!("catalog API returned 502")
    }
}

fn resource(id: &str, url: &str, rev: DateTime<Utc>) -> CatalogResource {
    CatalogResource {
        id: id.to_string(),
        name: format!("{}.csv", id),
        format: Some("CSV".to_string()),
        url: url.to_string(),
        revision_last_updated: Some(rev),
        last_modified: None,
    }
}

fn dataset(id: &str, frequency: Option<&str>, modified: DateTime<Utc>) -> CatalogDataset {
    CatalogDataset {
        id: id.to_string(),
        name: id.to_string(),
        title: id.to_string(),
        private: false,
        organization: "hdx".to_string(),
        maintainer: None,
        maintainer_email: None,
        author: None,
        author_email: None,
        location: None,
        dataset_date: None,
        data_update_frequency: frequency.map(str::to_string),
        metadata_modified: modified,
        updated_by_script: None,
        resources: Vec::new(),
    }
}

fn settings() -> RunSettings {
    RunSettings {
        rules: ProvenanceRules::new(&[
            "data.humdata.org".to_string(),
            "*.data.humdata.org".to_string(),
        ])
        .unwrap(),
        aging: AgingPolicy::default(),
        workers: 8,
        deadline: None,
    }
}

fn external(id: &str) -> String {
    format!("https://example.org/files/{}.csv", id)
}

fn internal(id: &str) -> String {
    format!("https://data.humdata.org/dataset/x/resource/{}/download/{}.csv", id, id)
}

// ---------------------------------------------------------------------------
// Scaled scenario
// ---------------------------------------------------------------------------

struct Scenario {
    catalog: CatalogSnapshot,
    transport: ScriptedTransport,
    forced: HashSet<String>,
}

/// 103 datasets and 660 resources shaped like a production run:
/// the same mix of change reasons and freshness categories.
///
/// Every resource revision equals its dataset's `metadata_modified`, so a
/// resource only moves its dataset when a newer signal arrives. Header
/// resources report a `Last-Modified` one hour after the metadata.
fn scenario() -> Scenario {
    let mut transport = ScriptedTransport::default();
    let mut forced = HashSet::new();
    let day_old = now() - Duration::days(1);

    // Four fresh datasets are maintained by an upstream script
    let mut adhoc = Vec::new();
    for i in 0..4 {
        let mut d = dataset(&format!("adhoc-{}", i), Some("7"), day_old);
        d.updated_by_script = Some("upstream scraper".to_string());
        for j in 0..11 {
            let id = format!("adhoc-{}-{:02}", i, j);
            let url = external(&id);
            d.resources.push(resource(&id, &url, d.metadata_modified));
        }
        adhoc.push(d);
    }

    let mut others = Vec::new();
    for i in 0..36 {
        others.push(dataset(&format!("fresh-{:02}", i), Some("7"), day_old));
    }
    for i in 0..15 {
        others.push(dataset(&format!("live-{:02}", i), Some("0"), now() - Duration::days(400)));
    }
    for i in 0..19 {
        others.push(dataset(&format!("never-{:02}", i), Some("-1"), now() - Duration::days(400)));
    }
    for i in 0..4 {
        others.push(dataset(&format!("unknown-{:02}", i), None, now() - Duration::days(10)));
    }
    others.push(dataset("overdue-00", Some("1"), now() - Duration::days(2) - Duration::hours(1)));
    let delinquent = others.len();
    for i in 0..24 {
        others.push(dataset(&format!("delinquent-{:02}", i), Some("30"), now() - Duration::days(90)));
    }
    assert_eq!(others.len(), 99);

    // Header resources land in eight fresh datasets and one delinquent one;
    // failing resources are confined to five delinquent datasets.
    let everywhere: Vec<usize> = (0..others.len()).collect();
    let header_targets: Vec<usize> = (0..8).chain([delinquent + 5]).collect();
    let error_targets: Vec<usize> = (delinquent..delinquent + 5).collect();
    let kinds: [(&str, usize, &[usize]); 6] = [
        ("forced-hash", 8, everywhere.as_slice()),
        ("forced-api", 4, everywhere.as_slice()),
        ("plain", 508, everywhere.as_slice()),
        ("down", 27, error_targets.as_slice()),
        ("header", 13, header_targets.as_slice()),
        ("internal", 56, everywhere.as_slice()),
    ];
    for (kind, count, targets) in kinds {
        for j in 0..count {
            let id = format!("{}-{:03}", kind, j);
            let url = if kind == "internal" { internal(&id) } else { external(&id) };
            let d = &mut others[targets[j % targets.len()]];
            let rev = d.metadata_modified;
            match kind {
                "forced-hash" => {
                    forced.insert(id.clone());
                }
                "forced-api" => {
                    forced.insert(id.clone());
                    transport.behaviors.insert(url.clone(), Behavior::Generated);
                }
                "down" => {
                    transport.behaviors.insert(url.clone(), Behavior::Down);
                }
                "header" => {
                    transport
                        .behaviors
                        .insert(url.clone(), Behavior::Header(rev + Duration::hours(1)));
                }
                _ => {}
            }
            d.resources.push(resource(&id, &url, rev));
        }
    }

    let mut datasets = adhoc;
    datasets.extend(others);
    Scenario {
        catalog: CatalogSnapshot {
            organizations: vec![],
            datasets,
        },
        transport,
        forced,
    }
}

fn combos(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[tokio::test]
async fn scaled_scenario_first_run() {
    let s = scenario();
    assert_eq!(s.catalog.datasets.len(), 103);
    assert_eq!(s.catalog.resource_count(), 660);

    let store = InMemoryRunStore::new();
    let outcome = run_freshness(
        &StaticCatalog(s.catalog),
        &s.transport,
        &store,
        &settings(),
        &s.forced,
        now(),
        &NoProgress,
    )
    .await
    .unwrap();

    let counts = &outcome.counts;
    assert_eq!(outcome.run.number, 0);
    assert_eq!(counts.total_resources, 660);
    assert_eq!(
        counts.resources,
        combos(&[
            ("revision", 508),
            ("revision,error", 27),
            ("revision,http header", 13),
            ("revision,hash", 8),
            ("internal-revision", 56),
            ("adhoc-revision", 44),
            ("revision,api", 4),
        ])
    );

    assert_eq!(counts.total_datasets, 103);
    assert_eq!(counts.datasets_in(Freshness::Fresh), 74);
    assert_eq!(counts.datasets_in(Freshness::Due), 0);
    assert_eq!(counts.datasets_in(Freshness::Overdue), 1);
    assert_eq!(counts.datasets_in(Freshness::Delinquent), 24);
    assert_eq!(counts.datasets_in(Freshness::Unavailable), 4);
    assert_eq!((counts.live, counts.never, counts.adhoc), (15, 19, 0));

    // Only resources newer than their dataset carry their reasons over;
    // failures always do.
    assert_eq!(
        counts.datasets[&Freshness::Fresh],
        combos(&[("metadata", 66), ("metadata,revision,http header", 8)])
    );
    assert_eq!(counts.datasets[&Freshness::Overdue], combos(&[("metadata", 1)]));
    assert_eq!(
        counts.datasets[&Freshness::Delinquent],
        combos(&[
            ("metadata", 18),
            ("metadata,error", 5),
            ("metadata,revision,http header", 1),
        ])
    );
    assert_eq!(counts.datasets[&Freshness::Unavailable], combos(&[("metadata", 4)]));

    // Every dataset and resource lands in exactly one row
    assert_eq!(counts.resources.values().sum::<usize>(), 660);
    let dataset_rows: usize = counts.datasets.values().flat_map(|c| c.values()).sum();
    assert_eq!(dataset_rows, 103);

    // Persisted state rebuilds the same counts
    assert_eq!(&report_for_run(&store, 0).await.unwrap(), counts);
    assert_eq!(store.count_organizations().await.unwrap(), 1);
    assert_eq!(store.count_info_datasets().await.unwrap(), 103);
}

#[tokio::test]
async fn scaled_scenario_second_run_is_quiet() {
    let s = scenario();
    let store = InMemoryRunStore::new();
    let catalog = StaticCatalog(s.catalog);

    run_freshness(&catalog, &s.transport, &store, &settings(), &s.forced, now(), &NoProgress)
        .await
        .unwrap();
    let second = run_freshness(
        &catalog,
        &s.transport,
        &store,
        &settings(),
        &HashSet::new(),
        now() + Duration::hours(1),
        &NoProgress,
    )
    .await
    .unwrap();

    assert_eq!(second.run.number, 1);
    assert_eq!(
        second.counts.resources,
        combos(&[("nothing", 629), ("error", 27), ("api", 4)])
    );
    // Metadata did not move, so only resource reasons remain
    let metadata_rows: usize = second
        .datasets
        .iter()
        .filter(|d| d.what_updated.contains(UpdateTag::Metadata))
        .count();
    assert_eq!(metadata_rows, 0);
    assert_eq!(
        second.counts.datasets[&Freshness::Delinquent],
        combos(&[("nothing", 19), ("error", 5)])
    );
}

// ---------------------------------------------------------------------------
// Focused behaviors
// ---------------------------------------------------------------------------

fn small_catalog() -> CatalogSnapshot {
    let modified = now() - Duration::days(3);
    let mut d1 = dataset("d1", Some("7"), modified);
    d1.resources.push(resource("ok", &external("ok"), modified));
    d1.resources.push(resource("down", &external("down"), modified));
    let mut d2 = dataset("d2", Some("1"), modified);
    d2.resources.push(resource("int", &internal("int"), modified));
    CatalogSnapshot {
        organizations: vec![],
        datasets: vec![d1, d2],
    }
}

#[tokio::test]
async fn failing_resource_does_not_affect_others() {
    let mut transport = ScriptedTransport::default();
    transport.behaviors.insert(external("down"), Behavior::Down);
    let store = InMemoryRunStore::new();

    let outcome = run_freshness(
        &StaticCatalog(small_catalog()),
        &transport,
        &store,
        &settings(),
        &HashSet::new(),
        now(),
        &NoProgress,
    )
    .await
    .unwrap();

    let by_id: HashMap<&str, &ResourceRecord> =
        outcome.resources.iter().map(|r| (r.id.as_str(), r)).collect();
    assert_eq!(by_id["down"].error.as_deref(), Some("HTTP status 503"));
    assert!(by_id["ok"].error.is_none());
    assert!(by_id["int"].error.is_none());

    let d1 = outcome.datasets.iter().find(|d| d.id == "d1").unwrap();
    let d2 = outcome.datasets.iter().find(|d| d.id == "d2").unwrap();
    assert!(d1.error);
    assert!(!d2.error);

    let errored = store
        .count_resources(
            0,
            &ResourceFilter {
                has_error: Some(true),
                ..ResourceFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(errored, 1);
}

#[tokio::test]
async fn forced_hash_sets_when_hashed() {
    let transport = ScriptedTransport::default();
    let store = InMemoryRunStore::new();
    let catalog = StaticCatalog(small_catalog());
    let forced: HashSet<String> = ["int".to_string()].into();

    run_freshness(&catalog, &transport, &store, &settings(), &HashSet::new(), now(), &NoProgress)
        .await
        .unwrap();
    let later = now() + Duration::hours(2);
    let outcome = run_freshness(&catalog, &transport, &store, &settings(), &forced, later, &NoProgress)
        .await
        .unwrap();

    let int = outcome.resources.iter().find(|r| r.id == "int").unwrap();
    assert_eq!(int.when_hashed, Some(later));
    assert_eq!(int.api, Some(false));
    // No prior digest: hashing only establishes the baseline
    assert!(int.what_updated.is_empty());
}

#[tokio::test]
async fn unchanged_resources_keep_last_modified() {
    let transport = ScriptedTransport::default();
    let store = InMemoryRunStore::new();
    let catalog = StaticCatalog(small_catalog());

    let first = run_freshness(&catalog, &transport, &store, &settings(), &HashSet::new(), now(), &NoProgress)
        .await
        .unwrap();
    let second = run_freshness(
        &catalog,
        &transport,
        &store,
        &settings(),
        &HashSet::new(),
        now() + Duration::days(1),
        &NoProgress,
    )
    .await
    .unwrap();

    for (a, b) in first.resources.iter().zip(&second.resources) {
        assert_eq!(a.id, b.id);
        assert!(b.what_updated.is_empty(), "{} changed: {}", b.id, b.what_updated);
        assert_eq!(a.last_modified, b.last_modified);
    }
    // d2 is daily and three days old: delinquent both times
    let d2 = second.datasets.iter().find(|d| d.id == "d2").unwrap();
    assert_eq!(d2.fresh, Freshness::Delinquent);
}

#[tokio::test]
async fn deadline_records_unfinished_resources() {
    let mut transport = ScriptedTransport::default();
    transport.behaviors.insert(external("ok"), Behavior::Slow);
    transport.behaviors.insert(external("down"), Behavior::Slow);
    let store = InMemoryRunStore::new();
    let mut settings = settings();
    settings.deadline = Some(StdDuration::from_millis(100));

    let outcome = run_freshness(
        &StaticCatalog(small_catalog()),
        &transport,
        &store,
        &settings,
        &HashSet::new(),
        now(),
        &NoProgress,
    )
    .await
    .unwrap();

    let ok = outcome.resources.iter().find(|r| r.id == "ok").unwrap();
    assert_eq!(ok.error.as_deref(), Some("run deadline exceeded"));
    assert_eq!(ok.what_updated.to_column(), "revision,error");

    let int = outcome.resources.iter().find(|r| r.id == "int").unwrap();
    assert!(int.error.is_none());

    // Partial results are still persisted
    assert_eq!(store.count_resources(0, &ResourceFilter::default()).await.unwrap(), 3);
}

#[tokio::test]
async fn catalog_failure_aborts_before_run() {
    let store = InMemoryRunStore::new();
    let err = run_freshness(
        &BrokenCatalog,
        &ScriptedTransport::default(),
        &store,
        &settings(),
        &HashSet::new(),
        now(),
        &NoProgress,
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("Catalog error"));
    assert!(store.latest_run().await.unwrap().is_none());
}

#[tokio::test]
async fn dataset_filters_select_by_freshness() {
    let store = InMemoryRunStore::new();
    run_freshness(
        &StaticCatalog(small_catalog()),
        &ScriptedTransport::default(),
        &store,
        &settings(),
        &HashSet::new(),
        now(),
        &NoProgress,
    )
    .await
    .unwrap();

    let delinquent = store
        .datasets(
            0,
            &DatasetFilter {
                fresh: Some(Freshness::Delinquent),
                ..DatasetFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(delinquent.len(), 1);
    assert_eq!(delinquent[0].id, "d2");

    let d1_resources = store
        .resources(0, &ResourceFilter::for_dataset("d1"))
        .await
        .unwrap();
    assert_eq!(d1_resources.len(), 2);
}

/// Store that rejects one dataset and delegates everything else.
struct RejectingStore {
    inner: InMemoryRunStore,
    reject: String,
}

#[async_trait]
impl RunStore for RejectingStore {
    async fn latest_run(&self) -> Result<Option<Run>> {
        self.inner.latest_run().await
    }
    async fn begin_run(&self, date: DateTime<Utc>) -> Result<Run> {
        self.inner.begin_run(date).await
    }
    async fn list_runs(&self) -> Result<Vec<Run>> {
        self.inner.list_runs().await
    }
    async fn upsert_organization(&self, org: &Organization) -> Result<()> {
        self.inner.upsert_organization(org).await
    }
    async fn get_organization(&self, id: &str) -> Result<Option<Organization>> {
        self.inner.get_organization(id).await
    }
    async fn count_organizations(&self) -> Result<u64> {
        self.inner.count_organizations().await
    }
    async fn upsert_info_dataset(&self, info: &InfoDataset) -> Result<()> {
        self.inner.upsert_info_dataset(info).await
    }
    async fn get_info_dataset(&self, id: &str) -> Result<Option<InfoDataset>> {
        self.inner.get_info_dataset(id).await
    }
    async fn count_info_datasets(&self) -> Result<u64> {
        self.inner.count_info_datasets().await
    }
    async fn insert_dataset_with_resources(
        &self,
        dataset: &DatasetRecord,
        resources: &[ResourceRecord],
    ) -> Result<()> {
        if dataset.id == self.reject {
            anyhow::bail!("disk I/O error");
        }
        self.inner.insert_dataset_with_resources(dataset, resources).await
    }
    async fn datasets(&self, run: i64, filter: &DatasetFilter) -> Result<Vec<DatasetRecord>> {
        self.inner.datasets(run, filter).await
    }
    async fn count_datasets(&self, run: i64, filter: &DatasetFilter) -> Result<u64> {
        self.inner.count_datasets(run, filter).await
    }
    async fn resources(&self, run: i64, filter: &ResourceFilter) -> Result<Vec<ResourceRecord>> {
        self.inner.resources(run, filter).await
    }
    async fn count_resources(&self, run: i64, filter: &ResourceFilter) -> Result<u64> {
        self.inner.count_resources(run, filter).await
    }
}

#[tokio::test]
async fn persistence_failure_aborts_run_and_keeps_earlier_commits() {
    let store = RejectingStore {
        inner: InMemoryRunStore::new(),
        reject: "d2".to_string(),
    };
    let err = run_freshness(
        &StaticCatalog(small_catalog()),
        &ScriptedTransport::default(),
        &store,
        &settings(),
        &HashSet::new(),
        now(),
        &NoProgress,
    )
    .await
    .unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to persist dataset d2"));

    let datasets = store.datasets(0, &DatasetFilter::default()).await.unwrap();
    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0].id, "d1");
    // No orphans: d1's resources only
    let resources = store.resources(0, &ResourceFilter::default()).await.unwrap();
    assert!(resources.iter().all(|r| r.dataset_id == "d1"));
    // Resource revisions match the metadata, so only metadata is credited
    assert_eq!(datasets[0].what_updated, WhatUpdated::from([UpdateTag::Metadata]));
}
