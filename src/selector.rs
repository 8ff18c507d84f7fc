//! Work selection for a run.
//!
//! Partitions the catalog snapshot into the datasets to evaluate and the
//! resources to check, and decides for every resource how its changes are
//! detected ([`Provenance`]). Selection is pure: no network, no storage.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};

use crate::catalog::{CatalogDataset, CatalogResource, CatalogSnapshot};
use crate::models::{InfoDataset, Organization, Provenance, UpdateFrequency};

/// A resource scheduled for the change detector.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceToCheck {
    pub dataset_id: String,
    pub resource: CatalogResource,
    pub provenance: Provenance,
    pub forced_hash: bool,
    /// The dataset's `metadata_modified`, used as `last_modified` for a
    /// brand-new resource with no catalog timestamps of its own.
    pub dataset_modified: DateTime<Utc>,
}

impl ResourceToCheck {
    pub fn id(&self) -> &str {
        &self.resource.id
    }

    /// Whether any strategy for this resource touches the network.
    pub fn needs_network(&self) -> bool {
        self.forced_hash || self.provenance == Provenance::Generic
    }
}

/// A dataset scheduled for aggregation and classification.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetToCheck {
    pub id: String,
    pub dataset_date: Option<String>,
    pub update_frequency: Option<UpdateFrequency>,
    pub metadata_modified: DateTime<Utc>,
    pub resource_ids: Vec<String>,
}

/// Output of [`select`].
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub datasets_to_check: Vec<DatasetToCheck>,
    pub resources_to_check: Vec<ResourceToCheck>,
    pub organizations: Vec<Organization>,
    pub info_datasets: Vec<InfoDataset>,
}

impl Selection {
    /// Number of resources whose check involves a network request.
    pub fn network_count(&self) -> usize {
        self.resources_to_check
            .iter()
            .filter(|r| r.needs_network())
            .count()
    }
}

/// Rules deciding a resource's [`Provenance`].
pub struct ProvenanceRules {
    internal_hosts: GlobSet,
}

impl ProvenanceRules {
    /// Build rules from host glob patterns (e.g. `*.data.humdata.org`).
    pub fn new(internal_hosts: &[String]) -> Result<Self> {
        Ok(Self {
            internal_hosts: build_host_matcher(internal_hosts)?,
        })
    }

    /// Internal file-store URLs win over the dataset's upstream hint.
    pub fn classify(&self, dataset: &CatalogDataset, resource: &CatalogResource) -> Provenance {
        if self.is_internal(&resource.url) {
            Provenance::Internal
        } else if dataset.is_script_updated() {
            Provenance::Adhoc
        } else {
            Provenance::Generic
        }
    }

    pub fn is_internal(&self, url: &str) -> bool {
        url_host(url).is_some_and(|host| self.internal_hosts.is_match(host.as_str()))
    }
}

fn url_host(url: &str) -> Option<String> {
    reqwest::Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

pub fn build_host_matcher(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(&pattern.to_ascii_lowercase())?);
    }
    Ok(builder.build()?)
}

/// Parse a forced-hash list: one resource id per line, blank lines and
/// `#` comments ignored.
pub fn parse_forced_hash_ids(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn load_forced_hash_ids(path: &Path) -> Result<HashSet<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read forced hash list: {}", path.display()))?;
    Ok(parse_forced_hash_ids(&content))
}

/// Partition the catalog into work for this run.
///
/// Every dataset is selected, including datasets without resources.
/// Duplicate dataset or resource ids keep their first occurrence. Forced
/// hash ids that match no resource are reported and ignored.
pub fn select(
    catalog: &CatalogSnapshot,
    forced_hash_ids: &HashSet<String>,
    rules: &ProvenanceRules,
) -> Selection {
    let mut selection = Selection::default();
    let mut seen_datasets = HashSet::new();
    let mut seen_resources = HashSet::new();

    let mut organizations: BTreeMap<String, Organization> = catalog
        .organizations
        .iter()
        .map(|o| (o.id.clone(), Organization::from(o)))
        .collect();

    for dataset in &catalog.datasets {
        if !seen_datasets.insert(dataset.id.clone()) {
            warn!(dataset = %dataset.id, "duplicate dataset in catalog, keeping first");
            continue;
        }

        // Datasets may reference organizations the listing did not include
        if !dataset.organization.is_empty() && !organizations.contains_key(&dataset.organization) {
            organizations.insert(
                dataset.organization.clone(),
                Organization {
                    id: dataset.organization.clone(),
                    name: dataset.organization.clone(),
                    title: dataset.organization.clone(),
                },
            );
        }

        let mut resource_ids = Vec::with_capacity(dataset.resources.len());
        for resource in &dataset.resources {
            if !seen_resources.insert(resource.id.clone()) {
                warn!(resource = %resource.id, dataset = %dataset.id, "duplicate resource in catalog, keeping first");
                continue;
            }
            let provenance = rules.classify(dataset, resource);
            let forced_hash = forced_hash_ids.contains(&resource.id);
            debug!(resource = %resource.id, ?provenance, forced_hash, "selected resource");

            resource_ids.push(resource.id.clone());
            selection.resources_to_check.push(ResourceToCheck {
                dataset_id: dataset.id.clone(),
                resource: resource.clone(),
                provenance,
                forced_hash,
                dataset_modified: dataset.metadata_modified,
            });
        }

        selection.info_datasets.push(dataset.info());
        selection.datasets_to_check.push(DatasetToCheck {
            id: dataset.id.clone(),
            dataset_date: dataset.dataset_date.clone(),
            update_frequency: dataset.update_frequency(),
            metadata_modified: dataset.metadata_modified,
            resource_ids,
        });
    }

    for id in forced_hash_ids {
        if !seen_resources.contains(id) {
            warn!(resource = %id, "forced hash id not found in catalog");
        }
    }

    selection.organizations = organizations.into_values().collect();
    selection
}
