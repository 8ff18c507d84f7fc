//! Catalog listing.
//!
//! The engine consumes the catalog through the [`Catalog`] trait. The
//! shipped implementation, [`SnapshotCatalog`], reads a JSON snapshot of
//! the catalog's package listing; a live API client only has to produce
//! the same [`CatalogSnapshot`].
//!
//! # Snapshot format
//!
//! ```json
//! {
//!   "organizations": [{ "id": "hdx", "name": "hdx", "title": "HDX" }],
//!   "datasets": [{
//!     "id": "a2150ad9-...",
//!     "name": "rohingya-displacement-topline-figures",
//!     "title": "Rohingya Displacement Topline Figures",
//!     "organization": "hdx",
//!     "data_update_frequency": "1",
//!     "metadata_modified": "2017-12-16T15:11:15.204215",
//!     "resources": [{
//!       "id": "b21d6004-...",
//!       "name": "Topline Numbers.csv",
//!       "url": "https://docs.google.com/...",
//!       "revision_last_updated": "2017-12-16T15:11:15.202742"
//!     }]
//!   }]
//! }
//! ```
//!
//! Timestamps may be RFC 3339 or naive ISO 8601; naive values are UTC.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::models::{InfoDataset, Organization, UpdateFrequency};

/// A downloadable resource as listed by the catalog.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CatalogResource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub format: Option<String>,
    pub url: String,
    /// When the resource's file or URL was last revised in the catalog.
    #[serde(default, deserialize_with = "deserialize_opt_ts")]
    pub revision_last_updated: Option<DateTime<Utc>>,
    /// Catalog-declared modification time of the resource metadata.
    #[serde(default, deserialize_with = "deserialize_opt_ts")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// A dataset as listed by the catalog, with its resources.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CatalogDataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub maintainer: Option<String>,
    #[serde(default)]
    pub maintainer_email: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub dataset_date: Option<String>,
    /// Raw cadence string; see [`CatalogDataset::update_frequency`].
    #[serde(default)]
    pub data_update_frequency: Option<String>,
    #[serde(deserialize_with = "deserialize_ts")]
    pub metadata_modified: DateTime<Utc>,
    /// Names the upstream script when the dataset is fed from an external
    /// source that carries its own revision metadata.
    #[serde(default)]
    pub updated_by_script: Option<String>,
    #[serde(default)]
    pub resources: Vec<CatalogResource>,
}

impl CatalogDataset {
    pub fn update_frequency(&self) -> Option<UpdateFrequency> {
        UpdateFrequency::from_catalog(self.data_update_frequency.as_deref())
    }

    pub fn is_script_updated(&self) -> bool {
        self.updated_by_script
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }

    pub fn info(&self) -> InfoDataset {
        InfoDataset {
            id: self.id.clone(),
            name: self.name.clone(),
            title: self.title.clone(),
            private: self.private,
            organization_id: self.organization.clone(),
            maintainer_id: self.maintainer.clone(),
            maintainer_email: self.maintainer_email.clone(),
            author: self.author.clone(),
            author_email: self.author_email.clone(),
            location: self.location.clone(),
        }
    }
}

/// Organization entry of a snapshot.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CatalogOrganization {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
}

impl From<&CatalogOrganization> for Organization {
    fn from(org: &CatalogOrganization) -> Self {
        Organization {
            id: org.id.clone(),
            name: org.name.clone(),
            title: org.title.clone(),
        }
    }
}

/// Everything the catalog reports for one run.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub organizations: Vec<CatalogOrganization>,
    #[serde(default)]
    pub datasets: Vec<CatalogDataset>,
}

impl CatalogSnapshot {
    pub fn resource_count(&self) -> usize {
        self.datasets.iter().map(|d| d.resources.len()).sum()
    }
}

/// Source of the dataset/resource listing.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// List every dataset with its resources as of `as_of`.
    ///
    /// Failing here aborts the run.
    async fn list_datasets_and_resources(&self, as_of: DateTime<Utc>)
        -> Result<CatalogSnapshot>;
}

/// Catalog backed by a JSON snapshot file.
pub struct SnapshotCatalog {
    path: PathBuf,
}

impl SnapshotCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Catalog for SnapshotCatalog {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn list_datasets_and_resources(
        &self,
        _as_of: DateTime<Utc>,
    ) -> Result<CatalogSnapshot> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read catalog snapshot: {}", self.path.display()))?;
        parse_snapshot(&content)
            .with_context(|| format!("Failed to parse catalog snapshot: {}", self.path.display()))
    }
}

pub fn parse_snapshot(json: &str) -> Result<CatalogSnapshot> {
    Ok(serde_json::from_str(json)?)
}

/// Parse an RFC 3339 or naive ISO 8601 timestamp (naive values are UTC).
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    anyhow::bail!("Invalid timestamp: '{}'", s)
}

fn deserialize_ts<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_timestamp(&s).map_err(serde::de::Error::custom)
}

fn deserialize_opt_ts<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) if !s.trim().is_empty() => parse_timestamp(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}
