//! Core data models used throughout the freshness engine.
//!
//! These types represent the per-run records that flow through the
//! selection, detection, aggregation, and persistence pipeline. Catalog-side
//! input types live in [`crate::catalog`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::whatupdated::WhatUpdated;

/// Display format for timestamps in record renderings.
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn fmt_opt_ts(ts: &Option<DateTime<Utc>>) -> String {
    ts.as_ref().map(fmt_ts).unwrap_or_else(|| "None".to_string())
}

fn fmt_opt<T: fmt::Display>(v: &Option<T>) -> String {
    v.as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "None".to_string())
}

/// One execution of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Run {
    pub number: i64,
    pub date: DateTime<Utc>,
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Run number={}, Run date={}>",
            self.number,
            fmt_ts(&self.date)
        )
    }
}

/// Publishing organization (reference data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub title: String,
}

impl fmt::Display for Organization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Organization(id={}, name={}, title={})>",
            self.id, self.name, self.title
        )
    }
}

/// Descriptive snapshot of a dataset as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfoDataset {
    pub id: String,
    pub name: String,
    pub title: String,
    pub private: bool,
    pub organization_id: String,
    pub maintainer_id: Option<String>,
    pub maintainer_email: Option<String>,
    pub author: Option<String>,
    pub author_email: Option<String>,
    pub location: Option<String>,
}

impl fmt::Display for InfoDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<InfoDataset(id={}, name={}, title={},\nprivate={}, organization id={},\nmaintainer={}, maintainer email={}, author={}, author email={}, location={})>",
            self.id,
            self.name,
            self.title,
            if self.private { "True" } else { "False" },
            self.organization_id,
            fmt_opt(&self.maintainer_id),
            fmt_opt(&self.maintainer_email),
            fmt_opt(&self.author),
            fmt_opt(&self.author_email),
            fmt_opt(&self.location),
        )
    }
}

/// A dataset's declared update cadence.
///
/// The catalog encodes cadences as integer day strings with three special
/// values: `0` (live), `-1` (never), `-2` (as needed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UpdateFrequency {
    Days(u32),
    Live,
    Never,
    Adhoc,
}

impl UpdateFrequency {
    /// Parse the catalog's `data_update_frequency` value.
    ///
    /// Returns `None` for missing, non-numeric, or unrecognized negative
    /// values. Such datasets cannot be classified.
    pub fn from_catalog(raw: Option<&str>) -> Option<Self> {
        let code: i64 = raw?.trim().parse().ok()?;
        Self::from_code(code)
    }

    /// Decode the stored integer form.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(UpdateFrequency::Live),
            -1 => Some(UpdateFrequency::Never),
            -2 => Some(UpdateFrequency::Adhoc),
            n if n > 0 => u32::try_from(n).ok().map(UpdateFrequency::Days),
            _ => None,
        }
    }

    /// Integer form used in storage (inverse of [`from_code`](Self::from_code)).
    ///
    /// `Days(0)` has no code of its own: `0` means live, so a zero-day
    /// cadence is stored as absent.
    pub fn code(&self) -> Option<i64> {
        match self {
            UpdateFrequency::Days(0) => None,
            UpdateFrequency::Days(n) => Some(i64::from(*n)),
            UpdateFrequency::Live => Some(0),
            UpdateFrequency::Never => Some(-1),
            UpdateFrequency::Adhoc => Some(-2),
        }
    }
}

impl fmt::Display for UpdateFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateFrequency::Days(n) => write!(f, "{}", n),
            UpdateFrequency::Live => f.write_str("Live"),
            UpdateFrequency::Never => f.write_str("Never"),
            UpdateFrequency::Adhoc => f.write_str("Adhoc"),
        }
    }
}

/// Classifier verdict for a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Freshness {
    Fresh,
    Due,
    Overdue,
    Delinquent,
    Unavailable,
}

impl Freshness {
    /// Stored ordinal; `None` for [`Freshness::Unavailable`].
    pub fn ordinal(&self) -> Option<i64> {
        match self {
            Freshness::Fresh => Some(0),
            Freshness::Due => Some(1),
            Freshness::Overdue => Some(2),
            Freshness::Delinquent => Some(3),
            Freshness::Unavailable => None,
        }
    }

    pub fn from_ordinal(ordinal: Option<i64>) -> Self {
        match ordinal {
            Some(0) => Freshness::Fresh,
            Some(1) => Freshness::Due,
            Some(2) => Freshness::Overdue,
            Some(3) => Freshness::Delinquent,
            _ => Freshness::Unavailable,
        }
    }

    /// Report label, e.g. `0: Fresh` or `Freshness Unavailable`.
    pub fn label(&self) -> &'static str {
        match self {
            Freshness::Fresh => "0: Fresh",
            Freshness::Due => "1: Due",
            Freshness::Overdue => "2: Overdue",
            Freshness::Delinquent => "3: Delinquent",
            Freshness::Unavailable => "Freshness Unavailable",
        }
    }
}

/// How a resource's changes are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Provenance {
    /// Hosted in the catalog's own file store.
    Internal,
    /// Dataset is maintained by an external upstream with its own revisions.
    Adhoc,
    /// Any other URL.
    Generic,
}

/// A dataset's state as computed in one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetRecord {
    pub run_number: i64,
    pub id: String,
    pub dataset_date: Option<String>,
    pub update_frequency: Option<UpdateFrequency>,
    pub last_modified: DateTime<Utc>,
    pub what_updated: WhatUpdated,
    pub metadata_modified: DateTime<Utc>,
    pub fresh: Freshness,
    pub error: bool,
}

impl fmt::Display for DatasetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Dataset(run number={}, id={}, dataset date={}, update frequency={},\nlast_modified={} what updated={}, metadata_modified={},\nDataset fresh={}, error={})>",
            self.run_number,
            self.id,
            fmt_opt(&self.dataset_date),
            fmt_opt(&self.update_frequency),
            fmt_ts(&self.last_modified),
            self.what_updated.to_column(),
            fmt_ts(&self.metadata_modified),
            fmt_opt(&self.fresh.ordinal()),
            self.error,
        )
    }
}

/// A resource's state as observed in one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceRecord {
    pub run_number: i64,
    pub id: String,
    pub name: String,
    pub dataset_id: String,
    pub url: String,
    pub format: Option<String>,
    pub error: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub what_updated: WhatUpdated,
    pub revision_last_updated: Option<DateTime<Utc>>,
    pub http_last_modified: Option<DateTime<Utc>>,
    pub hash: Option<String>,
    pub when_hashed: Option<DateTime<Utc>>,
    pub when_checked: DateTime<Utc>,
    /// `None` when not hashed this run; otherwise whether the content
    /// changed between two fetches in the same run.
    pub api: Option<bool>,
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Resource(run number={}, id={}, name={}, dataset id={},\nurl={},\nerror={}, last modified={}, what updated={},\nrevision last updated={}, http last modified={}, hash={}, when hashed={}, when checked={}, api={})>",
            self.run_number,
            self.id,
            self.name,
            self.dataset_id,
            self.url,
            fmt_opt(&self.error),
            fmt_ts(&self.last_modified),
            self.what_updated.to_column(),
            fmt_opt_ts(&self.revision_last_updated),
            fmt_opt_ts(&self.http_last_modified),
            fmt_opt(&self.hash),
            fmt_opt_ts(&self.when_hashed),
            fmt_ts(&self.when_checked),
            fmt_opt(&self.api),
        )
    }
}
