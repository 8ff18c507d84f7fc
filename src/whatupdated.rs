//! The "what updated" tag trail.
//!
//! Every resource and dataset record carries the set of detection signals
//! that fired for it in a run. The set is kept in a canonical order so the
//! stored string (`"revision,http header"`) and the report pivots are
//! deterministic no matter which worker finished first.
//!
//! # Canonical order
//!
//! | Tag | Rendered as |
//! |-----|-------------|
//! | [`UpdateTag::Metadata`] | `metadata` |
//! | [`UpdateTag::Revision`] | `revision` |
//! | [`UpdateTag::InternalRevision`] | `internal-revision` |
//! | [`UpdateTag::AdhocRevision`] | `adhoc-revision` |
//! | [`UpdateTag::HttpHeader`] | `http header` |
//! | [`UpdateTag::Hash`] | `hash` |
//! | [`UpdateTag::Api`] | `api` |
//! | [`UpdateTag::Error`] | `error` |

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Serialize, Serializer};

/// A single detection signal. Declaration order is the canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpdateTag {
    Metadata,
    Revision,
    InternalRevision,
    AdhocRevision,
    HttpHeader,
    Hash,
    Api,
    Error,
}

impl UpdateTag {
    pub const ALL: [UpdateTag; 8] = [
        UpdateTag::Metadata,
        UpdateTag::Revision,
        UpdateTag::InternalRevision,
        UpdateTag::AdhocRevision,
        UpdateTag::HttpHeader,
        UpdateTag::Hash,
        UpdateTag::Api,
        UpdateTag::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateTag::Metadata => "metadata",
            UpdateTag::Revision => "revision",
            UpdateTag::InternalRevision => "internal-revision",
            UpdateTag::AdhocRevision => "adhoc-revision",
            UpdateTag::HttpHeader => "http header",
            UpdateTag::Hash => "hash",
            UpdateTag::Api => "api",
            UpdateTag::Error => "error",
        }
    }

    /// Tags produced by a network strategy. These never share a record
    /// with [`UpdateTag::Error`].
    pub fn is_network(&self) -> bool {
        matches!(self, UpdateTag::HttpHeader | UpdateTag::Hash | UpdateTag::Api)
    }
}

impl fmt::Display for UpdateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match UpdateTag::ALL.iter().find(|t| t.as_str() == s) {
            Some(tag) => Ok(*tag),
            None => bail!("Unknown what-updated tag: '{}'", s),
        }
    }
}

/// Ordered, deduplicated set of [`UpdateTag`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WhatUpdated(BTreeSet<UpdateTag>);

impl WhatUpdated {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: UpdateTag) {
        self.0.insert(tag);
    }

    pub fn remove(&mut self, tag: UpdateTag) {
        self.0.remove(&tag);
    }

    pub fn contains(&self, tag: UpdateTag) -> bool {
        self.0.contains(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn extend(&mut self, other: &WhatUpdated) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn iter(&self) -> impl Iterator<Item = UpdateTag> + '_ {
        self.0.iter().copied()
    }

    /// Storage form: comma-joined tags, empty string for the empty set.
    pub fn to_column(&self) -> String {
        self.iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse the storage form produced by [`to_column`](Self::to_column).
    pub fn from_column(s: &str) -> anyhow::Result<Self> {
        let mut set = WhatUpdated::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() || part == "nothing" {
                continue;
            }
            set.insert(part.parse()?);
        }
        Ok(set)
    }
}

impl<const N: usize> From<[UpdateTag; N]> for WhatUpdated {
    fn from(tags: [UpdateTag; N]) -> Self {
        Self(tags.into_iter().collect())
    }
}

impl FromIterator<UpdateTag> for WhatUpdated {
    fn from_iter<I: IntoIterator<Item = UpdateTag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Report label: the column form, or `nothing` for the empty set.
impl fmt::Display for WhatUpdated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("nothing")
        } else {
            f.write_str(&self.to_column())
        }
    }
}

/// Serialized as the column form so JSON output matches the stored rows.
impl Serialize for WhatUpdated {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_column())
    }
}
