//! Dataset aggregation and classification.
//!
//! Folds each dataset's checked resources into one [`DatasetRecord`] and
//! ages it against its declared cadence.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::classify::AgingPolicy;
use crate::models::{DatasetRecord, ResourceRecord};
use crate::selector::DatasetToCheck;
use crate::store::Baseline;
use crate::whatupdated::{UpdateTag, WhatUpdated};

/// Build the run's dataset records.
///
/// - `last_modified` is the newest of the dataset's `metadata_modified` and
///   its resources' `last_modified`.
/// - `what_updated` starts with `metadata` when `metadata_modified` advanced
///   past the previous run's value (or the dataset is new). Resources are
///   then visited in catalog order and a resource's tags are carried over
///   only when its `last_modified` is strictly newer than the dataset's
///   `last_modified` so far. A resource that did not move the dataset did
///   not update it.
/// - `error` is set, and tagged, when any resource recorded an error.
pub fn aggregate_and_classify(
    datasets: &[DatasetToCheck],
    resources: &[ResourceRecord],
    baseline: &Baseline,
    aging: &AgingPolicy,
    run_number: i64,
    now: DateTime<Utc>,
) -> Vec<DatasetRecord> {
    let by_id: HashMap<&str, &ResourceRecord> =
        resources.iter().map(|r| (r.id.as_str(), r)).collect();

    datasets
        .iter()
        .map(|dataset| {
            let mut last_modified = dataset.metadata_modified;
            let mut what_updated = WhatUpdated::new();
            let mut error = false;

            for id in &dataset.resource_ids {
                let Some(resource) = by_id.get(id.as_str()) else {
                    warn!(dataset = %dataset.id, resource = %id, "no check result for resource");
                    continue;
                };
                if resource.last_modified > last_modified {
                    last_modified = resource.last_modified;
                    what_updated.extend(&resource.what_updated);
                }
                if resource.error.is_some() {
                    error = true;
                    what_updated.insert(UpdateTag::Error);
                }
            }

            let metadata_advanced = baseline
                .dataset(&dataset.id)
                .map_or(true, |prior| dataset.metadata_modified > prior.metadata_modified);
            if metadata_advanced {
                what_updated.insert(UpdateTag::Metadata);
            }

            let fresh = aging.classify(dataset.update_frequency, last_modified, now);
            debug!(dataset = %dataset.id, %what_updated, ?fresh, "classified dataset");

            DatasetRecord {
                run_number,
                id: dataset.id.clone(),
                dataset_date: dataset.dataset_date.clone(),
                update_frequency: dataset.update_frequency,
                last_modified,
                what_updated,
                metadata_modified: dataset.metadata_modified,
                fresh,
                error,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Freshness, UpdateFrequency};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 12, 18, 16, 3, 33).unwrap()
    }

    fn dataset(id: &str, freq: Option<UpdateFrequency>, resource_ids: &[&str]) -> DatasetToCheck {
        DatasetToCheck {
            id: id.to_string(),
            dataset_date: None,
            update_frequency: freq,
            metadata_modified: now() - Duration::days(40),
            resource_ids: resource_ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn resource(id: &str, dataset_id: &str, age_days: i64, tags: &[UpdateTag]) -> ResourceRecord {
        ResourceRecord {
            run_number: 1,
            id: id.to_string(),
            name: id.to_string(),
            dataset_id: dataset_id.to_string(),
            url: format!("https://example.org/{}", id),
            format: None,
            error: None,
            last_modified: now() - Duration::days(age_days),
            what_updated: tags.iter().copied().collect(),
            revision_last_updated: None,
            http_last_modified: None,
            hash: None,
            when_hashed: None,
            when_checked: now(),
            api: None,
        }
    }

    #[test]
    fn newer_resources_carry_their_tags() {
        let datasets = vec![dataset("d1", Some(UpdateFrequency::Days(7)), &["r1", "r2"])];
        let mut r2 = resource("r2", "d1", 3, &[UpdateTag::Revision, UpdateTag::Error]);
        r2.error = Some("HTTP status 404".to_string());
        let resources = vec![resource("r1", "d1", 20, &[UpdateTag::HttpHeader]), r2];

        let records = aggregate_and_classify(
            &datasets,
            &resources,
            &Baseline::empty(),
            &AgingPolicy::default(),
            1,
            now(),
        );
        let d = &records[0];
        assert_eq!(d.last_modified, now() - Duration::days(3));
        assert_eq!(d.what_updated.to_column(), "metadata,revision,http header,error");
        assert!(d.error);
        assert_eq!(d.fresh, Freshness::Fresh);
    }

    #[test]
    fn resources_not_newer_than_dataset_keep_their_tags() {
        let mut d = dataset("d1", Some(UpdateFrequency::Days(7)), &["r-old", "r-same", "r-new"]);
        d.metadata_modified = now() - Duration::days(5);
        let mut same = resource("r-same", "d1", 5, &[UpdateTag::Revision, UpdateTag::Hash]);
        same.last_modified = d.metadata_modified;
        let resources = vec![
            resource("r-old", "d1", 9, &[UpdateTag::AdhocRevision]),
            same,
            resource("r-new", "d1", 2, &[UpdateTag::Revision, UpdateTag::HttpHeader]),
        ];

        let records = aggregate_and_classify(
            &[d],
            &resources,
            &Baseline::empty(),
            &AgingPolicy::default(),
            0,
            now(),
        );
        assert_eq!(records[0].what_updated.to_column(), "metadata,revision,http header");
        assert_eq!(records[0].last_modified, now() - Duration::days(2));
        assert!(!records[0].error);
    }

    #[test]
    fn earlier_newer_resource_shadows_later_ones() {
        let datasets = vec![dataset("d1", Some(UpdateFrequency::Days(7)), &["r1", "r2"])];
        let resources = vec![
            resource("r1", "d1", 1, &[UpdateTag::Hash]),
            resource("r2", "d1", 4, &[UpdateTag::InternalRevision]),
        ];
        let records = aggregate_and_classify(
            &datasets,
            &resources,
            &Baseline::empty(),
            &AgingPolicy::default(),
            0,
            now(),
        );
        assert_eq!(records[0].what_updated.to_column(), "metadata,hash");
    }

    #[test]
    fn stale_failing_resource_still_flags_error() {
        let datasets = vec![dataset("d1", Some(UpdateFrequency::Days(30)), &["r1"])];
        let mut failing = resource("r1", "d1", 60, &[UpdateTag::Revision, UpdateTag::Error]);
        failing.error = Some("HTTP status 500".to_string());
        let records = aggregate_and_classify(
            &datasets,
            &[failing],
            &Baseline::empty(),
            &AgingPolicy::default(),
            0,
            now(),
        );
        assert_eq!(records[0].what_updated.to_column(), "metadata,error");
        assert!(records[0].error);
        assert_eq!(records[0].last_modified, now() - Duration::days(40));
    }

    #[test]
    fn metadata_tag_only_when_advanced() {
        let datasets = vec![dataset("d1", Some(UpdateFrequency::Days(30)), &[])];
        let first = aggregate_and_classify(
            &datasets,
            &[],
            &Baseline::empty(),
            &AgingPolicy::default(),
            0,
            now(),
        );
        assert_eq!(first[0].what_updated.to_column(), "metadata");
        assert_eq!(first[0].fresh, Freshness::Due);

        let baseline = Baseline::from_records(0, first, vec![]);
        let second =
            aggregate_and_classify(&datasets, &[], &baseline, &AgingPolicy::default(), 1, now());
        assert!(second[0].what_updated.is_empty());
    }

    #[test]
    fn missing_cadence_is_unavailable() {
        let datasets = vec![dataset("d1", None, &["r1"])];
        let resources = vec![resource("r1", "d1", 0, &[])];
        let records = aggregate_and_classify(
            &datasets,
            &resources,
            &Baseline::empty(),
            &AgingPolicy::default(),
            0,
            now(),
        );
        assert_eq!(records[0].fresh, Freshness::Unavailable);
    }
}
