//! Per-resource change detection.
//!
//! Each selected resource is run through an ordered cascade of strategies,
//! cheapest signal first:
//!
//! 1. **Forced hash**: resources listed for forced hashing are fetched and
//!    digested regardless of other signals.
//! 2. **Revision metadata**: a catalog `revision_last_updated` newer than the
//!    previous run's value tags the resource with its provenance tag
//!    (`revision`, `internal-revision` or `adhoc-revision`).
//! 3. **HTTP header**: generic resources get a `HEAD` request; a
//!    `Last-Modified` newer than the previous run's tags `http header`.
//! 4. **Content hash**: generic resources with no verdict from 1–3 are
//!    fetched and digested. A changed digest is confirmed by a second fetch:
//!    content that differs between two fetches in the same run is a
//!    generated response and is tagged `api` instead of `hash`. Only a
//!    digest that differs from the previous run's advances `last_modified`;
//!    a first digest has no age of its own.
//! 5. **Error**: when every network strategy attempted failed, the failure
//!    message is recorded and the resource is tagged `error`.
//!
//! Failures never abort the run and are never retried. Checks run
//! concurrently on a bounded pool, see [`detect_changes`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::models::{Provenance, ResourceRecord};
use crate::progress::{report_interval, RunProgressEvent, RunProgressReporter};
use crate::selector::ResourceToCheck;
use crate::store::Baseline;
use crate::transport::Transport;
use crate::whatupdated::{UpdateTag, WhatUpdated};

/// Knobs for one detection pass.
#[derive(Debug, Clone)]
pub struct DetectOptions {
    pub run_number: i64,
    pub now: DateTime<Utc>,
    /// Maximum concurrent resource checks.
    pub workers: usize,
    /// Wall-clock budget for the whole pass.
    pub deadline: Option<Duration>,
}

impl DetectOptions {
    pub fn new(run_number: i64, now: DateTime<Utc>) -> Self {
        Self {
            run_number,
            now,
            workers: 32,
            deadline: None,
        }
    }
}

/// Tag recorded when catalog revision metadata advanced.
pub fn revision_tag(provenance: Provenance) -> UpdateTag {
    match provenance {
        Provenance::Generic => UpdateTag::Revision,
        Provenance::Internal => UpdateTag::InternalRevision,
        Provenance::Adhoc => UpdateTag::AdhocRevision,
    }
}

/// In-flight state of one resource's cascade.
struct ResourceCheck<'a> {
    item: &'a ResourceToCheck,
    prior: Option<&'a ResourceRecord>,
    now: DateTime<Utc>,
    what_updated: WhatUpdated,
    last_modified: DateTime<Utc>,
    revision_last_updated: Option<DateTime<Utc>>,
    http_last_modified: Option<DateTime<Utc>>,
    hash: Option<String>,
    when_hashed: Option<DateTime<Utc>>,
    api: Option<bool>,
    hashed: bool,
    network_succeeded: bool,
    network_error: Option<TransportError>,
}

impl<'a> ResourceCheck<'a> {
    fn new(
        item: &'a ResourceToCheck,
        prior: Option<&'a ResourceRecord>,
        now: DateTime<Utc>,
    ) -> Self {
        let last_modified = match prior {
            Some(p) => p.last_modified,
            None => {
                let r = &item.resource;
                match (r.revision_last_updated, r.last_modified) {
                    (Some(a), Some(b)) => a.max(b),
                    (Some(a), None) | (None, Some(a)) => a,
                    (None, None) => item.dataset_modified,
                }
            }
        };

        Self {
            item,
            prior,
            now,
            what_updated: WhatUpdated::new(),
            last_modified,
            revision_last_updated: prior.and_then(|p| p.revision_last_updated),
            http_last_modified: prior.and_then(|p| p.http_last_modified),
            hash: prior.and_then(|p| p.hash.clone()),
            when_hashed: prior.and_then(|p| p.when_hashed),
            api: None,
            hashed: false,
            network_succeeded: false,
            network_error: None,
        }
    }

    fn id(&self) -> &'a str {
        &self.item.resource.id
    }

    fn url(&self) -> &'a str {
        &self.item.resource.url
    }

    fn advance(&mut self, ts: DateTime<Utc>) {
        if ts > self.last_modified {
            self.last_modified = ts;
        }
    }

    fn remember_error(&mut self, strategy: &str, err: TransportError) {
        warn!(resource = %self.id(), url = %self.url(), strategy, error = %err, "check failed");
        self.network_error = Some(err);
    }

    fn revision(&mut self) {
        let Some(rev) = self.item.resource.revision_last_updated else {
            return;
        };
        let prior_rev = self.prior.and_then(|p| p.revision_last_updated);
        let advanced = self.prior.is_none() || prior_rev.map_or(true, |p| rev > p);
        if advanced {
            let tag = revision_tag(self.item.provenance);
            debug!(resource = %self.id(), %tag, %rev, "revision advanced");
            self.what_updated.insert(tag);
            self.advance(rev);
        }
        self.revision_last_updated = Some(rev);
    }

    async fn http_header(&mut self, transport: &dyn Transport) {
        match transport.last_modified(self.url()).await {
            Ok(Some(lm)) => {
                self.network_succeeded = true;
                let prior_http = self.prior.and_then(|p| p.http_last_modified);
                if prior_http.map_or(true, |p| lm > p) {
                    debug!(resource = %self.id(), %lm, "Last-Modified advanced");
                    self.what_updated.insert(UpdateTag::HttpHeader);
                    self.advance(lm);
                }
                self.http_last_modified = Some(lm);
            }
            Ok(None) => {
                self.network_succeeded = true;
                debug!(resource = %self.id(), "no usable Last-Modified header");
            }
            Err(e) => self.remember_error("http header", e),
        }
    }

    async fn content_hash(&mut self, transport: &dyn Transport) {
        self.hashed = true;
        // Records the attempt, successful or not.
        self.when_hashed = Some(self.now);
        let first = match transport.digest(self.url()).await {
            Ok(digest) => digest,
            Err(e) => {
                self.remember_error("hash", e);
                return;
            }
        };
        self.network_succeeded = true;

        // No prior record means first observation; an empty prior digest
        // only establishes the baseline.
        let differs = match self.prior {
            None => true,
            Some(p) => p
                .hash
                .as_deref()
                .is_some_and(|h| !h.is_empty() && h != first),
        };

        if differs {
            match transport.digest(self.url()).await {
                Ok(second) if second != first => {
                    debug!(
                        resource = %self.id(),
                        "content differs between fetches, treating as api"
                    );
                    self.what_updated.insert(UpdateTag::Api);
                    self.api = Some(true);
                }
                Ok(_) => self.hash_changed(),
                Err(e) => {
                    debug!(
                        resource = %self.id(),
                        error = %e,
                        "confirmation fetch failed, keeping first digest"
                    );
                    self.hash_changed();
                }
            }
        } else {
            self.api = Some(false);
        }

        self.hash = Some(first);
    }

    fn hash_changed(&mut self) {
        debug!(resource = %self.id(), "content hash changed");
        self.what_updated.insert(UpdateTag::Hash);
        self.api = Some(false);
        if self.prior.is_some() {
            self.advance(self.now);
        }
    }

    fn finish(mut self, run_number: i64) -> ResourceRecord {
        let error = match self.network_error.take() {
            Some(e) if !self.network_succeeded => {
                self.what_updated.insert(UpdateTag::Error);
                Some(e.to_string())
            }
            _ => None,
        };

        let r = &self.item.resource;
        ResourceRecord {
            run_number,
            id: r.id.clone(),
            name: r.name.clone(),
            dataset_id: self.item.dataset_id.clone(),
            url: r.url.clone(),
            format: r.format.clone(),
            error,
            last_modified: self.last_modified,
            what_updated: self.what_updated,
            revision_last_updated: self.revision_last_updated,
            http_last_modified: self.http_last_modified,
            hash: self.hash,
            when_hashed: self.when_hashed,
            when_checked: self.now,
            api: self.api,
        }
    }
}

/// Run the full cascade for one resource.
pub async fn check_resource(
    item: &ResourceToCheck,
    prior: Option<&ResourceRecord>,
    transport: &dyn Transport,
    run_number: i64,
    now: DateTime<Utc>,
) -> ResourceRecord {
    let mut check = ResourceCheck::new(item, prior, now);

    if item.forced_hash {
        check.content_hash(transport).await;
    }

    check.revision();

    if item.provenance == Provenance::Generic {
        check.http_header(transport).await;

        if !check.hashed && check.what_updated.is_empty() {
            check.content_hash(transport).await;
        }
    }

    check.finish(run_number)
}

/// Record for a resource whose check did not finish before the run deadline.
///
/// Only catalog-side revision metadata is evaluated.
fn deadline_record(
    item: &ResourceToCheck,
    prior: Option<&ResourceRecord>,
    run_number: i64,
    now: DateTime<Utc>,
) -> ResourceRecord {
    let mut check = ResourceCheck::new(item, prior, now);
    check.revision();
    check.network_error = Some(TransportError::Deadline);
    check.finish(run_number)
}

/// Check every resource against the baseline.
///
/// Checks run concurrently, at most `options.workers` at a time. The result
/// holds exactly one record per input resource, in input order.
pub async fn detect_changes(
    resources: &[ResourceToCheck],
    baseline: &Baseline,
    transport: &dyn Transport,
    options: &DetectOptions,
    progress: &dyn RunProgressReporter,
) -> Vec<ResourceRecord> {
    let total = resources.len() as u64;
    let interval = report_interval(total);
    let deadline = options
        .deadline
        .map(|d| tokio::time::Instant::now() + d);
    let run_number = options.run_number;
    let now = options.now;

    info!(
        run = run_number,
        resources = total,
        workers = options.workers,
        "checking resources"
    );

    let mut checks = stream::iter(resources.iter().enumerate())
        .map(|(index, item)| async move {
            let prior = baseline.resource(item.id());
            let check = check_resource(item, prior, transport, run_number, now);
            let record = match deadline {
                Some(at) => match tokio::time::timeout_at(at, check).await {
                    Ok(record) => record,
                    Err(_) => {
                        warn!(resource = %item.id(), "run deadline exceeded");
                        deadline_record(item, prior, run_number, now)
                    }
                },
                None => check.await,
            };
            (index, record)
        })
        .buffer_unordered(options.workers.max(1));

    let mut results = Vec::with_capacity(resources.len());
    let mut done: u64 = 0;
    while let Some(result) = checks.next().await {
        results.push(result);
        done += 1;
        if done % interval == 0 || done == total {
            progress.report(RunProgressEvent::Checking {
                run: run_number,
                n: done,
                total,
            });
        }
    }

    results.sort_by_key(|(index, _)| *index);
    let records: Vec<ResourceRecord> = results.into_iter().map(|(_, r)| r).collect();

    let errors = records.iter().filter(|r| r.error.is_some()).count();
    info!(run = run_number, checked = records.len(), errors, "resource checks complete");
    records
}
