//! # Data Freshness
//!
//! Run-over-run change detection and freshness classification for a
//! published dataset catalog.
//!
//! Each run lists every dataset and resource in the catalog, decides per
//! resource whether it changed since the previous run, rolls those verdicts
//! up to datasets, ages each dataset against its declared update cadence,
//! persists the results, and prints summary counts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │ Catalog  │──▶│ Selector │──▶│ Detector │──▶│ Aggregate │──▶│ RunStore │
//! │ snapshot │   │          │   │ (HTTP)   │   │ +Classify │   │ (SQLite) │
//! └──────────┘   └──────────┘   └──────────┘   └───────────┘   └────┬─────┘
//!                                     ▲                             │
//!                                     └──────── baseline ───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fresh init                               # create database
//! fresh run --catalog ./data/catalog.json  # one run, prints counts
//! fresh report --json                      # counts of the latest run
//! fresh runs                               # list runs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Run, dataset, and resource records |
//! | [`whatupdated`] | Change-reason tags and their canonical order |
//! | [`catalog`] | Catalog listing and JSON snapshots |
//! | [`selector`] | Work selection and provenance |
//! | [`transport`] | HTTP probes (`HEAD`, streamed hash) |
//! | [`detect`] | Per-resource change detection |
//! | [`aggregate`] | Dataset roll-up |
//! | [`classify`] | Aging policy and freshness tiers |
//! | [`store`] | Run store trait, SQLite and in-memory backends |
//! | [`pipeline`] | Run orchestration and persistence |
//! | [`report`] | Summary counts |
//! | [`progress`] | Progress reporting on stderr |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod aggregate;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod selector;
pub mod store;
pub mod transport;
pub mod whatupdated;
