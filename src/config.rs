//! TOML configuration parsing and validation.
//!
//! Only `[db]` is required. Every other section falls back to defaults that
//! match the catalog operator's production settings.
//!
//! ```toml
//! [db]
//! path = "./data/freshness.sqlite"
//!
//! [catalog]
//! snapshot = "./data/catalog.json"
//!
//! [freshness]
//! workers = 32
//! internal_hosts = ["data.humdata.org", "*.data.humdata.org"]
//!
//! [http]
//! timeout_secs = 30
//!
//! [aging.cadences.7]
//! due = 7
//! overdue = 14
//! delinquent = 21
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::classify::AgingPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub aging: AgingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CatalogConfig {
    /// JSON catalog snapshot used when `fresh run` gets no `--catalog`.
    #[serde(default)]
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FreshnessConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_internal_hosts")]
    pub internal_hosts: Vec<String>,
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            internal_hosts: default_internal_hosts(),
            run_deadline_secs: None,
        }
    }
}

fn default_workers() -> usize {
    32
}
fn default_internal_hosts() -> Vec<String> {
    vec![
        "data.humdata.org".to_string(),
        "*.data.humdata.org".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_content_bytes: default_max_content_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_content_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_user_agent() -> String {
    format!("data-freshness/{}", env!("CARGO_PKG_VERSION"))
}

/// Day thresholds for one cadence.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AgingThresholdsConfig {
    pub due: u32,
    pub overdue: u32,
    pub delinquent: u32,
}

/// Multipliers of the cadence for cadences missing from the table.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct AgingFallbackConfig {
    #[serde(default = "default_due_factor")]
    pub due: f64,
    #[serde(default = "default_overdue_factor")]
    pub overdue: f64,
    #[serde(default = "default_delinquent_factor")]
    pub delinquent: f64,
}

impl Default for AgingFallbackConfig {
    fn default() -> Self {
        Self {
            due: default_due_factor(),
            overdue: default_overdue_factor(),
            delinquent: default_delinquent_factor(),
        }
    }
}

fn default_due_factor() -> f64 {
    1.0
}
fn default_overdue_factor() -> f64 {
    1.5
}
fn default_delinquent_factor() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgingConfig {
    /// Keyed by cadence in days (TOML keys are strings).
    #[serde(default = "default_cadences")]
    pub cadences: BTreeMap<String, AgingThresholdsConfig>,
    #[serde(default)]
    pub fallback: AgingFallbackConfig,
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            cadences: default_cadences(),
            fallback: AgingFallbackConfig::default(),
        }
    }
}

fn default_cadences() -> BTreeMap<String, AgingThresholdsConfig> {
    [
        (1, 1, 2, 3),
        (7, 7, 14, 21),
        (14, 14, 21, 28),
        (30, 30, 44, 60),
        (90, 90, 120, 150),
        (180, 180, 210, 240),
        (365, 365, 425, 455),
    ]
    .into_iter()
    .map(|(cadence, due, overdue, delinquent)| {
        (
            cadence.to_string(),
            AgingThresholdsConfig {
                due,
                overdue,
                delinquent,
            },
        )
    })
    .collect()
}

impl Config {
    /// Defaults everywhere, with the database at `db_path`.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            catalog: CatalogConfig::default(),
            freshness: FreshnessConfig::default(),
            http: HttpConfig::default(),
            aging: AgingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.freshness.workers == 0 {
        anyhow::bail!("freshness.workers must be > 0");
    }

    if config.freshness.run_deadline_secs == Some(0) {
        anyhow::bail!("freshness.run_deadline_secs must be > 0 when set");
    }

    if config.http.timeout_secs == 0 {
        anyhow::bail!("http.timeout_secs must be > 0");
    }

    if config.http.max_content_bytes == 0 {
        anyhow::bail!("http.max_content_bytes must be > 0");
    }

    // Surfaces bad globs and unordered thresholds at load time
    crate::selector::build_host_matcher(&config.freshness.internal_hosts)?;
    AgingPolicy::from_config(&config.aging)?;

    Ok(())
}
