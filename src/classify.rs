//! Freshness classification against a dataset's declared cadence.
//!
//! A dataset with a numeric cadence of `n` days is aged by comparing the
//! time elapsed since its last modification with three thresholds taken
//! from an [`AgingPolicy`]:
//!
//! ```text
//!   0 ──── due ──── overdue ──── delinquent ────▶ elapsed
//!   Fresh       Due         Overdue          Delinquent
//! ```
//!
//! Live, never-updated, and as-needed datasets are not aged. Datasets
//! without a usable cadence are [`Freshness::Unavailable`].

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};

use crate::config::AgingConfig;
use crate::models::{Freshness, UpdateFrequency};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Largest accepted fallback multiplier. Any `u32` cadence scaled by it
/// stays within the range of [`Duration`].
pub const MAX_FALLBACK_MULTIPLIER: f64 = 20.0;

/// Elapsed-time boundaries for one cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgingThresholds {
    pub due: Duration,
    pub overdue: Duration,
    pub delinquent: Duration,
}

impl AgingThresholds {
    pub fn from_days(due: u32, overdue: u32, delinquent: u32) -> Self {
        Self {
            due: Duration::days(i64::from(due)),
            overdue: Duration::days(i64::from(overdue)),
            delinquent: Duration::days(i64::from(delinquent)),
        }
    }

    fn tier(&self, elapsed: Duration) -> Freshness {
        if elapsed >= self.delinquent {
            Freshness::Delinquent
        } else if elapsed >= self.overdue {
            Freshness::Overdue
        } else if elapsed >= self.due {
            Freshness::Due
        } else {
            Freshness::Fresh
        }
    }
}

/// Multipliers of the cadence used for cadences absent from the table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgingMultipliers {
    pub due: f64,
    pub overdue: f64,
    pub delinquent: f64,
}

impl AgingMultipliers {
    fn thresholds(&self, days: u32) -> AgingThresholds {
        let scaled = |factor: f64| {
            Duration::seconds((f64::from(days) * factor * SECONDS_PER_DAY).round() as i64)
        };
        AgingThresholds {
            due: scaled(self.due),
            overdue: scaled(self.overdue),
            delinquent: scaled(self.delinquent),
        }
    }
}

/// Validated aging table.
#[derive(Debug, Clone, PartialEq)]
pub struct AgingPolicy {
    cadences: BTreeMap<u32, AgingThresholds>,
    fallback: AgingMultipliers,
}

impl AgingPolicy {
    /// Build a policy from the `[aging]` config section.
    ///
    /// # Errors
    ///
    /// Returns an error if a cadence key is not a positive integer, if any
    /// threshold is zero, if `due <= overdue <= delinquent` does not hold, or
    /// if a fallback multiplier exceeds [`MAX_FALLBACK_MULTIPLIER`].
    pub fn from_config(config: &AgingConfig) -> Result<Self> {
        let mut cadences = BTreeMap::new();
        for (key, t) in &config.cadences {
            let days: u32 = match key.trim().parse() {
                Ok(d) if d > 0 => d,
                _ => bail!("aging cadence '{}' must be a positive number of days", key),
            };
            if t.due == 0 || t.due > t.overdue || t.overdue > t.delinquent {
                bail!(
                    "aging thresholds for cadence {} must satisfy 0 < due <= overdue <= delinquent (got {}/{}/{})",
                    days,
                    t.due,
                    t.overdue,
                    t.delinquent
                );
            }
            cadences.insert(
                days,
                AgingThresholds::from_days(t.due, t.overdue, t.delinquent),
            );
        }

        let f = &config.fallback;
        let ordered = f.due > 0.0 && f.due <= f.overdue && f.overdue <= f.delinquent;
        if !(f.due.is_finite() && f.overdue.is_finite() && f.delinquent.is_finite()) || !ordered {
            bail!(
                "aging.fallback multipliers must satisfy 0 < due <= overdue <= delinquent (got {}/{}/{})",
                f.due,
                f.overdue,
                f.delinquent
            );
        }
        if f.delinquent > MAX_FALLBACK_MULTIPLIER {
            bail!(
                "aging.fallback multipliers must not exceed {} (got delinquent = {})",
                MAX_FALLBACK_MULTIPLIER,
                f.delinquent
            );
        }

        Ok(Self {
            cadences,
            fallback: AgingMultipliers {
                due: f.due,
                overdue: f.overdue,
                delinquent: f.delinquent,
            },
        })
    }

    /// Thresholds for a cadence of `days`, falling back to multipliers.
    pub fn thresholds(&self, days: u32) -> AgingThresholds {
        self.cadences
            .get(&days)
            .copied()
            .unwrap_or_else(|| self.fallback.thresholds(days))
    }

    /// Classify a dataset.
    ///
    /// Deterministic in its inputs: the same `(update_frequency,
    /// last_modified, now)` always yields the same verdict.
    pub fn classify(
        &self,
        update_frequency: Option<UpdateFrequency>,
        last_modified: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Freshness {
        match update_frequency {
            None | Some(UpdateFrequency::Days(0)) => Freshness::Unavailable,
            Some(UpdateFrequency::Live | UpdateFrequency::Never | UpdateFrequency::Adhoc) => {
                Freshness::Fresh
            }
            Some(UpdateFrequency::Days(days)) => self.thresholds(days).tier(now - last_modified),
        }
    }
}

impl Default for AgingPolicy {
    fn default() -> Self {
        // The default config is validated by the tests below.
        Self::from_config(&AgingConfig::default()).unwrap_or_else(|_| Self {
            cadences: BTreeMap::new(),
            fallback: AgingMultipliers {
                due: 1.0,
                overdue: 1.5,
                delinquent: 2.0,
            },
        })
    }
}
