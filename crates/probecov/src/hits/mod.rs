//! Hit records: what an instrumented process counted for one method.
//!
//! - [`recorder`] - in-process counters behind per-method locks
//! - [`reader`] - aggregation of flushed hits files

pub mod reader;
pub mod recorder;

pub use reader::{AggregatedHits, HitsReader, HITS_EXTENSION};
pub use recorder::{HitRecorder, RecordState};

use crate::ids::PointId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Identity hits are merged under
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HitIdentity {
    /// Assembly name
    pub assembly: String,
    /// Class name
    pub class: String,
    /// Method signature
    pub method: String,
    /// Location the instrumented assembly was loaded from
    pub location: PathBuf,
}

/// Per-point hit counts of one method in one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitRecord {
    /// Identity
    pub identity: HitIdentity,
    /// Running total of all hits
    pub counter: u64,
    /// Hits per point id
    pub hits: BTreeMap<PointId, u64>,
}

impl HitRecord {
    /// Record with no hits
    #[must_use]
    pub const fn new(identity: HitIdentity) -> Self {
        Self {
            identity,
            counter: 0,
            hits: BTreeMap::new(),
        }
    }

    /// Count one execution of `point`
    pub fn record(&mut self, point: PointId) {
        let count = self.hits.entry(point).or_insert(0);
        *count = count.saturating_add(1);
        self.counter = self.counter.saturating_add(1);
    }

    /// Hits of `point`
    #[must_use]
    pub fn count(&self, point: PointId) -> u64 {
        self.hits.get(&point).copied().unwrap_or(0)
    }

    /// Sum of the per-point counts
    #[must_use]
    pub fn sum_of_points(&self) -> u64 {
        self.hits.values().fold(0_u64, |acc, c| acc.saturating_add(*c))
    }

    /// Whether the running total matches the per-point counts
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.counter == self.sum_of_points()
    }

    /// Add another record's counts into this one
    pub fn merge(&mut self, other: &Self) {
        for (point, count) in &other.hits {
            let mine = self.hits.entry(*point).or_insert(0);
            *mine = mine.saturating_add(*count);
        }
        self.counter = self.counter.saturating_add(other.counter);
    }
}

#[cfg(test)]
pub(crate) fn identity(method: &str) -> HitIdentity {
    HitIdentity {
        assembly: "Calc".to_string(),
        class: "Calc.Math".to_string(),
        method: method.to_string(),
        location: PathBuf::from("/tmp/probecov/calc.pcbm"),
    }
}
