//! Files a run meaningfully exercised.

use super::{Grouping, SummaryGrid, Threshold};
use crate::hits::AggregatedHits;
use crate::model::InstrumentationResult;
use std::path::PathBuf;

/// Line coverage a file needs to count as impacting
pub const IMPACTING_THRESHOLD: f64 = 0.9;

/// Source files that pass [`IMPACTING_THRESHOLD`] and have a covered branch
#[must_use]
pub fn impacting_files(result: &InstrumentationResult, hits: &AggregatedHits) -> Vec<PathBuf> {
    let grid = SummaryGrid::build(result, hits, Threshold::default());
    grid.rows(Grouping::File)
        .into_iter()
        .filter(|row| row.pass && row.summary.covered_branches > 0)
        .flat_map(|row| row.source_files)
        .collect()
}
