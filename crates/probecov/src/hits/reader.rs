//! Hits Aggregator
//!
//! Folds every hits file of a directory into one record per method identity.
//! Files are parsed on scoped worker threads; merging is a commutative sum so
//! the order files are read in never shows in the result.

use super::{HitIdentity, HitRecord};
use crate::ids::PointId;
use crate::result::{ProbecovError, ProbecovResult};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Extension of flushed hits files
pub const HITS_EXTENSION: &str = "hits";

/// Hits merged by method identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedHits {
    records: BTreeMap<HitIdentity, HitRecord>,
}

impl AggregatedHits {
    /// No hits
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge records in any order
    pub fn from_records(records: impl IntoIterator<Item = HitRecord>) -> Self {
        let mut hits = Self::new();
        for record in records {
            hits.add(record);
        }
        hits
    }

    /// Merge one record
    pub fn add(&mut self, record: HitRecord) {
        match self.records.get_mut(&record.identity) {
            Some(existing) => existing.merge(&record),
            None => {
                self.records.insert(record.identity.clone(), record);
            }
        }
    }

    /// Merge another aggregate
    pub fn extend(&mut self, other: Self) {
        for record in other.records.into_values() {
            self.add(record);
        }
    }

    /// Merged records, ordered by identity
    pub fn records(&self) -> impl Iterator<Item = &HitRecord> {
        self.records.values()
    }

    /// Record of one identity
    #[must_use]
    pub fn get(&self, identity: &HitIdentity) -> Option<&HitRecord> {
        self.records.get(identity)
    }

    /// Per-point counts of a method across every location it was loaded from
    #[must_use]
    pub fn counts_for(&self, assembly: &str, class: &str, method: &str) -> BTreeMap<PointId, u64> {
        let mut counts = BTreeMap::new();
        for record in self.records.values().filter(|r| {
            r.identity.assembly == assembly && r.identity.class == class && r.identity.method == method
        }) {
            for (point, count) in &record.hits {
                let total = counts.entry(*point).or_insert(0_u64);
                *total = total.saturating_add(*count);
            }
        }
        counts
    }

    /// [`Self::counts_for`] of every method at once, keyed by
    /// `(assembly, class, method)`
    #[must_use]
    pub fn counts_by_method(&self) -> HashMap<(&str, &str, &str), BTreeMap<PointId, u64>> {
        let mut index: HashMap<(&str, &str, &str), BTreeMap<PointId, u64>> = HashMap::new();
        for record in self.records.values() {
            let id = &record.identity;
            let counts = index
                .entry((id.assembly.as_str(), id.class.as_str(), id.method.as_str()))
                .or_default();
            for (point, count) in &record.hits {
                let total = counts.entry(*point).or_insert(0_u64);
                *total = total.saturating_add(*count);
            }
        }
        index
    }

    /// Number of distinct identities
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing was hit
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Stable JSON rendering, identical for identical contents
    pub fn to_json(&self) -> ProbecovResult<String> {
        let records: Vec<&HitRecord> = self.records.values().collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }
}

/// Reads hits files
#[derive(Debug, Clone, Copy)]
pub struct HitsReader {
    workers: usize,
}

impl Default for HitsReader {
    fn default() -> Self {
        Self::new()
    }
}

impl HitsReader {
    /// Reader with one worker per core
    #[must_use]
    pub fn new() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
        }
    }

    /// Reader with `workers` threads
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Parse one hits file
    ///
    /// # Errors
    ///
    /// [`ProbecovError::HitsFile`] when the file is not a JSON list of
    /// records or a record's running total disagrees with its counts.
    pub fn read_file(path: &Path) -> ProbecovResult<Vec<HitRecord>> {
        let bytes = std::fs::read(path).map_err(|e| ProbecovError::hits_file(path, e.to_string()))?;
        let records: Vec<HitRecord> =
            serde_json::from_slice(&bytes).map_err(|e| ProbecovError::hits_file(path, e.to_string()))?;
        if let Some(bad) = records.iter().find(|r| !r.is_consistent()) {
            return Err(ProbecovError::hits_file(
                path,
                format!(
                    "counter {} of {}::{} disagrees with its point counts ({})",
                    bad.counter,
                    bad.identity.class,
                    bad.identity.method,
                    bad.sum_of_points()
                ),
            ));
        }
        Ok(records)
    }

    /// Hits files of a directory, sorted by path
    pub fn list(directory: &Path) -> ProbecovResult<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == HITS_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Aggregate every hits file in `directory`
    ///
    /// A missing directory means no hits. Malformed files are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Only when the directory exists but cannot be listed.
    pub fn read_directory(&self, directory: &Path) -> ProbecovResult<AggregatedHits> {
        let files = Self::list(directory)?;
        if files.is_empty() {
            tracing::debug!(directory = %directory.display(), "no hits files");
            return Ok(AggregatedHits::new());
        }

        let workers = self.workers.clamp(1, files.len());
        let partials: Vec<AggregatedHits> = std::thread::scope(|s| {
            let joins: Vec<_> = (0..workers)
                .map(|w| {
                    let files = &files;
                    s.spawn(move || {
                        let mut partial = AggregatedHits::new();
                        for path in files.iter().skip(w).step_by(workers) {
                            match Self::read_file(path) {
                                Ok(records) => {
                                    for record in records {
                                        partial.add(record);
                                    }
                                }
                                Err(e) => tracing::warn!("{e}"),
                            }
                        }
                        partial
                    })
                })
                .collect();
            joins
                .into_iter()
                .map(|join| {
                    join.join().unwrap_or_else(|_| {
                        tracing::warn!("hits reader worker panicked");
                        AggregatedHits::new()
                    })
                })
                .collect()
        });

        let mut hits = AggregatedHits::new();
        for partial in partials {
            hits.extend(partial);
        }
        tracing::debug!(files = files.len(), methods = hits.len(), "hits aggregated");
        Ok(hits)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::identity;
    use super::*;

    fn record(method: &str, points: &[(u32, u64)]) -> HitRecord {
        let mut r = HitRecord::new(identity(method));
        for (p, c) in points {
            r.hits.insert(PointId::new(*p), *c);
            r.counter += c;
        }
        r
    }

    fn write_hits(dir: &Path, name: &str, records: &[HitRecord]) {
        std::fs::write(
            dir.join(format!("{name}.hits")),
            serde_json::to_vec(records).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_two_files_same_identity_sum() {
        let dir = tempfile::tempdir().unwrap();
        write_hits(dir.path(), "a", &[record("Void F()", &[(5, 1)])]);
        write_hits(dir.path(), "b", &[record("Void F()", &[(5, 1)])]);

        let hits = HitsReader::with_workers(2).read_directory(dir.path()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits.get(&identity("Void F()")).unwrap().count(PointId::new(5)), 2);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let hits = HitsReader::new().read_directory(&dir.path().join("nope")).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_malformed_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_hits(dir.path(), "good", &[record("Void F()", &[(1, 3)])]);
        std::fs::write(dir.path().join("garbage.hits"), b"{not json").unwrap();
        let mut liar = record("Void G()", &[(1, 1)]);
        liar.counter = 7;
        write_hits(dir.path(), "liar", &[liar, record("Void H()", &[(1, 1)])]);
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let hits = HitsReader::new().read_directory(dir.path()).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.get(&identity("Void F()")).is_some());
    }

    #[test]
    fn test_rerun_is_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6 {
            write_hits(
                dir.path(),
                &format!("run{i}"),
                &[record("Void F()", &[(1, i), (2, 1)]), record("Void G()", &[(3, 2)])],
            );
        }
        let reader = HitsReader::with_workers(3);
        let first = reader.read_directory(dir.path()).unwrap().to_json().unwrap();
        let second = reader.read_directory(dir.path()).unwrap().to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_counts_for_sums_locations() {
        let a = record("Void F()", &[(1, 2)]);
        let mut b = record("Void F()", &[(1, 3), (2, 1)]);
        b.identity.location = PathBuf::from("/elsewhere/calc.pcbm");
        let hits = AggregatedHits::from_records([a, b]);
        assert_eq!(hits.len(), 2);
        let counts = hits.counts_for("Calc", "Calc.Math", "Void F()");
        assert_eq!(counts.get(&PointId::new(1)), Some(&5));
        assert_eq!(counts.get(&PointId::new(2)), Some(&1));
        assert!(hits.counts_for("Calc", "Calc.Math", "Void Z()").is_empty());
    }

    #[test]
    fn test_counts_by_method_matches_counts_for() {
        let a = record("Void F()", &[(1, 2)]);
        let mut b = record("Void F()", &[(1, 3), (2, 1)]);
        b.identity.location = PathBuf::from("/elsewhere/calc.pcbm");
        let g = record("Void G()", &[(4, 9)]);
        let hits = AggregatedHits::from_records([a, b, g]);

        let index = hits.counts_by_method();
        assert_eq!(index.len(), 2);
        for method in ["Void F()", "Void G()"] {
            assert_eq!(
                index.get(&("Calc", "Calc.Math", method)),
                Some(&hits.counts_for("Calc", "Calc.Math", method))
            );
        }
        assert!(index.get(&("Calc", "Calc.Math", "Void Z()")).is_none());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_record() -> impl Strategy<Value = HitRecord> {
            (
                prop::sample::select(vec!["Void F()", "Void G()", "Int32 H(Int32)"]),
                prop::collection::btree_map(1_u32..10, 1_u64..50, 0..6),
            )
                .prop_map(|(method, points)| {
                    let points: Vec<(u32, u64)> = points.into_iter().collect();
                    record(method, &points)
                })
        }

        proptest! {
            #[test]
            fn prop_merge_is_order_independent(
                records in prop::collection::vec(arb_record(), 0..20),
                seed in any::<u64>(),
            ) {
                let forward = AggregatedHits::from_records(records.clone());
                let mut shuffled = records.clone();
                let len = shuffled.len().max(1);
                shuffled.rotate_left((seed as usize) % len);
                shuffled.reverse();
                let backward = AggregatedHits::from_records(shuffled);
                prop_assert_eq!(&forward, &backward);
                prop_assert!(forward.records().all(HitRecord::is_consistent));
            }

            #[test]
            fn prop_split_then_extend_equals_whole(
                records in prop::collection::vec(arb_record(), 0..20),
                split in 0_usize..20,
            ) {
                let split = split.min(records.len());
                let whole = AggregatedHits::from_records(records.clone());
                let mut left = AggregatedHits::from_records(records[..split].to_vec());
                left.extend(AggregatedHits::from_records(records[split..].to_vec()));
                prop_assert_eq!(whole, left);
            }
        }
    }
}
