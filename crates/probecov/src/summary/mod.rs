//! Coverage Summary Engine
//!
//! Joins the instrumentation map with aggregated hits. The grid keeps every
//! probe with its merged count; rows are projections computed on demand.

pub mod impacting;

pub use impacting::{impacting_files, IMPACTING_THRESHOLD};

use crate::hits::AggregatedHits;
use crate::model::{InstrumentationResult, SourceFile};
use crate::result::{ProbecovError, ProbecovResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Minimum line coverage, as a fraction in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Threshold(f64);

impl Threshold {
    /// Validate a fraction
    pub fn new(fraction: f64) -> ProbecovResult<Self> {
        if fraction.is_finite() && (0.0..=1.0).contains(&fraction) {
            Ok(Self(fraction))
        } else {
            Err(ProbecovError::InvalidThreshold { value: fraction })
        }
    }

    /// Validate a percentage in [0, 100]
    pub fn from_percent(percent: f64) -> ProbecovResult<Self> {
        if !(percent.is_finite() && (0.0..=100.0).contains(&percent)) {
            return Err(ProbecovError::InvalidThreshold { value: percent });
        }
        Self::new(percent / 100.0)
    }

    /// Fraction
    #[must_use]
    pub const fn fraction(self) -> f64 {
        self.0
    }

    /// Percentage
    #[must_use]
    pub fn percent(self) -> f64 {
        self.0 * 100.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(IMPACTING_THRESHOLD)
    }
}

/// Point counts of one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Summary {
    /// Statement points
    pub total_lines: usize,
    /// Statement points hit at least once
    pub covered_lines: usize,
    /// Branch points
    pub total_branches: usize,
    /// Branch points hit at least once
    pub covered_branches: usize,
}

impl Summary {
    fn add(&mut self, point: &GridPoint) {
        let covered = usize::from(point.hits > 0);
        if point.is_branch {
            self.total_branches += 1;
            self.covered_branches += covered;
        } else {
            self.total_lines += 1;
            self.covered_lines += covered;
        }
    }

    /// Covered fraction of statement points; 1 when there are none
    #[must_use]
    pub fn line_percentage(&self) -> f64 {
        ratio(self.covered_lines, self.total_lines)
    }

    /// Covered fraction of branch points; 1 when there are none
    #[must_use]
    pub fn branch_percentage(&self) -> f64 {
        ratio(self.covered_branches, self.total_branches)
    }

    /// Covered fraction of all points; 1 when there are none
    #[must_use]
    pub fn statement_and_branch_percentage(&self) -> f64 {
        ratio(
            self.covered_lines + self.covered_branches,
            self.total_lines + self.total_branches,
        )
    }
}

fn ratio(covered: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        covered as f64 / total as f64
    }
}

/// How rows are grouped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    /// One row for everything
    Total,
    /// Per assembly
    Assembly,
    /// Per source folder
    Folder,
    /// Per source file
    File,
    /// Per class
    Class,
    /// Per method
    Method,
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Total => "total",
            Self::Assembly => "assembly",
            Self::Folder => "folder",
            Self::File => "file",
            Self::Class => "class",
            Self::Method => "method",
        };
        f.write_str(name)
    }
}

impl FromStr for Grouping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "total" => Ok(Self::Total),
            "assembly" => Ok(Self::Assembly),
            "folder" => Ok(Self::Folder),
            "file" => Ok(Self::File),
            "class" => Ok(Self::Class),
            "method" => Ok(Self::Method),
            other => Err(format!("unknown grouping '{other}'")),
        }
    }
}

/// One row of a coverage grid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    /// Grouping the row belongs to
    pub grouping: Grouping,
    /// Row label
    pub name: String,
    /// Counts
    pub summary: Summary,
    /// Covered fraction of statement points
    pub line_percentage: f64,
    /// Covered fraction of branch points
    pub branch_percentage: f64,
    /// Line coverage meets the threshold
    pub pass: bool,
    /// Branch coverage meets the threshold
    pub branch_pass: bool,
    /// Source files contributing to the row
    pub source_files: Vec<PathBuf>,
}

impl SummaryRow {
    fn new(grouping: Grouping, name: String, summary: Summary, files: BTreeSet<PathBuf>, threshold: Threshold) -> Self {
        let line_percentage = summary.line_percentage();
        let branch_percentage = summary.branch_percentage();
        Self {
            grouping,
            name,
            summary,
            line_percentage,
            branch_percentage,
            pass: line_percentage >= threshold.fraction(),
            branch_pass: branch_percentage >= threshold.fraction(),
            source_files: files.into_iter().collect(),
        }
    }
}

/// A probe with its aggregated count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridPoint {
    /// Assembly name
    pub assembly: String,
    /// Class name
    pub class: String,
    /// Method signature
    pub method: String,
    /// Source file
    pub file: Arc<SourceFile>,
    /// First source line
    pub line: u32,
    /// Branch point
    pub is_branch: bool,
    /// Aggregated hits
    pub hits: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct MethodName {
    assembly: String,
    class: String,
    method: String,
}

/// Every probe of a baseline joined with its hits
#[derive(Debug, Clone)]
pub struct SummaryGrid {
    threshold: Threshold,
    source_root: PathBuf,
    files: Vec<Arc<SourceFile>>,
    methods: Vec<MethodName>,
    points: Vec<GridPoint>,
}

impl SummaryGrid {
    /// Join `result` with `hits`
    #[must_use]
    pub fn build(result: &InstrumentationResult, hits: &AggregatedHits, threshold: Threshold) -> Self {
        let index = hits.counts_by_method();
        let none = BTreeMap::new();
        let mut methods = Vec::new();
        let mut points = Vec::with_capacity(result.instruction_count());
        for method in result.methods() {
            let counts = index
                .get(&(method.assembly.as_str(), method.class.as_str(), method.signature.as_str()))
                .unwrap_or(&none);
            methods.push(MethodName {
                assembly: method.assembly.clone(),
                class: method.class.clone(),
                method: method.signature.clone(),
            });
            for instruction in &method.instructions {
                points.push(GridPoint {
                    assembly: method.assembly.clone(),
                    class: method.class.clone(),
                    method: method.signature.clone(),
                    file: Arc::clone(&instruction.file),
                    line: instruction.range.start_line,
                    is_branch: instruction.is_branch,
                    hits: counts.get(&instruction.id).copied().unwrap_or(0),
                });
            }
        }
        Self {
            threshold,
            source_root: result.source_root.clone(),
            files: result.source_files().cloned().collect(),
            methods,
            points,
        }
    }

    /// Threshold rows are judged against
    #[must_use]
    pub const fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Every probe
    #[must_use]
    pub fn points(&self) -> &[GridPoint] {
        &self.points
    }

    /// Source files of the baseline
    #[must_use]
    pub fn source_files(&self) -> &[Arc<SourceFile>] {
        &self.files
    }

    /// Root relative paths are reported against
    #[must_use]
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// The single total row
    #[must_use]
    pub fn total(&self) -> SummaryRow {
        let mut summary = Summary::default();
        for point in &self.points {
            summary.add(point);
        }
        let files = self.files.iter().map(|f| f.path.clone()).collect();
        SummaryRow::new(Grouping::Total, "Total".to_string(), summary, files, self.threshold)
    }

    /// Whether total line coverage meets the threshold
    #[must_use]
    pub fn passes(&self) -> bool {
        self.total().pass
    }

    /// Rows of one grouping, ordered by name
    #[must_use]
    pub fn rows(&self, grouping: Grouping) -> Vec<SummaryRow> {
        if grouping == Grouping::Total {
            return vec![self.total()];
        }

        let mut groups: BTreeMap<String, (Summary, BTreeSet<PathBuf>)> = BTreeMap::new();
        match grouping {
            Grouping::Folder | Grouping::File => {
                for file in &self.files {
                    let entry = groups.entry(self.file_key(&file.path, grouping)).or_default();
                    entry.1.insert(file.path.clone());
                }
            }
            Grouping::Assembly | Grouping::Class | Grouping::Method => {
                for method in &self.methods {
                    let key = match grouping {
                        Grouping::Assembly => method.assembly.clone(),
                        Grouping::Class => method.class.clone(),
                        _ => format!("{}::{}", method.class, method.method),
                    };
                    groups.entry(key).or_default();
                }
            }
            Grouping::Total => {}
        }

        for point in &self.points {
            let key = match grouping {
                Grouping::Assembly => point.assembly.clone(),
                Grouping::Folder | Grouping::File => self.file_key(&point.file.path, grouping),
                Grouping::Class => point.class.clone(),
                Grouping::Method => format!("{}::{}", point.class, point.method),
                Grouping::Total => String::new(),
            };
            let entry = groups.entry(key).or_default();
            entry.0.add(point);
            entry.1.insert(point.file.path.clone());
        }

        groups
            .into_iter()
            .map(|(name, (summary, files))| SummaryRow::new(grouping, name, summary, files, self.threshold))
            .collect()
    }

    fn file_key(&self, path: &Path, grouping: Grouping) -> String {
        if grouping == Grouping::File {
            self.relative_name(path)
        } else {
            self.folder_name(path)
        }
    }

    /// Path relative to the source root, as shown in file rows
    #[must_use]
    pub fn relative_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.source_root)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    /// Folder of a path relative to the source root, `.` for the root itself
    #[must_use]
    pub fn folder_name(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.source_root).unwrap_or(path);
        match relative.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.display().to_string(),
            _ => ".".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hits::{HitIdentity, HitRecord};
    use crate::ids::PointId;
    use crate::model::fixtures::{assembly, instruction, method};

    fn baseline() -> InstrumentationResult {
        let file = SourceFile::shared("/repo/src/Calc.cs");
        let mut instructions: Vec<_> = (1..=10).map(|i| instruction(i, &file, i, false)).collect();
        instructions.push(instruction(11, &file, 3, true));
        instructions.push(instruction(12, &file, 3, true));
        let mut result = InstrumentationResult::new("/hits", "/repo");
        result.add_assembly(assembly("Calc", vec![method("Calc", "Calc.Math", "Int32 Abs(Int32)", instructions)]));
        result
    }

    fn hits_for(points: &[u32]) -> AggregatedHits {
        let mut record = HitRecord::new(HitIdentity {
            assembly: "Calc".to_string(),
            class: "Calc.Math".to_string(),
            method: "Int32 Abs(Int32)".to_string(),
            location: PathBuf::from("/tmp/probecov/x.pcbm"),
        });
        for p in points {
            record.record(PointId::new(*p));
        }
        AggregatedHits::from_records([record])
    }

    #[test]
    fn test_no_hits_fails_threshold() {
        let grid = SummaryGrid::build(&baseline(), &AggregatedHits::new(), Threshold::new(0.9).unwrap());
        let total = grid.total();
        assert_eq!(total.summary.total_lines, 10);
        assert_eq!(total.summary.covered_lines, 0);
        assert_eq!(total.summary.total_branches, 2);
        assert_eq!(total.summary.covered_branches, 0);
        assert!(!total.pass);
        assert!(!grid.passes());
    }

    #[test]
    fn test_partial_hits() {
        let hits = hits_for(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 11]);
        let grid = SummaryGrid::build(&baseline(), &hits, Threshold::from_percent(90.0).unwrap());
        let total = grid.total();
        assert_eq!(total.summary.covered_lines, 9);
        assert!((total.line_percentage - 0.9).abs() < 1e-12);
        assert!(total.pass);
        assert_eq!(total.branch_percentage, 0.5);
        assert!(!total.branch_pass);
    }

    #[test]
    fn test_empty_baseline_is_vacuous_pass() {
        let result = InstrumentationResult::new("/hits", "/repo");
        let grid = SummaryGrid::build(&result, &AggregatedHits::new(), Threshold::new(1.0).unwrap());
        let total = grid.total();
        assert_eq!(total.line_percentage, 1.0);
        assert!(total.pass);
    }

    #[test]
    fn test_method_without_points_is_vacuous_pass() {
        let mut result = baseline();
        result.add_assembly(assembly("Empty", vec![method("Empty", "E", "Void F()", Vec::new())]));
        let grid = SummaryGrid::build(&result, &AggregatedHits::new(), Threshold::new(1.0).unwrap());
        let rows = grid.rows(Grouping::Method);
        let empty = rows.iter().find(|r| r.name == "E::Void F()").unwrap();
        assert!(empty.pass);
        assert_eq!(empty.line_percentage, 1.0);
        let assemblies = grid.rows(Grouping::Assembly);
        assert_eq!(assemblies.len(), 2);
    }

    #[test]
    fn test_grouping_by_file_and_folder() {
        let a = SourceFile::shared("/repo/src/A.cs");
        let b = SourceFile::shared("/repo/src/util/B.cs");
        let c = SourceFile::shared("/repo/C.cs");
        let mut result = InstrumentationResult::new("/hits", "/repo");
        result.add_assembly(assembly(
            "Calc",
            vec![method(
                "Calc",
                "Calc.Math",
                "Void F()",
                vec![instruction(1, &a, 1, false), instruction(2, &b, 1, false), instruction(3, &c, 1, false)],
            )],
        ));
        let grid = SummaryGrid::build(&result, &AggregatedHits::new(), Threshold::default());

        let files: Vec<_> = grid.rows(Grouping::File).into_iter().map(|r| r.name).collect();
        assert_eq!(files, vec!["C.cs", "src/A.cs", "src/util/B.cs"]);
        let folders: Vec<_> = grid.rows(Grouping::Folder).into_iter().map(|r| r.name).collect();
        assert_eq!(folders, vec![".", "src", "src/util"]);

        // rows are projections; the grid is unchanged
        assert_eq!(grid.points().len(), 3);
        assert_eq!(grid.rows(Grouping::Total).len(), 1);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Threshold::new(1.5).is_err());
        assert!(Threshold::new(f64::NAN).is_err());
        assert!(Threshold::from_percent(-1.0).is_err());
        assert!(Threshold::from_percent(101.0).is_err());
        assert_eq!(Threshold::from_percent(75.0).unwrap().fraction(), 0.75);
    }

    #[test]
    fn test_grouping_parse() {
        assert_eq!("Folder".parse::<Grouping>(), Ok(Grouping::Folder));
        assert!("nope".parse::<Grouping>().is_err());
        assert_eq!(Grouping::Method.to_string(), "method");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_zero_points_always_pass(threshold in 0.0_f64..=1.0) {
                let result = InstrumentationResult::new("/hits", "/repo");
                let grid = SummaryGrid::build(&result, &AggregatedHits::new(), Threshold::new(threshold).unwrap());
                prop_assert!(grid.passes());
            }

            #[test]
            fn prop_percentages_bounded(points in prop::collection::vec(1_u32..=12, 0..30)) {
                let grid = SummaryGrid::build(&baseline(), &hits_for(&points), Threshold::default());
                for grouping in [Grouping::Total, Grouping::File, Grouping::Class, Grouping::Method] {
                    for row in grid.rows(grouping) {
                        prop_assert!((0.0..=1.0).contains(&row.line_percentage));
                        prop_assert!(row.summary.covered_lines <= row.summary.total_lines);
                    }
                }
            }
        }
    }
}
