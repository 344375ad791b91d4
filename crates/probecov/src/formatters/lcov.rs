//! LCOV Report Formatter
//!
//! ```text
//! TN:<test name>
//! SF:<source file>
//! FN:<line>,<function name>
//! FNDA:<execution count>,<function name>
//! FNF:<functions found>
//! FNH:<functions hit>
//! DA:<line>,<execution count>
//! LF:<lines found>
//! LH:<lines hit>
//! BRDA:<line>,<block>,<branch>,<taken>
//! BRF:<branches found>
//! BRH:<branches hit>
//! end_of_record
//! ```

use crate::result::ProbecovResult;
use crate::summary::{GridPoint, SummaryGrid};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// LCOV format report generator
#[derive(Debug)]
pub struct LcovFormatter<'a> {
    grid: &'a SummaryGrid,
    test_name: Option<String>,
}

impl<'a> LcovFormatter<'a> {
    /// Create a new LCOV formatter from a coverage grid
    #[must_use]
    pub const fn new(grid: &'a SummaryGrid) -> Self {
        Self {
            grid,
            test_name: None,
        }
    }

    /// Set the test name for the report
    #[must_use]
    pub fn with_test_name(mut self, name: impl Into<String>) -> Self {
        self.test_name = Some(name.into());
        self
    }

    /// Generate LCOV format report as a string
    #[must_use]
    pub fn generate(&self) -> String {
        use std::fmt::Write;

        let mut output = String::new();
        let _ = writeln!(output, "TN:{}", self.test_name.as_deref().unwrap_or(""));

        for (file, points) in self.group_by_file() {
            let _ = writeln!(output, "SF:{}", file.display());

            // First point of each method is its entry
            let mut functions: BTreeMap<String, (u32, u64)> = BTreeMap::new();
            for point in &points {
                functions
                    .entry(format!("{}::{}", point.class, point.method))
                    .or_insert((point.line, point.hits));
            }
            let mut functions_hit = 0;
            for (name, (line, _)) in &functions {
                let _ = writeln!(output, "FN:{line},{name}");
            }
            for (name, (_, count)) in &functions {
                let _ = writeln!(output, "FNDA:{count},{name}");
                if *count > 0 {
                    functions_hit += 1;
                }
            }
            let _ = writeln!(output, "FNF:{}", functions.len());
            let _ = writeln!(output, "FNH:{functions_hit}");

            // A line counts as often as its busiest statement
            let mut lines: BTreeMap<u32, u64> = BTreeMap::new();
            for point in points.iter().filter(|p| !p.is_branch) {
                let count = lines.entry(point.line).or_insert(0);
                *count = (*count).max(point.hits);
            }
            for (line, count) in &lines {
                let _ = writeln!(output, "DA:{line},{count}");
            }
            let _ = writeln!(output, "LF:{}", lines.len());
            let _ = writeln!(output, "LH:{}", lines.values().filter(|c| **c > 0).count());

            let branches: Vec<&&GridPoint> = points.iter().filter(|p| p.is_branch).collect();
            let mut blocks: BTreeMap<u32, usize> = BTreeMap::new();
            for point in &branches {
                let branch = blocks.entry(point.line).or_insert(0);
                let taken = if point.hits > 0 {
                    point.hits.to_string()
                } else {
                    "-".to_string()
                };
                let _ = writeln!(output, "BRDA:{},0,{},{taken}", point.line, *branch);
                *branch += 1;
            }
            let _ = writeln!(output, "BRF:{}", branches.len());
            let _ = writeln!(output, "BRH:{}", branches.iter().filter(|p| p.hits > 0).count());

            output.push_str("end_of_record\n");
        }

        output
    }

    /// Save the LCOV report to a file
    ///
    /// # Errors
    ///
    /// Returns error if file write fails
    pub fn save(&self, path: &Path) -> ProbecovResult<()> {
        std::fs::write(path, self.generate())?;
        Ok(())
    }

    fn group_by_file(&self) -> BTreeMap<PathBuf, Vec<&'a GridPoint>> {
        let grid: &'a SummaryGrid = self.grid;
        let mut files: BTreeMap<PathBuf, Vec<&GridPoint>> = BTreeMap::new();
        for file in grid.source_files() {
            files.entry(file.path.clone()).or_default();
        }
        for point in grid.points() {
            files.entry(point.file.path.clone()).or_default().push(point);
        }
        files
    }
}
