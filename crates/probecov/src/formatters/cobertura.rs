//! Cobertura XML Coverage Report Formatter
//!
//! Packages are source folders, classes are classes per source file.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <!DOCTYPE coverage SYSTEM "http://cobertura.sourceforge.net/xml/coverage-04.dtd">
//! <coverage line-rate="0.8" branch-rate="0.5" version="0.4.0" timestamp="...">
//!   <sources><source>/repo</source></sources>
//!   <packages>
//!     <package name="src" line-rate="0.8" branch-rate="0.5" complexity="0">
//!       <classes>
//!         <class name="Game.Loop" filename="src/Game.cs" line-rate="0.75" branch-rate="0.5" complexity="0">
//!           <methods/>
//!           <lines>
//!             <line number="11" hits="2" branch="true" condition-coverage="50% (1/2)"/>
//!           </lines>
//!         </class>
//!       </classes>
//!     </package>
//!   </packages>
//! </coverage>
//! ```

use crate::result::ProbecovResult;
use crate::summary::{GridPoint, SummaryGrid};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

/// (class, relative file) → points
type ClassMap<'a> = BTreeMap<(String, String), Vec<&'a GridPoint>>;

/// Packages grouped by folder
type PackageMap<'a> = BTreeMap<String, ClassMap<'a>>;

/// Per-line aggregation: (hits, branches, covered branches)
type LineMap = BTreeMap<u32, (u64, usize, usize)>;

/// Cobertura XML format report generator
#[derive(Debug)]
pub struct CoberturaFormatter<'a> {
    grid: &'a SummaryGrid,
    version: String,
    timestamp: i64,
}

impl<'a> CoberturaFormatter<'a> {
    /// Create a new Cobertura formatter
    #[must_use]
    pub fn new(grid: &'a SummaryGrid) -> Self {
        Self {
            grid,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Set the version string
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the report timestamp (seconds since the epoch)
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Generate Cobertura XML report as a string
    #[must_use]
    pub fn generate(&self) -> String {
        let total = self.grid.total().summary;
        let packages = self.group_by_package();

        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(
            r#"<!DOCTYPE coverage SYSTEM "http://cobertura.sourceforge.net/xml/coverage-04.dtd">"#,
        );
        xml.push('\n');
        let _ = writeln!(
            xml,
            r#"<coverage line-rate="{:.4}" branch-rate="{:.4}" lines-covered="{}" lines-valid="{}" branches-covered="{}" branches-valid="{}" complexity="0" version="{}" timestamp="{}">"#,
            total.line_percentage(),
            total.branch_percentage(),
            total.covered_lines,
            total.total_lines,
            total.covered_branches,
            total.total_branches,
            escape(&self.version),
            self.timestamp,
        );
        let _ = writeln!(
            xml,
            "  <sources>\n    <source>{}</source>\n  </sources>",
            escape(&self.grid.source_root().display().to_string())
        );
        xml.push_str("  <packages>\n");

        for (package, classes) in &packages {
            let (line_rate, branch_rate) = rates(classes.values().flatten().copied());
            let _ = writeln!(
                xml,
                r#"    <package name="{}" line-rate="{line_rate:.4}" branch-rate="{branch_rate:.4}" complexity="0">"#,
                escape(package),
            );
            xml.push_str("      <classes>\n");

            for ((class, filename), points) in classes {
                let (line_rate, branch_rate) = rates(points.iter().copied());
                let _ = writeln!(
                    xml,
                    r#"        <class name="{}" filename="{}" line-rate="{line_rate:.4}" branch-rate="{branch_rate:.4}" complexity="0">"#,
                    escape(class),
                    escape(filename),
                );
                xml.push_str("          <methods/>\n");
                xml.push_str("          <lines>\n");
                for (line, (hits, branches, covered)) in Self::extract_lines(points) {
                    if branches == 0 {
                        let _ = writeln!(xml, r#"            <line number="{line}" hits="{hits}" branch="false"/>"#);
                    } else {
                        let percent = covered * 100 / branches;
                        let _ = writeln!(
                            xml,
                            r#"            <line number="{line}" hits="{hits}" branch="true" condition-coverage="{percent}% ({covered}/{branches})"/>"#
                        );
                    }
                }
                xml.push_str("          </lines>\n");
                xml.push_str("        </class>\n");
            }

            xml.push_str("      </classes>\n");
            xml.push_str("    </package>\n");
        }

        xml.push_str("  </packages>\n");
        xml.push_str("</coverage>\n");
        xml
    }

    /// Save the Cobertura report to a file
    ///
    /// # Errors
    ///
    /// Returns error if file write fails
    pub fn save(&self, path: &Path) -> ProbecovResult<()> {
        std::fs::write(path, self.generate())?;
        Ok(())
    }

    fn group_by_package(&self) -> PackageMap<'a> {
        let grid: &'a SummaryGrid = self.grid;
        let mut packages: PackageMap<'a> = BTreeMap::new();
        for point in grid.points() {
            packages
                .entry(grid.folder_name(&point.file.path))
                .or_default()
                .entry((point.class.clone(), grid.relative_name(&point.file.path)))
                .or_default()
                .push(point);
        }
        packages
    }

    fn extract_lines(points: &[&GridPoint]) -> LineMap {
        let mut lines: LineMap = BTreeMap::new();
        for point in points {
            let entry = lines.entry(point.line).or_insert((0, 0, 0));
            if point.is_branch {
                entry.1 += 1;
                entry.2 += usize::from(point.hits > 0);
            } else {
                entry.0 = entry.0.max(point.hits);
            }
        }
        lines
    }
}

fn rates<'p>(points: impl Iterator<Item = &'p GridPoint>) -> (f64, f64) {
    let (mut lines, mut lines_hit, mut branches, mut branches_hit) = (0_usize, 0_usize, 0_usize, 0_usize);
    for point in points {
        if point.is_branch {
            branches += 1;
            branches_hit += usize::from(point.hits > 0);
        } else {
            lines += 1;
            lines_hit += usize::from(point.hits > 0);
        }
    }
    let rate = |hit: usize, total: usize| if total == 0 { 1.0 } else { hit as f64 / total as f64 };
    (rate(lines_hit, lines), rate(branches_hit, branches))
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
