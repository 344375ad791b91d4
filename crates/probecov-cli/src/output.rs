//! Output formatting and progress reporting

use console::{style, Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use probecov::{SummaryRow, Threshold};
use serde::Serialize;
use std::fmt::Write;

/// Progress reporter for multi-module instrumentation
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    progress_bar: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            progress_bar: None,
            use_color,
            quiet,
        }
    }

    /// Start a progress bar
    pub fn start_progress(&mut self, total: u64, message: &str) {
        if self.quiet {
            return;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(message.to_string());
        self.progress_bar = Some(pb);
    }

    /// Progress bar, when one is running
    #[must_use]
    pub const fn bar(&self) -> Option<&ProgressBar> {
        self.progress_bar.as_ref()
    }

    /// Finish progress bar
    pub fn finish(&self) {
        if let Some(ref pb) = self.progress_bar {
            pb.finish_and_clear();
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }

        let prefix = if self.use_color {
            style("✓").green().bold().to_string()
        } else {
            "OK".to_string()
        };

        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }

        let prefix = if self.use_color {
            style("⚠").yellow().bold().to_string()
        } else {
            "WARN".to_string()
        };

        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }
}

/// Render rows and the total as a console table
#[must_use]
pub fn render_table(rows: &[SummaryRow], total: &SummaryRow, use_color: bool) -> String {
    let header = ["Name", "Lines", "% Lines", "Branches", "% Branches"];
    let mut cells: Vec<[String; 5]> = rows.iter().chain(std::iter::once(total)).map(row_cells).collect();
    cells.insert(0, header.map(String::from));

    let mut widths = [0_usize; 5];
    for row in &cells {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let separator = widths
        .iter()
        .map(|w| "-".repeat(w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let mut out = String::new();
    let _ = writeln!(out, "+{separator}+");
    for (i, row) in cells.iter().enumerate() {
        let source = match i {
            0 => None,
            i if i == cells.len() - 1 => Some(total),
            i => rows.get(i - 1),
        };
        let line: Vec<String> = row
            .iter()
            .zip(widths)
            .enumerate()
            .map(|(col, (cell, width))| {
                let padded = if col == 0 {
                    format!("{cell:<width$}")
                } else {
                    format!("{cell:>width$}")
                };
                paint(&padded, source, col, use_color)
            })
            .collect();
        let _ = writeln!(out, "| {} |", line.join(" | "));
        if i == 0 || i == cells.len() - 2 {
            let _ = writeln!(out, "+{separator}+");
        }
    }
    let _ = writeln!(out, "+{separator}+");
    out
}

fn row_cells(row: &SummaryRow) -> [String; 5] {
    let s = &row.summary;
    [
        row.name.clone(),
        format!("{}/{}", s.covered_lines, s.total_lines),
        format!("{:.3}%", row.line_percentage * 100.0),
        format!("{}/{}", s.covered_branches, s.total_branches),
        format!("{:.3}%", row.branch_percentage * 100.0),
    ]
}

fn paint(text: &str, row: Option<&SummaryRow>, column: usize, use_color: bool) -> String {
    let Some(row) = row.filter(|_| use_color) else {
        return text.to_string();
    };
    let pass = match column {
        1 | 2 => row.pass,
        3 | 4 => row.branch_pass,
        _ => return text.to_string(),
    };
    let style = if pass {
        Style::new().green()
    } else {
        Style::new().red()
    };
    style.apply_to(text).to_string()
}

#[derive(Serialize)]
struct JsonReport<'a> {
    threshold: f64,
    pass: bool,
    total: &'a SummaryRow,
    rows: &'a [SummaryRow],
}

/// Render rows and the total as JSON
pub fn render_json(rows: &[SummaryRow], total: &SummaryRow, threshold: Threshold) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonReport {
        threshold: threshold.percent(),
        pass: total.pass,
        total,
        rows,
    })
}
