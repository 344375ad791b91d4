//! Report command handler

use crate::commands::{ReportArgs, ReportFormat};
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::handlers::load_coverage;
use crate::output::{render_json, render_table};
use probecov::{Grouping, SummaryGrid, Threshold};

/// Execute the report command
///
/// Prints the requested rows to stdout and fails when total line coverage is
/// below the threshold.
pub fn execute_report(config: &CliConfig, args: &ReportArgs) -> CliResult<()> {
    let threshold = Threshold::from_percent(args.threshold).map_err(|_| {
        CliError::invalid_argument(format!(
            "Threshold must be between 0 and 100, got {}",
            args.threshold
        ))
    })?;
    let coverage = load_coverage(&args.input, config.effective_jobs())?;
    let grid = SummaryGrid::build(&coverage.result, &coverage.hits, threshold);

    println!("{}", render(&grid, args.group_by.into(), args.format, config.color.should_color())?);

    if grid.passes() {
        Ok(())
    } else {
        Err(CliError::ThresholdFailed {
            coverage: grid.total().line_percentage * 100.0,
            threshold: threshold.percent(),
        })
    }
}

/// Report text for `grid`
pub fn render(grid: &SummaryGrid, grouping: Grouping, format: ReportFormat, use_color: bool) -> CliResult<String> {
    let rows = grid.rows(grouping);
    let total = grid.total();
    match format {
        ReportFormat::Text => Ok(render_table(&rows, &total, use_color)),
        ReportFormat::Json => render_json(&rows, &total, grid.threshold())
            .map_err(|e| CliError::Io(std::io::Error::other(e))),
    }
}
