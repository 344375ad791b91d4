//! LCOV and Cobertura export handlers

use crate::commands::ExportArgs;
use crate::config::CliConfig;
use crate::discovery::absolute;
use crate::error::CliResult;
use crate::handlers::load_coverage;
use probecov::{CoberturaFormatter, LcovFormatter, SummaryGrid, Threshold};
use std::path::{Path, PathBuf};

/// Report flavour written by an export command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// LCOV tracefile
    Lcov,
    /// Cobertura XML
    Cobertura,
}

/// File written when `--output` is not given
#[must_use]
pub const fn default_output(kind: ExportKind) -> &'static str {
    match kind {
        ExportKind::Lcov => "coverage.info",
        ExportKind::Cobertura => "coverage.xml",
    }
}

/// Execute the lcov command
pub fn execute_lcov(config: &CliConfig, args: &ExportArgs) -> CliResult<PathBuf> {
    export(config, args, ExportKind::Lcov)
}

/// Execute the cobertura command
pub fn execute_cobertura(config: &CliConfig, args: &ExportArgs) -> CliResult<PathBuf> {
    export(config, args, ExportKind::Cobertura)
}

fn export(config: &CliConfig, args: &ExportArgs, kind: ExportKind) -> CliResult<PathBuf> {
    let coverage = load_coverage(&args.input, config.effective_jobs())?;
    let grid = SummaryGrid::build(&coverage.result, &coverage.hits, Threshold::default());

    let workdir = absolute(&std::env::current_dir()?, &args.input.workdir);
    let output = absolute(
        &workdir,
        args.output
            .as_deref()
            .unwrap_or_else(|| Path::new(default_output(kind))),
    );
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match kind {
        ExportKind::Lcov => LcovFormatter::new(&grid).save(&output)?,
        ExportKind::Cobertura => CoberturaFormatter::new(&grid).save(&output)?,
    }
    tracing::info!("Report written to {}", output.display());
    Ok(output)
}
