//! Impacting-files command handler

use crate::commands::CoverageInputArgs;
use crate::config::CliConfig;
use crate::error::CliResult;
use crate::handlers::load_coverage;
use probecov::impacting_files;
use std::path::PathBuf;

/// Execute the impacting-files command, printing one path per line
pub fn execute_impacting_files(config: &CliConfig, args: &CoverageInputArgs) -> CliResult<Vec<PathBuf>> {
    let coverage = load_coverage(args, config.effective_jobs())?;
    let files = impacting_files(&coverage.result, &coverage.hits);
    tracing::debug!(count = files.len(), "impacting files");
    for file in &files {
        println!("{}", file.display());
    }
    Ok(files)
}
