//! Command handlers, one module per subcommand

pub mod export;
pub mod impacting;
pub mod instrument;
pub mod report;
pub mod reset;

pub use export::{default_output, execute_cobertura, execute_lcov, ExportKind};
pub use impacting::execute_impacting_files;
pub use instrument::execute_instrument;
pub use report::execute_report;
pub use reset::execute_reset;

use crate::commands::CoverageInputArgs;
use crate::discovery::absolute;
use crate::error::CliResult;
use probecov::{baseline, AggregatedHits, HitsReader, InstrumentationResult};
use std::path::PathBuf;

/// Baseline plus every hit recorded against it
#[derive(Debug)]
pub struct LoadedCoverage {
    /// Baseline written by `instrument`
    pub result: InstrumentationResult,
    /// Aggregated hits
    pub hits: AggregatedHits,
    /// Directory the hits were read from
    pub hits_directory: PathBuf,
}

/// Load the baseline and aggregate its hits directory
pub fn load_coverage(input: &CoverageInputArgs, jobs: usize) -> CliResult<LoadedCoverage> {
    let workdir = absolute(&std::env::current_dir()?, &input.workdir);
    let coverage_file = absolute(&workdir, &input.coverage_file);
    let result = baseline::load(&coverage_file)?;

    let hits_directory = input
        .hits_directory
        .as_ref()
        .map_or_else(|| result.hits_path.clone(), |dir| absolute(&workdir, dir));
    let hits = HitsReader::with_workers(jobs).read_directory(&hits_directory)?;
    tracing::debug!(
        coverage_file = %coverage_file.display(),
        hits_directory = %hits_directory.display(),
        identities = hits.len(),
        "coverage loaded"
    );

    Ok(LoadedCoverage {
        result,
        hits,
        hits_directory,
    })
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::test_support::workspace;
    use super::*;

    #[test]
    fn test_load_uses_baseline_hits_directory() {
        let ws = workspace(&[0, 1]);
        let loaded = load_coverage(&ws.input(), 2).unwrap();
        assert_eq!(loaded.hits_directory, ws.hits_directory());
        assert_eq!(loaded.hits.len(), 1);
        assert_eq!(loaded.result.assemblies.len(), 1);
    }

    #[test]
    fn test_load_with_explicit_empty_hits_directory() {
        let ws = workspace(&[0]);
        let mut input = ws.input();
        input.hits_directory = Some(PathBuf::from("elsewhere"));
        let loaded = load_coverage(&input, 1).unwrap();
        assert!(loaded.hits.is_empty());
        assert_eq!(loaded.hits_directory, ws.root().join("elsewhere"));
    }

    #[test]
    fn test_load_missing_baseline() {
        let ws = workspace(&[]);
        let mut input = ws.input();
        input.coverage_file = PathBuf::from("missing.json");
        assert!(load_coverage(&input, 1).is_err());
    }
}
