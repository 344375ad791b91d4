//! Instrument command handler

use crate::commands::InstrumentArgs;
use crate::config::CliConfig;
use crate::discovery::{absolute, find_files, parent_directories};
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;
use probecov::{baseline, collect_result, InstrumentationContext, InstrumentationResult, Instrumenter};
use std::path::PathBuf;
use std::time::Instant;

/// Execute the instrument command
///
/// Returns the path of the coverage baseline that was written.
pub fn execute_instrument(config: &CliConfig, args: &InstrumentArgs) -> CliResult<PathBuf> {
    let started = Instant::now();
    let workdir = absolute(&std::env::current_dir()?, &args.workdir);
    let parentdir = absolute(&workdir, &args.parentdir);

    let assemblies = find_files(&parentdir, &args.assemblies, &args.exclude_assemblies)?;
    if assemblies.is_empty() {
        return Err(CliError::config("No assemblies found"));
    }
    let sources = find_files(&parentdir, &args.sources, &args.exclude_sources)?;
    if sources.is_empty() {
        return Err(CliError::config("No source files found"));
    }
    let tests = find_files(&parentdir, &args.tests, &args.exclude_tests)?;
    tracing::info!("Found {} assemblies", assemblies.len());
    tracing::info!("Found {} source files", sources.len());
    tracing::info!("Found {} test files", tests.len());
    tracing::info!("Discovery done in {} ms", started.elapsed().as_millis());

    let hits_directory = absolute(&workdir, &args.hits_directory);
    let mut context = InstrumentationContext::new(&hits_directory, &workdir)
        .with_sources(sources)
        .with_jobs(config.clone().with_parallel_jobs(args.jobs).effective_jobs());
    for directory in parent_directories(&tests) {
        context = context.with_search_directory(directory);
    }

    let instrumenting = Instant::now();
    let result = instrument(config, &context, &assemblies)?;
    tracing::info!("Instrumentation done in {} ms", instrumenting.elapsed().as_millis());

    let coverage_file = absolute(&workdir, &args.coverage_file);
    tracing::info!("Writing coverage file {}", coverage_file.display());
    baseline::save(&result, &coverage_file)?;
    Ok(coverage_file)
}

fn instrument(
    config: &CliConfig,
    context: &InstrumentationContext,
    assemblies: &[PathBuf],
) -> CliResult<InstrumentationResult> {
    let mut reporter = ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
    reporter.start_progress(assemblies.len() as u64, "Instrumenting");

    let bar = reporter.bar();
    let outcomes = Instrumenter::new().instrument_with_progress(context, assemblies, |path, outcome| {
        if let Some(reason) = outcome.skip_reason() {
            tracing::info!(assembly = %path.display(), "Skipping: {reason}");
        }
        if let Some(bar) = bar {
            bar.inc(1);
        }
    });
    reporter.finish();
    let outcomes = outcomes?;

    let result = collect_result(context, outcomes);
    if result.assemblies.is_empty() {
        reporter.warning("No assemblies were instrumented");
        return Ok(result);
    }
    reporter.success(&format!(
        "Instrumented {} of {} assemblies",
        result.assemblies.len(),
        assemblies.len()
    ));
    Ok(result)
}
