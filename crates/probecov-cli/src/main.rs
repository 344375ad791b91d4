//! Probecov CLI: instrument modules and report coverage
//!
//! ## Usage
//!
//! ```bash
//! probecov instrument --sources "src/**/*.cs"   # Rewrite modules, write coverage.json
//! probecov report --threshold 80                # Summary table, fails below 80%
//! probecov lcov -o coverage.info                # LCOV export
//! probecov reset                                # Forget recorded hits
//! ```

use clap::Parser;
use probecov_cli::{
    handlers::{
        execute_cobertura, execute_impacting_files, execute_instrument, execute_lcov, execute_report,
        execute_reset,
    },
    logging::init_logging,
    Cli, CliConfig, CliResult, ColorChoice, Commands, Verbosity,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let config = build_config(&cli)?;
    init_logging(config.verbosity, config.color.should_color());
    tracing::debug!(verbosity = %config.verbosity, "probecov {}", probecov::VERSION);

    match cli.command {
        Commands::Instrument(args) => execute_instrument(&config, &args).map(|_| ()),
        Commands::Report(args) => execute_report(&config, &args),
        Commands::ImpactingFiles(args) => execute_impacting_files(&config, &args).map(|_| ()),
        Commands::Lcov(args) => execute_lcov(&config, &args).map(|_| ()),
        Commands::Cobertura(args) => execute_cobertura(&config, &args).map(|_| ()),
        Commands::Reset(args) => execute_reset(&args).map(|_| ()),
    }
}

fn build_config(cli: &Cli) -> CliResult<CliConfig> {
    let verbosity = match cli.verbosity.as_deref() {
        Some(level) => level.parse::<Verbosity>()?,
        None => Verbosity::from_flags(cli.verbose, cli.quiet),
    };
    let color: ColorChoice = cli.color.into();

    Ok(CliConfig::new().with_verbosity(verbosity).with_color(color))
}
