//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use probecov::Grouping;
use std::path::PathBuf;

/// Probecov: instrument bytecode modules and report line and branch coverage
#[derive(Parser, Debug)]
#[command(name = "probecov")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log level (trace, debug, information, warning, error, critical)
    #[arg(long, global = true, env = "PROBECOV_VERBOSITY")]
    pub verbosity: Option<String>,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Instrument assemblies
    Instrument(InstrumentArgs),

    /// Print a coverage summary and fail below the threshold
    Report(ReportArgs),

    /// Print source files a test run meaningfully exercised
    ImpactingFiles(CoverageInputArgs),

    /// Write an LCOV report
    Lcov(ExportArgs),

    /// Write a Cobertura XML report
    Cobertura(ExportArgs),

    /// Delete recorded hits
    Reset(ResetArgs),
}

/// Arguments for the instrument command
#[derive(Parser, Debug)]
pub struct InstrumentArgs {
    /// Working directory; source paths are reported relative to it
    #[arg(long, default_value = ".", env = "PROBECOV_WORKDIR")]
    pub workdir: PathBuf,

    /// Directory patterns are matched under, relative to the working directory
    #[arg(long, default_value = ".", env = "PROBECOV_PARENTDIR")]
    pub parentdir: PathBuf,

    /// Module images to instrument
    #[arg(long = "assemblies", default_value = "**/*.pcbm", num_args = 1..)]
    pub assemblies: Vec<String>,

    /// Module images to leave alone
    #[arg(long = "exclude-assemblies", default_value = "**/obj/**/*.pcbm", num_args = 1..)]
    pub exclude_assemblies: Vec<String>,

    /// Source files to measure
    #[arg(long = "sources", default_value = "src/**/*", num_args = 1..)]
    pub sources: Vec<String>,

    /// Source files to ignore
    #[arg(long = "exclude-sources", num_args = 1..)]
    pub exclude_sources: Vec<String>,

    /// Test modules; their directories are searched for references
    #[arg(long = "tests", default_value = "tests/**/*.pcbm", num_args = 1..)]
    pub tests: Vec<String>,

    /// Test modules to ignore
    #[arg(long = "exclude-tests", num_args = 1..)]
    pub exclude_tests: Vec<String>,

    /// Directory instrumented modules write hits to
    #[arg(long, default_value = "coverage-hits", env = "PROBECOV_HITS_DIRECTORY")]
    pub hits_directory: PathBuf,

    /// Coverage baseline to write
    #[arg(long, default_value = "coverage.json", env = "PROBECOV_COVERAGE_FILE")]
    pub coverage_file: PathBuf,

    /// Number of parallel instrumentation jobs (0 = one per core)
    #[arg(short = 'j', long, default_value = "0")]
    pub jobs: usize,
}

/// Baseline and hits locations shared by reporting commands
#[derive(Args, Debug, Clone)]
pub struct CoverageInputArgs {
    /// Working directory
    #[arg(long, default_value = ".", env = "PROBECOV_WORKDIR")]
    pub workdir: PathBuf,

    /// Coverage baseline written by `instrument`
    #[arg(long, default_value = "coverage.json", env = "PROBECOV_COVERAGE_FILE")]
    pub coverage_file: PathBuf,

    /// Hits directory, defaults to the one recorded in the baseline
    #[arg(long, env = "PROBECOV_HITS_DIRECTORY")]
    pub hits_directory: Option<PathBuf>,
}

/// Arguments for the report command
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Baseline and hits
    #[command(flatten)]
    pub input: CoverageInputArgs,

    /// Required line coverage percentage
    #[arg(long, default_value = "90", env = "PROBECOV_THRESHOLD")]
    pub threshold: f64,

    /// Rows to print
    #[arg(long, default_value = "file")]
    pub group_by: GroupByArg,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: ReportFormat,
}

/// Arguments for the lcov and cobertura commands
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Baseline and hits
    #[command(flatten)]
    pub input: CoverageInputArgs,

    /// Report file to write
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the reset command
#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Working directory
    #[arg(long, default_value = ".", env = "PROBECOV_WORKDIR")]
    pub workdir: PathBuf,

    /// Hits directory to clear
    #[arg(long, default_value = "coverage-hits", env = "PROBECOV_HITS_DIRECTORY")]
    pub hits_directory: PathBuf,
}

/// Report row grouping
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GroupByArg {
    /// One row per source file
    #[default]
    File,
    /// One row per folder
    Folder,
    /// One row per assembly
    Assembly,
    /// One row per class
    Class,
    /// One row per method
    Method,
}

impl From<GroupByArg> for Grouping {
    fn from(arg: GroupByArg) -> Self {
        match arg {
            GroupByArg::File => Self::File,
            GroupByArg::Folder => Self::Folder,
            GroupByArg::Assembly => Self::Assembly,
            GroupByArg::Class => Self::Class,
            GroupByArg::Method => Self::Method,
        }
    }
}

/// Report output format
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// Console table
    #[default]
    Text,
    /// JSON rows
    Json,
}

/// Color argument
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ColorArg {
    /// Auto-detect
    #[default]
    Auto,
    /// Always color
    Always,
    /// Never color
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}
