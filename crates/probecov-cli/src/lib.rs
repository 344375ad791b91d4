//! Probecov CLI Library
//!
//! Command-line interface for the Probecov coverage engine: discover
//! modules, instrument them, then report on the hits test runs leave behind.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
pub mod discovery;
mod error;
pub mod handlers;
pub mod logging;
mod output;

pub use commands::{
    Cli, ColorArg, Commands, CoverageInputArgs, ExportArgs, GroupByArg, InstrumentArgs, ReportArgs,
    ReportFormat, ResetArgs,
};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{render_json, render_table, ProgressReporter};
