//! CLI configuration

use crate::error::{CliError, CliResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum level of log events shown on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Verbosity {
    /// Everything, including per-method instrumentation
    Trace,
    /// Changed files, resolver search paths
    Debug,
    /// Progress and skipped assemblies
    #[default]
    Information,
    /// Skipped hits files
    Warning,
    /// Errors only
    Error,
    /// Nothing but fatal errors
    Critical,
}

impl Verbosity {
    /// Level from `-v` count and `-q`
    #[must_use]
    pub const fn from_flags(verbose: u8, quiet: bool) -> Self {
        if quiet {
            return Self::Error;
        }
        match verbose {
            0 => Self::Information,
            1 => Self::Debug,
            _ => Self::Trace,
        }
    }

    /// `EnvFilter` directive for this level
    #[must_use]
    pub const fn filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Information => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }

    /// Check if quiet mode
    #[must_use]
    pub fn is_quiet(self) -> bool {
        self >= Self::Error
    }

    /// Check if debug or more
    #[must_use]
    pub fn is_verbose(self) -> bool {
        self <= Self::Debug
    }
}

impl FromStr for Verbosity {
    type Err = CliError;

    fn from_str(s: &str) -> CliResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "information" | "info" => Ok(Self::Information),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            _ => Err(CliError::invalid_argument(format!("Invalid verbosity '{s}'"))),
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "Trace",
            Self::Debug => "Debug",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Critical => "Critical",
        };
        f.write_str(name)
    }
}

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorChoice {
    /// Always use colors
    Always,
    /// Use colors when output is a terminal
    #[default]
    Auto,
    /// Never use colors
    Never,
}

impl ColorChoice {
    /// Should use colors based on output detection
    #[must_use]
    pub fn should_color(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => std::io::IsTerminal::is_terminal(&std::io::stdout()),
        }
    }
}

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Verbosity level
    pub verbosity: Verbosity,
    /// Color output choice
    pub color: ColorChoice,
    /// Number of parallel jobs (0 = auto-detect)
    pub parallel_jobs: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Information,
            color: ColorChoice::Auto,
            parallel_jobs: 0,
        }
    }
}

impl CliConfig {
    /// Create new default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity
    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set color choice
    #[must_use]
    pub const fn with_color(mut self, color: ColorChoice) -> Self {
        self.color = color;
        self
    }

    /// Set parallel jobs
    #[must_use]
    pub const fn with_parallel_jobs(mut self, jobs: usize) -> Self {
        self.parallel_jobs = jobs;
        self
    }

    /// Effective number of jobs
    #[must_use]
    pub fn effective_jobs(&self) -> usize {
        if self.parallel_jobs == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            self.parallel_jobs
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod verbosity_tests {
        use super::*;

        #[test]
        fn test_default() {
            assert_eq!(Verbosity::default(), Verbosity::Information);
        }

        #[test]
        fn test_parse_names_and_aliases() {
            assert_eq!("trace".parse::<Verbosity>().unwrap(), Verbosity::Trace);
            assert_eq!("Debug".parse::<Verbosity>().unwrap(), Verbosity::Debug);
            assert_eq!("information".parse::<Verbosity>().unwrap(), Verbosity::Information);
            assert_eq!("info".parse::<Verbosity>().unwrap(), Verbosity::Information);
            assert_eq!("WARNING".parse::<Verbosity>().unwrap(), Verbosity::Warning);
            assert_eq!("warn".parse::<Verbosity>().unwrap(), Verbosity::Warning);
            assert_eq!("error".parse::<Verbosity>().unwrap(), Verbosity::Error);
            assert_eq!("critical".parse::<Verbosity>().unwrap(), Verbosity::Critical);
        }

        #[test]
        fn test_parse_invalid() {
            let err = "loud".parse::<Verbosity>().unwrap_err();
            assert!(err.to_string().contains("Invalid verbosity 'loud'"));
        }

        #[test]
        fn test_from_flags() {
            assert_eq!(Verbosity::from_flags(0, false), Verbosity::Information);
            assert_eq!(Verbosity::from_flags(1, false), Verbosity::Debug);
            assert_eq!(Verbosity::from_flags(3, false), Verbosity::Trace);
            assert_eq!(Verbosity::from_flags(2, true), Verbosity::Error);
        }

        #[test]
        fn test_filter() {
            assert_eq!(Verbosity::Information.filter(), "info");
            assert_eq!(Verbosity::Critical.filter(), "error");
        }

        #[test]
        fn test_quiet_and_verbose() {
            assert!(Verbosity::Critical.is_quiet());
            assert!(!Verbosity::Warning.is_quiet());
            assert!(Verbosity::Trace.is_verbose());
            assert!(!Verbosity::Information.is_verbose());
        }

        #[test]
        fn test_display_round_trips() {
            for v in [Verbosity::Trace, Verbosity::Information, Verbosity::Critical] {
                assert_eq!(v.to_string().parse::<Verbosity>().unwrap(), v);
            }
        }
    }

    mod color_choice_tests {
        use super::*;

        #[test]
        fn test_always_never() {
            assert!(ColorChoice::Always.should_color());
            assert!(!ColorChoice::Never.should_color());
        }
    }

    mod cli_config_tests {
        use super::*;

        #[test]
        fn test_builder() {
            let config = CliConfig::new()
                .with_verbosity(Verbosity::Debug)
                .with_color(ColorChoice::Never)
                .with_parallel_jobs(3);
            assert_eq!(config.verbosity, Verbosity::Debug);
            assert_eq!(config.color, ColorChoice::Never);
            assert_eq!(config.effective_jobs(), 3);
        }

        #[test]
        fn test_auto_jobs() {
            assert!(CliConfig::new().effective_jobs() >= 1);
        }
    }
}
