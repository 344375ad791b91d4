//! Log setup: `tracing` events from the library go to stderr.

use crate::config::Verbosity;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// `RUST_LOG` overrides the level chosen on the command line. Calling this
/// twice keeps the first subscriber.
pub fn init_logging(verbosity: Verbosity, color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_for(verbosity)));

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(color)
        .with_target(false)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(terminal_layer)
        .try_init();
}

/// Filter directive limited to this workspace's crates
#[must_use]
pub fn filter_for(verbosity: Verbosity) -> String {
    let level = verbosity.filter();
    format!("warn,probecov={level},probecov_cli={level}")
}
