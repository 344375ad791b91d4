//! Coverage Report Formatters
//!
//! LCOV and Cobertura XML renderings of a [`SummaryGrid`](crate::summary::SummaryGrid)
//! for CI integration.

mod cobertura;
mod lcov;

pub use cobertura::CoberturaFormatter;
pub use lcov::LcovFormatter;
