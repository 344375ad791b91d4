//! Probecov: Bytecode Coverage Instrumentation
//!
//! Rewrites portable bytecode modules so every statement and branch target
//! reports to a hit recorder, merges the recorded hits, and turns them into
//! line and branch coverage summaries.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    PROBECOV Pipeline                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Instrument │    │ Run tests  │    │ Aggregate  │            │
//! │   │ modules    │───►│ HitRecorder│───►│ *.hits     │            │
//! │   │ + baseline │    │ flush      │    │ files      │            │
//! │   └────────────┘    └────────────┘    └─────┬──────┘            │
//! │                                             ▼                   │
//! │                 ┌────────────┐    ┌────────────────┐            │
//! │                 │ LCOV /     │◄───│ SummaryGrid    │            │
//! │                 │ Cobertura  │    │ threshold gate │            │
//! │                 └────────────┘    └────────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use probecov::{HitsReader, InstrumentationContext, Instrumenter, SummaryGrid, Threshold};
//! use std::path::PathBuf;
//!
//! # fn main() -> probecov::ProbecovResult<()> {
//! let ctx = InstrumentationContext::new("coverage-hits", ".");
//! let result = Instrumenter::new().instrument(&ctx, &[PathBuf::from("bin/Game.pcbm")])?;
//! probecov::baseline::save(&result, "coverage.json".as_ref())?;
//!
//! // ... run the instrumented modules ...
//!
//! let hits = HitsReader::new().read_directory(&result.hits_path)?;
//! let grid = SummaryGrid::build(&result, &hits, Threshold::default());
//! println!("{:.2}% lines", grid.total().line_percentage * 100.0);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

/// Coverage baseline persistence
pub mod baseline;

/// LCOV and Cobertura exports
pub mod formatters;

/// Hit recording and aggregation
pub mod hits;

mod ids;

/// Module images, symbol files and stack analysis
#[allow(clippy::missing_const_for_fn)]
pub mod image;

/// Instrumentation engine
pub mod instrument;

mod model;

/// Assembly reference resolution
pub mod resolver;

mod result;

/// Source document fingerprints
pub mod staleness;

/// Coverage summaries and threshold evaluation
pub mod summary;

pub use formatters::{CoberturaFormatter, LcovFormatter};
pub use hits::{
    AggregatedHits, HitIdentity, HitRecord, HitRecorder, HitsReader, RecordState, HITS_EXTENSION,
};
pub use ids::{MethodKey, PointId, TypeIndex};
pub use image::{LoadedModule, ModuleImage, SymbolFile};
pub use instrument::{
    collect_result, AssemblyInstrumenter, InstrumentOutcome, InstrumentationContext,
    Instrumenter, SkipReason,
};
pub use model::{
    InstrumentationResult, InstrumentedAssembly, InstrumentedInstruction, InstrumentedMethod,
    SourceFile, SourceRange,
};
pub use resolver::{MemberResolution, ReferenceResolver};
pub use result::{ProbecovError, ProbecovResult};
pub use summary::{
    impacting_files, GridPoint, Grouping, Summary, SummaryGrid, SummaryRow, Threshold,
    IMPACTING_THRESHOLD,
};

/// Crate version, recorded in reports
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
