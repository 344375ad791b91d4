//! Instrumentation map: the durable description of every injected probe.
//!
//! Source files are shared between instructions through `Arc` so every
//! instruction of one file points at the same node. The baseline codec in
//! [`crate::baseline`] interns these nodes to integer ids on disk.

use crate::ids::PointId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source file referenced by instrumented instructions
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceFile {
    /// Absolute path
    pub path: PathBuf,
}

impl SourceFile {
    /// Create a shared source file node
    #[must_use]
    pub fn shared(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self { path: path.into() })
    }

    /// Path relative to `root`, or the full path when outside it
    #[must_use]
    pub fn relative_to(&self, root: &Path) -> PathBuf {
        self.path
            .strip_prefix(root)
            .map_or_else(|_| self.path.clone(), Path::to_path_buf)
    }
}

/// Line and column range of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceRange {
    /// First line, 1-based
    pub start_line: u32,
    /// First column, 1-based
    pub start_column: u32,
    /// Last line
    pub end_line: u32,
    /// Column after the last character
    pub end_column: u32,
}

/// One probe and the source it counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedInstruction {
    /// Id, unique within its method
    pub id: PointId,
    /// Source file
    pub file: Arc<SourceFile>,
    /// Source range
    pub range: SourceRange,
    /// Branch target rather than statement
    pub is_branch: bool,
}

/// Instrumented method with its probes in id order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedMethod {
    /// Owning assembly name
    pub assembly: String,
    /// Class name used for attribution
    pub class: String,
    /// Method signature, e.g. `Int32 Add(Int32,Int32)`
    pub signature: String,
    /// Probes
    pub instructions: Vec<InstrumentedInstruction>,
}

impl InstrumentedMethod {
    /// Number of statement probes
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.instructions.iter().filter(|i| !i.is_branch).count()
    }

    /// Number of branch probes
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.is_branch).count()
    }
}

/// Result of instrumenting one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedAssembly {
    /// Module name
    pub name: String,
    /// Path of the module that was instrumented
    pub source_path: PathBuf,
    /// Rewritten image
    pub temp_image_file: PathBuf,
    /// Rewritten symbol file
    pub temp_symbols_file: PathBuf,
    /// Instrumented methods in instrumentation order
    pub methods: Vec<Arc<InstrumentedMethod>>,
}

impl InstrumentedAssembly {
    /// Distinct source files in first-use order
    #[must_use]
    pub fn source_files(&self) -> Vec<Arc<SourceFile>> {
        let mut files: Vec<Arc<SourceFile>> = Vec::new();
        for instruction in self.methods.iter().flat_map(|m| m.instructions.iter()) {
            if !files.iter().any(|f| f.path == instruction.file.path) {
                files.push(Arc::clone(&instruction.file));
            }
        }
        files
    }
}

/// The coverage baseline
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstrumentationResult {
    /// Directory the instrumented modules flush hits to
    pub hits_path: PathBuf,
    /// Root the source paths are reported relative to
    pub source_root: PathBuf,
    /// Instrumented modules
    pub assemblies: Vec<InstrumentedAssembly>,
    files: BTreeMap<PathBuf, Arc<SourceFile>>,
}

impl InstrumentationResult {
    /// Empty result
    #[must_use]
    pub fn new(hits_path: impl Into<PathBuf>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            hits_path: hits_path.into(),
            source_root: source_root.into(),
            assemblies: Vec::new(),
            files: BTreeMap::new(),
        }
    }

    /// Add an assembly, sharing source file nodes with those already present
    pub fn add_assembly(&mut self, mut assembly: InstrumentedAssembly) {
        for method in &mut assembly.methods {
            let mut rebuilt = (**method).clone();
            for instruction in &mut rebuilt.instructions {
                instruction.file = self.intern(&instruction.file.path);
            }
            *method = Arc::new(rebuilt);
        }
        self.assemblies.push(assembly);
    }

    /// Shared node for `path`, creating it on first use
    pub fn intern(&mut self, path: &Path) -> Arc<SourceFile> {
        Arc::clone(
            self.files
                .entry(path.to_path_buf())
                .or_insert_with(|| SourceFile::shared(path)),
        )
    }

    /// Every referenced source file, ordered by path
    pub fn source_files(&self) -> impl Iterator<Item = &Arc<SourceFile>> {
        self.files.values()
    }

    /// Every instrumented method
    pub fn methods(&self) -> impl Iterator<Item = &Arc<InstrumentedMethod>> {
        self.assemblies.iter().flat_map(|a| a.methods.iter())
    }

    /// Total number of probes
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.methods().map(|m| m.instructions.len()).sum()
    }
}
