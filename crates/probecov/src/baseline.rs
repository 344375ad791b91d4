//! Coverage baseline file.
//!
//! Source files and methods are shared nodes in memory. On disk each is
//! written once into an id table and referenced by id everywhere else:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "source_files": [{ "id": 0, "path": "/repo/src/Calc.cs" }],
//!   "methods": [{ "id": 0, "assembly": "Calc", "class": "Calc.Math", "signature": "Int32 Abs(Int32)" }],
//!   "assemblies": [{ "name": "Calc", "methods": [0], ... }],
//!   "instructions": [{ "method": 0, "file": 0, "id": 1, "range": { ... }, "branch": false }]
//! }
//! ```

use crate::ids::PointId;
use crate::model::{
    InstrumentationResult, InstrumentedAssembly, InstrumentedInstruction, InstrumentedMethod,
    SourceFile, SourceRange,
};
use crate::result::{ProbecovError, ProbecovResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Baseline format version written by this crate
pub const BASELINE_FORMAT_VERSION: u32 = 1;

/// Default baseline file name
pub const DEFAULT_COVERAGE_FILE: &str = "coverage.json";

#[derive(Debug, Serialize, Deserialize)]
struct BaselineFile {
    format_version: u32,
    created_at: DateTime<Utc>,
    hits_path: PathBuf,
    source_root: PathBuf,
    source_files: Vec<FileEntry>,
    methods: Vec<MethodEntry>,
    assemblies: Vec<AssemblyEntry>,
    instructions: Vec<InstructionEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    id: u32,
    path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct MethodEntry {
    id: u32,
    assembly: String,
    class: String,
    signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AssemblyEntry {
    name: String,
    source_path: PathBuf,
    temp_image_file: PathBuf,
    temp_symbols_file: PathBuf,
    methods: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InstructionEntry {
    method: u32,
    file: u32,
    id: PointId,
    range: SourceRange,
    branch: bool,
}

/// Interns shared nodes while writing
#[derive(Default)]
struct Interner {
    files: HashMap<PathBuf, u32>,
    file_entries: Vec<FileEntry>,
    methods: HashMap<*const InstrumentedMethod, u32>,
    method_entries: Vec<MethodEntry>,
    instructions: Vec<InstructionEntry>,
}

impl Interner {
    fn file(&mut self, file: &SourceFile) -> u32 {
        if let Some(id) = self.files.get(&file.path) {
            return *id;
        }
        let id = self.file_entries.len() as u32;
        self.files.insert(file.path.clone(), id);
        self.file_entries.push(FileEntry {
            id,
            path: file.path.clone(),
        });
        id
    }

    fn method(&mut self, method: &Arc<InstrumentedMethod>) -> u32 {
        let key = Arc::as_ptr(method);
        if let Some(id) = self.methods.get(&key) {
            return *id;
        }
        let id = self.method_entries.len() as u32;
        self.methods.insert(key, id);
        self.method_entries.push(MethodEntry {
            id,
            assembly: method.assembly.clone(),
            class: method.class.clone(),
            signature: method.signature.clone(),
        });
        for instruction in &method.instructions {
            let file = self.file(&instruction.file);
            self.instructions.push(InstructionEntry {
                method: id,
                file,
                id: instruction.id,
                range: instruction.range,
                branch: instruction.is_branch,
            });
        }
        id
    }
}

fn encode(result: &InstrumentationResult, created_at: DateTime<Utc>) -> BaselineFile {
    let mut interner = Interner::default();
    for file in result.source_files() {
        interner.file(file);
    }
    let assemblies = result
        .assemblies
        .iter()
        .map(|a| AssemblyEntry {
            name: a.name.clone(),
            source_path: a.source_path.clone(),
            temp_image_file: a.temp_image_file.clone(),
            temp_symbols_file: a.temp_symbols_file.clone(),
            methods: a.methods.iter().map(|m| interner.method(m)).collect(),
        })
        .collect();
    BaselineFile {
        format_version: BASELINE_FORMAT_VERSION,
        created_at,
        hits_path: result.hits_path.clone(),
        source_root: result.source_root.clone(),
        source_files: interner.file_entries,
        methods: interner.method_entries,
        assemblies,
        instructions: interner.instructions,
    }
}

fn decode(file: BaselineFile) -> ProbecovResult<InstrumentationResult> {
    if file.format_version != BASELINE_FORMAT_VERSION {
        return Err(ProbecovError::baseline(format!(
            "unsupported format version {}",
            file.format_version
        )));
    }
    let mut result = InstrumentationResult::new(file.hits_path, file.source_root);

    let mut files: HashMap<u32, Arc<SourceFile>> = HashMap::new();
    for entry in &file.source_files {
        let node = result.intern(&entry.path);
        if files.insert(entry.id, node).is_some() {
            return Err(ProbecovError::baseline(format!("duplicate source file id {}", entry.id)));
        }
    }

    let mut methods: BTreeMap<u32, InstrumentedMethod> = BTreeMap::new();
    for entry in file.methods {
        let method = InstrumentedMethod {
            assembly: entry.assembly,
            class: entry.class,
            signature: entry.signature,
            instructions: Vec::new(),
        };
        if methods.insert(entry.id, method).is_some() {
            return Err(ProbecovError::baseline(format!("duplicate method id {}", entry.id)));
        }
    }

    for entry in file.instructions {
        let source = files
            .get(&entry.file)
            .ok_or_else(|| ProbecovError::baseline(format!("instruction refers to unknown source file {}", entry.file)))?;
        let method = methods
            .get_mut(&entry.method)
            .ok_or_else(|| ProbecovError::baseline(format!("instruction refers to unknown method {}", entry.method)))?;
        method.instructions.push(InstrumentedInstruction {
            id: entry.id,
            file: Arc::clone(source),
            range: entry.range,
            is_branch: entry.branch,
        });
    }

    let methods: BTreeMap<u32, Arc<InstrumentedMethod>> =
        methods.into_iter().map(|(id, m)| (id, Arc::new(m))).collect();
    for entry in file.assemblies {
        let assembly_methods = entry
            .methods
            .iter()
            .map(|id| {
                methods
                    .get(id)
                    .map(Arc::clone)
                    .ok_or_else(|| ProbecovError::baseline(format!("assembly {} refers to unknown method {id}", entry.name)))
            })
            .collect::<ProbecovResult<Vec<_>>>()?;
        result.assemblies.push(InstrumentedAssembly {
            name: entry.name,
            source_path: entry.source_path,
            temp_image_file: entry.temp_image_file,
            temp_symbols_file: entry.temp_symbols_file,
            methods: assembly_methods,
        });
    }
    Ok(result)
}

/// Serialize a baseline to JSON
pub fn to_json(result: &InstrumentationResult) -> ProbecovResult<String> {
    Ok(serde_json::to_string_pretty(&encode(result, Utc::now()))?)
}

/// Parse a baseline from JSON
pub fn from_json(json: &str) -> ProbecovResult<InstrumentationResult> {
    let file: BaselineFile =
        serde_json::from_str(json).map_err(|e| ProbecovError::baseline(e.to_string()))?;
    decode(file)
}

/// Write a baseline atomically
///
/// The JSON goes to a temp file next to `path` that is renamed over it, so
/// a failure never leaves a half-written baseline.
pub fn save(result: &InstrumentationResult, path: &Path) -> ProbecovResult<()> {
    let json = to_json(result)?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&directory)?;
    let mut file = tempfile::NamedTempFile::new_in(&directory)?;
    file.write_all(json.as_bytes())?;
    file.flush()?;
    file.persist(path).map_err(|e| e.error)?;
    tracing::debug!(path = %path.display(), assemblies = result.assemblies.len(), "coverage baseline saved");
    Ok(())
}

/// Read a baseline
pub fn load(path: &Path) -> ProbecovResult<InstrumentationResult> {
    let json = std::fs::read_to_string(path)?;
    from_json(&json)
}
