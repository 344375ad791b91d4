//! Symbol files: source documents and sequence points.

use super::{check_header, header};
use crate::result::{ProbecovError, ProbecovResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Magic prefix of a symbol file
pub const SYMBOLS_MAGIC: [u8; 4] = *b"PCBS";

/// File extension of symbol files
pub const SYMBOLS_EXTENSION: &str = "pcbs";

/// Algorithm a document fingerprint was computed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// No fingerprint recorded
    #[default]
    None,
    /// SHA-256
    Sha256,
    /// BLAKE3
    Blake3,
}

/// Source document referenced by a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Source path as recorded by the compiler
    pub path: PathBuf,
    /// Fingerprint algorithm
    pub hash_algorithm: HashAlgorithm,
    /// Fingerprint of the content the module was compiled from
    pub hash: Vec<u8>,
}

/// Mapping from an instruction to a source range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencePoint {
    /// Instruction index
    pub offset: u32,
    /// Index into [`SymbolFile::documents`]
    pub document: u32,
    /// First line (1-based)
    pub start_line: u32,
    /// First column (1-based)
    pub start_column: u32,
    /// Last line
    pub end_line: u32,
    /// Column after the last character
    pub end_column: u32,
}

impl SequencePoint {
    /// Line number marking compiler-inserted code with no source
    pub const HIDDEN_LINE: u32 = 0x00fe_efee;

    /// Whether this point hides its instructions from the debugger
    #[must_use]
    pub const fn is_hidden(&self) -> bool {
        self.start_line == Self::HIDDEN_LINE
    }
}

/// Sequence points of one method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSymbols {
    /// Method token
    pub method_token: u32,
    /// Sequence points ordered by offset
    pub sequence_points: Vec<SequencePoint>,
}

/// Debug symbols of a module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFile {
    /// Module name the symbols belong to
    pub module_name: String,
    /// Source documents
    pub documents: Vec<Document>,
    /// Per-method sequence points
    pub methods: Vec<MethodSymbols>,
}

impl SymbolFile {
    /// Decode symbols from bytes
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> ProbecovResult<Self> {
        let payload = check_header(path, bytes, SYMBOLS_MAGIC)?;
        bincode::deserialize(payload)
            .map_err(|e| ProbecovError::bad_image(path, format!("undecodable symbols: {e}")))
    }

    /// Encode symbols to bytes
    pub fn to_bytes(&self) -> ProbecovResult<Vec<u8>> {
        let mut bytes = header(SYMBOLS_MAGIC);
        bincode::serialize_into(&mut bytes, self)?;
        Ok(bytes)
    }

    /// Read a symbol file
    pub fn read(path: &Path) -> ProbecovResult<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(path, &bytes)
    }

    /// Write a symbol file
    pub fn write(&self, path: &Path) -> ProbecovResult<()> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Sequence points of a method, empty when it has none
    #[must_use]
    pub fn sequence_points(&self, method_token: u32) -> &[SequencePoint] {
        self.methods
            .iter()
            .find(|m| m.method_token == method_token)
            .map_or(&[], |m| m.sequence_points.as_slice())
    }

    /// Document by index
    #[must_use]
    pub fn document(&self, index: u32) -> Option<&Document> {
        self.documents.get(index as usize)
    }
}
