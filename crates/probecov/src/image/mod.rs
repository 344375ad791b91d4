//! Portable Bytecode Module Images
//!
//! A module is a pair of files: the image (`*.pcbm`) holding types, methods
//! and stack-machine bodies, and the symbol file (`*.pcbs`) holding source
//! documents and sequence points. Both start with a 4-byte magic and a
//! little-endian `u16` format version followed by a `bincode` payload.
//!
//! ```text
//! ┌──────────┬─────────┬──────────────────────────────┐
//! │ "PCBM"   │ version │ bincode(ModuleImage)         │
//! └──────────┴─────────┴──────────────────────────────┘
//! ```

mod builder;
pub mod stack;
mod symbols;

pub use builder::{MethodBuilder, ModuleBuilder, TypeBuilder, FIRST_METHOD_TOKEN};
pub use symbols::{
    Document, HashAlgorithm, MethodSymbols, SequencePoint, SymbolFile, SYMBOLS_EXTENSION,
    SYMBOLS_MAGIC,
};

use crate::ids::{MethodKey, TypeIndex};
use crate::result::{ProbecovError, ProbecovResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Magic prefix of a module image file
pub const IMAGE_MAGIC: [u8; 4] = *b"PCBM";

/// Current on-disk format version for images and symbol files
pub const FORMAT_VERSION: u16 = 1;

/// File extension of module images
pub const IMAGE_EXTENSION: &str = "pcbm";

/// Name of the pseudo-type holding module-level members
pub const MODULE_TYPE_NAME: &str = "<Module>";

/// Name of the entry-point wrapper type emitted by test SDKs
pub const AUTO_GENERATED_PROGRAM: &str = "AutoGeneratedProgram";

/// Module name of the hit-recording runtime
pub const RUNTIME_MODULE: &str = "probecov.runtime";

/// Type of the hit-recording runtime entry point
pub const RUNTIME_TYPE: &str = "HitService";

/// Method every probe calls
pub const RUNTIME_HIT_METHOD: &str = "Hit";

/// Stack-machine instruction
///
/// Branch operands are indices into the owning body's instruction list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Do nothing
    Nop,
    /// Push a 32-bit integer constant
    LdcI4(i32),
    /// Push a string constant
    LdStr(String),
    /// Push null
    LdNull,
    /// Push argument
    LdArg(u16),
    /// Pop into argument
    StArg(u16),
    /// Push local
    LdLoc(u16),
    /// Pop into local
    StLoc(u16),
    /// Duplicate top of stack
    Dup,
    /// Discard top of stack
    Pop,
    /// Pop two, push sum
    Add,
    /// Pop two, push difference
    Sub,
    /// Pop two, push product
    Mul,
    /// Pop two, push quotient
    Div,
    /// Pop two, push remainder
    Rem,
    /// Negate top of stack
    Neg,
    /// Pop two, push 1 if equal
    Ceq,
    /// Pop two, push 1 if greater
    Cgt,
    /// Pop two, push 1 if less
    Clt,
    /// Unconditional branch
    Br(u32),
    /// Branch when top of stack is non-zero
    BrTrue(u32),
    /// Branch when top of stack is zero
    BrFalse(u32),
    /// Branch when the two top values are equal
    Beq(u32),
    /// Branch when the two top values differ
    Bne(u32),
    /// Branch when first < second
    Blt(u32),
    /// Branch when first > second
    Bgt(u32),
    /// Jump table on top of stack, falls through when out of range
    Switch(Vec<u32>),
    /// Call a method
    Call(CallTarget),
    /// Return from method
    Ret,
    /// Throw top of stack
    Throw,
    /// Rethrow the exception being handled
    Rethrow,
    /// Exit a protected region, emptying the stack
    Leave(u32),
    /// End of a finally or fault handler
    EndFinally,
}

impl Instruction {
    /// Whether this is a conditional branch or a switch
    #[must_use]
    pub const fn is_conditional_branch(&self) -> bool {
        matches!(
            self,
            Self::BrTrue(_)
                | Self::BrFalse(_)
                | Self::Beq(_)
                | Self::Bne(_)
                | Self::Blt(_)
                | Self::Bgt(_)
                | Self::Switch(_)
        )
    }

    /// Whether execution can continue with the next instruction
    #[must_use]
    pub const fn falls_through(&self) -> bool {
        !matches!(
            self,
            Self::Br(_) | Self::Ret | Self::Throw | Self::Rethrow | Self::Leave(_) | Self::EndFinally
        )
    }

    /// Explicit branch targets of this instruction
    #[must_use]
    pub fn branch_targets(&self) -> Vec<u32> {
        match self {
            Self::Br(t)
            | Self::BrTrue(t)
            | Self::BrFalse(t)
            | Self::Beq(t)
            | Self::Bne(t)
            | Self::Blt(t)
            | Self::Bgt(t)
            | Self::Leave(t) => vec![*t],
            Self::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Rewrite every branch target through `map`
    pub fn remap_targets(&mut self, map: impl Fn(u32) -> u32) {
        match self {
            Self::Br(t)
            | Self::BrTrue(t)
            | Self::BrFalse(t)
            | Self::Beq(t)
            | Self::Bne(t)
            | Self::Blt(t)
            | Self::Bgt(t)
            | Self::Leave(t) => *t = map(*t),
            Self::Switch(targets) => {
                for t in targets.iter_mut() {
                    *t = map(*t);
                }
            }
            _ => {}
        }
    }
}

/// Callee of a `Call` instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallTarget {
    /// Method defined in this module, by metadata token
    Def(u32),
    /// Entry in the module's member-reference table
    Ref(u32),
}

/// Reference to a method defined in another module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    /// Declaring module name
    pub module: String,
    /// Declaring type full name
    pub type_name: String,
    /// Method name
    pub name: String,
    /// Parameter type names
    pub params: Vec<String>,
    /// Return type name, `None` for void
    pub returns: Option<String>,
}

impl MemberRef {
    /// The runtime method every probe calls
    #[must_use]
    pub fn hit_probe() -> Self {
        Self {
            module: RUNTIME_MODULE.to_string(),
            type_name: RUNTIME_TYPE.to_string(),
            name: RUNTIME_HIT_METHOD.to_string(),
            params: vec!["Int32".to_string(), "Int32".to_string()],
            returns: None,
        }
    }
}

/// Kind of exception handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerKind {
    /// Typed catch; the handler starts with the exception on the stack
    Catch,
    /// Runs on every exit from the try region
    Finally,
    /// Runs only when the try region exits by exception
    Fault,
}

/// Protected region with its handler, as half-open instruction ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    /// Handler kind
    pub kind: HandlerKind,
    /// First instruction of the try region
    pub try_start: u32,
    /// One past the last instruction of the try region
    pub try_end: u32,
    /// First instruction of the handler
    pub handler_start: u32,
    /// One past the last instruction of the handler
    pub handler_end: u32,
}

/// Method body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodBody {
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Number of local slots
    pub locals: u16,
    /// Instructions
    pub instructions: Vec<Instruction>,
    /// Exception handlers
    pub handlers: Vec<ExceptionHandler>,
}

/// Method definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDef {
    /// Metadata token, unique within the module
    pub token: u32,
    /// Method name
    pub name: String,
    /// Parameter type names
    pub params: Vec<String>,
    /// Return type name, `None` for void
    pub returns: Option<String>,
    /// Marked as excluded from coverage
    pub exclude_from_coverage: bool,
    /// Body; abstract and extern methods have none
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// Signature used as the method identity in coverage data, e.g.
    /// `Int32 Add(Int32,Int32)`
    #[must_use]
    pub fn signature(&self) -> String {
        format!(
            "{} {}({})",
            self.returns.as_deref().unwrap_or("Void"),
            self.name,
            self.params.join(",")
        )
    }
}

/// Type definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Declaring type for nested types
    pub declaring_type: Option<TypeIndex>,
    /// Emitted by a compiler (closures, state machines)
    pub compiler_generated: bool,
    /// Marked as excluded from coverage
    pub exclude_from_coverage: bool,
    /// Methods
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// Whether this type is nested in another
    #[must_use]
    pub const fn is_nested(&self) -> bool {
        self.declaring_type.is_some()
    }
}

/// Method identity recorded in the probe manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbedMethod {
    /// Class name used for coverage attribution
    pub class: String,
    /// Method signature
    pub method: String,
}

/// Written into instrumented modules so the runtime can name what it counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeManifest {
    /// Directory flushed hit files go to
    pub hits_path: PathBuf,
    /// Instrumented methods, indexed by [`MethodKey`]
    pub methods: Vec<ProbedMethod>,
}

impl ProbeManifest {
    /// Look up a method by key
    #[must_use]
    pub fn method(&self, key: MethodKey) -> Option<&ProbedMethod> {
        self.methods.get(key.as_usize())
    }
}

/// A loaded module image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleImage {
    /// Module name
    pub name: String,
    /// Set once the module has been instrumented
    pub instrumented: bool,
    /// Names of referenced modules
    pub references: Vec<String>,
    /// External methods called from this module
    pub member_refs: Vec<MemberRef>,
    /// Flat type table, nested types included
    pub types: Vec<TypeDef>,
    /// Probe manifest of an instrumented module
    pub probes: Option<ProbeManifest>,
}

impl ModuleImage {
    /// Decode an image from bytes
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> ProbecovResult<Self> {
        let payload = check_header(path, bytes, IMAGE_MAGIC)?;
        bincode::deserialize(payload)
            .map_err(|e| ProbecovError::bad_image(path, format!("undecodable image: {e}")))
    }

    /// Encode the image to bytes
    pub fn to_bytes(&self) -> ProbecovResult<Vec<u8>> {
        let mut bytes = header(IMAGE_MAGIC);
        bincode::serialize_into(&mut bytes, self)?;
        Ok(bytes)
    }

    /// Read an image file
    pub fn read(path: &Path) -> ProbecovResult<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(path, &bytes)
    }

    /// Write an image file
    pub fn write(&self, path: &Path) -> ProbecovResult<()> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Full name of a type: `Namespace.Name`, nested as `Outer/Inner`
    #[must_use]
    pub fn type_full_name(&self, index: TypeIndex) -> String {
        let Some(ty) = self.types.get(index.as_usize()) else {
            return String::new();
        };
        match ty.declaring_type {
            Some(parent) => format!("{}/{}", self.type_full_name(parent), ty.name),
            None if ty.namespace.is_empty() => ty.name.clone(),
            None => format!("{}.{}", ty.namespace, ty.name),
        }
    }

    /// Types directly nested in `index`
    pub fn nested_types(&self, index: TypeIndex) -> impl Iterator<Item = TypeIndex> + '_ {
        self.types
            .iter()
            .enumerate()
            .filter(move |(_, ty)| ty.declaring_type == Some(index))
            .map(|(i, _)| TypeIndex::new(i as u32))
    }

    /// Find a method defined in this module by token
    #[must_use]
    pub fn method_by_token(&self, token: u32) -> Option<&MethodDef> {
        self.types
            .iter()
            .flat_map(|ty| ty.methods.iter())
            .find(|m| m.token == token)
    }

    /// Find a method by declaring type full name and method name
    #[must_use]
    pub fn find_method(&self, type_name: &str, name: &str) -> Option<&MethodDef> {
        self.types.iter().enumerate().find_map(|(i, ty)| {
            if self.type_full_name(TypeIndex::new(i as u32)) == type_name {
                ty.methods.iter().find(|m| m.name == name)
            } else {
                None
            }
        })
    }

    /// Parameter count and whether a value is returned, for a call target
    #[must_use]
    pub fn call_signature(&self, target: CallTarget) -> Option<(usize, bool)> {
        match target {
            CallTarget::Def(token) => self
                .method_by_token(token)
                .map(|m| (m.params.len(), m.returns.is_some())),
            CallTarget::Ref(index) => self
                .member_refs
                .get(index as usize)
                .map(|r| (r.params.len(), r.returns.is_some())),
        }
    }

    /// Index of a member reference, adding it when missing
    pub fn import_member(&mut self, member: MemberRef) -> u32 {
        if let Some(pos) = self.member_refs.iter().position(|m| *m == member) {
            return pos as u32;
        }
        if !self.references.contains(&member.module) {
            self.references.push(member.module.clone());
        }
        self.member_refs.push(member);
        (self.member_refs.len() - 1) as u32
    }
}

/// Path of the symbol file belonging to an image
#[must_use]
pub fn symbols_path_for(image_path: &Path) -> PathBuf {
    image_path.with_extension(symbols::SYMBOLS_EXTENSION)
}

/// An image together with its symbols, as read from disk
#[derive(Debug, Clone)]
pub struct LoadedModule {
    /// Path the image was read from
    pub path: PathBuf,
    /// Image
    pub image: ModuleImage,
    /// Symbols, when a symbol file sits next to the image
    pub symbols: Option<SymbolFile>,
}

impl LoadedModule {
    /// Read an image and, if present, its symbol file
    pub fn read(path: &Path) -> ProbecovResult<Self> {
        let image = ModuleImage::read(path)?;
        let symbols_path = symbols_path_for(path);
        let symbols = if symbols_path.is_file() {
            Some(SymbolFile::read(&symbols_path)?)
        } else {
            None
        };
        Ok(Self {
            path: path.to_path_buf(),
            image,
            symbols,
        })
    }
}

fn header(magic: [u8; 4]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(64);
    bytes.extend_from_slice(&magic);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes
}

fn check_header<'a>(path: &Path, bytes: &'a [u8], magic: [u8; 4]) -> ProbecovResult<&'a [u8]> {
    if bytes.len() < 6 || bytes[..4] != magic {
        return Err(ProbecovError::bad_image(path, "missing magic"));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(ProbecovError::bad_image(
            path,
            format!("unsupported format version {version}"),
        ));
    }
    Ok(&bytes[6..])
}
