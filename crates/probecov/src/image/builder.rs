//! Programmatic construction of module images and their symbols.

use super::stack;
use super::{
    Document, ExceptionHandler, HashAlgorithm, Instruction, MethodBody, MethodDef, MethodSymbols,
    ModuleImage, SequencePoint, SymbolFile, TypeDef,
};
use crate::ids::TypeIndex;
use crate::staleness::fingerprint;
use std::path::PathBuf;

/// Token assigned to the first method a builder emits
pub const FIRST_METHOD_TOKEN: u32 = 0x0600_0001;

/// Builder for a module image and its symbol file
#[derive(Debug)]
pub struct ModuleBuilder {
    image: ModuleImage,
    documents: Vec<Document>,
    methods: Vec<MethodSymbols>,
    next_token: u32,
}

impl ModuleBuilder {
    /// Start a module
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            image: ModuleImage {
                name: name.to_string(),
                ..ModuleImage::default()
            },
            documents: Vec::new(),
            methods: Vec::new(),
            next_token: FIRST_METHOD_TOKEN,
        }
    }

    /// Add a source document fingerprinted with SHA-256 over `content`
    #[must_use]
    pub fn document(self, path: impl Into<PathBuf>, content: &[u8]) -> Self {
        let hash = fingerprint(HashAlgorithm::Sha256, content);
        self.document_with_hash(path, HashAlgorithm::Sha256, hash)
    }

    /// Add a source document with an explicit fingerprint
    #[must_use]
    pub fn document_with_hash(
        mut self,
        path: impl Into<PathBuf>,
        hash_algorithm: HashAlgorithm,
        hash: Vec<u8>,
    ) -> Self {
        self.documents.push(Document {
            path: path.into(),
            hash_algorithm,
            hash,
        });
        self
    }

    /// Mark the module as already instrumented
    #[must_use]
    pub fn instrumented(mut self) -> Self {
        self.image.instrumented = true;
        self
    }

    /// Add a referenced module name
    #[must_use]
    pub fn reference(mut self, module: &str) -> Self {
        self.image.references.push(module.to_string());
        self
    }

    /// Add a member reference
    #[must_use]
    pub fn member_ref(mut self, member: super::MemberRef) -> Self {
        self.image.member_refs.push(member);
        self
    }

    /// Add a top-level type
    #[must_use]
    pub fn ty(
        mut self,
        namespace: &str,
        name: &str,
        f: impl FnOnce(TypeBuilder) -> TypeBuilder,
    ) -> Self {
        let built = f(TypeBuilder::new(namespace, name));
        self.push_type(built, None);
        self
    }

    fn push_type(&mut self, built: TypeBuilder, declaring_type: Option<TypeIndex>) {
        let index = TypeIndex::new(self.image.types.len() as u32);
        let mut methods = Vec::with_capacity(built.methods.len());
        for method in built.methods {
            let token = self.next_token;
            self.next_token += 1;
            if !method.points.is_empty() {
                self.methods.push(MethodSymbols {
                    method_token: token,
                    sequence_points: method.points,
                });
            }
            methods.push(MethodDef {
                token,
                name: method.name,
                params: method.params,
                returns: method.returns,
                exclude_from_coverage: method.exclude_from_coverage,
                body: method.body,
            });
        }
        self.image.types.push(TypeDef {
            namespace: built.namespace,
            name: built.name,
            declaring_type,
            compiler_generated: built.compiler_generated,
            exclude_from_coverage: built.exclude_from_coverage,
            methods,
        });
        for nested in built.nested {
            self.push_type(nested, Some(index));
        }
    }

    /// Finish, computing each body's maximum stack depth
    #[must_use]
    pub fn build(mut self) -> (ModuleImage, SymbolFile) {
        let lookup = self.image.clone();
        for ty in &mut self.image.types {
            for method in &mut ty.methods {
                let returns_value = method.returns.is_some();
                if let Some(body) = method.body.as_mut() {
                    if let Ok(depths) = stack::analyze(&lookup, body, returns_value) {
                        body.max_stack = depths.max_depth();
                    }
                }
            }
        }
        let symbols = SymbolFile {
            module_name: self.image.name.clone(),
            documents: self.documents,
            methods: self.methods,
        };
        (self.image, symbols)
    }
}

/// Builder for a type and its nested types
#[derive(Debug)]
pub struct TypeBuilder {
    namespace: String,
    name: String,
    compiler_generated: bool,
    exclude_from_coverage: bool,
    methods: Vec<MethodBuilder>,
    nested: Vec<TypeBuilder>,
}

impl TypeBuilder {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            compiler_generated: false,
            exclude_from_coverage: false,
            methods: Vec::new(),
            nested: Vec::new(),
        }
    }

    /// Mark as compiler generated
    #[must_use]
    pub fn compiler_generated(mut self) -> Self {
        self.compiler_generated = true;
        self
    }

    /// Exclude from coverage
    #[must_use]
    pub fn excluded(mut self) -> Self {
        self.exclude_from_coverage = true;
        self
    }

    /// Add a method
    #[must_use]
    pub fn method(
        mut self,
        name: &str,
        params: &[&str],
        returns: Option<&str>,
        f: impl FnOnce(MethodBuilder) -> MethodBuilder,
    ) -> Self {
        self.methods.push(f(MethodBuilder::new(name, params, returns)));
        self
    }

    /// Add a nested type
    #[must_use]
    pub fn nested(mut self, name: &str, f: impl FnOnce(TypeBuilder) -> TypeBuilder) -> Self {
        self.nested.push(f(TypeBuilder::new("", name)));
        self
    }
}

/// Builder for a method body and its sequence points
#[derive(Debug)]
pub struct MethodBuilder {
    name: String,
    params: Vec<String>,
    returns: Option<String>,
    exclude_from_coverage: bool,
    body: Option<MethodBody>,
    points: Vec<SequencePoint>,
    document: u32,
}

impl MethodBuilder {
    fn new(name: &str, params: &[&str], returns: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            params: params.iter().map(ToString::to_string).collect(),
            returns: returns.map(ToString::to_string),
            exclude_from_coverage: false,
            body: Some(MethodBody::default()),
            points: Vec::new(),
            document: 0,
        }
    }

    fn body_mut(&mut self) -> &mut MethodBody {
        self.body.get_or_insert_with(MethodBody::default)
    }

    fn offset(&self) -> u32 {
        self.body.as_ref().map_or(0, |b| b.instructions.len() as u32)
    }

    /// Append an instruction
    #[must_use]
    pub fn ins(mut self, instruction: Instruction) -> Self {
        self.body_mut().instructions.push(instruction);
        self
    }

    /// Append a statement: a sequence point on `line` covering `instructions`
    #[must_use]
    pub fn stmt(mut self, line: u32, instructions: impl IntoIterator<Item = Instruction>) -> Self {
        self.points.push(SequencePoint {
            offset: self.offset(),
            document: self.document,
            start_line: line,
            start_column: 9,
            end_line: line,
            end_column: 40,
        });
        self.body_mut().instructions.extend(instructions);
        self
    }

    /// Append instructions under a hidden sequence point
    #[must_use]
    pub fn hidden(mut self, instructions: impl IntoIterator<Item = Instruction>) -> Self {
        self.points.push(SequencePoint {
            offset: self.offset(),
            document: self.document,
            start_line: SequencePoint::HIDDEN_LINE,
            start_column: 0,
            end_line: SequencePoint::HIDDEN_LINE,
            end_column: 0,
        });
        self.body_mut().instructions.extend(instructions);
        self
    }

    /// Attribute following statements to another document
    #[must_use]
    pub fn in_document(mut self, document: u32) -> Self {
        self.document = document;
        self
    }

    /// Declare local slots
    #[must_use]
    pub fn locals(mut self, count: u16) -> Self {
        self.body_mut().locals = count;
        self
    }

    /// Add an exception handler
    #[must_use]
    pub fn handler(mut self, handler: ExceptionHandler) -> Self {
        self.body_mut().handlers.push(handler);
        self
    }

    /// Exclude from coverage
    #[must_use]
    pub fn excluded(mut self) -> Self {
        self.exclude_from_coverage = true;
        self
    }

    /// Abstract or extern method
    #[must_use]
    pub fn no_body(mut self) -> Self {
        self.body = None;
        self
    }
}
