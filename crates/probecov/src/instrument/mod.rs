//! Instrumentation Engine
//!
//! Rewrites a module so every statement and branch target calls the hit
//! probe, and describes every injected probe in an [`InstrumentedAssembly`].
//!
//! ```text
//! read ──► marker? ──► stale sources? ──► walk types ──► inject ──► verify
//!            │              │                               │
//!     AlreadyInstrumented  SourceChanged       NothingToInstrument
//! ```

pub mod method;

use crate::ids::{MethodKey, TypeIndex};
use crate::image::{
    symbols_path_for, LoadedModule, MemberRef, MethodBody, ModuleImage, ProbeManifest,
    ProbedMethod, SymbolFile, AUTO_GENERATED_PROGRAM, IMAGE_EXTENSION, MODULE_TYPE_NAME,
};
use crate::model::{
    InstrumentationResult, InstrumentedAssembly, InstrumentedInstruction, InstrumentedMethod,
    SourceFile, SourceRange,
};
use crate::resolver::{MemberResolution, ReferenceResolver};
use crate::result::{ProbecovError, ProbecovResult};
use crate::staleness::{changed_on_disk, SourceDocument};
use method::{inject, probe_sites, verify};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the working directory under the system temp directory
pub const TEMP_DIR_NAME: &str = "probecov";

/// Inputs shared by every module of an instrumentation run
#[derive(Debug, Clone)]
pub struct InstrumentationContext {
    /// Directory instrumented modules flush hits to
    pub hits_path: PathBuf,
    /// Root reported source paths are relative to
    pub workdir: PathBuf,
    /// Source files to instrument; empty means every document
    pub sources: Vec<PathBuf>,
    /// Extra directories searched for referenced modules
    pub search_directories: Vec<PathBuf>,
    /// Where rewritten modules are written
    pub temp_root: PathBuf,
    /// Worker threads for batch instrumentation
    pub jobs: usize,
}

impl InstrumentationContext {
    /// Context with default temp root and one worker per core
    #[must_use]
    pub fn new(hits_path: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            hits_path: hits_path.into(),
            workdir: workdir.into(),
            sources: Vec::new(),
            search_directories: Vec::new(),
            temp_root: std::env::temp_dir().join(TEMP_DIR_NAME),
            jobs: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
        }
    }

    /// Restrict instrumentation to these source files
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<PathBuf>) -> Self {
        self.sources = sources;
        self
    }

    /// Write rewritten modules under `temp_root`
    #[must_use]
    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = temp_root.into();
        self
    }

    /// Search `directory` for referenced modules
    #[must_use]
    pub fn with_search_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.search_directories.push(directory.into());
        self
    }

    /// Use `jobs` worker threads
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    fn is_allowed(&self, path: &Path) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|s| s == path)
    }

    /// Create the temp root if missing
    ///
    /// # Errors
    ///
    /// [`ProbecovError::TempDir`] when the directory cannot be created.
    pub fn ensure_temp_root(&self) -> ProbecovResult<&Path> {
        std::fs::create_dir_all(&self.temp_root).map_err(|source| ProbecovError::TempDir {
            path: self.temp_root.clone(),
            source,
        })?;
        Ok(&self.temp_root)
    }
}

/// Why a module was left alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The module carries the instrumented marker
    AlreadyInstrumented,
    /// Source files no longer match their recorded fingerprints
    SourceChanged(Vec<PathBuf>),
    /// No method had an instrumentable point
    NothingToInstrument,
    /// Not a readable module image
    BadImage(String),
    /// A method body failed stack verification
    Unverifiable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInstrumented => write!(f, "Already instrumented"),
            Self::SourceChanged(_) => write!(f, "Source files have changed"),
            Self::NothingToInstrument => write!(f, "Nothing to instrument"),
            Self::BadImage(reason) => write!(f, "Invalid assembly format: {reason}"),
            Self::Unverifiable(reason) => write!(f, "Unverifiable method body: {reason}"),
        }
    }
}

/// Outcome of instrumenting one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentOutcome {
    /// Rewritten and described
    Instrumented(InstrumentedAssembly),
    /// Left alone
    Skipped(SkipReason),
}

impl InstrumentOutcome {
    /// The assembly, when instrumented
    #[must_use]
    pub fn assembly(&self) -> Option<&InstrumentedAssembly> {
        match self {
            Self::Instrumented(assembly) => Some(assembly),
            Self::Skipped(_) => None,
        }
    }

    /// The skip reason, when skipped
    #[must_use]
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Instrumented(_) => None,
            Self::Skipped(reason) => Some(reason),
        }
    }
}

/// A method body rewritten in memory, not yet stored in the image
struct PlannedMethod {
    ty: TypeIndex,
    index: usize,
    body: MethodBody,
    points: Vec<crate::image::SequencePoint>,
}

/// Instruments single modules
#[derive(Debug, Default, Clone, Copy)]
pub struct AssemblyInstrumenter;

impl AssemblyInstrumenter {
    /// Create an instrumenter
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Instrument the module at `path`
    ///
    /// # Errors
    ///
    /// Hard failures only: the temp root cannot be created or output cannot
    /// be written. Unreadable images are reported as [`SkipReason::BadImage`]
    /// and bodies failing stack verification as [`SkipReason::Unverifiable`].
    #[tracing::instrument(skip_all, fields(assembly = %path.display()))]
    pub fn instrument_file(
        &self,
        context: &InstrumentationContext,
        path: &Path,
    ) -> ProbecovResult<InstrumentOutcome> {
        let loaded = match LoadedModule::read(path) {
            Ok(loaded) => loaded,
            Err(e @ (ProbecovError::BadImageFormat { .. } | ProbecovError::Io(_))) => {
                return Ok(skip(SkipReason::BadImage(e.to_string())));
            }
            Err(e) => return Err(e),
        };

        let directory = path.parent().unwrap_or_else(|| Path::new("."));
        let resolver = context
            .search_directories
            .iter()
            .fold(ReferenceResolver::new(directory), |r, d| r.with_directory(d.clone()));
        tracing::trace!(directories = ?resolver.search_directories(), "assembly resolver search directories");

        self.instrument_module(context, loaded, &resolver)
    }

    /// Instrument an already loaded module
    pub fn instrument_module(
        &self,
        context: &InstrumentationContext,
        loaded: LoadedModule,
        resolver: &ReferenceResolver,
    ) -> ProbecovResult<InstrumentOutcome> {
        let LoadedModule {
            path,
            mut image,
            symbols,
        } = loaded;

        if image.instrumented {
            return Ok(skip(SkipReason::AlreadyInstrumented));
        }
        let Some(mut symbols) = symbols else {
            tracing::debug!("no symbol file");
            return Ok(skip(SkipReason::NothingToInstrument));
        };

        let documents = SourceDocument::from_symbols(&symbols);
        let changed: Vec<PathBuf> = changed_on_disk(&documents)
            .into_iter()
            .map(|d| d.path.clone())
            .collect();
        if !changed.is_empty() {
            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!(changed_files = ?changed, "Source files have changed");
            } else {
                tracing::info!("Source files have changed");
            }
            return Ok(InstrumentOutcome::Skipped(SkipReason::SourceChanged(changed)));
        }

        let hit_ref = image.import_member(MemberRef::hit_probe());
        let mut walk = TypeWalk::new(context, &image, &symbols, hit_ref);
        match walk.run() {
            Ok(()) => {}
            Err(e @ ProbecovError::StackImbalance { .. }) => {
                tracing::warn!(error = %e, "method body failed verification, module left alone");
                return Ok(InstrumentOutcome::Skipped(SkipReason::Unverifiable(e.to_string())));
            }
            Err(e) => return Err(e),
        }
        let TypeWalk {
            planned,
            methods,
            manifest,
            ..
        } = walk;

        if methods.is_empty() {
            return Ok(skip(SkipReason::NothingToInstrument));
        }

        for plan in planned {
            let Some(def) = image
                .types
                .get_mut(plan.ty.as_usize())
                .and_then(|t| t.methods.get_mut(plan.index))
            else {
                continue;
            };
            if let Some(entry) = symbols.methods.iter_mut().find(|m| m.method_token == def.token) {
                entry.sequence_points = plan.points;
            }
            def.body = Some(plan.body);
        }
        image.instrumented = true;
        image.probes = Some(ProbeManifest {
            hits_path: context.hits_path.clone(),
            methods: manifest,
        });

        for member in &image.member_refs {
            match resolver.resolve_member(member) {
                MemberResolution::Resolved | MemberResolution::Runtime => {}
                other => tracing::debug!(
                    module = %member.module,
                    member = %format!("{}::{}", member.type_name, member.name),
                    resolution = ?other,
                    "unresolved member reference"
                ),
            }
        }

        let temp_root = context.ensure_temp_root()?;
        let temp_image_file = temp_root.join(format!("{}.{IMAGE_EXTENSION}", uuid::Uuid::new_v4()));
        let temp_symbols_file = symbols_path_for(&temp_image_file);
        write_pair(
            temp_root,
            (&image.to_bytes()?, &temp_image_file),
            (&symbols.to_bytes()?, &temp_symbols_file),
        )?;
        tracing::info!(output = %temp_image_file.display(), "Assembly instrumented");

        Ok(InstrumentOutcome::Instrumented(InstrumentedAssembly {
            name: image.name,
            source_path: path,
            temp_image_file,
            temp_symbols_file,
            methods,
        }))
    }
}

/// Stage both files in `directory`, then move them into place
///
/// The symbol file lands first and the image is only visible once its symbols
/// exist. A failed image move removes the symbol file again.
fn write_pair(directory: &Path, image: (&[u8], &Path), symbols: (&[u8], &Path)) -> ProbecovResult<()> {
    let stage = |bytes: &[u8]| -> ProbecovResult<tempfile::NamedTempFile> {
        let mut file = tempfile::NamedTempFile::new_in(directory)?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(file)
    };
    let staged_image = stage(image.0)?;
    let staged_symbols = stage(symbols.0)?;

    staged_symbols.persist(symbols.1).map_err(|e| e.error)?;
    if let Err(e) = staged_image.persist(image.1) {
        let _ = std::fs::remove_file(symbols.1);
        return Err(e.error.into());
    }
    Ok(())
}

fn skip(reason: SkipReason) -> InstrumentOutcome {
    tracing::info!("{reason}");
    InstrumentOutcome::Skipped(reason)
}

/// Depth-first walk over instrumentable types, collecting rewritten bodies
struct TypeWalk<'a> {
    context: &'a InstrumentationContext,
    image: &'a ModuleImage,
    symbols: &'a SymbolFile,
    hit_ref: u32,
    files: HashMap<u32, Arc<SourceFile>>,
    visited: BTreeSet<TypeIndex>,
    planned: Vec<PlannedMethod>,
    methods: Vec<Arc<InstrumentedMethod>>,
    manifest: Vec<ProbedMethod>,
}

impl<'a> TypeWalk<'a> {
    fn new(
        context: &'a InstrumentationContext,
        image: &'a ModuleImage,
        symbols: &'a SymbolFile,
        hit_ref: u32,
    ) -> Self {
        Self {
            context,
            image,
            symbols,
            hit_ref,
            files: HashMap::new(),
            visited: BTreeSet::new(),
            planned: Vec::new(),
            methods: Vec::new(),
            manifest: Vec::new(),
        }
    }

    fn run(&mut self) -> ProbecovResult<()> {
        for (i, ty) in self.image.types.iter().enumerate() {
            if ty.is_nested() {
                continue;
            }
            let index = TypeIndex::new(i as u32);
            let name = self.image.type_full_name(index);
            if name == MODULE_TYPE_NAME || name == AUTO_GENERATED_PROGRAM {
                continue;
            }
            self.visit(index)?;
        }
        Ok(())
    }

    fn visit(&mut self, index: TypeIndex) -> ProbecovResult<()> {
        if !self.visited.insert(index) {
            return Ok(());
        }
        let image = self.image;
        let Some(ty) = image.types.get(index.as_usize()) else {
            return Ok(());
        };
        if ty.exclude_from_coverage {
            return Ok(());
        }
        let class = self.attributed_class(index);
        for (m, def) in ty.methods.iter().enumerate() {
            if def.exclude_from_coverage {
                continue;
            }
            let Some(body) = def.body.as_ref() else {
                continue;
            };
            self.instrument_method(index, m, &class, def, body)?;
        }
        for nested in image.nested_types(index) {
            self.visit(nested)?;
        }
        Ok(())
    }

    /// Class coverage of a type is reported under: compiler-generated types
    /// count toward their nearest hand-written declaring type
    fn attributed_class(&self, mut index: TypeIndex) -> String {
        let mut hops = 0;
        while let Some(ty) = self.image.types.get(index.as_usize()) {
            match ty.declaring_type {
                Some(parent) if ty.compiler_generated && hops < self.image.types.len() => {
                    index = parent;
                    hops += 1;
                }
                _ => break,
            }
        }
        self.image.type_full_name(index)
    }

    fn instrument_method(
        &mut self,
        ty: TypeIndex,
        index: usize,
        class: &str,
        def: &crate::image::MethodDef,
        body: &MethodBody,
    ) -> ProbecovResult<()> {
        let symbols = self.symbols;
        let context = self.context;
        let points = symbols.sequence_points(def.token);
        let allowed = |document: u32| {
            symbols
                .document(document)
                .is_some_and(|d| context.is_allowed(&d.path))
        };
        let sites = probe_sites(body, points, allowed);
        if sites.is_empty() {
            return Ok(());
        }

        let key = MethodKey::new(self.manifest.len() as u32);
        let signature = def.signature();
        let mut rewritten = inject(body, &sites, key, self.hit_ref);
        let full_name = format!("{}::{}", self.image.type_full_name(ty), signature);
        verify(
            self.image,
            &full_name,
            def.returns.is_some(),
            body,
            &mut rewritten,
        )?;
        tracing::trace!(method = %full_name, probes = sites.len(), "method instrumented");

        let mut instructions = Vec::with_capacity(sites.len());
        for site in &sites {
            let sp = &site.sequence_point;
            instructions.push(InstrumentedInstruction {
                id: site.id,
                file: self.file(sp.document),
                range: SourceRange {
                    start_line: sp.start_line,
                    start_column: sp.start_column,
                    end_line: sp.end_line,
                    end_column: sp.end_column,
                },
                is_branch: site.is_branch,
            });
        }

        self.manifest.push(ProbedMethod {
            class: class.to_string(),
            method: signature.clone(),
        });
        self.methods.push(Arc::new(InstrumentedMethod {
            assembly: self.image.name.clone(),
            class: class.to_string(),
            signature,
            instructions,
        }));
        self.planned.push(PlannedMethod {
            ty,
            index,
            points: points.iter().map(|p| rewritten.remap_point(p)).collect(),
            body: rewritten.body,
        });
        Ok(())
    }

    fn file(&mut self, document: u32) -> Arc<SourceFile> {
        let symbols = self.symbols;
        Arc::clone(self.files.entry(document).or_insert_with(|| {
            let path = symbols
                .document(document)
                .map(|d| d.path.clone())
                .unwrap_or_default();
            SourceFile::shared(path)
        }))
    }
}

/// Instruments a batch of modules on a worker pool
#[derive(Debug, Default, Clone, Copy)]
pub struct Instrumenter {
    assembly: AssemblyInstrumenter,
}

impl Instrumenter {
    /// Create a batch instrumenter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            assembly: AssemblyInstrumenter::new(),
        }
    }

    /// Instrument every file, keeping input order
    ///
    /// Soft skips, including unverifiable modules, contribute no assembly.
    /// Only an I/O failure writing output aborts the batch.
    pub fn instrument_all(
        &self,
        context: &InstrumentationContext,
        files: &[PathBuf],
    ) -> ProbecovResult<Vec<(PathBuf, InstrumentOutcome)>> {
        self.instrument_with_progress(context, files, |_, _| {})
    }

    /// [`Self::instrument_all`] reporting each finished file to `progress`
    pub fn instrument_with_progress<F>(
        &self,
        context: &InstrumentationContext,
        files: &[PathBuf],
        progress: F,
    ) -> ProbecovResult<Vec<(PathBuf, InstrumentOutcome)>>
    where
        F: Fn(&Path, &InstrumentOutcome) + Sync,
    {
        let workers = context.jobs.clamp(1, files.len().max(1));
        let assignments: Vec<Vec<(usize, &PathBuf)>> = (0..workers)
            .map(|w| files.iter().enumerate().skip(w).step_by(workers).collect())
            .collect();

        let mut finished: Vec<(usize, ProbecovResult<InstrumentOutcome>)> = std::thread::scope(|s| {
            let joins: Vec<_> = assignments
                .iter()
                .map(|assigned| {
                    let progress = &progress;
                    s.spawn(move || {
                        assigned
                            .iter()
                            .map(|(i, path)| {
                                let outcome = self.assembly.instrument_file(context, path);
                                if let Ok(outcome) = &outcome {
                                    progress(path, outcome);
                                }
                                (*i, outcome)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            joins
                .into_iter()
                .flat_map(|join| {
                    join.join().unwrap_or_else(|_| {
                        vec![(
                            usize::MAX,
                            Err(ProbecovError::Io(std::io::Error::other(
                                "instrumentation worker panicked",
                            ))),
                        )]
                    })
                })
                .collect()
        });
        finished.sort_by_key(|(i, _)| *i);

        let mut outcomes = Vec::with_capacity(files.len());
        for (i, outcome) in finished {
            let outcome = outcome?;
            if let Some(path) = files.get(i) {
                outcomes.push((path.clone(), outcome));
            }
        }
        Ok(outcomes)
    }

    /// Instrument every file into a coverage baseline
    pub fn instrument(
        &self,
        context: &InstrumentationContext,
        files: &[PathBuf],
    ) -> ProbecovResult<InstrumentationResult> {
        let outcomes = self.instrument_all(context, files)?;
        Ok(collect_result(context, outcomes))
    }
}

/// Fold batch outcomes into a baseline
#[must_use]
pub fn collect_result(
    context: &InstrumentationContext,
    outcomes: Vec<(PathBuf, InstrumentOutcome)>,
) -> InstrumentationResult {
    let mut result = InstrumentationResult::new(&context.hits_path, &context.workdir);
    for (_, outcome) in outcomes {
        if let InstrumentOutcome::Instrumented(assembly) = outcome {
            result.add_assembly(assembly);
        }
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::image::{Instruction as I, ModuleBuilder, SymbolFile};

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        source: PathBuf,
        context: InstrumentationContext,
    }

    const SOURCE: &[u8] = b"class Calc { int Abs(int x) { if (x < 0) return -x; return x; } }";

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let source = root.join("Calc.cs");
        std::fs::write(&source, SOURCE).unwrap();
        let context = InstrumentationContext::new(root.join("hits"), &root)
            .with_temp_root(root.join("tmp"))
            .with_jobs(2);
        Fixture {
            _dir: dir,
            root,
            source,
            context,
        }
    }

    fn calc(source: &Path) -> (ModuleImage, SymbolFile) {
        ModuleBuilder::new("Calc")
            .document(source, SOURCE)
            .ty("Calc", "Math", |t| {
                t.method("Abs", &["Int32"], Some("Int32"), |m| {
                    m.stmt(1, [I::LdArg(0), I::LdcI4(0), I::Bgt(6)])
                        .stmt(2, [I::LdArg(0), I::Neg, I::Ret])
                        .stmt(3, [I::LdArg(0), I::Ret])
                })
                .method("Hidden", &[], None, |m| m.hidden([I::Ret]))
                .nested("<>c", |n| {
                    n.compiler_generated()
                        .method("<Abs>b__0", &[], None, |m| m.stmt(4, [I::Ret]))
                })
                .nested("Skipped", |n| {
                    n.excluded().method("F", &[], None, |m| m.stmt(5, [I::Ret]))
                })
            })
            .ty("", MODULE_TYPE_NAME, |t| t.method(".cctor", &[], None, |m| m.stmt(6, [I::Ret])))
            .build()
    }

    fn write(dir: &Path, name: &str, image: &ModuleImage, symbols: &SymbolFile) -> PathBuf {
        let path = dir.join(format!("{name}.pcbm"));
        image.write(&path).unwrap();
        symbols.write(&symbols_path_for(&path)).unwrap();
        path
    }

    #[test]
    fn test_instrument_module() {
        let fx = fixture();
        let (image, symbols) = calc(&fx.source);
        let path = write(&fx.root, "Calc", &image, &symbols);

        let outcome = AssemblyInstrumenter::new().instrument_file(&fx.context, &path).unwrap();
        let assembly = outcome.assembly().unwrap();

        assert_eq!(assembly.name, "Calc");
        let names: Vec<_> = assembly.methods.iter().map(|m| (m.class.as_str(), m.signature.as_str())).collect();
        assert_eq!(
            names,
            vec![
                ("Calc.Math", "Int32 Abs(Int32)"),
                ("Calc.Math", "Void <Abs>b__0()"),
            ]
        );
        // 3 statements plus the branch target and fall-through
        assert_eq!(assembly.methods[0].statement_count(), 3);
        assert_eq!(assembly.methods[0].branch_count(), 2);
        assert!(assembly.temp_image_file.starts_with(fx.root.join("tmp")));

        let rewritten = LoadedModule::read(&assembly.temp_image_file).unwrap();
        assert!(rewritten.image.instrumented);
        assert!(rewritten.symbols.is_some());
        let manifest = rewritten.image.probes.unwrap();
        assert_eq!(manifest.hits_path, fx.root.join("hits"));
        assert_eq!(manifest.methods.len(), 2);

        // original left untouched
        assert_eq!(ModuleImage::read(&path).unwrap(), image);
    }

    #[test]
    fn test_already_instrumented_is_skipped() {
        let fx = fixture();
        let (image, symbols) = calc(&fx.source);
        let path = write(&fx.root, "Calc", &image, &symbols);
        let first = AssemblyInstrumenter::new().instrument_file(&fx.context, &path).unwrap();
        let output = first.assembly().unwrap().temp_image_file.clone();

        let again = AssemblyInstrumenter::new().instrument_file(&fx.context, &output).unwrap();
        assert_eq!(again.skip_reason(), Some(&SkipReason::AlreadyInstrumented));
        assert_eq!(std::fs::read_dir(fx.root.join("tmp")).unwrap().count(), 2);
    }

    #[test]
    fn test_source_changed_is_skipped() {
        let fx = fixture();
        let (image, symbols) = calc(&fx.source);
        let path = write(&fx.root, "Calc", &image, &symbols);
        std::fs::write(&fx.source, b"class Calc { }").unwrap();

        let outcome = AssemblyInstrumenter::new().instrument_file(&fx.context, &path).unwrap();
        assert!(matches!(outcome.skip_reason(), Some(SkipReason::SourceChanged(_))));
        assert!(!fx.root.join("tmp").exists());
    }

    #[test]
    fn test_resource_only_module_has_nothing_to_instrument() {
        let fx = fixture();
        let (image, symbols) = ModuleBuilder::new("Resources")
            .document(&fx.source, SOURCE)
            .ty("R", "Strings", |t| t.method("Get", &[], None, |m| m.no_body()))
            .build();
        let path = write(&fx.root, "Resources", &image, &symbols);
        let outcome = AssemblyInstrumenter::new().instrument_file(&fx.context, &path).unwrap();
        assert_eq!(outcome.skip_reason(), Some(&SkipReason::NothingToInstrument));
    }

    #[test]
    fn test_source_allow_list() {
        let fx = fixture();
        let (image, symbols) = calc(&fx.source);
        let path = write(&fx.root, "Calc", &image, &symbols);
        let context = fx.context.clone().with_sources(vec![fx.root.join("Other.cs")]);
        let outcome = AssemblyInstrumenter::new().instrument_file(&context, &path).unwrap();
        assert_eq!(outcome.skip_reason(), Some(&SkipReason::NothingToInstrument));
    }

    #[test]
    fn test_batch_keeps_order_and_skips_bad_images() {
        let fx = fixture();
        let (image, symbols) = calc(&fx.source);
        let good = write(&fx.root, "Calc", &image, &symbols);
        let junk = fx.root.join("junk.pcbm");
        std::fs::write(&junk, b"not a module").unwrap();
        let (mut other, other_symbols) = calc(&fx.source);
        other.name = "Calc2".to_string();
        let good2 = write(&fx.root, "Calc2", &other, &other_symbols);

        let files = vec![good.clone(), junk.clone(), good2.clone()];
        let outcomes = Instrumenter::new().instrument_all(&fx.context, &files).unwrap();
        let paths: Vec<_> = outcomes.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(paths, files);
        assert!(matches!(outcomes[1].1.skip_reason(), Some(SkipReason::BadImage(_))));

        let result = collect_result(&fx.context, outcomes);
        assert_eq!(result.assemblies.len(), 2);
        assert_eq!(result.source_files().count(), 1);
    }

    #[test]
    fn test_unverifiable_module_does_not_abort_batch() {
        let fx = fixture();
        let (image, symbols) = calc(&fx.source);
        let good = write(&fx.root, "Calc", &image, &symbols);
        let (underflow, underflow_symbols) = ModuleBuilder::new("Broken")
            .document(&fx.source, SOURCE)
            .ty("B", "T", |t| t.method("F", &[], None, |m| m.stmt(7, [I::Pop, I::Ret])))
            .build();
        let broken = write(&fx.root, "Broken", &underflow, &underflow_symbols);

        let files = vec![good.clone(), broken];
        let outcomes = Instrumenter::new().instrument_all(&fx.context, &files).unwrap();
        assert!(outcomes[0].1.assembly().is_some());
        assert!(matches!(outcomes[1].1.skip_reason(), Some(SkipReason::Unverifiable(_))));

        let result = Instrumenter::new().instrument(&fx.context, &files).unwrap();
        let names: Vec<_> = result.assemblies.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Calc"]);
        assert!(result.assemblies.iter().all(|a| a.source_path == good));
    }

    #[test]
    fn test_instrumented_output_is_image_and_symbols_only() {
        let fx = fixture();
        let (image, symbols) = calc(&fx.source);
        let path = write(&fx.root, "Calc", &image, &symbols);
        let outcome = AssemblyInstrumenter::new().instrument_file(&fx.context, &path).unwrap();
        let assembly = outcome.assembly().unwrap();

        let mut written: Vec<_> = std::fs::read_dir(fx.root.join("tmp"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        written.sort();
        let mut expected = vec![assembly.temp_image_file.clone(), assembly.temp_symbols_file.clone()];
        expected.sort();
        assert_eq!(written, expected);
    }

    #[test]
    fn test_failed_image_write_removes_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("missing").join("a.pcbm");
        let symbols = dir.path().join("a.pcbs");

        assert!(write_pair(dir.path(), (b"image", &image), (b"symbols", &symbols)).is_err());
        assert!(!image.exists());
        assert!(!symbols.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_symbols_write_leaves_no_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("a.pcbm");
        let symbols = dir.path().join("missing").join("a.pcbs");

        assert!(write_pair(dir.path(), (b"image", &image), (b"symbols", &symbols)).is_err());
        assert!(!image.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
