//! Reference Resolver
//!
//! Locates the modules a module references so member references can be
//! checked against their definitions after rewriting.

use crate::image::{MemberRef, ModuleImage, IMAGE_EXTENSION, RUNTIME_MODULE};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Outcome of resolving a member reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberResolution {
    /// Found with a matching signature
    Resolved,
    /// The hit-recording runtime, supplied by the test host
    Runtime,
    /// The declaring module is not in any search directory
    UnresolvedModule,
    /// The module exists but has no such method
    MissingMember,
    /// The method exists with a different parameter count or return
    ArityMismatch,
}

/// Resolves referenced modules from a list of search directories
#[derive(Debug)]
pub struct ReferenceResolver {
    search_directories: Vec<PathBuf>,
    cache: Mutex<HashMap<String, Option<Arc<ModuleImage>>>>,
}

impl ReferenceResolver {
    /// Resolver searching the directory of the module being instrumented
    #[must_use]
    pub fn new(module_directory: &Path) -> Self {
        Self {
            search_directories: vec![module_directory.to_path_buf()],
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Add another search directory
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        if !self.search_directories.contains(&directory) {
            self.search_directories.push(directory);
        }
        self
    }

    /// Directories searched, in order
    #[must_use]
    pub fn search_directories(&self) -> &[PathBuf] {
        &self.search_directories
    }

    /// Load a referenced module by name
    ///
    /// Both hits and misses are cached. Unreadable candidates count as misses.
    pub fn resolve(&self, name: &str) -> Option<Arc<ModuleImage>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.get(name) {
            return cached.clone();
        }
        let found = self.search_directories.iter().find_map(|dir| {
            let candidate = dir.join(format!("{name}.{IMAGE_EXTENSION}"));
            if !candidate.is_file() {
                return None;
            }
            match ModuleImage::read(&candidate) {
                Ok(image) => Some(Arc::new(image)),
                Err(e) => {
                    tracing::debug!(path = %candidate.display(), error = %e, "unreadable reference");
                    None
                }
            }
        });
        cache.insert(name.to_string(), found.clone());
        found
    }

    /// Check a member reference against its declaring module
    pub fn resolve_member(&self, member: &MemberRef) -> MemberResolution {
        if member.module == RUNTIME_MODULE {
            return MemberResolution::Runtime;
        }
        let Some(module) = self.resolve(&member.module) else {
            return MemberResolution::UnresolvedModule;
        };
        let Some(method) = module.find_method(&member.type_name, &member.name) else {
            return MemberResolution::MissingMember;
        };
        if method.params.len() == member.params.len() && method.returns.is_some() == member.returns.is_some() {
            MemberResolution::Resolved
        } else {
            MemberResolution::ArityMismatch
        }
    }
}
