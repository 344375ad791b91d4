//! Staleness Guard
//!
//! Debug symbols record a fingerprint of every source document the module was
//! compiled from. If a document on disk no longer matches, sequence point
//! line numbers may point at the wrong code, so the module must not be
//! instrumented.

use crate::image::{HashAlgorithm, SymbolFile};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

/// Source document with the fingerprint recorded at compile time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Source path
    pub path: PathBuf,
    /// Fingerprint algorithm
    pub algorithm: HashAlgorithm,
    /// Recorded fingerprint
    pub fingerprint: Vec<u8>,
}

impl SourceDocument {
    /// All documents referenced by a symbol file
    #[must_use]
    pub fn from_symbols(symbols: &SymbolFile) -> Vec<Self> {
        symbols
            .documents
            .iter()
            .map(|d| Self {
                path: d.path.clone(),
                algorithm: d.hash_algorithm,
                fingerprint: d.hash.clone(),
            })
            .collect()
    }

    /// Whether `content` still matches the recorded fingerprint
    ///
    /// Documents without a recorded fingerprint cannot be checked and always
    /// match.
    #[must_use]
    pub fn matches(&self, content: &[u8]) -> bool {
        if self.algorithm == HashAlgorithm::None || self.fingerprint.is_empty() {
            return true;
        }
        fingerprint(self.algorithm, content) == self.fingerprint
    }
}

/// Fingerprint `content` with `algorithm`
#[must_use]
pub fn fingerprint(algorithm: HashAlgorithm, content: &[u8]) -> Vec<u8> {
    match algorithm {
        HashAlgorithm::None => Vec::new(),
        HashAlgorithm::Sha256 => Sha256::digest(content).to_vec(),
        HashAlgorithm::Blake3 => blake3::hash(content).as_bytes().to_vec(),
    }
}

/// Documents whose current content no longer matches their fingerprint
///
/// `read` supplies current content; a document it cannot read counts as
/// changed. Each path is reported once.
pub fn changed_documents<'a, F>(documents: &'a [SourceDocument], mut read: F) -> Vec<&'a SourceDocument>
where
    F: FnMut(&Path) -> io::Result<Vec<u8>>,
{
    let mut changed: Vec<&SourceDocument> = Vec::new();
    for document in documents {
        if changed.iter().any(|c| c.path == document.path) {
            continue;
        }
        let stale = match read(&document.path) {
            Ok(content) => !document.matches(&content),
            Err(_) => document.algorithm != HashAlgorithm::None && !document.fingerprint.is_empty(),
        };
        if stale {
            changed.push(document);
        }
    }
    changed
}

/// [`changed_documents`] against the file system
#[must_use]
pub fn changed_on_disk(documents: &[SourceDocument]) -> Vec<&SourceDocument> {
    changed_documents(documents, |path| std::fs::read(path))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn doc(path: &str, algorithm: HashAlgorithm, content: &[u8]) -> SourceDocument {
        SourceDocument {
            path: PathBuf::from(path),
            algorithm,
            fingerprint: fingerprint(algorithm, content),
        }
    }

    fn reader(files: HashMap<&'static str, &'static [u8]>) -> impl FnMut(&Path) -> io::Result<Vec<u8>> {
        move |path| {
            files
                .get(path.to_str().unwrap_or_default())
                .map(|c| c.to_vec())
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "missing"))
        }
    }

    #[test]
    fn test_unchanged_documents_pass() {
        let docs = vec![
            doc("/a.cs", HashAlgorithm::Sha256, b"one"),
            doc("/b.cs", HashAlgorithm::Blake3, b"two"),
        ];
        let files = HashMap::from([("/a.cs", &b"one"[..]), ("/b.cs", &b"two"[..])]);
        assert!(changed_documents(&docs, reader(files)).is_empty());
    }

    #[test]
    fn test_edited_document_detected() {
        let docs = vec![
            doc("/a.cs", HashAlgorithm::Sha256, b"one"),
            doc("/b.cs", HashAlgorithm::Sha256, b"two"),
        ];
        let files = HashMap::from([("/a.cs", &b"one"[..]), ("/b.cs", &b"two!"[..])]);
        let changed = changed_documents(&docs, reader(files));
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].path, PathBuf::from("/b.cs"));
    }

    #[test]
    fn test_missing_document_is_changed() {
        let docs = vec![doc("/gone.cs", HashAlgorithm::Sha256, b"x")];
        let changed = changed_documents(&docs, reader(HashMap::new()));
        assert_eq!(changed.len(), 1);
    }

    #[test]
    fn test_document_without_fingerprint_is_never_stale() {
        let docs = vec![doc("/gone.cs", HashAlgorithm::None, b"x")];
        assert!(changed_documents(&docs, reader(HashMap::new())).is_empty());
    }

    #[test]
    fn test_duplicate_paths_reported_once() {
        let docs = vec![
            doc("/a.cs", HashAlgorithm::Sha256, b"old"),
            doc("/a.cs", HashAlgorithm::Sha256, b"old"),
        ];
        let files = HashMap::from([("/a.cs", &b"new"[..])]);
        assert_eq!(changed_documents(&docs, reader(files)).len(), 1);
    }

    #[test]
    fn test_changed_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cs");
        std::fs::write(&path, "class A {}").unwrap();
        let docs = vec![SourceDocument {
            path: path.clone(),
            algorithm: HashAlgorithm::Sha256,
            fingerprint: fingerprint(HashAlgorithm::Sha256, b"class A {}"),
        }];
        assert!(changed_on_disk(&docs).is_empty());

        std::fs::write(&path, "class A { int x; }").unwrap();
        assert_eq!(changed_on_disk(&docs).len(), 1);
    }
}
