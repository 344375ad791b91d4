//! Glob-based discovery of assemblies, sources and tests

use crate::error::{CliError, CliResult};
use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// `path` made absolute against `base`, with `.` components removed
#[must_use]
pub fn absolute(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    joined
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Files under `root` matching any include pattern and no exclude pattern
///
/// Patterns are relative to `root`. Results are absolute, deduplicated and
/// sorted.
pub fn find_files(root: &Path, includes: &[String], excludes: &[String]) -> CliResult<Vec<PathBuf>> {
    let excludes = excludes
        .iter()
        .map(|p| Pattern::new(p).map_err(|e| CliError::invalid_argument(format!("Invalid pattern '{p}': {e}"))))
        .collect::<CliResult<Vec<_>>>()?;

    let mut files = BTreeSet::new();
    for include in includes {
        let pattern = format!("{}/{include}", Pattern::escape(&root.to_string_lossy()));
        let entries = glob::glob_with(&pattern, MATCH_OPTIONS)
            .map_err(|e| CliError::invalid_argument(format!("Invalid pattern '{include}': {e}")))?;
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::debug!(error = %e, "unreadable path during discovery");
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if excludes.iter().any(|p| p.matches_path_with(relative, MATCH_OPTIONS)) {
                continue;
            }
            files.insert(path);
        }
    }
    Ok(files.into_iter().collect())
}

/// Distinct parent directories of `files`
#[must_use]
pub fn parent_directories(files: &[PathBuf]) -> Vec<PathBuf> {
    files
        .iter()
        .filter_map(|f| f.parent().map(Path::to_path_buf))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
