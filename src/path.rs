//! `SCMPATH` search-list resolution.
//!
//! Grounded on `examples/original_source/scm-file.cpp`'s `exists()` +
//! `PATH_LIST_SEP`-delimited `SCMPATH` search, simplified from the teacher's
//! `catalog` crate's labeled-drawer search into a flat ordered directory
//! list — SCM has one namespace, not catalog's labeled shelves.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::ScmError;

#[cfg(windows)]
const PATH_LIST_SEP: char = ';';
#[cfg(not(windows))]
const PATH_LIST_SEP: char = ':';

/// Resolves a named SCM container against the filesystem: absolute or
/// relative-to-cwd names that exist are used as-is; otherwise each directory
/// named in `SCMPATH` is tried in order.
pub struct ScmPath {
    dirs: Vec<PathBuf>,
}

impl ScmPath {
    /// Reads the search list from the `SCMPATH` environment variable.
    pub fn from_env() -> Self {
        Self::new(env::var("SCMPATH").ok().as_deref().unwrap_or(""))
    }

    /// Builds a search list from an explicit `PATH_LIST_SEP`-joined string,
    /// as if it were the value of `SCMPATH`.
    pub fn new(list: &str) -> Self {
        let dirs = list
            .split(PATH_LIST_SEP)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        Self { dirs }
    }

    /// Resolves `name` to an existing regular file, searching the list in
    /// order. `name` itself is tried first if it already names an existing
    /// file.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ScmError> {
        if is_regular_file(Path::new(name)) {
            return Ok(PathBuf::from(name));
        }
        for dir in &self.dirs {
            let candidate = dir.join(name);
            if is_regular_file(&candidate) {
                return Ok(candidate);
            }
        }
        Err(ScmError::NotFoundOnPath(name.to_string()))
    }
}

fn is_regular_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_platform_separator() {
        let sep = PATH_LIST_SEP;
        let list = format!("/a{sep}/b{sep}");
        let p = ScmPath::new(&list);
        assert_eq!(p.dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn resolve_prefers_existing_direct_path() {
        let dir = std::env::temp_dir();
        let file = dir.join("scm-core-path-test-direct.tmp");
        std::fs::write(&file, b"x").unwrap();
        let p = ScmPath::new("");
        let resolved = p.resolve(file.to_str().unwrap()).unwrap();
        assert_eq!(resolved, file);
        let _ = std::fs::remove_file(&file);
    }

    #[test]
    fn resolve_fails_when_not_found() {
        let p = ScmPath::new("");
        assert!(p.resolve("definitely-does-not-exist.scm").is_err());
    }
}
