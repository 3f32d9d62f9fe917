//! Candidate enumeration for external commands.
//!
//! Resolution never touches the filesystem: it only lists where the program might be.
//! The launcher decides by trying to execute each candidate in turn.

use std::env::SplitPaths;
use std::ffi::OsStr;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};

/// Lazy sequence of paths to try for one command name.
///
/// Yields `name` exactly as given first (this covers absolute and relative paths),
/// then `dir/name` for every directory of the search path in listed order. An absolute
/// name has no other candidates.
pub struct Candidates<'a> {
    name: &'a Path,
    literal_pending: bool,
    dirs: Option<SplitPaths<'a>>,
}

impl Iterator for Candidates<'_> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        if self.name.as_os_str().is_empty() {
            return None;
        }
        if self.literal_pending {
            self.literal_pending = false;
            return Some(self.name.to_path_buf());
        }
        let dir = self.dirs.as_mut()?.next()?;
        Some(dir.join(self.name))
    }
}

impl FusedIterator for Candidates<'_> {}

/// Enumerate the candidates for `name` using `search_path` (the value of `PATH`).
pub fn resolve<'a>(name: &'a str, search_path: Option<&'a OsStr>) -> Candidates<'a> {
    let name = Path::new(name);
    Candidates {
        name,
        literal_pending: true,
        dirs: search_path
            .filter(|_| !name.is_absolute())
            .map(|paths| std::env::split_paths(paths)),
    }
}
