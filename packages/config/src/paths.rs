#![allow(clippy::module_name_repetitions)]
//! Where relative settings paths point.
//!
//! `reference/comuni.csv` in a settings file means
//! `<workspace>/data/reference/comuni.csv`; absolute paths are kept.

use std::path::{Path, PathBuf};

/// Workspace directory, two levels above this crate's manifest.
///
/// # Panics
///
/// Panics if the crate is built outside a `packages/<name>` layout.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("Failed to find project root from CARGO_MANIFEST_DIR")
        .to_path_buf()
}

/// Base for the gazetteer files, lookup tables and exports.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Resolves `path` against `base` unless it is already absolute.
#[must_use]
pub fn resolve(base: &Path, path: &str) -> String {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        path.to_string()
    } else {
        base.join(candidate).display().to_string()
    }
}
