//! Document discovery under `[documents].root`.
//!
//! Walks the root with `walkdir`, keeps regular files whose root-relative
//! path matches `include_globs` and none of `exclude_globs`, and returns them
//! sorted by relative path so builds are deterministic.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::error::{RagError, Result};

/// A discovered document file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path on disk (root joined with `relative`).
    pub path: PathBuf,
    /// Path relative to the documents root, `/`-separated. Used for glob
    /// matching and ordering; the index names documents by `path`.
    pub relative: String,
}

pub fn scan_documents(config: &DocumentsConfig) -> Result<Vec<SourceFile>> {
    let root = &config.root;
    if !root.is_dir() {
        return Err(RagError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("documents root does not exist: {}", root.display()),
        )));
    }

    let include_set = build_globset(&config.include_globs)?;
    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = relative_name(root, path);

        if exclude_set.is_match(&relative) || !include_set.is_match(&relative) {
            continue;
        }

        files.push(SourceFile {
            path: path.to_path_buf(),
            relative,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    tracing::debug!(root = %root.display(), files = files.len(), "scanned documents");
    Ok(files)
}

fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| RagError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RagError::Config(format!("invalid glob set: {}", e)))
}
