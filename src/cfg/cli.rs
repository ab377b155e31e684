// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};

pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    let canon = abs
        .canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))?;

    Ok(canon)
}

/// Resolves `path` against a list of search directories, first match wins.
/// A bare existing path short-circuits the search.
pub fn resolve_in_search_path(path: &str, dirs: &[PathBuf]) -> Result<PathBuf> {
    let p = Path::new(path);
    if p.exists() {
        return Ok(p.to_path_buf());
    }
    for dir in dirs {
        let candidate = dir.join(p);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    anyhow::bail!("`{path}' not found in search path ({} dirs)", dirs.len())
}

/// Ensures the output directory exists and is a directory.
pub fn ensure_output_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create output dir {dir:?}"))?;
    }
    ensure!(dir.is_dir(), "output path {dir:?} is not a directory");
    Ok(())
}
