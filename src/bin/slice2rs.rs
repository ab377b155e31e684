// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The Slice compiler front-end: loads serialized Slice units, resolves
//! their includes against the search path, and emits one Rust source per
//! input under the output directory.

use std::{collections::BTreeSet, fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use floe::{
    cfg::cli::{ensure_output_dir, resolve_in_search_path},
    slice::{
        ast::Unit,
        r#gen::{Gen, output_file_name},
        table::TypeTable,
    },
};

#[derive(Parser)]
#[command(
    name = "slice2rs",
    version,
    about = "Compiles Slice units into Rust proxies, skeletons and types"
)]
struct Args {
    /// Serialized Slice units (YAML or JSON) to compile.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory added to the include search list; may repeat.
    #[arg(long = "include-dir", short = 'I')]
    include_dirs: Vec<PathBuf>,

    /// Directory the generated sources are written to.
    #[arg(long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Export macro symbol, recorded in the generated file header.
    #[arg(long = "dll-export")]
    dll_export: Option<String>,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("slice2rs: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    ensure_output_dir(&args.output_dir)?;
    for input in &args.inputs {
        compile_one(input, args)
            .with_context(|| input.display().to_string())?;
    }
    Ok(())
}

fn compile_one(input: &PathBuf, args: &Args) -> Result<()> {
    let unit = Unit::load(input)?;

    // Pull in included units, transitively, for the type table.
    let mut units = vec![unit.clone()];
    let mut loaded: BTreeSet<String> = [unit.name.clone()].into();
    let mut pending: Vec<String> = unit.includes.clone();
    while let Some(include) = pending.pop() {
        if !loaded.insert(include.clone()) {
            continue;
        }
        let path = resolve_include(&include, &args.include_dirs)
            .with_context(|| format!("resolving include `{include}'"))?;
        let included = Unit::load(&path)?;
        pending.extend(included.includes.iter().cloned());
        units.push(included);
    }

    let table = TypeTable::build(&units)?;
    let generator = Gen::new(&table, args.dll_export.clone());
    let source_label = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&unit.name)
        .to_string();
    let code = generator.generate(&unit, &source_label)?;

    let out_path = args.output_dir.join(output_file_name(input));
    fs::write(&out_path, code)
        .with_context(|| format!("writing {}", out_path.display()))?;
    Ok(())
}

/// An include names a unit by basename; the file may carry any of the
/// supported extensions.
fn resolve_include(name: &str, dirs: &[PathBuf]) -> Result<PathBuf> {
    let candidates = [
        name.to_string(),
        format!("{name}.yaml"),
        format!("{name}.slice.yaml"),
        format!("{name}.json"),
    ];
    for candidate in &candidates {
        if let Ok(path) = resolve_in_search_path(candidate, dirs) {
            return Ok(path);
        }
    }
    anyhow::bail!("`{name}' not found with any supported extension")
}
