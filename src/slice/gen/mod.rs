// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The Rust code generator.
//!
//! Emission runs in a fixed pass order per module, so declarations precede
//! definitions and type uses follow type declarations:
//!
//! 1. proxy declarations
//! 2. object declarations (id constants)
//! 3. cast hooks
//! 4. handle typedefs and proxy marshallers
//! 5. concrete types
//! 6. proxy operations
//! 7. delegate trait
//! 8. delegate remote
//! 9. delegate collocated
//! 10. servant skeletons with dispatch tables

use std::path::Path;

use crate::slice::{
    ast::{Definition, GenError, Module, Unit},
    r#gen::{helpers::Ctx, output::Output},
    table::TypeTable,
};

/// Delegate implementations (passes 8 and 9).
pub mod delegate;
/// Shared name/path/marshalling synthesis.
pub mod helpers;
/// Object-side passes (2, 4 and 10).
pub mod object;
/// Indented text sink.
pub mod output;
/// Proxy-side passes (1, 3, 6 and 7).
pub mod proxy;
/// Concrete types (pass 5).
pub mod types;

/// Drives the canonical pass order over one unit.
pub struct Gen<'t> {
    table: &'t TypeTable,
    dll_export: Option<String>,
}

impl<'t> Gen<'t> {
    pub fn new(table: &'t TypeTable, dll_export: Option<String>) -> Self {
        Self { table, dll_export }
    }

    /// Emits the complete Rust source for `unit`. `source_label` names the
    /// IDL document in the generated header comment.
    pub fn generate(&self, unit: &Unit, source_label: &str) -> Result<String, GenError> {
        let mut out = Output::new();
        out.line(&format!(
            "// Generated by slice2rs from `{source_label}'. Do not edit."
        ));
        if let Some(symbol) = &self.dll_export {
            out.line(&format!("// Export: {symbol}"));
        }
        out.line("#![allow(non_snake_case, dead_code, unused_imports, clippy::all)]");

        for module in &unit.modules {
            self.gen_module(unit, module, "", 0, &mut out)?;
        }
        Ok(out.into_string())
    }

    fn gen_module(
        &self,
        unit: &Unit,
        module: &Module,
        parent_scope: &str,
        depth: usize,
        out: &mut Output,
    ) -> Result<(), GenError> {
        let scope = format!("{parent_scope}::{}", module.name);
        out.blank();
        out.open(&format!("pub mod {} {{", module.name));
        out.line("use ::floe::runtime::errors::UserException as _;");

        let ctx = Ctx {
            table: self.table,
            unit: &unit.name,
            scope: scope.clone(),
            depth: depth + 1,
        };
        let contents = &module.contents;

        proxy::emit_decls(&ctx, contents, out);
        object::emit_decls(&ctx, contents, out)?;
        proxy::emit_cast_hooks(&ctx, contents, out)?;
        object::emit_handles(&ctx, contents, out)?;
        types::emit(&ctx, contents, out)?;
        proxy::emit_proxy_ops(&ctx, contents, out)?;
        proxy::emit_delegate_trait(&ctx, contents, out)?;
        delegate::emit_remote(&ctx, contents, out)?;
        delegate::emit_collocated(&ctx, contents, out)?;
        object::emit_objects(&ctx, contents, out)?;

        for def in contents {
            if let Definition::Module(inner) = def {
                self.gen_module(unit, inner, &scope, depth + 1, out)?;
            }
        }
        out.close("}");
        Ok(())
    }
}

/// Emitted filenames mirror input basenames with the target extension;
/// a `.slice` infix is dropped along the way.
pub fn output_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("generated");
    let stem = stem.strip_suffix(".slice").unwrap_or(stem);
    format!("{stem}.rs")
}
