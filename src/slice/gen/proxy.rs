// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Proxy-side emission: proxy struct declarations, the cast hooks, the
//! per-operation invocation loops and the delegate trait behind them.
//!
//! Generated locals carry a `__` prefix so they can never collide with
//! user-chosen parameter names.

use crate::slice::{
    ast::{ClassDef, Definition, GenError, Operation},
    r#gen::{
        helpers::{Ctx, fix_ident, to_shouty},
        output::Output,
    },
};

const ERROR: &str = "::floe::runtime::errors::Error";
const LOCAL_ERROR: &str = "::floe::runtime::errors::LocalError";
const CONTEXT: &str = "::floe::runtime::current::Context";
const OBJECT_PRX: &str = "::floe::runtime::proxy::ObjectPrx";

pub(super) fn remote_classes(contents: &[Definition]) -> Vec<&ClassDef> {
    contents
        .iter()
        .filter_map(|def| match def {
            Definition::Class(c) if !c.local => Some(c),
            _ => None,
        })
        .collect()
}

/// Pass 1: proxy forward declarations: the proxy structs themselves.
pub fn emit_decls(_ctx: &Ctx, contents: &[Definition], out: &mut Output) {
    for class in remote_classes(contents) {
        out.blank();
        out.open(&format!("pub struct {}Prx {{", class.name));
        out.line(&format!("base: {OBJECT_PRX},"));
        out.close("}");
    }
}

/// Pass 3: lifetime hooks: the cast operations and the untyped view.
/// Shared ownership itself needs no generated code; proxies are handles
/// over shared references.
pub fn emit_cast_hooks(
    _ctx: &Ctx,
    contents: &[Definition],
    out: &mut Output,
) -> Result<(), GenError> {
    for class in remote_classes(contents) {
        let shouty = to_shouty(&class.name);
        out.blank();
        out.open(&format!("impl {}Prx {{", class.name));
        out.line("/// The untyped handle this proxy wraps.");
        out.open(&format!("pub fn ice_object(&self) -> &{OBJECT_PRX} {{"));
        out.line("&self.base");
        out.close("}");
        out.blank();
        out.open(&format!(
            "pub fn checked_cast(__base: &{OBJECT_PRX}, __facet: &str) -> Result<Option<Self>, {ERROR}> {{"
        ));
        out.line(&format!(
            "Ok(::floe::runtime::proxy::checked_cast(__base, __facet, {shouty}_ID, {shouty}_IDS)?"
        ));
        out.line("    .map(|__b| Self { base: __b }))");
        out.close("}");
        out.blank();
        out.open(&format!(
            "pub fn unchecked_cast(__base: &{OBJECT_PRX}, __facet: &str) -> Self {{"
        ));
        out.open("Self {");
        out.line(&format!(
            "base: ::floe::runtime::proxy::unchecked_cast(__base, __facet, {shouty}_IDS),"
        ));
        out.close("}");
        out.close("}");
        out.close("}");
    }
    Ok(())
}

/// Pass 6: the proxy operations: one retry loop per operation over the
/// whole transitive lattice, plus the private delegate factory.
pub fn emit_proxy_ops(
    ctx: &Ctx,
    contents: &[Definition],
    out: &mut Output,
) -> Result<(), GenError> {
    for class in remote_classes(contents) {
        let scoped = format!("{}::{}", ctx.scope, class.name);
        let ops = ctx.table.class_all_operations(&scoped)?;

        out.blank();
        out.open(&format!("impl {}Prx {{", class.name));
        for (pos, (op, _)) in ops.iter().enumerate() {
            if pos > 0 {
                out.blank();
            }
            emit_proxy_op(ctx, op, out)?;
        }
        if !ops.is_empty() {
            out.blank();
        }
        out.open(&format!(
            "fn create_delegate(&self) -> Box<dyn {}Delegate + '_> {{",
            class.name
        ));
        out.open("match self.base.reference().adapter() {");
        out.line(&format!(
            "Some(__adapter) => Box::new({}DelegateD {{ prx: &self.base, adapter: __adapter }}),",
            class.name
        ));
        out.line(&format!(
            "None => Box::new({}DelegateM {{ prx: &self.base }}),",
            class.name
        ));
        out.close("}");
        out.close("}");
        out.close("}");
    }
    Ok(())
}

fn emit_proxy_op(ctx: &Ctx, op: &Operation, out: &mut Output) -> Result<(), GenError> {
    let name = fix_ident(&op.name);
    let params = ctx.param_list(op)?;
    let args = ctx.arg_list(op);
    let ret = ctx.ret_type(op)?;
    let psep = if params.is_empty() { "" } else { ", " };
    let asep = if args.is_empty() { "" } else { ", " };

    out.open(&format!(
        "pub fn {name}(&self, {params}{psep}__context: &{CONTEXT}) -> Result<{ret}, {ERROR}> {{"
    ));
    out.line("let mut __attempts = 0u32;");
    out.open("loop {");
    out.line("let __delegate = self.create_delegate();");
    out.open(&format!("match __delegate.{name}({args}{asep}__context) {{"));
    out.line("Ok(__ret) => return Ok(__ret),");
    out.open(&format!(
        "Err({ERROR}::Local({LOCAL_ERROR}::LocationForward(__target))) => {{"
    ));
    out.line("self.base.location_forward(&__target)?;");
    out.close("},");
    out.open(&format!(
        "Err({ERROR}::Local({LOCAL_ERROR}::NonRepeatable(__inner))) => {{"
    ));
    if op.idempotent {
        out.line("self.base.handle_exception(*__inner, &mut __attempts)?;");
    } else {
        out.line(&format!(
            "return Err({OBJECT_PRX}::rethrow_exception({LOCAL_ERROR}::NonRepeatable(__inner)));"
        ));
    }
    out.close("},");
    out.open(&format!("Err({ERROR}::Local(__e)) => {{"));
    out.line("self.base.handle_exception(__e, &mut __attempts)?;");
    out.close("},");
    out.line("Err(__user) => return Err(__user),");
    out.close("}");
    out.close("}");
    out.close("}");
    Ok(())
}

/// Pass 7: the delegate abstraction every proxy operation goes through.
pub fn emit_delegate_trait(
    ctx: &Ctx,
    contents: &[Definition],
    out: &mut Output,
) -> Result<(), GenError> {
    for class in remote_classes(contents) {
        let scoped = format!("{}::{}", ctx.scope, class.name);
        let ops = ctx.table.class_all_operations(&scoped)?;

        out.blank();
        out.open(&format!("trait {}Delegate {{", class.name));
        for (op, _) in &ops {
            let name = fix_ident(&op.name);
            let params = ctx.param_list(op)?;
            let ret = ctx.ret_type(op)?;
            let psep = if params.is_empty() { "" } else { ", " };
            out.line(&format!(
                "fn {name}(&self, {params}{psep}__context: &{CONTEXT}) -> Result<{ret}, {ERROR}>;"
            ));
        }
        out.close("}");
    }
    Ok(())
}
