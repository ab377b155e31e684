// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The two delegate implementations behind every proxy: the remote one
//! marshalling over the wire, and the collocated one dispatching straight
//! into a servant registered in the same process.

use crate::slice::{
    ast::{ClassDef, Definition, GenError, Operation},
    r#gen::{
        helpers::{Ctx, ExprMode, fix_ident},
        output::Output,
        proxy::remote_classes,
    },
};

const ERROR: &str = "::floe::runtime::errors::Error";
const LOCAL_ERROR: &str = "::floe::runtime::errors::LocalError";
const CONTEXT: &str = "::floe::runtime::current::Context";
const OBJECT_PRX: &str = "::floe::runtime::proxy::ObjectPrx";
const OUTCOME: &str = "::floe::runtime::invocation::ReplyOutcome";

/// Pass 8: the delegate-remote implementations.
pub fn emit_remote(
    ctx: &Ctx,
    contents: &[Definition],
    out: &mut Output,
) -> Result<(), GenError> {
    for class in remote_classes(contents) {
        let scoped = format!("{}::{}", ctx.scope, class.name);
        let ops = ctx.table.class_all_operations(&scoped)?;

        out.blank();
        out.open(&format!("struct {}DelegateM<'a> {{", class.name));
        out.line(&format!("prx: &'a {OBJECT_PRX},"));
        out.close("}");
        out.blank();
        out.open(&format!(
            "impl {}Delegate for {}DelegateM<'_> {{",
            class.name, class.name
        ));
        for (pos, (op, _)) in ops.iter().enumerate() {
            if pos > 0 {
                out.blank();
            }
            emit_remote_op(ctx, op, out)?;
        }
        out.close("}");
    }
    Ok(())
}

fn emit_remote_op(ctx: &Ctx, op: &Operation, out: &mut Output) -> Result<(), GenError> {
    let name = fix_ident(&op.name);
    let params = ctx.param_list(op)?;
    let ret = ctx.ret_type(op)?;
    let psep = if params.is_empty() { "" } else { ", " };
    let throws = ctx.table.sorted_throws(op)?;

    out.open(&format!(
        "fn {name}(&self, {params}{psep}__context: &{CONTEXT}) -> Result<{ret}, {ERROR}> {{"
    ));
    out.line("let mut __send_proxy = false;");
    out.open("loop {");
    out.open(&format!("let __attempt = (|| -> Result<{ret}, {ERROR}> {{"));
    out.line(&format!(
        "let mut __out = ::floe::runtime::invocation::Outgoing::new(self.prx, __send_proxy, \"{}\", {}, __context)?;",
        op.name, op.idempotent
    ));
    if !op.inputs.is_empty() {
        out.open("{");
        out.line("let __os = __out.os();");
        for p in &op.inputs {
            out.line(&ctx.write_stmt(&p.ty, &fix_ident(&p.name), ExprMode::Param, "__os")?);
        }
        out.close("}");
    }
    out.open("match __out.invoke()? {");

    // Success: out-parameters in declaration order, return value last.
    out.open(&format!("{OUTCOME}::Success => {{"));
    if op.ret.is_none() && op.outputs.is_empty() {
        out.line("Ok(())");
    } else {
        out.line("let __is = __out.is();");
        let cfg = "self.prx.reference().cfg()";
        for o in &op.outputs {
            out.line(&format!(
                "let {} = {};",
                fix_ident(&o.name),
                ctx.read_expr(&o.ty, cfg, "__is")?
            ));
        }
        if let Some(rt) = &op.ret {
            out.line(&format!("let __ret = {};", ctx.read_expr(rt, cfg, "__is")?));
        }
        out.line(&format!("Ok({})", result_tuple(op)));
    }
    out.close("},");

    // User exception: binary search over the sorted throws table.
    out.open(&format!("{OUTCOME}::UserException => {{"));
    out.line("let __is = __out.is();");
    if throws.is_empty() {
        out.line("let __id = __is.read_string()?;");
        out.line(&format!(
            "Err({ERROR}::Local({LOCAL_ERROR}::UnknownUserException(__id)))"
        ));
    } else {
        out.open("const __THROWS: &[&str] = &[");
        for t in &throws {
            out.line(&format!("\"{t}\","));
        }
        out.close("];");
        out.open("match __is.read_exception_index(__THROWS)? {");
        for (index, t) in throws.iter().enumerate() {
            out.open(&format!("{index} => {{"));
            out.line(&format!(
                "let mut __ex = {}::default();",
                ctx.type_path(t)?
            ));
            out.line(
                "::floe::runtime::errors::UserException::ice_read(&mut __ex, __is)?;",
            );
            out.line(&format!("Err({ERROR}::user(__ex))"));
            out.close("},");
        }
        out.line("_ => unreachable!(),");
        out.close("}");
    }
    out.close("},");

    out.close("}");
    out.close("})();");
    out.open("match __attempt {");
    out.open(&format!(
        "Err({ERROR}::Local({LOCAL_ERROR}::ProxyRequested)) => {{"
    ));
    out.line("__send_proxy = true;");
    out.close("},");
    out.line("__other => return __other,");
    out.close("}");
    out.close("}");
    out.close("}");
    Ok(())
}

/// Pass 9: the delegate-collocated implementations. The direct path
/// recovers the concrete generated server by downcast; the dispatch
/// boundary converts anything undeclared into the unknown kinds.
pub fn emit_collocated(
    ctx: &Ctx,
    contents: &[Definition],
    out: &mut Output,
) -> Result<(), GenError> {
    for class in remote_classes(contents) {
        let scoped = format!("{}::{}", ctx.scope, class.name);
        let ops = ctx.table.class_all_operations(&scoped)?;

        out.blank();
        out.open(&format!("struct {}DelegateD<'a> {{", class.name));
        out.line(&format!("prx: &'a {OBJECT_PRX},"));
        out.line("adapter: ::std::sync::Arc<::floe::runtime::adapter::ObjectAdapter>,");
        out.close("}");
        out.blank();
        out.open(&format!(
            "impl {}Delegate for {}DelegateD<'_> {{",
            class.name, class.name
        ));
        for (pos, (op, _)) in ops.iter().enumerate() {
            if pos > 0 {
                out.blank();
            }
            emit_collocated_op(ctx, class, op, out)?;
        }
        out.close("}");
    }
    Ok(())
}

/// `__ret` plus the out-parameters, parenthesized only when several.
fn result_tuple(op: &Operation) -> String {
    let mut parts = Vec::new();
    if op.ret.is_some() {
        parts.push("__ret".to_string());
    }
    for o in &op.outputs {
        parts.push(fix_ident(&o.name));
    }
    match parts.len() {
        0 => "()".to_string(),
        1 => parts.remove(0),
        _ => format!("({})", parts.join(", ")),
    }
}

fn emit_collocated_op(
    ctx: &Ctx,
    class: &ClassDef,
    op: &Operation,
    out: &mut Output,
) -> Result<(), GenError> {
    let name = fix_ident(&op.name);
    let params = ctx.param_list(op)?;
    let ret = ctx.ret_type(op)?;
    let psep = if params.is_empty() { "" } else { ", " };
    let throws = ctx.table.sorted_throws(op)?;
    let args = ctx.arg_list(op);
    let asep = if args.is_empty() { "" } else { ", " };

    out.open(&format!(
        "fn {name}(&self, {params}{psep}__context: &{CONTEXT}) -> Result<{ret}, {ERROR}> {{"
    ));
    out.line("let mut __current = ::floe::runtime::current::Current::new(");
    out.line("    self.prx.ice_get_identity().clone(),");
    out.line("    self.prx.ice_get_facet(),");
    out.line(&format!("    \"{}\",", op.name));
    out.line(&format!("    {},", op.idempotent));
    out.line("    __context.clone(),");
    out.line(");");
    out.open("loop {");
    out.line(
        "let __direct = ::floe::runtime::dispatch::Direct::new(&self.adapter, &__current)?;",
    );
    out.open(&format!(
        "let Some(__server) = __direct.facet_servant().as_any().downcast_ref::<{}Server>() else {{",
        class.name
    ));
    out.line(&format!(
        "return Err({ERROR}::Local({LOCAL_ERROR}::OperationNotExist {{"
    ));
    out.line("    id: __current.identity.to_string(),");
    out.line("    facet: __current.facet.clone(),");
    out.line("    operation: __current.operation.clone(),");
    out.line("}));");
    out.close("};");
    out.open("const __THROWS: &[&str] = &[");
    for t in &throws {
        out.line(&format!("\"{t}\","));
    }
    out.close("];");
    out.open("let __outcome = ::floe::runtime::dispatch::guard_direct(__THROWS, || {");
    out.line(&format!("__server.servant().{name}({args}{asep}&__current)"));
    out.close("});");
    out.open("match __outcome {");
    out.open(&format!(
        "Err({ERROR}::Local({LOCAL_ERROR}::ProxyRequested)) => {{"
    ));
    out.line("__current.proxy = Some(self.prx.to_string());");
    out.close("},");
    out.line("__other => return __other,");
    out.close("}");
    out.close("}");
    out.close("}");
    Ok(())
}
