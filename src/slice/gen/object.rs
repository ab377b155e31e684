// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Object-side emission: the id constants, handle typedefs with proxy
//! marshallers, and the servant skeletons with their dispatch tables.
//!
//! Servant traits are flat: every transitive operation appears directly on
//! the trait, so a dispatch to a base operation is a direct call on the
//! same object.

use crate::slice::{
    ast::{ClassDef, Definition, GenError, Operation, Type},
    r#gen::{
        helpers::{Ctx, ExprMode, fix_ident, to_shouty, to_snake},
        output::Output,
    },
    table::Kind,
};

const STREAM: &str = "::floe::wire::stream::BasicStream";
const ERROR: &str = "::floe::runtime::errors::Error";
const LOCAL_ERROR: &str = "::floe::runtime::errors::LocalError";
const CURRENT: &str = "::floe::runtime::current::Current";
const STATUS: &str = "::floe::runtime::object::DispatchStatus";
const INCOMING: &str = "::floe::runtime::dispatch::Incoming";

fn classes(contents: &[Definition]) -> Vec<&ClassDef> {
    contents
        .iter()
        .filter_map(|def| match def {
            Definition::Class(c) => Some(c),
            _ => None,
        })
        .collect()
}

/// Pass 2: object forward declarations: the scoped-id constants every
/// later pass leans on.
pub fn emit_decls(
    ctx: &Ctx,
    contents: &[Definition],
    out: &mut Output,
) -> Result<(), GenError> {
    for class in classes(contents) {
        let scoped = format!("{}::{}", ctx.scope, class.name);
        let shouty = to_shouty(&class.name);

        out.blank();
        out.line(&format!("pub const {shouty}_ID: &str = \"{scoped}\";"));
        if !class.local {
            let ids = ctx.table.class_ids(&scoped)?;
            out.open(&format!("pub const {shouty}_IDS: &[&str] = &["));
            for id in &ids {
                out.line(&format!("\"{id}\","));
            }
            out.close("];");
            let class_ids = ctx.table.class_class_ids(&scoped)?;
            out.open(&format!("pub const {shouty}_CLASS_IDS: &[&str] = &["));
            for id in &class_ids {
                out.line(&format!("\"{id}\","));
            }
            out.close("];");
        }
    }
    Ok(())
}

/// Pass 4: handle typedefs and, for non-local classes, the proxy
/// marshalling functions.
pub fn emit_handles(
    _ctx: &Ctx,
    contents: &[Definition],
    out: &mut Output,
) -> Result<(), GenError> {
    for class in classes(contents) {
        let snake = to_snake(&class.name);

        out.blank();
        out.line(&format!(
            "pub type {}Ptr = ::std::sync::Arc<dyn {}>;",
            class.name, class.name
        ));
        if class.local {
            continue;
        }

        out.blank();
        out.open(&format!(
            "pub fn write_{snake}_prx(os: &mut {STREAM}, v: Option<&{}Prx>) {{",
            class.name
        ));
        out.line("os.write_proxy_string(v.map(|__p| __p.ice_object().to_string()).as_deref());");
        out.close("}");

        out.blank();
        out.open(&format!(
            "pub fn read_{snake}_prx(is: &mut {STREAM}, cfg: &::floe::cfg::config::Config) -> Result<Option<{}Prx>, {LOCAL_ERROR}> {{",
            class.name
        ));
        out.open("match is.read_proxy_string()? {");
        out.line("None => Ok(None),");
        out.open("Some(__s) => {");
        out.line("Ok(::floe::runtime::proxy::ObjectPrx::from_string(&__s, cfg)?");
        out.line(&format!("    .map(|__b| {}Prx {{ base: __b }}))", class.name));
        out.close("},");
        out.close("}");
        out.close("}");
    }
    Ok(())
}

/// Pass 10: servant traits, class data carriers, and the server skeletons
/// with their sorted dispatch tables.
pub fn emit_objects(
    ctx: &Ctx,
    contents: &[Definition],
    out: &mut Output,
) -> Result<(), GenError> {
    for class in classes(contents) {
        let scoped = format!("{}::{}", ctx.scope, class.name);
        emit_servant_trait(ctx, class, &scoped, out)?;
        emit_class_data(ctx, class, &scoped, out)?;
        if !class.local {
            emit_server(ctx, class, &scoped, out)?;
        }
    }
    Ok(())
}

fn emit_servant_trait(
    ctx: &Ctx,
    class: &ClassDef,
    scoped: &str,
    out: &mut Output,
) -> Result<(), GenError> {
    let ops = ctx.table.class_all_operations(scoped)?;

    out.blank();
    if class.local {
        out.open(&format!("pub trait {} {{", class.name));
    } else {
        out.open(&format!("pub trait {}: Send + Sync {{", class.name));
    }
    for (op, _) in &ops {
        let name = fix_ident(&op.name);
        let params = ctx.param_list(op)?;
        let ret = ctx.ret_type(op)?;
        let psep = if params.is_empty() { "" } else { ", " };
        if class.local {
            out.line(&format!(
                "fn {name}(&self, {params}) -> Result<{ret}, {ERROR}>;"
            ));
        } else {
            out.line(&format!(
                "fn {name}(&self, {params}{psep}__current: &{CURRENT}) -> Result<{ret}, {ERROR}>;"
            ));
        }
    }
    out.close("}");
    Ok(())
}

/// Non-interface classes carry data; the flattened carrier marshals
/// base-class members before derived ones.
fn emit_class_data(
    ctx: &Ctx,
    class: &ClassDef,
    scoped: &str,
    out: &mut Output,
) -> Result<(), GenError> {
    if class.interface {
        return Ok(());
    }
    let chain = ctx.table.class_data_chain(scoped)?;
    let mut members = Vec::new();
    for link in &chain {
        members.extend(ctx.table.class_def(link)?.members.iter().cloned());
    }
    if members.is_empty() {
        return Ok(());
    }

    out.blank();
    out.line("#[derive(Debug, Clone, Default, PartialEq)]");
    out.open(&format!("pub struct {}Data {{", class.name));
    for m in &members {
        out.line(&format!(
            "pub {}: {},",
            fix_ident(&m.name),
            ctx.owned_type(&m.ty)?
        ));
    }
    out.close("}");

    out.blank();
    out.open(&format!("impl {}Data {{", class.name));
    out.open(&format!("pub fn ice_write(&self, os: &mut {STREAM}) {{"));
    for m in &members {
        let expr = format!("self.{}", fix_ident(&m.name));
        out.line(&ctx.write_stmt(&m.ty, &expr, ExprMode::Owned, "os")?);
    }
    out.close("}");
    out.blank();
    out.open(&format!(
        "pub fn ice_read(is: &mut {STREAM}) -> Result<Self, ::floe::wire::stream::ProtocolError> {{"
    ));
    out.open("Ok(Self {");
    for m in &members {
        out.line(&format!(
            "{}: {},",
            fix_ident(&m.name),
            ctx.read_expr(&m.ty, "cfg", "is")?
        ));
    }
    out.close("})");
    out.close("}");
    out.close("}");
    Ok(())
}

fn emit_server(
    ctx: &Ctx,
    class: &ClassDef,
    scoped: &str,
    out: &mut Output,
) -> Result<(), GenError> {
    let shouty = to_shouty(&class.name);
    let table = ctx.table.dispatch_table(scoped)?;
    let ops = ctx.table.class_all_operations(scoped)?;

    out.blank();
    out.open(&format!("pub struct {}Server {{", class.name));
    out.line(&format!("servant: Box<dyn {}>,", class.name));
    out.close("}");

    out.blank();
    out.open(&format!("impl {}Server {{", class.name));
    out.open(&format!(
        "pub fn new(servant: impl {} + 'static) -> Self {{",
        class.name
    ));
    out.open("Self {");
    out.line("servant: Box::new(servant),");
    out.close("}");
    out.close("}");
    out.blank();
    out.open(&format!("pub fn servant(&self) -> &dyn {} {{", class.name));
    out.line("self.servant.as_ref()");
    out.close("}");
    out.blank();
    out.line("/// Sorted dispatch search space, universal operations included.");
    out.open("const OPERATIONS: &'static [&'static str] = &[");
    for name in &table {
        out.line(&format!("\"{name}\","));
    }
    out.close("];");
    for (op, _) in &ops {
        out.blank();
        emit_dispatch_stub(ctx, op, out)?;
    }
    out.close("}");

    out.blank();
    out.open(&format!(
        "impl ::floe::runtime::object::Object for {}Server {{",
        class.name
    ));
    out.open("fn ice_ids(&self) -> &'static [&'static str] {");
    out.line(&format!("{shouty}_IDS"));
    out.close("}");
    out.blank();
    out.open("fn ice_class_ids(&self) -> &'static [&'static str] {");
    out.line(&format!("{shouty}_CLASS_IDS"));
    out.close("}");
    out.blank();
    out.open(&format!(
        "fn dispatch(&self, __incoming: &mut {INCOMING}) -> Result<{STATUS}, {LOCAL_ERROR}> {{"
    ));
    out.open(
        "match Self::OPERATIONS.binary_search(&__incoming.current().operation.as_str()) {",
    );
    for (index, name) in table.iter().enumerate() {
        let arm = match name.as_str() {
            "ice_isA" => {
                "::floe::runtime::object::dispatch_ice_is_a(self, __incoming)".to_string()
            },
            "ice_ping" => {
                "::floe::runtime::object::dispatch_ice_ping(self, __incoming)".to_string()
            },
            other => format!("self.dispatch_{}(__incoming)", to_snake(other)),
        };
        out.line(&format!("Ok({index}) => {arm},"));
    }
    out.line(&format!("_ => Ok({STATUS}::OperationNotExist),"));
    out.close("}");
    out.close("}");
    out.blank();
    out.open("fn as_any(&self) -> &dyn ::std::any::Any {");
    out.line("self");
    out.close("}");
    out.close("}");
    Ok(())
}

fn emit_dispatch_stub(
    ctx: &Ctx,
    op: &Operation,
    out: &mut Output,
) -> Result<(), GenError> {
    let name = fix_ident(&op.name);
    let snake = to_snake(&op.name);
    let throws = ctx.table.sorted_throws(op)?;

    out.open(&format!(
        "fn dispatch_{snake}(&self, __incoming: &mut {INCOMING}) -> Result<{STATUS}, {LOCAL_ERROR}> {{"
    ));

    // Demarshal the in-parameters.
    if !op.inputs.is_empty() {
        let needs_cfg = op
            .inputs
            .iter()
            .any(|p| ctx.table.contains_proxy(&p.ty));
        if needs_cfg {
            out.line("let (__is, __cfg) = __incoming.for_read();");
        } else {
            out.line("let (__is, _) = __incoming.for_read();");
        }
        for p in &op.inputs {
            out.line(&format!(
                "let {} = {};",
                fix_ident(&p.name),
                ctx.read_expr(&p.ty, "__cfg", "__is")?
            ));
        }
    }

    // Invoke the user code.
    let args = op
        .inputs
        .iter()
        .map(|p| stub_arg(ctx, p))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");
    let asep = if args.is_empty() { "" } else { ", " };
    out.open(&format!(
        "match self.servant.{name}({args}{asep}__incoming.current()) {{"
    ));

    // Marshal outs and return value.
    out.open(&format!("Ok({}) => {{", stub_result_pattern(op)));
    if op.ret.is_some() || !op.outputs.is_empty() {
        out.line("let __os = __incoming.os();");
        for o in &op.outputs {
            out.line(&ctx.write_stmt(&o.ty, &fix_ident(&o.name), ExprMode::Owned, "__os")?);
        }
        if let Some(rt) = &op.ret {
            out.line(&ctx.write_stmt(rt, "__ret", ExprMode::Owned, "__os")?);
        }
    }
    out.line(&format!("Ok({STATUS}::Ok)"));
    out.close("},");

    // Declared user exceptions marshal; everything else projects.
    out.open(&format!("Err({ERROR}::User(__ex)) => {{"));
    if throws.is_empty() {
        out.line(&format!(
            "Err({LOCAL_ERROR}::UnknownUserException(__ex.ice_name().to_string()))"
        ));
    } else {
        out.open("const __THROWS: &[&str] = &[");
        for t in &throws {
            out.line(&format!("\"{t}\","));
        }
        out.close("];");
        out.open("if __THROWS.binary_search(&__ex.ice_name()).is_ok() {");
        out.line("let __os = __incoming.os();");
        out.line("__os.write_string(__ex.ice_name());");
        out.line("__ex.ice_write(__os);");
        out.line(&format!("Ok({STATUS}::UserException)"));
        out.close("} else {");
        out.inc();
        out.line(&format!(
            "Err({LOCAL_ERROR}::UnknownUserException(__ex.ice_name().to_string()))"
        ));
        out.close("}");
    }
    out.close("},");
    out.line(&format!("Err({ERROR}::Local(__e)) => Err(__e),"));
    out.close("}");
    out.close("}");
    Ok(())
}

/// How a demarshalled local is handed to the servant, per the generated
/// calling convention.
fn stub_arg(
    ctx: &Ctx,
    p: &crate::slice::ast::DataMember,
) -> Result<String, GenError> {
    let name = fix_ident(&p.name);
    Ok(match &p.ty {
        Type::String => format!("&{name}"),
        Type::Named(n) => match ctx.table.kind_of(n) {
            Some(Kind::Enum) => name,
            _ => format!("&{name}"),
        },
        Type::Proxy(_) => format!("{name}.as_ref()"),
        _ => name,
    })
}

/// The pattern destructuring a servant result: return value first, then
/// the out-parameters.
fn stub_result_pattern(op: &Operation) -> String {
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
