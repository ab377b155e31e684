// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Concrete-type emission: structs, enums, sequences, dictionaries and
//! user exceptions.

use crate::slice::{
    ast::{
        DataMember, Definition, DictionaryDef, EnumDef, ExceptionDef, GenError,
        SequenceDef, StructDef, Type,
    },
    r#gen::{
        helpers::{Ctx, ExprMode, fix_ident, to_snake},
        output::Output,
    },
};

const STREAM: &str = "::floe::wire::stream::BasicStream";
const PROTOCOL_ERROR: &str = "::floe::wire::stream::ProtocolError";
const LOCAL_ERROR: &str = "::floe::runtime::errors::LocalError";

pub fn emit(ctx: &Ctx, contents: &[Definition], out: &mut Output) -> Result<(), GenError> {
    for def in contents {
        match def {
            Definition::Struct(s) => emit_struct(ctx, s, out)?,
            Definition::Enum(e) => emit_enum(ctx, e, out),
            Definition::Sequence(s) => emit_sequence(ctx, s, out)?,
            Definition::Dictionary(d) => emit_dictionary(ctx, d, out)?,
            Definition::Exception(e) => emit_exception(ctx, e, out)?,
            Definition::Module(_) | Definition::Class(_) => {},
        }
    }
    Ok(())
}

fn emit_members(ctx: &Ctx, members: &[DataMember], out: &mut Output) -> Result<(), GenError> {
    for m in members {
        out.line(&format!(
            "pub {}: {},",
            fix_ident(&m.name),
            ctx.owned_type(&m.ty)?
        ));
    }
    Ok(())
}

fn emit_member_writes(
    ctx: &Ctx,
    members: &[DataMember],
    out: &mut Output,
) -> Result<(), GenError> {
    for m in members {
        let expr = format!("self.{}", fix_ident(&m.name));
        out.line(&ctx.write_stmt(&m.ty, &expr, ExprMode::Owned, "os")?);
    }
    Ok(())
}

fn emit_struct(ctx: &Ctx, s: &StructDef, out: &mut Output) -> Result<(), GenError> {
    let orderable = s.members.iter().all(|m| ctx.table.is_orderable(&m.ty));

    out.blank();
    out.line("#[derive(Debug, Clone, Default, PartialEq)]");
    out.open(&format!("pub struct {} {{", s.name));
    emit_members(ctx, &s.members, out)?;
    out.close("}");

    out.blank();
    out.open(&format!("impl {} {{", s.name));
    out.open(&format!("pub fn ice_write(&self, os: &mut {STREAM}) {{"));
    if s.members.is_empty() {
        out.line("let _ = os;");
    }
    emit_member_writes(ctx, &s.members, out)?;
    out.close("}");
    out.blank();
    out.open(&format!(
        "pub fn ice_read(is: &mut {STREAM}) -> Result<Self, {PROTOCOL_ERROR}> {{"
    ));
    if s.members.is_empty() {
        out.line("let _ = is;");
        out.line("Ok(Self {})");
    } else {
        out.open("Ok(Self {");
        for m in &s.members {
            out.line(&format!(
                "{}: {},",
                fix_ident(&m.name),
                ctx.read_expr(&m.ty, "cfg", "is")?
            ));
        }
        out.close("})");
    }
    out.close("}");
    out.close("}");

    // Strict ordering, lexicographic in field declaration order.
    out.blank();
    out.open(&format!("impl PartialOrd for {} {{", s.name));
    out.open(
        "fn partial_cmp(&self, other: &Self) -> Option<::std::cmp::Ordering> {",
    );
    if s.members.is_empty() {
        out.line("let _ = other;");
        out.line("Some(::std::cmp::Ordering::Equal)");
    } else {
        for (pos, m) in s.members.iter().enumerate() {
            let field = fix_ident(&m.name);
            if pos + 1 == s.members.len() {
                out.line(&format!("self.{field}.partial_cmp(&other.{field})"));
            } else {
                out.open(&format!(
                    "match self.{field}.partial_cmp(&other.{field}) {{"
                ));
                out.line("Some(::std::cmp::Ordering::Equal) => {},");
                out.line("ord => return ord,");
                out.close("}");
            }
        }
    }
    out.close("}");
    out.close("}");

    if orderable {
        out.blank();
        out.line(&format!("impl Eq for {} {{}}", s.name));
        out.blank();
        out.open(&format!("impl Ord for {} {{", s.name));
        out.open("fn cmp(&self, other: &Self) -> ::std::cmp::Ordering {");
        out.line("self.partial_cmp(other).unwrap_or(::std::cmp::Ordering::Equal)");
        out.close("}");
        out.close("}");
    }

    Ok(())
}

fn emit_enum(_ctx: &Ctx, e: &EnumDef, out: &mut Output) {
    out.blank();
    out.line("#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]");
    out.open(&format!("pub enum {} {{", e.name));
    for (pos, enumerator) in e.enumerators.iter().enumerate() {
        if pos == 0 {
            out.line("#[default]");
        }
        out.line(&format!("{},", fix_ident(enumerator)));
    }
    out.close("}");

    let cardinality = e.enumerators.len();
    out.blank();
    out.open(&format!("impl {} {{", e.name));
    out.line("/// Enumerator count; fixes the on-wire width.");
    out.line(&format!("pub const CARDINALITY: usize = {cardinality};"));
    out.blank();
    out.open(&format!("pub fn ice_write(self, os: &mut {STREAM}) {{"));
    out.line("os.write_enum(self as i64, Self::CARDINALITY);");
    out.close("}");
    out.blank();
    out.open(&format!(
        "pub fn ice_read(is: &mut {STREAM}) -> Result<Self, {PROTOCOL_ERROR}> {{"
    ));
    out.open("match is.read_enum(Self::CARDINALITY)? {");
    for (ordinal, enumerator) in e.enumerators.iter().enumerate() {
        out.line(&format!(
            "{ordinal} => Ok({}::{}),",
            e.name,
            fix_ident(enumerator)
        ));
    }
    out.line(&format!(
        "other => Err({PROTOCOL_ERROR}::InvalidEnumerator(other)),"
    ));
    out.close("}");
    out.close("}");
    out.close("}");
}

fn emit_sequence(ctx: &Ctx, s: &SequenceDef, out: &mut Output) -> Result<(), GenError> {
    let scoped = format!("{}::{}", ctx.scope, s.name);
    let snake = to_snake(&s.name);
    let with_cfg = ctx.table.contains_proxy(&Type::Named(scoped.clone()));
    let err = if with_cfg { LOCAL_ERROR } else { PROTOCOL_ERROR };

    out.blank();
    out.line(&format!(
        "pub type {} = Vec<{}>;",
        s.name,
        ctx.owned_type(&s.element)?
    ));

    out.blank();
    out.open(&format!(
        "pub fn write_{snake}(os: &mut {STREAM}, v: &{}) {{",
        s.name
    ));
    out.line("os.write_int(v.len() as i32);");
    out.open("for elem in v {");
    out.line(&ctx.write_stmt(&s.element, "elem", ExprMode::Borrowed, "os")?);
    out.close("}");
    out.close("}");

    out.blank();
    let cfg_param = if with_cfg {
        ", cfg: &::floe::cfg::config::Config"
    } else {
        ""
    };
    out.open(&format!(
        "pub fn read_{snake}(is: &mut {STREAM}{cfg_param}) -> Result<{}, {err}> {{",
        s.name
    ));
    // The count is never trusted for pre-sizing; the vector grows one
    // element at a time.
    out.line("let mut sz = is.read_count()?;");
    out.line(&format!("let mut v = {}::new();", s.name));
    out.open("while sz > 0 {");
    out.line(&format!("v.push({});", ctx.read_expr(&s.element, "cfg", "is")?));
    out.line("sz -= 1;");
    out.close("}");
    out.line("Ok(v)");
    out.close("}");
    Ok(())
}

fn emit_dictionary(
    ctx: &Ctx,
    d: &DictionaryDef,
    out: &mut Output,
) -> Result<(), GenError> {
    let scoped = format!("{}::{}", ctx.scope, d.name);
    let snake = to_snake(&d.name);
    let with_cfg = ctx.table.contains_proxy(&Type::Named(scoped.clone()));
    let err = if with_cfg { LOCAL_ERROR } else { PROTOCOL_ERROR };

    out.blank();
    out.line(&format!(
        "pub type {} = ::std::collections::BTreeMap<{}, {}>;",
        d.name,
        ctx.owned_type(&d.key)?,
        ctx.owned_type(&d.value)?
    ));

    out.blank();
    out.open(&format!(
        "pub fn write_{snake}(os: &mut {STREAM}, v: &{}) {{",
        d.name
    ));
    out.line("os.write_int(v.len() as i32);");
    out.open("for (key, value) in v {");
    out.line(&ctx.write_stmt(&d.key, "key", ExprMode::Borrowed, "os")?);
    out.line(&ctx.write_stmt(&d.value, "value", ExprMode::Borrowed, "os")?);
    out.close("}");
    out.close("}");

    out.blank();
    let cfg_param = if with_cfg {
        ", cfg: &::floe::cfg::config::Config"
    } else {
        ""
    };
    out.open(&format!(
        "pub fn read_{snake}(is: &mut {STREAM}{cfg_param}) -> Result<{}, {err}> {{",
        d.name
    ));
    out.line("let mut sz = is.read_count()?;");
    out.line(&format!("let mut v = {}::new();", d.name));
    out.open("while sz > 0 {");
    out.line(&format!("let key = {};", ctx.read_expr(&d.key, "cfg", "is")?));
    out.line(&format!("let value = {};", ctx.read_expr(&d.value, "cfg", "is")?));
    out.line("v.insert(key, value);");
    out.line("sz -= 1;");
    out.close("}");
    out.line("Ok(v)");
    out.close("}");
    Ok(())
}

fn emit_exception(
    ctx: &Ctx,
    e: &ExceptionDef,
    out: &mut Output,
) -> Result<(), GenError> {
    let scoped = format!("{}::{}", ctx.scope, e.name);
    // Base-then-derived: inherited fields flatten in, root base first.
    let members = ctx.table.exception_all_members(&scoped)?;

    out.blank();
    out.line("#[derive(Debug, Clone, Default, PartialEq)]");
    out.open(&format!("pub struct {} {{", e.name));
    emit_members(ctx, &members, out)?;
    out.close("}");

    out.blank();
    out.open(&format!("impl {} {{", e.name));
    out.line(&format!("pub const ICE_ID: &'static str = \"{scoped}\";"));
    if !e.local {
        let ids = ctx.table.exception_ids(&scoped)?;
        out.open("pub const ICE_EXCEPTION_IDS: &'static [&'static str] = &[");
        for id in &ids {
            out.line(&format!("\"{id}\","));
        }
        out.close("];");
    }
    out.close("}");

    if !e.local {
        out.blank();
        out.open(&format!(
            "impl ::floe::runtime::errors::UserException for {} {{",
            e.name
        ));
        out.open("fn ice_name(&self) -> &'static str {");
        out.line("Self::ICE_ID");
        out.close("}");
        out.blank();
        out.open("fn ice_exception_ids(&self) -> &'static [&'static str] {");
        out.line("Self::ICE_EXCEPTION_IDS");
        out.close("}");
        out.blank();
        out.open(&format!("fn ice_write(&self, os: &mut {STREAM}) {{"));
        if members.is_empty() {
            out.line("let _ = os;");
        }
        emit_member_writes(ctx, &members, out)?;
        out.close("}");
        out.blank();
        out.open(&format!(
            "fn ice_read(&mut self, is: &mut {STREAM}) -> Result<(), {PROTOCOL_ERROR}> {{"
        ));
        if members.is_empty() {
            out.line("let _ = is;");
        }
        for m in &members {
            out.line(&format!(
                "self.{} = {};",
                fix_ident(&m.name),
                ctx.read_expr(&m.ty, "cfg", "is")?
            ));
        }
        out.line("Ok(())");
        out.close("}");
        out.blank();
        out.open(
            "fn ice_clone(&self) -> Box<dyn ::floe::runtime::errors::UserException> {",
        );
        out.line("Box::new(self.clone())");
        out.close("}");
        out.blank();
        out.open("fn as_any(&self) -> &dyn ::std::any::Any {");
        out.line("self");
        out.close("}");
        out.close("}");
    }

    out.blank();
    out.open(&format!("impl ::std::fmt::Display for {} {{", e.name));
    out.open(
        "fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {",
    );
    out.line("f.write_str(Self::ICE_ID)");
    out.close("}");
    out.close("}");
    out.blank();
    out.line(&format!("impl ::std::error::Error for {} {{}}", e.name));
    Ok(())
}
