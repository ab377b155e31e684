// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Name mangling, path qualification and marshalling-statement synthesis
//! shared by the emission passes.

use crate::slice::{
    ast::{GenError, Operation, Type},
    table::{Kind, TypeTable},
};

/// Everything a pass needs to know about where it is emitting.
pub struct Ctx<'a> {
    pub table: &'a TypeTable,
    /// Unit being generated, e.g. `warehouse`.
    pub unit: &'a str,
    /// Absolute scope of the module being emitted, e.g. `::Warehouse`.
    pub scope: String,
    /// Module nesting depth (number of enclosing `pub mod` blocks).
    pub depth: usize,
}

/// How the expression handed to a marshalling statement is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprMode {
    /// An owned place such as `self.x` or a local.
    Owned,
    /// A `&T` obtained from iteration.
    Borrowed,
    /// A function parameter in the generated calling convention.
    Param,
}

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "box", "break", "const", "continue", "dyn", "else",
    "enum", "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop",
    "match", "mod", "move", "mut", "pub", "ref", "return", "static", "struct",
    "trait", "true", "type", "unsafe", "use", "where", "while", "yield",
];

/// Escapes identifiers that collide with Rust keywords.
pub fn fix_ident(name: &str) -> String {
    if matches!(name, "self" | "Self" | "super" | "crate" | "_") {
        format!("{name}_")
    } else if RUST_KEYWORDS.contains(&name) {
        format!("r#{name}")
    } else {
        name.to_string()
    }
}

/// `CamelCase`/`mixedCase` to `snake_case`.
pub fn to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            for low in c.to_lowercase() {
                out.push(low);
            }
            prev_lower = false;
        } else {
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            out.push(c);
        }
    }
    out
}

/// `CamelCase` to `SHOUTY_SNAKE_CASE` for generated constants.
pub fn to_shouty(name: &str) -> String {
    to_snake(name).to_uppercase()
}

fn split_scoped(scoped: &str) -> Vec<&str> {
    scoped
        .split("::")
        .filter(|s| !s.is_empty())
        .collect()
}

/// Unqualified name of a scoped reference.
pub fn name_of(scoped: &str) -> &str {
    split_scoped(scoped).last().copied().unwrap_or(scoped)
}

impl Ctx<'_> {
    /// Rust path of the item `item` living next to the definition `scoped`
    /// names. Same-unit references climb to the file root with `super`;
    /// cross-unit references climb one level further and enter the sibling
    /// generated module named after the unit.
    pub fn item_path(&self, scoped: &str, item: &str) -> Result<String, GenError> {
        let unit = self
            .table
            .unit_of(scoped)
            .ok_or_else(|| GenError::UnknownType(scoped.to_string()))?;

        let segments = split_scoped(scoped);
        let modules = &segments[..segments.len().saturating_sub(1)];

        let mut path = String::new();
        let ups = if unit == self.unit {
            self.depth
        } else {
            self.depth + 1
        };
        for _ in 0..ups {
            path.push_str("super::");
        }
        if unit != self.unit {
            path.push_str(&to_snake(unit));
            path.push_str("::");
        }
        for m in modules {
            path.push_str(m);
            path.push_str("::");
        }
        path.push_str(item);
        Ok(path)
    }

    /// Path of the type a scoped name denotes.
    pub fn type_path(&self, scoped: &str) -> Result<String, GenError> {
        self.item_path(scoped, name_of(scoped))
    }

    /// The Rust spelling of a Slice type in owned position.
    pub fn owned_type(&self, ty: &Type) -> Result<String, GenError> {
        Ok(match ty {
            Type::Byte => "u8".into(),
            Type::Bool => "bool".into(),
            Type::Short => "i16".into(),
            Type::Int => "i32".into(),
            Type::Long => "i64".into(),
            Type::Float => "f32".into(),
            Type::Double => "f64".into(),
            Type::String => "String".into(),
            Type::Named(name) => self.type_path(name)?,
            Type::Proxy(name) => {
                let prx = format!("{}Prx", name_of(name));
                format!("Option<{}>", self.item_path(name, &prx)?)
            },
        })
    }

    /// The Rust spelling of a Slice type in input-parameter position:
    /// scalars and enums by value, strings as `&str`, aggregates by
    /// reference, proxies as `Option<&Prx>`.
    pub fn param_type(&self, ty: &Type) -> Result<String, GenError> {
        Ok(match ty {
            Type::String => "&str".into(),
            Type::Named(name) => match self.table.kind_of(name) {
                Some(Kind::Enum) => self.type_path(name)?,
                _ => format!("&{}", self.type_path(name)?),
            },
            Type::Proxy(name) => {
                let prx = format!("{}Prx", name_of(name));
                format!("Option<&{}>", self.item_path(name, &prx)?)
            },
            other => self.owned_type(other)?,
        })
    }

    /// One statement marshalling `expr` into the stream variable `os`.
    pub fn write_stmt(
        &self,
        ty: &Type,
        expr: &str,
        mode: ExprMode,
        os: &str,
    ) -> Result<String, GenError> {
        let scalar = |method: &str| match mode {
            ExprMode::Borrowed => format!("{os}.{method}(*{expr});"),
            _ => format!("{os}.{method}({expr});"),
        };
        Ok(match ty {
            Type::Byte => scalar("write_byte"),
            Type::Bool => scalar("write_bool"),
            Type::Short => scalar("write_short"),
            Type::Int => scalar("write_int"),
            Type::Long => scalar("write_long"),
            Type::Float => scalar("write_float"),
            Type::Double => scalar("write_double"),
            Type::String => match mode {
                ExprMode::Owned => format!("{os}.write_string(&{expr});"),
                _ => format!("{os}.write_string({expr});"),
            },
            Type::Named(name) => match self.table.kind_of(name) {
                Some(Kind::Struct | Kind::Enum) => format!("{expr}.ice_write({os});"),
                Some(Kind::Sequence | Kind::Dictionary) => {
                    let f = self.marshal_fn(name, "write")?;
                    match mode {
                        ExprMode::Owned => format!("{f}({os}, &{expr});"),
                        _ => format!("{f}({os}, {expr});"),
                    }
                },
                _ => return Err(GenError::UnknownType(name.clone())),
            },
            Type::Proxy(name) => {
                let f = self.proxy_marshal_fn(name, "write")?;
                match mode {
                    ExprMode::Param => format!("{f}({os}, {expr});"),
                    _ => format!("{f}({os}, {expr}.as_ref());"),
                }
            },
        })
    }

    /// One expression unmarshalling a value of `ty` from the stream
    /// variable `is`. `cfg_expr` supplies the runtime configuration for
    /// proxy reconstruction.
    pub fn read_expr(
        &self,
        ty: &Type,
        cfg_expr: &str,
        is: &str,
    ) -> Result<String, GenError> {
        Ok(match ty {
            Type::Byte => format!("{is}.read_byte()?"),
            Type::Bool => format!("{is}.read_bool()?"),
            Type::Short => format!("{is}.read_short()?"),
            Type::Int => format!("{is}.read_int()?"),
            Type::Long => format!("{is}.read_long()?"),
            Type::Float => format!("{is}.read_float()?"),
            Type::Double => format!("{is}.read_double()?"),
            Type::String => format!("{is}.read_string()?"),
            Type::Named(name) => match self.table.kind_of(name) {
                Some(Kind::Struct | Kind::Enum) => {
                    format!("{}::ice_read({is})?", self.type_path(name)?)
                },
                Some(Kind::Sequence | Kind::Dictionary) => {
                    // Proxy-bearing containers thread the configuration
                    // down for reference reconstruction.
                    if self.table.contains_proxy(ty) {
                        format!("{}({is}, {cfg_expr})?", self.marshal_fn(name, "read")?)
                    } else {
                        format!("{}({is})?", self.marshal_fn(name, "read")?)
                    }
                },
                _ => return Err(GenError::UnknownType(name.clone())),
            },
            Type::Proxy(name) => {
                format!(
                    "{}({is}, {cfg_expr})?",
                    self.proxy_marshal_fn(name, "read")?
                )
            },
        })
    }

    /// Path of the generated sequence/dictionary marshaller.
    pub fn marshal_fn(&self, scoped: &str, verb: &str) -> Result<String, GenError> {
        let item = format!("{verb}_{}", to_snake(name_of(scoped)));
        self.item_path(scoped, &item)
    }

    /// Path of the generated proxy marshaller of a class.
    pub fn proxy_marshal_fn(&self, scoped: &str, verb: &str) -> Result<String, GenError> {
        let item = format!("{verb}_{}_prx", to_snake(name_of(scoped)));
        self.item_path(scoped, &item)
    }

    // ── operation signatures ────────────────────────────────────────────

    /// Return type: the tuple of return value and out-parameters.
    pub fn ret_type(&self, op: &Operation) -> Result<String, GenError> {
        let mut parts = Vec::new();
        if let Some(ret) = &op.ret {
            parts.push(self.owned_type(ret)?);
        }
        for out in &op.outputs {
            parts.push(self.owned_type(&out.ty)?);
        }
        Ok(match parts.len() {
            0 => "()".to_string(),
            1 => parts.remove(0),
            _ => format!("({})", parts.join(", ")),
        })
    }

    /// `name: Type, …` for the in-parameters.
    pub fn param_list(&self, op: &Operation) -> Result<String, GenError> {
        let mut parts = Vec::new();
        for p in &op.inputs {
            parts.push(format!("{}: {}", fix_ident(&p.name), self.param_type(&p.ty)?));
        }
        Ok(parts.join(", "))
    }

    /// `name, …` forwarding arguments for the in-parameters.
    pub fn arg_list(&self, op: &Operation) -> String {
        op.inputs
            .iter()
            .map(|p| fix_ident(&p.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
