// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The abstract syntax tree of one Slice unit.
//!
//! The IDL parser is an external collaborator; it hands the generator its
//! output as a serialized `Unit` document (YAML or JSON). Type references
//! are absolute scoped names (`::Module::Name`); proxy types carry a
//! trailing `*`, builtins are spelled by keyword.

use std::{fmt, fs, path::Path};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

/// Anything that can go wrong between loading a unit and emitting code.
#[derive(Debug, Error)]
pub enum GenError {
    #[error("cannot read `{path}': {reason}")]
    Io { path: String, reason: String },
    #[error("cannot parse `{path}': {reason}")]
    Parse { path: String, reason: String },
    #[error("unknown type `{0}'")]
    UnknownType(String),
    #[error("duplicate definition of `{0}'")]
    Duplicate(String),
    #[error("bad reference `{0}': {1}")]
    BadReference(String, String),
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    #[error("invalid unit: {0}")]
    Invalid(String),
}

/// A builtin or named Slice type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Byte,
    Bool,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    /// Constructed type by absolute scoped name.
    Named(String),
    /// Proxy to the named class: `Name*` in Slice.
    Proxy(String),
}

impl Type {
    pub fn parse(s: &str) -> Result<Self, GenError> {
        Ok(match s {
            "byte" => Type::Byte,
            "bool" => Type::Bool,
            "short" => Type::Short,
            "int" => Type::Int,
            "long" => Type::Long,
            "float" => Type::Float,
            "double" => Type::Double,
            "string" => Type::String,
            other => {
                let (name, proxy) = match other.strip_suffix('*') {
                    Some(name) => (name.trim_end(), true),
                    None => (other, false),
                };
                if !name.starts_with("::") {
                    return Err(GenError::BadReference(
                        other.to_string(),
                        "type references must be absolute scoped names".into(),
                    ));
                }
                if proxy {
                    Type::Proxy(name.to_string())
                } else {
                    Type::Named(name.to_string())
                }
            },
        })
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Type::Named(_) | Type::Proxy(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Byte => f.write_str("byte"),
            Type::Bool => f.write_str("bool"),
            Type::Short => f.write_str("short"),
            Type::Int => f.write_str("int"),
            Type::Long => f.write_str("long"),
            Type::Float => f.write_str("float"),
            Type::Double => f.write_str("double"),
            Type::String => f.write_str("string"),
            Type::Named(name) => f.write_str(name),
            Type::Proxy(name) => write!(f, "{name}*"),
        }
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Type::parse(&s).map_err(de::Error::custom)
    }
}

/// One `(type, name)` element of a member or parameter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataMember {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

/// Named unit of invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    /// The "nonmutating" flag: the runtime may retry the call after a
    /// transport failure.
    #[serde(default, alias = "nonmutating")]
    pub idempotent: bool,
    #[serde(default)]
    pub inputs: Vec<DataMember>,
    #[serde(default)]
    pub outputs: Vec<DataMember>,
    #[serde(default, rename = "returns")]
    pub ret: Option<Type>,
    /// Scoped names of the user exceptions this operation may raise.
    #[serde(default)]
    pub throws: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    #[serde(default)]
    pub members: Vec<DataMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub enumerators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDef {
    pub name: String,
    pub element: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryDef {
    pub name: String,
    pub key: Type,
    pub value: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionDef {
    pub name: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub members: Vec<DataMember>,
}

/// A class or interface definition. The head of the base list, when it is
/// a class rather than an interface, defines inheritance of data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    #[serde(default)]
    pub interface: bool,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub bases: Vec<String>,
    #[serde(default)]
    pub members: Vec<DataMember>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Definition {
    Module(Module),
    Struct(StructDef),
    Enum(EnumDef),
    Sequence(SequenceDef),
    Dictionary(DictionaryDef),
    Exception(ExceptionDef),
    Class(ClassDef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub contents: Vec<Definition>,
}

/// One translation unit: what a single IDL file parses to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub name: String,
    /// Basenames of units this one depends on for type references.
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub modules: Vec<Module>,
}

impl Unit {
    /// Loads a serialized unit, dispatching on the file extension
    /// (`.json` is JSON, everything else parses as YAML).
    pub fn load(path: &Path) -> Result<Self, GenError> {
        let text = fs::read_to_string(path).map_err(|e| GenError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let parse_err = |e: String| GenError::Parse {
            path: path.display().to_string(),
            reason: e,
        };

        let unit: Unit = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&text).map_err(|e| parse_err(e.to_string()))?
        } else {
            serde_yaml::from_str(&text).map_err(|e| parse_err(e.to_string()))?
        };
        unit.validate()?;
        Ok(unit)
    }

    /// Structural validation that needs no cross-unit name resolution.
    pub fn validate(&self) -> Result<(), GenError> {
        fn check_module(m: &Module) -> Result<(), GenError> {
            for def in &m.contents {
                match def {
                    Definition::Module(inner) => check_module(inner)?,
                    Definition::Class(c) => {
                        for op in &c.operations {
                            check_operation(&c.name, op)?;
                        }
                    },
                    Definition::Enum(e) => {
                        if e.enumerators.is_empty() {
                            return Err(GenError::Invalid(format!(
                                "enum `{}' has no enumerators",
                                e.name
                            )));
                        }
                    },
                    _ => {},
                }
            }
            Ok(())
        }

        fn check_operation(class: &str, op: &Operation) -> Result<(), GenError> {
            let mut seen = std::collections::BTreeSet::new();
            for param in op.inputs.iter().chain(&op.outputs) {
                if !seen.insert(param.name.as_str()) {
                    return Err(GenError::Invalid(format!(
                        "duplicate parameter `{}' in operation `{}::{}'",
                        param.name, class, op.name
                    )));
                }
            }
            Ok(())
        }

        if self.name.is_empty() {
            return Err(GenError::Invalid("unit has no name".into()));
        }
        for m in &self.modules {
            check_module(m)?;
        }
        Ok(())
    }
}
