// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scoped-name index over one or more units, plus the lattice computations
//! the generator leans on: transitive bases, id lists, flattened member
//! lists and dispatch tables.

use std::collections::HashMap;

use crate::{
    runtime::errors::{OBJECT_ID, USER_EXCEPTION_ID},
    slice::{
        ast::{
            ClassDef, DataMember, DictionaryDef, EnumDef, ExceptionDef, GenError,
            Operation, SequenceDef, StructDef, Type, Unit,
        },
        visit::{self, Visitor},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Struct,
    Enum,
    Sequence,
    Dictionary,
    Exception,
    Class,
}

/// Index of every definition reachable from the compiled units.
#[derive(Debug, Default)]
pub struct TypeTable {
    structs: HashMap<String, StructDef>,
    enums: HashMap<String, EnumDef>,
    sequences: HashMap<String, SequenceDef>,
    dictionaries: HashMap<String, DictionaryDef>,
    exceptions: HashMap<String, ExceptionDef>,
    classes: HashMap<String, ClassDef>,
    /// Which unit defines each scoped name; drives cross-unit paths.
    unit_of: HashMap<String, String>,
}

/// Visitor that files every definition under its scoped name.
struct IndexVisitor<'t> {
    table: &'t mut TypeTable,
    unit: String,
    error: Option<GenError>,
}

impl IndexVisitor<'_> {
    fn record<T: Clone>(
        &mut self,
        map_insert: impl FnOnce(&mut TypeTable, String, T),
        scoped: &str,
        def: &T,
    ) {
        if self.error.is_some() {
            return;
        }
        if self.table.unit_of.contains_key(scoped) {
            self.error = Some(GenError::Duplicate(scoped.to_string()));
            return;
        }
        self.table
            .unit_of
            .insert(scoped.to_string(), self.unit.clone());
        map_insert(&mut *self.table, scoped.to_string(), def.clone());
    }
}

impl Visitor for IndexVisitor<'_> {
    fn visit_struct_start(&mut self, s: &StructDef, scoped: &str) -> bool {
        self.record(|t, k, v| drop(t.structs.insert(k, v)), scoped, s);
        false
    }

    fn visit_enum(&mut self, e: &EnumDef, scoped: &str) {
        self.record(|t, k, v| drop(t.enums.insert(k, v)), scoped, e);
    }

    fn visit_sequence(&mut self, s: &SequenceDef, scoped: &str) {
        self.record(|t, k, v| drop(t.sequences.insert(k, v)), scoped, s);
    }

    fn visit_dictionary(&mut self, d: &DictionaryDef, scoped: &str) {
        self.record(|t, k, v| drop(t.dictionaries.insert(k, v)), scoped, d);
    }

    fn visit_exception_start(&mut self, e: &ExceptionDef, scoped: &str) -> bool {
        self.record(|t, k, v| drop(t.exceptions.insert(k, v)), scoped, e);
        false
    }

    fn visit_class_start(&mut self, c: &ClassDef, scoped: &str) -> bool {
        self.record(|t, k, v| drop(t.classes.insert(k, v)), scoped, c);
        false
    }
}

impl TypeTable {
    /// Indexes the given units and cross-checks every reference.
    pub fn build(units: &[Unit]) -> Result<Self, GenError> {
        let mut table = TypeTable::default();
        for unit in units {
            let mut indexer = IndexVisitor {
                table: &mut table,
                unit: unit.name.clone(),
                error: None,
            };
            visit::walk_unit(unit, &mut indexer);
            if let Some(e) = indexer.error {
                return Err(e);
            }
        }
        table.check_references()?;
        Ok(table)
    }

    pub fn kind_of(&self, scoped: &str) -> Option<Kind> {
        if self.structs.contains_key(scoped) {
            Some(Kind::Struct)
        } else if self.enums.contains_key(scoped) {
            Some(Kind::Enum)
        } else if self.sequences.contains_key(scoped) {
            Some(Kind::Sequence)
        } else if self.dictionaries.contains_key(scoped) {
            Some(Kind::Dictionary)
        } else if self.exceptions.contains_key(scoped) {
            Some(Kind::Exception)
        } else if self.classes.contains_key(scoped) {
            Some(Kind::Class)
        } else {
            None
        }
    }

    pub fn unit_of(&self, scoped: &str) -> Option<&str> {
        self.unit_of.get(scoped).map(String::as_str)
    }

    pub fn struct_def(&self, scoped: &str) -> Result<&StructDef, GenError> {
        self.structs
            .get(scoped)
            .ok_or_else(|| GenError::UnknownType(scoped.to_string()))
    }

    pub fn enum_def(&self, scoped: &str) -> Result<&EnumDef, GenError> {
        self.enums
            .get(scoped)
            .ok_or_else(|| GenError::UnknownType(scoped.to_string()))
    }

    pub fn sequence_def(&self, scoped: &str) -> Result<&SequenceDef, GenError> {
        self.sequences
            .get(scoped)
            .ok_or_else(|| GenError::UnknownType(scoped.to_string()))
    }

    pub fn dictionary_def(&self, scoped: &str) -> Result<&DictionaryDef, GenError> {
        self.dictionaries
            .get(scoped)
            .ok_or_else(|| GenError::UnknownType(scoped.to_string()))
    }

    pub fn exception_def(&self, scoped: &str) -> Result<&ExceptionDef, GenError> {
        self.exceptions
            .get(scoped)
            .ok_or_else(|| GenError::UnknownType(scoped.to_string()))
    }

    pub fn class_def(&self, scoped: &str) -> Result<&ClassDef, GenError> {
        self.classes
            .get(scoped)
            .ok_or_else(|| GenError::UnknownType(scoped.to_string()))
    }

    // ── exception lattice ───────────────────────────────────────────────

    /// Transitive base chain, most derived first.
    pub fn exception_bases(&self, scoped: &str) -> Result<Vec<String>, GenError> {
        let mut chain = Vec::new();
        let mut current = self.exception_def(scoped)?.base.clone();
        while let Some(base) = current {
            if chain.contains(&base) || base == scoped {
                return Err(GenError::BadReference(
                    scoped.to_string(),
                    "cyclic exception inheritance".into(),
                ));
            }
            let def = self.exception_def(&base)?;
            chain.push(base.clone());
            current = def.base.clone();
        }
        Ok(chain)
    }

    /// On-wire identification list: self, transitive bases, closed by the
    /// universal user-exception identifier.
    pub fn exception_ids(&self, scoped: &str) -> Result<Vec<String>, GenError> {
        let mut ids = vec![scoped.to_string()];
        ids.extend(self.exception_bases(scoped)?);
        ids.push(USER_EXCEPTION_ID.to_string());
        Ok(ids)
    }

    /// Flattened member list in on-wire order: root base first.
    pub fn exception_all_members(
        &self,
        scoped: &str,
    ) -> Result<Vec<DataMember>, GenError> {
        let mut chain = self.exception_bases(scoped)?;
        chain.reverse();
        chain.push(scoped.to_string());
        let mut members = Vec::new();
        for link in &chain {
            members.extend(self.exception_def(link)?.members.iter().cloned());
        }
        Ok(members)
    }

    // ── class lattice ───────────────────────────────────────────────────

    /// Transitive base set, depth-first from the declaration order,
    /// duplicates eliminated.
    pub fn class_all_bases(&self, scoped: &str) -> Result<Vec<String>, GenError> {
        fn collect(
            table: &TypeTable,
            scoped: &str,
            origin: &str,
            acc: &mut Vec<String>,
        ) -> Result<(), GenError> {
            for base in &table.class_def(scoped)?.bases {
                if base == origin {
                    return Err(GenError::BadReference(
                        origin.to_string(),
                        "cyclic class inheritance".into(),
                    ));
                }
                if !acc.contains(base) {
                    acc.push(base.clone());
                    collect(table, base, origin, acc)?;
                }
            }
            Ok(())
        }

        let mut acc = Vec::new();
        collect(self, scoped, scoped, &mut acc)?;
        Ok(acc)
    }

    /// The sorted interface-id array: every transitive base, the class
    /// itself, and the universal object id. Strictly ascending.
    pub fn class_ids(&self, scoped: &str) -> Result<Vec<String>, GenError> {
        let mut ids = self.class_all_bases(scoped)?;
        ids.push(scoped.to_string());
        ids.push(OBJECT_ID.to_string());
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Transitive base-*class* identifiers (the data-inheritance chain),
    /// most derived first, closed by the universal object id.
    pub fn class_class_ids(&self, scoped: &str) -> Result<Vec<String>, GenError> {
        let mut ids = Vec::new();
        let def = self.class_def(scoped)?;
        if !def.interface {
            ids.push(scoped.to_string());
        }
        let mut current = def.bases.first().cloned();
        while let Some(base) = current {
            let base_def = self.class_def(&base)?;
            if base_def.interface {
                break;
            }
            ids.push(base.clone());
            current = base_def.bases.first().cloned();
        }
        ids.push(OBJECT_ID.to_string());
        Ok(ids)
    }

    /// The chain of data-bearing base classes, root first, used for
    /// flattening inherited data members.
    pub fn class_data_chain(&self, scoped: &str) -> Result<Vec<String>, GenError> {
        let mut chain = vec![scoped.to_string()];
        let mut current = self.class_def(scoped)?.bases.first().cloned();
        while let Some(base) = current {
            let base_def = self.class_def(&base)?;
            if base_def.interface {
                break;
            }
            chain.push(base.clone());
            current = base_def.bases.first().cloned();
        }
        chain.reverse();
        Ok(chain)
    }

    /// All operations of the transitive lattice. The defining class rides
    /// along for diagnostics; a derived redeclaration shadows its base's.
    pub fn class_all_operations(
        &self,
        scoped: &str,
    ) -> Result<Vec<(Operation, String)>, GenError> {
        let mut ops: Vec<(Operation, String)> = Vec::new();
        let mut order = vec![scoped.to_string()];
        order.extend(self.class_all_bases(scoped)?);
        for link in &order {
            for op in &self.class_def(link)?.operations {
                if !ops.iter().any(|(existing, _)| existing.name == op.name) {
                    ops.push((op.clone(), link.clone()));
                }
            }
        }
        Ok(ops)
    }

    /// The dispatch search space: transitive operation names plus the two
    /// universal operations, sorted, no duplicates.
    pub fn dispatch_table(&self, scoped: &str) -> Result<Vec<String>, GenError> {
        let mut names: Vec<String> = self
            .class_all_operations(scoped)?
            .into_iter()
            .map(|(op, _)| op.name)
            .collect();
        names.push("ice_isA".to_string());
        names.push("ice_ping".to_string());
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Sorted, deduplicated scoped names of an operation's throws list.
    pub fn sorted_throws(&self, op: &Operation) -> Result<Vec<String>, GenError> {
        let mut throws = op.throws.clone();
        throws.sort();
        throws.dedup();
        for t in &throws {
            self.exception_def(t)?;
        }
        Ok(throws)
    }

    // ── type predicates ─────────────────────────────────────────────────

    /// Whether the generated type admits a strict total order (drives
    /// `Eq`/`Ord` emission). Floating members poison the whole tree.
    pub fn is_orderable(&self, ty: &Type) -> bool {
        match ty {
            Type::Float | Type::Double => false,
            Type::Proxy(_) => false,
            Type::Named(name) => match self.kind_of(name) {
                Some(Kind::Struct) => self
                    .structs
                    .get(name)
                    .is_some_and(|s| s.members.iter().all(|m| self.is_orderable(&m.ty))),
                Some(Kind::Enum) => true,
                Some(Kind::Sequence) => self
                    .sequences
                    .get(name)
                    .is_some_and(|s| self.is_orderable(&s.element)),
                Some(Kind::Dictionary) => self.dictionaries.get(name).is_some_and(|d| {
                    self.is_orderable(&d.key) && self.is_orderable(&d.value)
                }),
                _ => false,
            },
            _ => true,
        }
    }

    /// Whether a proxy hides anywhere in the type tree. Proxy unmarshalling
    /// needs the runtime configuration, so proxy-bearing types are confined
    /// to operation signatures.
    pub fn contains_proxy(&self, ty: &Type) -> bool {
        fn walk(
            table: &TypeTable,
            ty: &Type,
            visited: &mut Vec<String>,
        ) -> bool {
            match ty {
                Type::Proxy(_) => true,
                Type::Named(name) => {
                    if visited.iter().any(|v| v == name) {
                        return false;
                    }
                    visited.push(name.clone());
                    match table.kind_of(name) {
                        Some(Kind::Struct) => table.structs[name]
                            .members
                            .iter()
                            .any(|m| walk(table, &m.ty, visited)),
                        Some(Kind::Sequence) => {
                            let element = table.sequences[name].element.clone();
                            walk(table, &element, visited)
                        },
                        Some(Kind::Dictionary) => {
                            let def = &table.dictionaries[name];
                            let (k, v) = (def.key.clone(), def.value.clone());
                            walk(table, &k, visited) || walk(table, &v, visited)
                        },
                        _ => false,
                    }
                },
                _ => false,
            }
        }
        walk(self, ty, &mut Vec::new())
    }

    // ── reference validation ────────────────────────────────────────────

    fn check_references(&self) -> Result<(), GenError> {
        for (scoped, def) in &self.structs {
            for member in &def.members {
                self.check_member_type(scoped, &member.ty)?;
            }
        }
        for (scoped, def) in &self.sequences {
            self.check_value_type(scoped, &def.element)?;
        }
        for (scoped, def) in &self.dictionaries {
            self.check_dictionary_key(scoped, &def.key)?;
            self.check_value_type(scoped, &def.value)?;
        }
        for (scoped, def) in &self.exceptions {
            if let Some(base) = &def.base {
                let base_def = self.exception_def(base)?;
                if def.local != base_def.local {
                    return Err(GenError::BadReference(
                        scoped.clone(),
                        "local and non-local exceptions cannot mix".into(),
                    ));
                }
            }
            self.exception_bases(scoped)?;
            for member in &def.members {
                self.check_member_type(scoped, &member.ty)?;
            }
        }
        for (scoped, def) in &self.classes {
            for (pos, base) in def.bases.iter().enumerate() {
                let base_def = self.class_def(base)?;
                if pos > 0 && !base_def.interface {
                    return Err(GenError::BadReference(
                        scoped.clone(),
                        "only the head of the base list may be a class".into(),
                    ));
                }
            }
            self.class_all_bases(scoped)?;
            for member in &def.members {
                self.check_member_type(scoped, &member.ty)?;
            }
            for op in &def.operations {
                for param in op.inputs.iter().chain(&op.outputs) {
                    self.check_value_type(scoped, &param.ty)?;
                }
                if let Some(ret) = &op.ret {
                    self.check_value_type(scoped, ret)?;
                }
                self.sorted_throws(op)?;
            }
        }
        Ok(())
    }

    /// Types usable as operation parameters and return values.
    fn check_value_type(&self, owner: &str, ty: &Type) -> Result<(), GenError> {
        match ty {
            Type::Named(name) => match self.kind_of(name) {
                Some(Kind::Class) => Err(GenError::Unsupported(format!(
                    "`{owner}' uses class `{name}' by value; pass a proxy instead"
                ))),
                Some(Kind::Exception) => Err(GenError::Unsupported(format!(
                    "`{owner}' uses exception `{name}' as a value"
                ))),
                Some(_) => Ok(()),
                None => Err(GenError::UnknownType(name.clone())),
            },
            Type::Proxy(name) => {
                let def = self.class_def(name)?;
                if def.local {
                    return Err(GenError::BadReference(
                        owner.to_string(),
                        format!("local class `{name}' has no proxies"),
                    ));
                }
                Ok(())
            },
            _ => Ok(()),
        }
    }

    /// Types usable as struct/exception/class data members: value types
    /// minus anything proxy-bearing (a member proxy would need an instance
    /// to rebuild).
    fn check_member_type(&self, owner: &str, ty: &Type) -> Result<(), GenError> {
        if self.contains_proxy(ty) {
            return Err(GenError::Unsupported(format!(
                "`{owner}' declares a proxy-bearing data member"
            )));
        }
        self.check_value_type(owner, ty)
    }

    /// Dictionary keys must admit a total order in the generated map.
    fn check_dictionary_key(&self, owner: &str, ty: &Type) -> Result<(), GenError> {
        self.check_value_type(owner, ty)?;
        match ty {
            Type::Float | Type::Double => Err(GenError::Unsupported(format!(
                "`{owner}' uses a floating-point dictionary key"
            ))),
            Type::Named(name) if self.kind_of(name) != Some(Kind::Enum) => {
                Err(GenError::Unsupported(format!(
                    "`{owner}' uses a non-orderable dictionary key `{name}'"
                )))
            },
            _ => Ok(()),
        }
    }
}
