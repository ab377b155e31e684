// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Ordered traversal over a unit with per-node enter/leave hooks.
//!
//! A `false` return from a `*_start` hook prunes the subtree: neither the
//! children nor the matching `*_end` hook run. Nodes are visited in
//! declaration order; hooks receive the node together with its absolute
//! scoped name.

use crate::slice::ast::{
    ClassDef, DataMember, Definition, DictionaryDef, EnumDef, ExceptionDef, Module,
    Operation, SequenceDef, StructDef, Unit,
};

#[allow(unused_variables)]
pub trait Visitor {
    fn visit_unit_start(&mut self, unit: &Unit) -> bool {
        true
    }
    fn visit_unit_end(&mut self, unit: &Unit) {}

    fn visit_module_start(&mut self, module: &Module, scoped: &str) -> bool {
        true
    }
    fn visit_module_end(&mut self, module: &Module, scoped: &str) {}

    fn visit_class_start(&mut self, class: &ClassDef, scoped: &str) -> bool {
        true
    }
    fn visit_class_end(&mut self, class: &ClassDef, scoped: &str) {}

    fn visit_exception_start(&mut self, exception: &ExceptionDef, scoped: &str) -> bool {
        true
    }
    fn visit_exception_end(&mut self, exception: &ExceptionDef, scoped: &str) {}

    fn visit_struct_start(&mut self, strukt: &StructDef, scoped: &str) -> bool {
        true
    }
    fn visit_struct_end(&mut self, strukt: &StructDef, scoped: &str) {}

    fn visit_operation(&mut self, operation: &Operation, class_scoped: &str) {}
    fn visit_data_member(&mut self, member: &DataMember, owner_scoped: &str) {}

    fn visit_sequence(&mut self, sequence: &SequenceDef, scoped: &str) {}
    fn visit_dictionary(&mut self, dictionary: &DictionaryDef, scoped: &str) {}
    fn visit_enum(&mut self, enumeration: &EnumDef, scoped: &str) {}
}

pub fn walk_unit(unit: &Unit, visitor: &mut dyn Visitor) {
    if !visitor.visit_unit_start(unit) {
        return;
    }
    for module in &unit.modules {
        walk_module(module, "", visitor);
    }
    visitor.visit_unit_end(unit);
}

pub fn walk_module(module: &Module, parent_scope: &str, visitor: &mut dyn Visitor) {
    let scoped = format!("{parent_scope}::{}", module.name);
    if !visitor.visit_module_start(module, &scoped) {
        return;
    }
    for def in &module.contents {
        walk_definition(def, &scoped, visitor);
    }
    visitor.visit_module_end(module, &scoped);
}

pub fn walk_definition(def: &Definition, scope: &str, visitor: &mut dyn Visitor) {
    match def {
        Definition::Module(m) => walk_module(m, scope, visitor),
        Definition::Struct(s) => {
            let scoped = format!("{scope}::{}", s.name);
            if visitor.visit_struct_start(s, &scoped) {
                for member in &s.members {
                    visitor.visit_data_member(member, &scoped);
                }
                visitor.visit_struct_end(s, &scoped);
            }
        },
        Definition::Enum(e) => {
            visitor.visit_enum(e, &format!("{scope}::{}", e.name));
        },
        Definition::Sequence(s) => {
            visitor.visit_sequence(s, &format!("{scope}::{}", s.name));
        },
        Definition::Dictionary(d) => {
            visitor.visit_dictionary(d, &format!("{scope}::{}", d.name));
        },
        Definition::Exception(e) => {
            let scoped = format!("{scope}::{}", e.name);
            if visitor.visit_exception_start(e, &scoped) {
                for member in &e.members {
                    visitor.visit_data_member(member, &scoped);
                }
                visitor.visit_exception_end(e, &scoped);
            }
        },
        Definition::Class(c) => {
            let scoped = format!("{scope}::{}", c.name);
            if visitor.visit_class_start(c, &scoped) {
                for member in &c.members {
                    visitor.visit_data_member(member, &scoped);
                }
                for op in &c.operations {
                    visitor.visit_operation(op, &scoped);
                }
                visitor.visit_class_end(c, &scoped);
            }
        },
    }
}
