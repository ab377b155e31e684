// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::BTreeMap;

use crate::runtime::identity::Identity;

/// Per-request key/value metadata, marshalled in iteration order.
pub type Context = BTreeMap<String, String>;

/// The per-invocation descriptor handed to servants: which object, which
/// facet, which operation, whether the runtime may retry it, and the
/// caller's context.
#[derive(Debug, Clone, Default)]
pub struct Current {
    pub identity: Identity,
    pub facet: String,
    pub operation: String,
    pub idempotent: bool,
    pub context: Context,
    /// Stringified caller reference, present once the peer asked for it.
    pub proxy: Option<String>,
}

impl Current {
    pub fn new(
        identity: Identity,
        facet: impl Into<String>,
        operation: impl Into<String>,
        idempotent: bool,
        context: Context,
    ) -> Self {
        Self {
            identity,
            facet: facet.into(),
            operation: operation.into(),
            idempotent,
            context,
            proxy: None,
        }
    }
}
