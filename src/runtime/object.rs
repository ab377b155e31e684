// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::any::Any;

use crate::runtime::{dispatch::Incoming, errors::LocalError};

/// What a dispatch stub reports back to the engine. The unknown-projection
/// statuses are produced by the engine itself, never by stubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Ok,
    UserException,
    OperationNotExist,
}

/// Contract of every servant. Generated `<Name>Server` wrappers implement
/// this on top of a user-supplied trait object; the two universal
/// operations are answered from the id table without touching user code.
pub trait Object: Send + Sync {
    /// Scoped interface identifiers, strictly ascending. Every identifier
    /// of every transitive base is present.
    fn ice_ids(&self) -> &'static [&'static str];

    /// Transitive base-class identifiers for type-identity queries, most
    /// derived first.
    fn ice_class_ids(&self) -> &'static [&'static str];

    /// Routes one incoming request through the sorted dispatch table.
    fn dispatch(&self, incoming: &mut Incoming) -> Result<DispatchStatus, LocalError>;

    fn as_any(&self) -> &dyn Any;

    /// Set-membership test over the interface lattice.
    fn ice_is_a(&self, id: &str) -> bool {
        self.ice_ids().binary_search(&id).is_ok()
    }
}

/// Stub behind the universal `ice_isA` operation.
pub fn dispatch_ice_is_a(
    servant: &dyn Object,
    incoming: &mut Incoming,
) -> Result<DispatchStatus, LocalError> {
    let id = incoming.is().read_string().map_err(LocalError::from)?;
    let known = servant.ice_is_a(&id);
    incoming.os().write_bool(known);
    Ok(DispatchStatus::Ok)
}

/// Stub behind the universal `ice_ping` operation.
pub fn dispatch_ice_ping(
    _servant: &dyn Object,
    _incoming: &mut Incoming,
) -> Result<DispatchStatus, LocalError> {
    Ok(DispatchStatus::Ok)
}

const _: () = {
    // Object must stay object-safe: the adapter registry stores it behind
    // `Arc<dyn Object>`.
    fn _assert(_: &dyn Object) {}
};
