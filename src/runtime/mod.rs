//! The runtime core: references and proxies, the client-side invocation
//! engine, and the server-side dispatch engine.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Identity+facet servant registry and the blocking accept loop.
pub mod adapter;
/// Per-invocation descriptor passed to servants.
pub mod current;
/// Incoming-request state machine.
pub mod dispatch;
/// Error taxonomy: protocol, transport, user, unknown.
pub mod errors;
/// Object identities.
pub mod identity;
/// Outgoing-request state machine.
pub mod invocation;
/// Servant contract.
pub mod object;
/// Proxy handles and cast operations.
pub mod proxy;
/// References: identity, facet, capability set, dispatch mode.
pub mod reference;
