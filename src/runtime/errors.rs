// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Error taxonomy of the runtime core.
//!
//! Four kinds, not four types: protocol errors (malformed frames, never
//! retried), transport errors (connect failure, reset, timeout, retried by
//! the invocation engine when the operation allows it), user exceptions
//! (declared in the IDL, decoded to the precise type), and the "unknown"
//! projections produced at the dispatch boundary.

use std::any::Any;

use thiserror::Error;

use crate::wire::stream::{BasicStream, ProtocolError};

/// Universal root identifier closing every user-exception id list.
pub const USER_EXCEPTION_ID: &str = "::Ice::UserException";
/// Universal root identifier present in every interface id list.
pub const OBJECT_ID: &str = "::Ice::Object";

/// Local (non-user) runtime failure.
#[derive(Debug, Error)]
pub enum LocalError {
    #[error(transparent)]
    Protocol(ProtocolError),

    #[error("transport broken: {0}")]
    TransportBroken(String),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("invocation timed out")]
    TimedOut,

    /// The wrapped failure happened after the request frame had begun to
    /// leave the host; transparent retry would risk a duplicate execution.
    #[error("{0}")]
    NonRepeatable(Box<LocalError>),

    #[error("object does not exist: `{id}' facet `{facet}' operation `{operation}'")]
    ObjectNotExist {
        id: String,
        facet: String,
        operation: String,
    },

    #[error("facet does not exist: `{id}' facet `{facet}' operation `{operation}'")]
    FacetNotExist {
        id: String,
        facet: String,
        operation: String,
    },

    #[error("operation does not exist: `{id}' facet `{facet}' operation `{operation}'")]
    OperationNotExist {
        id: String,
        facet: String,
        operation: String,
    },

    #[error("unknown local exception: {0}")]
    UnknownLocalException(String),

    #[error("unknown user exception: {0}")]
    UnknownUserException(String),

    #[error("unknown exception: {0}")]
    UnknownException(String),

    /// Reply redirecting the caller to a new reference; consumed inside the
    /// invocation loop, never surfaced to user code.
    #[error("location forward to `{0}'")]
    LocationForward(String),

    /// The peer needs the full stringified reference on the next attempt.
    #[error("proxy requested by peer")]
    ProxyRequested,

    #[error("null proxy invoked")]
    NullProxy,
}

impl From<ProtocolError> for LocalError {
    fn from(e: ProtocolError) -> Self {
        match e {
            // A miss in the declared-exception table surfaces with the same
            // kind the dispatch boundary uses for undeclared raises.
            ProtocolError::UnknownUserException(id) => {
                LocalError::UnknownUserException(id)
            },
            other => LocalError::Protocol(other),
        }
    }
}

impl LocalError {
    /// Peels the non-repeatable marker off, leaving the underlying cause.
    pub fn into_cause(self) -> LocalError {
        match self {
            LocalError::NonRepeatable(inner) => *inner,
            other => other,
        }
    }

    /// True for failures the invocation engine may retry when the operation
    /// is idempotent. Protocol errors and identity mismatches never retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LocalError::TransportBroken(_)
                | LocalError::ConnectFailed(_)
                | LocalError::ConnectionLost(_)
                | LocalError::TimedOut
        )
    }
}

/// Base contract of every generated user exception.
pub trait UserException: std::fmt::Debug + Send + Sync {
    /// Scoped identifier, e.g. `::Warehouse::OutOfStock`.
    fn ice_name(&self) -> &'static str;

    /// Own id, transitive base ids, closed by [`USER_EXCEPTION_ID`].
    fn ice_exception_ids(&self) -> &'static [&'static str];

    /// Marshals the fields, base-first.
    fn ice_write(&self, os: &mut BasicStream);

    /// Unmarshals the fields, base-first.
    fn ice_read(&mut self, is: &mut BasicStream) -> Result<(), ProtocolError>;

    fn ice_clone(&self) -> Box<dyn UserException>;

    fn as_any(&self) -> &dyn Any;
}

/// What an invocation surfaces to user code.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Local(#[from] LocalError),

    #[error("user exception `{}'", .0.ice_name())]
    User(Box<dyn UserException>),
}

impl Error {
    pub fn user(ex: impl UserException + 'static) -> Self {
        Error::User(Box::new(ex))
    }

    /// Borrows the carried user exception as the concrete generated type.
    pub fn downcast_user<T: UserException + 'static>(&self) -> Option<&T> {
        match self {
            Error::User(ex) => ex.as_any().downcast_ref::<T>(),
            Error::Local(_) => None,
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Local(LocalError::from(e))
    }
}
