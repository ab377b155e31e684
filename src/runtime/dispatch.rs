// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server-side incoming-request state machine.
//!
//! The adapter hands a parsed frame here; the engine resolves the servant,
//! routes through its dispatch table, and marshals the reply. Nothing but a
//! declared user exception, `UnknownUserException`, `UnknownLocalException`
//! or `UnknownException` may escape the dispatch boundary.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    runtime::{
        adapter::ObjectAdapter,
        current::Current,
        errors::{Error, LocalError},
        identity::Identity,
        object::{DispatchStatus, Object},
    },
    wire::{
        header::{FrameHeader, MessageType, ReplyStatus},
        stream::BasicStream,
    },
};

/// Per-call state handed to dispatch stubs: the request stream positioned
/// at the in-parameters, the reply payload stream, and the `Current`
/// descriptor.
#[derive(Debug)]
pub struct Incoming {
    current: Current,
    cfg: Config,
    is: BasicStream,
    os: BasicStream,
}

impl Incoming {
    pub fn new(current: Current, cfg: Config, is: BasicStream) -> Self {
        Self {
            current,
            cfg,
            is,
            os: BasicStream::new(),
        }
    }

    #[inline]
    pub fn current(&self) -> &Current {
        &self.current
    }

    /// Runtime configuration, needed when unmarshalling proxy parameters.
    #[inline]
    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    #[inline]
    pub fn is(&mut self) -> &mut BasicStream {
        &mut self.is
    }

    /// Splits the request stream from the configuration so dispatch stubs
    /// can unmarshal proxy-bearing parameters without double-borrowing.
    #[inline]
    pub fn for_read(&mut self) -> (&mut BasicStream, &Config) {
        (&mut self.is, &self.cfg)
    }

    #[inline]
    pub fn os(&mut self) -> &mut BasicStream {
        &mut self.os
    }

    fn into_payload(self) -> Vec<u8> {
        self.os.into_vec()
    }
}

/// Handles one request frame end to end. Returns the marshalled reply, or
/// `None` for one-way requests (request id zero).
pub fn dispatch_request(
    adapter: &ObjectAdapter,
    mut is: BasicStream,
) -> Option<Vec<u8>> {
    let (request_id, current) = match parse_request(&mut is) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "dropping unparsable request frame");
            return None;
        },
    };
    let oneway = request_id == 0;
    debug!(
        request_id,
        identity = %current.identity,
        operation = %current.operation,
        "dispatching"
    );

    let servant = match resolve_servant(adapter, &current) {
        Ok(servant) => servant,
        Err(e) => {
            return finish(request_id, oneway, Err(e), &current);
        },
    };

    let outcome = (|| {
        is.start_read_encaps().map_err(LocalError::from)?;
        let mut incoming = Incoming::new(current.clone(), adapter.cfg().clone(), is);
        let status = catch_unwind(AssertUnwindSafe(|| {
            servant.dispatch(&mut incoming)
        }));
        match status {
            Ok(Ok(DispatchStatus::Ok)) => {
                Ok((ReplyStatus::Ok, incoming.into_payload()))
            },
            Ok(Ok(DispatchStatus::UserException)) => {
                Ok((ReplyStatus::UserException, incoming.into_payload()))
            },
            Ok(Ok(DispatchStatus::OperationNotExist)) => {
                Err(LocalError::OperationNotExist {
                    id: current.identity.to_string(),
                    facet: current.facet.clone(),
                    operation: current.operation.clone(),
                })
            },
            Ok(Err(e)) => Err(e),
            Err(panic) => Err(LocalError::UnknownException(panic_message(panic))),
        }
    })();

    finish(request_id, oneway, outcome, &current)
}

/// Projects the dispatch outcome onto the reply statuses of the protocol.
fn finish(
    request_id: i32,
    oneway: bool,
    outcome: Result<(ReplyStatus, Vec<u8>), LocalError>,
    current: &Current,
) -> Option<Vec<u8>> {
    if oneway {
        if let Err(e) = &outcome {
            debug!(error = %e, operation = %current.operation, "one-way dispatch failed");
        }
        return None;
    }

    Some(match outcome {
        Ok((status, payload)) => marshal_reply(request_id, status, |os| {
            os.write_int(payload.len() as i32);
            os.write_blob(&payload);
        }),
        Err(e) => marshal_reply_error(request_id, e),
    })
}

fn resolve_servant(
    adapter: &ObjectAdapter,
    current: &Current,
) -> Result<Arc<dyn Object>, LocalError> {
    match adapter.find_facet(&current.identity, &current.facet) {
        Some(servant) => Ok(servant),
        None if adapter.identity_exists(&current.identity) => {
            Err(LocalError::FacetNotExist {
                id: current.identity.to_string(),
                facet: current.facet.clone(),
                operation: current.operation.clone(),
            })
        },
        None => Err(LocalError::ObjectNotExist {
            id: current.identity.to_string(),
            facet: current.facet.clone(),
            operation: current.operation.clone(),
        }),
    }
}

fn parse_request(is: &mut BasicStream) -> Result<(i32, Current), LocalError> {
    let request_id = is.read_int().map_err(LocalError::from)?;
    let category = is.read_string().map_err(LocalError::from)?;
    let name = is.read_string().map_err(LocalError::from)?;
    let facet = is.read_string().map_err(LocalError::from)?;
    let operation = is.read_string().map_err(LocalError::from)?;
    let idempotent = is.read_bool().map_err(LocalError::from)?;
    let send_proxy = is.read_bool().map_err(LocalError::from)?;
    let proxy = if send_proxy {
        Some(is.read_string().map_err(LocalError::from)?)
    } else {
        None
    };
    let context = is.read_string_map().map_err(LocalError::from)?;

    let mut current = Current::new(
        Identity { category, name },
        facet,
        operation,
        idempotent,
        context,
    );
    current.proxy = proxy;
    Ok((request_id, current))
}

/// Assembles a complete reply message: header, request id, status byte,
/// then the status-specific body.
pub fn marshal_reply(
    request_id: i32,
    status: ReplyStatus,
    write_body: impl FnOnce(&mut BasicStream),
) -> Vec<u8> {
    let mut os = BasicStream::new();
    os.write_blob(&FrameHeader::new(MessageType::Reply, 0).to_bytes());
    os.write_int(request_id);
    os.write_byte(status as u8);
    write_body(&mut os);
    let size = os.len() as i32;
    os.patch_int(8, size);
    os.into_vec()
}

fn marshal_reply_error(request_id: i32, e: LocalError) -> Vec<u8> {
    match e {
        LocalError::ObjectNotExist {
            id,
            facet,
            operation,
        } => marshal_not_exist(request_id, ReplyStatus::ObjectNotExist, &id, &facet, &operation),
        LocalError::FacetNotExist {
            id,
            facet,
            operation,
        } => marshal_not_exist(request_id, ReplyStatus::FacetNotExist, &id, &facet, &operation),
        LocalError::OperationNotExist {
            id,
            facet,
            operation,
        } => marshal_not_exist(
            request_id,
            ReplyStatus::OperationNotExist,
            &id,
            &facet,
            &operation,
        ),
        LocalError::UnknownUserException(reason) => {
            marshal_reply(request_id, ReplyStatus::UnknownUserException, |os| {
                os.write_string(&reason);
            })
        },
        LocalError::UnknownException(reason) => {
            marshal_reply(request_id, ReplyStatus::UnknownException, |os| {
                os.write_string(&reason);
            })
        },
        other => marshal_reply(request_id, ReplyStatus::UnknownLocalException, |os| {
            os.write_string(&other.to_string());
        }),
    }
}

fn marshal_not_exist(
    request_id: i32,
    status: ReplyStatus,
    id: &str,
    facet: &str,
    operation: &str,
) -> Vec<u8> {
    marshal_reply(request_id, status, |os| {
        os.write_string(id);
        os.write_string(facet);
        os.write_string(operation);
    })
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "servant panicked".to_string()
    }
}

// ── collocated dispatch ─────────────────────────────────────────────────

/// Resolves the servant for a collocated invocation, with the same miss
/// semantics as the remote engine.
pub struct Direct {
    servant: Arc<dyn Object>,
}

impl Direct {
    pub fn new(adapter: &ObjectAdapter, current: &Current) -> Result<Self, LocalError> {
        resolve_servant(adapter, current).map(|servant| Self { servant })
    }

    #[inline]
    pub fn facet_servant(&self) -> &Arc<dyn Object> {
        &self.servant
    }
}

/// Runs a collocated servant call inside the dispatch boundary: declared
/// user exceptions pass through, everything else is projected onto the
/// three unknown kinds. `ProxyRequested` is control flow and passes
/// untouched.
pub fn guard_direct<T>(
    throws: &[&str],
    f: impl FnOnce() -> Result<T, Error>,
) -> Result<T, Error> {
    debug_assert!(throws.windows(2).all(|w| w[0] < w[1]));
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(Error::User(ex))) => {
            if throws.binary_search(&ex.ice_name()).is_ok() {
                Err(Error::User(ex))
            } else {
                Err(Error::Local(LocalError::UnknownUserException(
                    ex.ice_name().to_string(),
                )))
            }
        },
        Ok(Err(Error::Local(e @ LocalError::ProxyRequested))) => Err(Error::Local(e)),
        Ok(Err(Error::Local(e))) => Err(Error::Local(
            LocalError::UnknownLocalException(e.to_string()),
        )),
        Err(panic) => Err(Error::Local(LocalError::UnknownException(panic_message(
            panic,
        )))),
    }
}
