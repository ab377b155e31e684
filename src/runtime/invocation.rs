// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Client-side outgoing-request state machine.
//!
//! One `Outgoing` per call attempt: it marshals the request frame, submits
//! it through the reference's emitter, and decodes the reply status. Retry
//! policy lives with the proxy (`handle_exception`, `location_forward`);
//! the generated delegate drives the loop.

use std::sync::Arc;

use crate::{
    runtime::{current::Context, errors::LocalError, proxy::ObjectPrx},
    transport::emitter::Emitter,
    wire::{
        header::{FrameHeader, MessageType, ReplyStatus},
        stream::{BasicStream, ProtocolError},
    },
};

/// How the peer answered a two-way invocation that reached a servant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The reply stream is positioned at the out-parameter encapsulation.
    Success,
    /// The reply stream is positioned at the user-exception payload.
    UserException,
}

/// Per-attempt request state.
pub struct Outgoing {
    emitter: Arc<Emitter>,
    os: BasicStream,
    is: Option<BasicStream>,
}

impl Outgoing {
    /// Builds the request frame up to and including the opened in-parameter
    /// encapsulation. Marshal the in-parameters into [`Outgoing::os`], then
    /// call [`Outgoing::invoke`].
    pub fn new(
        prx: &ObjectPrx,
        send_proxy: bool,
        operation: &str,
        idempotent: bool,
        context: &Context,
    ) -> Result<Self, LocalError> {
        let reference = prx.reference();
        let emitter = reference.emitter()?;

        let mut os = BasicStream::new();
        os.write_blob(&FrameHeader::new(MessageType::Request, 0).to_bytes());
        os.write_int(0); // request id, assigned by the emitter
        os.write_string(&reference.identity.category);
        os.write_string(&reference.identity.name);
        os.write_string(&reference.facet);
        os.write_string(operation);
        os.write_byte(idempotent as u8);
        os.write_byte(send_proxy as u8);
        if send_proxy {
            os.write_string(&reference.to_proxy_string());
        }
        os.write_string_map(context);
        os.start_encaps();

        Ok(Self {
            emitter,
            os,
            is: None,
        })
    }

    /// The request stream, positioned inside the in-parameter
    /// encapsulation.
    #[inline]
    pub fn os(&mut self) -> &mut BasicStream {
        &mut self.os
    }

    /// The reply stream; valid once `invoke` returned an outcome.
    #[inline]
    pub fn is(&mut self) -> &mut BasicStream {
        self.is.as_mut().expect("invoke has not produced a reply")
    }

    fn seal(&mut self) -> Vec<u8> {
        self.os.end_encaps();
        let size = self.os.len() as i32;
        self.os.patch_int(8, size);
        std::mem::take(&mut self.os).into_vec()
    }

    /// Submits the request and decodes the reply status byte.
    ///
    /// Redirections and failures come back as `LocalError`; the two
    /// servant-level outcomes leave the reply stream open for the caller to
    /// unmarshal out-parameters or the user-exception payload.
    pub fn invoke(&mut self) -> Result<ReplyOutcome, LocalError> {
        let mut message = self.seal();
        let mut is = self
            .emitter
            .invoke(&mut message, false)?
            .expect("two-way invocation always yields a reply");

        let raw = is.read_byte().map_err(LocalError::from)?;
        let status = ReplyStatus::from_u8(raw)
            .ok_or(ProtocolError::UnknownReplyStatus(raw))
            .map_err(LocalError::from)?;

        match status {
            ReplyStatus::Ok => {
                is.start_read_encaps().map_err(LocalError::from)?;
                self.is = Some(is);
                Ok(ReplyOutcome::Success)
            },
            ReplyStatus::UserException => {
                is.start_read_encaps().map_err(LocalError::from)?;
                self.is = Some(is);
                Ok(ReplyOutcome::UserException)
            },
            ReplyStatus::ObjectNotExist
            | ReplyStatus::FacetNotExist
            | ReplyStatus::OperationNotExist => {
                let id = is.read_string().map_err(LocalError::from)?;
                let facet = is.read_string().map_err(LocalError::from)?;
                let operation = is.read_string().map_err(LocalError::from)?;
                Err(match status {
                    ReplyStatus::ObjectNotExist => LocalError::ObjectNotExist {
                        id,
                        facet,
                        operation,
                    },
                    ReplyStatus::FacetNotExist => LocalError::FacetNotExist {
                        id,
                        facet,
                        operation,
                    },
                    _ => LocalError::OperationNotExist {
                        id,
                        facet,
                        operation,
                    },
                })
            },
            ReplyStatus::UnknownLocalException => {
                let reason = is.read_string().map_err(LocalError::from)?;
                Err(LocalError::UnknownLocalException(reason))
            },
            ReplyStatus::UnknownUserException => {
                let reason = is.read_string().map_err(LocalError::from)?;
                Err(LocalError::UnknownUserException(reason))
            },
            ReplyStatus::UnknownException => {
                let reason = is.read_string().map_err(LocalError::from)?;
                Err(LocalError::UnknownException(reason))
            },
            ReplyStatus::LocationForward => {
                let proxy = is.read_string().map_err(LocalError::from)?;
                Err(LocalError::LocationForward(proxy))
            },
        }
    }

    /// Submits without waiting for a reply; the request id stays zero.
    pub fn invoke_oneway(mut self) -> Result<(), LocalError> {
        let mut message = self.seal();
        self.emitter.invoke(&mut message, true)?;
        Ok(())
    }
}
