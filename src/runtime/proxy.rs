// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Proxy handles.
//!
//! `ObjectPrx` is the untyped base every generated proxy wraps. It owns the
//! retry policy consumed by generated delegates (`handle_exception`,
//! `location_forward`, `rethrow_exception`) and the two universal
//! invocations, written here in exactly the shape the generator emits for
//! user operations.

use std::{fmt, sync::Arc, thread, time::Duration};

use rand::RngExt;
use tracing::debug;

use crate::{
    cfg::config::Config,
    runtime::{
        current::{Context, Current},
        dispatch::Direct,
        errors::{Error, LocalError},
        identity::Identity,
        invocation::{Outgoing, ReplyOutcome},
        object::Object,
        reference::Reference,
    },
};

/// Handle to a possibly-remote object. Cheap to clone; clones share the
/// reference and therefore the connection.
#[derive(Clone)]
pub struct ObjectPrx {
    r: Arc<Reference>,
}

impl fmt::Debug for ObjectPrx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectPrx").field(&self.r).finish()
    }
}

impl fmt::Display for ObjectPrx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.r.to_proxy_string())
    }
}

impl ObjectPrx {
    pub fn new(reference: Arc<Reference>) -> Self {
        Self { r: reference }
    }

    /// Parses a stringified reference; the empty string yields `None`.
    pub fn from_string(s: &str, cfg: &Config) -> Result<Option<Self>, LocalError> {
        Ok(Reference::parse_proxy(s, cfg)?.map(Self::new))
    }

    #[inline]
    pub fn reference(&self) -> &Arc<Reference> {
        &self.r
    }

    #[inline]
    pub fn ice_get_identity(&self) -> &Identity {
        &self.r.identity
    }

    #[inline]
    pub fn ice_get_facet(&self) -> &str {
        &self.r.facet
    }

    /// Another facet of the same identity over the same connection.
    pub fn ice_new_facet(&self, facet: &str) -> Self {
        Self::new(self.r.with_facet(facet))
    }

    // ── universal invocations ───────────────────────────────────────────

    /// Remote (or collocated) type-identity query.
    pub fn ice_is_a(&self, type_id: &str, context: &Context) -> Result<bool, Error> {
        let mut attempts = 0u32;
        let mut send_proxy = false;
        loop {
            if let Some(adapter) = self.r.adapter() {
                let current = Current::new(
                    self.r.identity.clone(),
                    self.r.facet.clone(),
                    "ice_isA",
                    true,
                    context.clone(),
                );
                let direct = Direct::new(&adapter, &current).map_err(Error::Local)?;
                return Ok(direct.facet_servant().ice_is_a(type_id));
            }

            let attempt = (|| -> Result<bool, LocalError> {
                let mut out = Outgoing::new(self, send_proxy, "ice_isA", true, context)?;
                out.os().write_string(type_id);
                match out.invoke()? {
                    ReplyOutcome::Success => {
                        Ok(out.is().read_bool().map_err(LocalError::from)?)
                    },
                    ReplyOutcome::UserException => {
                        let id = out.is().read_string().map_err(LocalError::from)?;
                        Err(LocalError::UnknownUserException(id))
                    },
                }
            })();

            match attempt {
                Ok(v) => return Ok(v),
                Err(LocalError::LocationForward(target)) => {
                    self.location_forward(&target)?;
                },
                Err(LocalError::ProxyRequested) => send_proxy = true,
                Err(LocalError::NonRepeatable(inner)) => {
                    self.handle_exception(*inner, &mut attempts)?;
                },
                Err(e) => self.handle_exception(e, &mut attempts)?,
            }
        }
    }

    /// Liveness probe; dispatches like any other idempotent operation.
    pub fn ice_ping(&self, context: &Context) -> Result<(), Error> {
        let mut attempts = 0u32;
        let mut send_proxy = false;
        loop {
            if let Some(adapter) = self.r.adapter() {
                let current = Current::new(
                    self.r.identity.clone(),
                    self.r.facet.clone(),
                    "ice_ping",
                    true,
                    context.clone(),
                );
                Direct::new(&adapter, &current).map_err(Error::Local)?;
                return Ok(());
            }

            let attempt = (|| -> Result<(), LocalError> {
                let mut out = Outgoing::new(self, send_proxy, "ice_ping", true, context)?;
                match out.invoke()? {
                    ReplyOutcome::Success => Ok(()),
                    ReplyOutcome::UserException => {
                        let id = out.is().read_string().map_err(LocalError::from)?;
                        Err(LocalError::UnknownUserException(id))
                    },
                }
            })();

            match attempt {
                Ok(()) => return Ok(()),
                Err(LocalError::LocationForward(target)) => {
                    self.location_forward(&target)?;
                },
                Err(LocalError::ProxyRequested) => send_proxy = true,
                Err(LocalError::NonRepeatable(inner)) => {
                    self.handle_exception(*inner, &mut attempts)?;
                },
                Err(e) => self.handle_exception(e, &mut attempts)?,
            }
        }
    }

    // ── retry policy (consumed by generated delegates) ──────────────────

    /// Books one failed attempt. Returns `Ok(())` when the caller should
    /// retry (after the back-off sleep) and the final error otherwise.
    pub fn handle_exception(
        &self,
        ex: LocalError,
        attempts: &mut u32,
    ) -> Result<(), Error> {
        if !ex.is_retryable() {
            return Err(Error::Local(ex));
        }

        *attempts += 1;
        let cfg = self.r.cfg();
        if *attempts > cfg.runtime.max_retries {
            debug!(attempts = *attempts, error = %ex, "retry ceiling reached");
            return Err(Error::Local(ex));
        }

        // The connection is suspect; redial on the next attempt.
        self.r.drop_connection();

        let shift = (*attempts - 1).min(6);
        let mut delay = cfg.runtime.retry_backoff.saturating_mul(1 << shift);
        let jitter = rand::rng().random_range(0..=(delay.as_millis() as u64 / 4).max(1));
        delay += Duration::from_millis(jitter);
        debug!(attempt = *attempts, ?delay, error = %ex, "retrying invocation");
        thread::sleep(delay);
        Ok(())
    }

    /// Re-targets the reference; does not consume a retry attempt.
    pub fn location_forward(&self, target: &str) -> Result<(), Error> {
        let forwarded = Reference::parse_proxy(target, self.r.cfg())
            .map_err(Error::Local)?
            .ok_or_else(|| {
                Error::Local(LocalError::TransportBroken(
                    "null location-forward target".into(),
                ))
            })?;
        let endpoint = forwarded.endpoint().ok_or_else(|| {
            Error::Local(LocalError::TransportBroken(
                "location-forward target has no endpoint".into(),
            ))
        })?;
        debug!(forward_to = %target, "location forward");
        self.r.retarget(endpoint);
        Ok(())
    }

    /// Surfaces a non-repeatable failure as its underlying cause.
    pub fn rethrow_exception(ex: LocalError) -> Error {
        Error::Local(ex.into_cause())
    }
}

// ── cast operations (wrapped per type by generated code) ────────────────

/// `checkedCast`: wrap locally when the capability set already covers the
/// target type, otherwise probe the peer with `ice_isA`. A
/// `FacetNotExist` raised while probing a *different* facet dissolves into
/// a null result.
pub fn checked_cast(
    base: &ObjectPrx,
    facet: &str,
    type_id: &'static str,
    type_ids: &'static [&'static str],
) -> Result<Option<ObjectPrx>, Error> {
    if facet == base.ice_get_facet() {
        if base.reference().has_capability(type_id) {
            return Ok(Some(base.clone()));
        }
        if base.ice_is_a(type_id, &Context::new())? {
            base.reference().stamp_capabilities(type_ids);
            return Ok(Some(base.clone()));
        }
        Ok(None)
    } else {
        let facet_prx = base.ice_new_facet(facet);
        match facet_prx.ice_is_a(type_id, &Context::new()) {
            Ok(true) => {
                facet_prx.reference().stamp_capabilities(type_ids);
                Ok(Some(facet_prx))
            },
            Ok(false) => Ok(None),
            Err(Error::Local(LocalError::FacetNotExist { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// `uncheckedCast`: as `checked_cast` but without the probe; for callers
/// that know the target type.
pub fn unchecked_cast(
    base: &ObjectPrx,
    facet: &str,
    type_ids: &'static [&'static str],
) -> ObjectPrx {
    let prx = if facet == base.ice_get_facet() {
        base.clone()
    } else {
        base.ice_new_facet(facet)
    };
    prx.reference().stamp_capabilities(type_ids);
    prx
}
