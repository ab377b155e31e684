// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A reference is everything a proxy knows about its target: the identity,
//! the facet key, the capability set stamped by cast operations, and the
//! dispatch mode (a connection emitter for remote targets, the adapter for
//! collocated ones).
//!
//! A facet is a lookup key applied to the same underlying connection
//! reference: facet navigation shares the emitter instead of owning a
//! second connection, which is what keeps proxy graphs acyclic.

use std::{
    fmt,
    sync::{Arc, RwLock},
};

use crate::{
    cfg::config::Config,
    runtime::{adapter::ObjectAdapter, errors::LocalError, identity::Identity},
    transport::emitter::{Emitter, Endpoint},
};

pub(crate) enum RefMode {
    Remote {
        endpoint: Endpoint,
        /// Connection cache; dropped on retry so the next attempt redials.
        emitter: Option<Arc<Emitter>>,
    },
    Collocated { adapter: Arc<ObjectAdapter> },
}

/// Shared target descriptor behind every proxy handle.
pub struct Reference {
    cfg: Config,
    pub identity: Identity,
    pub facet: String,
    /// Sorted scoped interface ids this target is known to support.
    capabilities: RwLock<Vec<String>>,
    mode: RwLock<RefMode>,
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match *self.mode.read().expect("reference poisoned") {
            RefMode::Remote { ref endpoint, .. } => format!("remote({endpoint})"),
            RefMode::Collocated { .. } => "collocated".to_string(),
        };
        f.debug_struct("Reference")
            .field("identity", &self.identity.to_string())
            .field("facet", &self.facet)
            .field("mode", &mode)
            .finish()
    }
}

impl Reference {
    pub fn remote(
        identity: Identity,
        facet: impl Into<String>,
        endpoint: Endpoint,
        cfg: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            identity,
            facet: facet.into(),
            capabilities: RwLock::new(Vec::new()),
            mode: RwLock::new(RefMode::Remote {
                endpoint,
                emitter: None,
            }),
        })
    }

    pub fn collocated(
        identity: Identity,
        facet: impl Into<String>,
        adapter: Arc<ObjectAdapter>,
        cfg: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            identity,
            facet: facet.into(),
            capabilities: RwLock::new(Vec::new()),
            mode: RwLock::new(RefMode::Collocated { adapter }),
        })
    }

    /// New reference to another facet of the same target, sharing the
    /// connection (or adapter). The capability set does not transfer: a
    /// facet is an independent view with its own type.
    pub fn with_facet(&self, facet: &str) -> Arc<Self> {
        let mode = match *self.mode.read().expect("reference poisoned") {
            RefMode::Remote {
                ref endpoint,
                ref emitter,
            } => RefMode::Remote {
                endpoint: endpoint.clone(),
                emitter: emitter.clone(),
            },
            RefMode::Collocated { ref adapter } => RefMode::Collocated {
                adapter: Arc::clone(adapter),
            },
        };
        Arc::new(Self {
            cfg: self.cfg.clone(),
            identity: self.identity.clone(),
            facet: facet.to_string(),
            capabilities: RwLock::new(Vec::new()),
            mode: RwLock::new(mode),
        })
    }

    #[inline]
    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn has_capability(&self, id: &str) -> bool {
        self.capabilities
            .read()
            .expect("reference poisoned")
            .binary_search_by(|c| c.as_str().cmp(id))
            .is_ok()
    }

    /// Records the interface lattice of a successful cast.
    pub fn stamp_capabilities(&self, ids: &[&str]) {
        let mut caps = self.capabilities.write().expect("reference poisoned");
        for id in ids {
            if let Err(pos) = caps.binary_search_by(|c| c.as_str().cmp(id)) {
                caps.insert(pos, (*id).to_string());
            }
        }
    }

    pub fn is_collocated(&self) -> bool {
        matches!(
            *self.mode.read().expect("reference poisoned"),
            RefMode::Collocated { .. }
        )
    }

    pub fn adapter(&self) -> Option<Arc<ObjectAdapter>> {
        match *self.mode.read().expect("reference poisoned") {
            RefMode::Collocated { ref adapter } => Some(Arc::clone(adapter)),
            RefMode::Remote { .. } => None,
        }
    }

    /// The connection for this reference, dialing on first use.
    pub fn emitter(&self) -> Result<Arc<Emitter>, LocalError> {
        {
            let mode = self.mode.read().expect("reference poisoned");
            match *mode {
                RefMode::Remote {
                    emitter: Some(ref em),
                    ..
                } => return Ok(Arc::clone(em)),
                RefMode::Remote { .. } => {},
                RefMode::Collocated { .. } => {
                    return Err(LocalError::TransportBroken(
                        "collocated reference has no connection".into(),
                    ));
                },
            }
        }

        let mut mode = self.mode.write().expect("reference poisoned");
        match *mode {
            RefMode::Remote {
                ref endpoint,
                ref mut emitter,
            } => match emitter {
                Some(em) => Ok(Arc::clone(em)),
                None => {
                    let em = Emitter::connect(endpoint, &self.cfg)?;
                    *emitter = Some(Arc::clone(&em));
                    Ok(em)
                },
            },
            RefMode::Collocated { .. } => Err(LocalError::TransportBroken(
                "collocated reference has no connection".into(),
            )),
        }
    }

    /// The remote endpoint, or the adapter's endpoint for collocated
    /// references that have been activated.
    pub fn endpoint(&self) -> Option<Endpoint> {
        match *self.mode.read().expect("reference poisoned") {
            RefMode::Remote { ref endpoint, .. } => Some(endpoint.clone()),
            RefMode::Collocated { ref adapter } => adapter.endpoint(),
        }
    }

    /// Forgets the cached connection so the next attempt redials.
    pub fn drop_connection(&self) {
        if let RefMode::Remote {
            ref mut emitter, ..
        } = *self.mode.write().expect("reference poisoned")
        {
            *emitter = None;
        }
    }

    /// Location forward: aim the same identity/facet at a new endpoint.
    pub fn retarget(&self, endpoint: Endpoint) {
        *self.mode.write().expect("reference poisoned") = RefMode::Remote {
            endpoint,
            emitter: None,
        };
    }

    /// Stringified form, `category/name [-f facet] -h host -p port`; an
    /// unactivated collocated reference stringifies without an endpoint.
    pub fn to_proxy_string(&self) -> String {
        let mut out = self.identity.to_string();
        if !self.facet.is_empty() {
            out.push_str(" -f ");
            out.push_str(&self.facet);
        }
        let endpoint = match *self.mode.read().expect("reference poisoned") {
            RefMode::Remote { ref endpoint, .. } => Some(endpoint.clone()),
            RefMode::Collocated { ref adapter } => adapter.endpoint(),
        };
        if let Some(ep) = endpoint {
            out.push_str(&format!(" -h {} -p {}", ep.host, ep.port));
        }
        out
    }

    /// Parses a stringified reference; the empty string is the null proxy.
    pub fn parse_proxy(s: &str, cfg: &Config) -> Result<Option<Arc<Self>>, LocalError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }

        let mut tokens = s.split_whitespace();
        let identity = Identity::parse(tokens.next().unwrap_or_default())?;

        let mut facet = String::new();
        let mut host: Option<String> = None;
        let mut port: Option<u16> = None;
        while let Some(flag) = tokens.next() {
            let value = tokens.next().ok_or_else(|| {
                LocalError::TransportBroken(format!("dangling `{flag}' in proxy `{s}'"))
            })?;
            match flag {
                "-f" => facet = value.to_string(),
                "-h" => host = Some(value.to_string()),
                "-p" => {
                    port = Some(value.parse().map_err(|_| {
                        LocalError::TransportBroken(format!(
                            "bad port `{value}' in proxy `{s}'"
                        ))
                    })?);
                },
                other => {
                    return Err(LocalError::TransportBroken(format!(
                        "unknown proxy option `{other}' in `{s}'"
                    )));
                },
            }
        }

        let (Some(host), Some(port)) = (host, port) else {
            return Err(LocalError::TransportBroken(format!(
                "proxy `{s}' has no endpoint"
            )));
        };

        Ok(Some(Self::remote(
            identity,
            facet,
            Endpoint::new(host, port),
            cfg.clone(),
        )))
    }
}
