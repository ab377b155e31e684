// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The object adapter: the identity+facet servant registry and the blocking
//! accept loop that feeds the dispatch engine.
//!
//! Lookups are lock-guarded by the registry map; no lock is held while user
//! code runs.

use std::{
    io,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use dashmap::DashMap;
use mio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    runtime::{
        dispatch::dispatch_request,
        errors::LocalError,
        identity::Identity,
        object::Object,
        proxy::ObjectPrx,
        reference::Reference,
    },
    transport::{
        emitter::{Endpoint, read_frame, write_message},
        readiness::Gate,
    },
    wire::header::{FrameHeader, HEADER_LEN, MessageType},
};

/// How long connection threads sleep between shutdown-flag checks while the
/// socket is idle.
const IDLE_SLICE: Duration = Duration::from_millis(200);

/// Server-side registry routing incoming requests to servants.
pub struct ObjectAdapter {
    name: String,
    cfg: Config,
    servants: DashMap<(String, String), Arc<dyn Object>>,
    endpoint: RwLock<Option<Endpoint>>,
    shutdown: Arc<AtomicBool>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ObjectAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectAdapter")
            .field("name", &self.name)
            .field("servants", &self.servants.len())
            .finish_non_exhaustive()
    }
}

impl ObjectAdapter {
    pub fn new(name: impl Into<String>, cfg: &Config) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            cfg: cfg.clone(),
            servants: DashMap::new(),
            endpoint: RwLock::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
            acceptor: Mutex::new(None),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.read().expect("adapter poisoned").clone()
    }

    // ── registry ────────────────────────────────────────────────────────

    pub fn add(&self, identity: &Identity, servant: Arc<dyn Object>) {
        self.add_facet(identity, "", servant);
    }

    pub fn add_facet(
        &self,
        identity: &Identity,
        facet: &str,
        servant: Arc<dyn Object>,
    ) {
        self.servants
            .insert((identity.to_string(), facet.to_string()), servant);
    }

    pub fn remove_facet(
        &self,
        identity: &Identity,
        facet: &str,
    ) -> Option<Arc<dyn Object>> {
        self.servants
            .remove(&(identity.to_string(), facet.to_string()))
            .map(|(_, servant)| servant)
    }

    pub fn find_facet(
        &self,
        identity: &Identity,
        facet: &str,
    ) -> Option<Arc<dyn Object>> {
        self.servants
            .get(&(identity.to_string(), facet.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Whether any facet is registered under the identity; distinguishes
    /// `ObjectNotExist` from `FacetNotExist`.
    pub fn identity_exists(&self, identity: &Identity) -> bool {
        let key = identity.to_string();
        self.servants.iter().any(|entry| entry.key().0 == key)
    }

    /// Collocated proxy for an identity behind this adapter.
    pub fn create_proxy(self: &Arc<Self>, identity: Identity) -> ObjectPrx {
        ObjectPrx::new(Reference::collocated(
            identity,
            "",
            Arc::clone(self),
            self.cfg.clone(),
        ))
    }

    // ── accept loop ─────────────────────────────────────────────────────

    /// Binds the endpoint and starts accepting connections. Each connection
    /// is served by its own thread; invocation and dispatch stay fully
    /// synchronous inside it.
    pub fn activate(self: &Arc<Self>, endpoint: &Endpoint) -> Result<(), LocalError> {
        let std_listener =
            std::net::TcpListener::bind((endpoint.host.as_str(), endpoint.port))
                .map_err(|e| LocalError::ConnectFailed(format!("{endpoint}: {e}")))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| LocalError::ConnectFailed(e.to_string()))?;
        let local = std_listener
            .local_addr()
            .map_err(|e| LocalError::ConnectFailed(e.to_string()))?;

        *self.endpoint.write().expect("adapter poisoned") =
            Some(Endpoint::new(local.ip().to_string(), local.port()));

        let mut listener = TcpListener::from_std(std_listener);
        let mut gate =
            Gate::new().map_err(|e| LocalError::TransportBroken(e.to_string()))?;
        let adapter = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);

        let handle = thread::Builder::new()
            .name(format!("{}-accept", self.name))
            .spawn(move || {
                debug!(adapter = %adapter.name, endpoint = %local, "adapter active");
                while !shutdown.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accepted connection");
                            let adapter = Arc::clone(&adapter);
                            let spawned = thread::Builder::new()
                                .name(format!("{}-conn", adapter.name))
                                .spawn(move || adapter.serve_connection(stream));
                            if let Err(e) = spawned {
                                warn!(error = %e, "failed to spawn connection thread");
                            }
                        },
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            match gate.wait_readable(&mut listener, Some(IDLE_SLICE)) {
                                Ok(_) => {},
                                Err(e) => {
                                    warn!(error = %e, "accept poll failed");
                                    break;
                                },
                            }
                        },
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            break;
                        },
                    }
                }
            })
            .map_err(|e| LocalError::TransportBroken(e.to_string()))?;

        *self.acceptor.lock().expect("adapter poisoned") = Some(handle);
        Ok(())
    }

    /// Stops accepting and joins the accept loop. Connection threads drain
    /// on their own once their peers disconnect.
    pub fn deactivate(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.acceptor.lock().expect("adapter poisoned").take() {
            let _ = handle.join();
        }
    }

    /// One connection: validate, then a frame-dispatch-reply cycle until
    /// the peer closes or the adapter shuts down.
    fn serve_connection(self: Arc<Self>, mut stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "set_nodelay failed");
        }
        let mut gate = match Gate::new() {
            Ok(g) => g,
            Err(e) => {
                warn!(error = %e, "gate creation failed");
                return;
            },
        };

        let validate =
            FrameHeader::new(MessageType::ValidateConnection, HEADER_LEN as u32);
        if let Err(e) = write_message(
            &mut stream,
            &mut gate,
            &validate.to_bytes(),
            self.cfg.write_timeout(),
        ) {
            warn!(error = %e, "connection validation failed");
            return;
        }

        while !self.shutdown.load(Ordering::SeqCst) {
            match gate.wait_readable(&mut stream, Some(IDLE_SLICE)) {
                Ok(false) => continue,
                Ok(true) => {},
                Err(e) => {
                    debug!(error = %e, "connection poll failed");
                    return;
                },
            }

            let frame = read_frame(
                &mut stream,
                &mut gate,
                self.cfg.read_timeout(),
                self.cfg.runtime.max_message_size,
            );
            match frame {
                Ok((MessageType::Request, is)) => {
                    if let Some(reply) = dispatch_request(&self, is) {
                        if let Err(e) = write_message(
                            &mut stream,
                            &mut gate,
                            &reply,
                            self.cfg.write_timeout(),
                        ) {
                            debug!(error = %e, "reply send failed");
                            return;
                        }
                    }
                },
                Ok((MessageType::CloseConnection, _)) => {
                    debug!("peer requested close");
                    return;
                },
                Ok((MessageType::ValidateConnection, _)) => {},
                Ok((MessageType::Reply, _)) => {
                    warn!("peer sent a reply on a server connection");
                },
                Err(LocalError::ConnectionLost(_)) => return,
                Err(e) => {
                    debug!(error = %e, "closing connection after frame error");
                    return;
                },
            }
        }
    }
}
