// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The connection emitter: one TCP connection, blocking-synchronous, with
//! all waits funneled through the readiness gate.
//!
//! Within a connection, requests enter the outgoing stream in call order and
//! replies are correlated by the monotonically assigned request id. There is
//! no cross-connection ordering guarantee.

use std::{
    fmt,
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream as StdTcpStream, ToSocketAddrs},
    sync::{Arc, Mutex},
    time::Duration,
};

use mio::net::TcpStream;
use tracing::{debug, trace};

use crate::{
    cfg::config::Config,
    runtime::errors::LocalError,
    transport::readiness::Gate,
    wire::{
        header::{FrameHeader, HEADER_LEN, MessageType},
        stream::BasicStream,
    },
};

/// A TCP endpoint in `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn resolve(&self) -> Result<SocketAddr, LocalError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| LocalError::ConnectFailed(e.to_string()))?
            .next()
            .ok_or_else(|| {
                LocalError::ConnectFailed(format!("no address for {self}"))
            })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

struct Inner {
    stream: TcpStream,
    gate: Gate,
    next_request_id: i32,
}

/// Client side of one connection. Cheap to share; a single mutex serializes
/// whole invocations, which is what gives per-connection ordering.
pub struct Emitter {
    endpoint: Endpoint,
    cfg: Config,
    inner: Mutex<Inner>,
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Emitter {
    /// Connects, switches to non-blocking mode, and consumes the peer's
    /// validate-connection message.
    pub fn connect(endpoint: &Endpoint, cfg: &Config) -> Result<Arc<Self>, LocalError> {
        let addr = endpoint.resolve()?;

        let std_stream = match cfg.connect_timeout() {
            Some(t) => StdTcpStream::connect_timeout(&addr, t),
            None => StdTcpStream::connect(addr),
        }
        .map_err(|e| LocalError::ConnectFailed(format!("{endpoint}: {e}")))?;
        std_stream
            .set_nodelay(true)
            .map_err(|e| LocalError::ConnectFailed(e.to_string()))?;
        std_stream
            .set_nonblocking(true)
            .map_err(|e| LocalError::ConnectFailed(e.to_string()))?;

        let mut inner = Inner {
            stream: TcpStream::from_std(std_stream),
            gate: Gate::new()
                .map_err(|e| LocalError::TransportBroken(e.to_string()))?,
            next_request_id: 1,
        };

        let (kind, _) = read_frame(
            &mut inner.stream,
            &mut inner.gate,
            cfg.read_timeout(),
            cfg.runtime.max_message_size,
        )?;
        if kind != MessageType::ValidateConnection {
            return Err(LocalError::TransportBroken(format!(
                "expected connection validation, got {kind:?}"
            )));
        }
        debug!(endpoint = %endpoint, "connection validated");

        Ok(Arc::new(Self {
            endpoint: endpoint.clone(),
            cfg: cfg.clone(),
            inner: Mutex::new(inner),
        }))
    }

    #[inline]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Sends one request frame and, for two-way requests, waits for the
    /// matching reply. `message` must start with the fixed header; its
    /// request-id slot is filled in here, under the connection lock, so ids
    /// are monotonic in send order.
    ///
    /// The returned stream is positioned at the reply status byte.
    ///
    /// Failures after the frame has begun to leave the host come back
    /// wrapped in [`LocalError::NonRepeatable`].
    pub fn invoke(
        &self,
        message: &mut Vec<u8>,
        oneway: bool,
    ) -> Result<Option<BasicStream>, LocalError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| LocalError::TransportBroken("emitter poisoned".into()))?;
        let inner = &mut *guard;

        let request_id = if oneway {
            0
        } else {
            let id = inner.next_request_id;
            inner.next_request_id = if id == i32::MAX { 1 } else { id + 1 };
            id
        };
        message[HEADER_LEN..HEADER_LEN + 4]
            .copy_from_slice(&request_id.to_le_bytes());
        trace!(request_id, len = message.len(), "sending request");

        let write_timeout = self.cfg.write_timeout();
        write_with_progress(&mut inner.stream, &mut inner.gate, message, write_timeout)
            .map_err(|(sent, e)| {
                if sent > 0 {
                    LocalError::NonRepeatable(Box::new(e))
                } else {
                    e
                }
            })?;

        if oneway {
            return Ok(None);
        }

        // The request is on the wire; any failure from here on must not be
        // retried transparently for mutating operations.
        let reply = self.wait_reply(inner, request_id);
        reply.map_err(|e| match e {
            already @ LocalError::NonRepeatable(_) => already,
            other => LocalError::NonRepeatable(Box::new(other)),
        })
    }

    fn wait_reply(
        &self,
        inner: &mut Inner,
        request_id: i32,
    ) -> Result<Option<BasicStream>, LocalError> {
        loop {
            let (kind, mut is) = read_frame(
                &mut inner.stream,
                &mut inner.gate,
                self.cfg.read_timeout(),
                self.cfg.runtime.max_message_size,
            )?;
            match kind {
                MessageType::Reply => {
                    let id = is.read_int().map_err(LocalError::from)?;
                    if id != request_id {
                        return Err(LocalError::TransportBroken(format!(
                            "reply id {id} does not match request id {request_id}"
                        )));
                    }
                    return Ok(Some(is));
                },
                // A late validate message is harmless chatter.
                MessageType::ValidateConnection => continue,
                MessageType::CloseConnection => {
                    return Err(LocalError::ConnectionLost(
                        "peer closed the connection".into(),
                    ));
                },
                MessageType::Request => {
                    return Err(LocalError::TransportBroken(
                        "peer sent a request on a client connection".into(),
                    ));
                },
            }
        }
    }

    /// Best-effort close notification; errors are deliberately dropped.
    pub fn close(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            let inner = &mut *guard;
            let header =
                FrameHeader::new(MessageType::CloseConnection, HEADER_LEN as u32);
            let _ = write_message(
                &mut inner.stream,
                &mut inner.gate,
                &header.to_bytes(),
                Some(Duration::from_millis(100)),
            );
        }
    }
}

/// Writes a whole message through the readiness gate. Shared by the client
/// and the adapter side.
pub(crate) fn write_message(
    stream: &mut TcpStream,
    gate: &mut Gate,
    bytes: &[u8],
    timeout: Option<Duration>,
) -> Result<(), LocalError> {
    write_with_progress(stream, gate, bytes, timeout).map_err(|(_, e)| e)
}

/// As [`write_message`], but failures report how many bytes had already
/// left so the caller can decide whether the request is repeatable.
fn write_with_progress(
    stream: &mut TcpStream,
    gate: &mut Gate,
    bytes: &[u8],
    timeout: Option<Duration>,
) -> Result<(), (usize, LocalError)> {
    let mut off = 0usize;
    while off < bytes.len() {
        match stream.write(&bytes[off..]) {
            Ok(0) => {
                return Err((
                    off,
                    LocalError::ConnectionLost("write returned zero".into()),
                ));
            },
            Ok(n) => off += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                match gate.wait_writable(stream, timeout) {
                    Ok(true) => {},
                    Ok(false) => return Err((off, LocalError::TimedOut)),
                    Err(e) => return Err((off, e)),
                }
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                return Err((off, LocalError::ConnectionLost(e.to_string())));
            },
            Err(e) => return Err((off, LocalError::TransportBroken(e.to_string()))),
        }
    }
    Ok(())
}

/// Reads one complete frame; returns its type and a stream positioned just
/// past the fixed header. Shared by the emitter and the adapter side.
pub(crate) fn read_frame(
    stream: &mut TcpStream,
    gate: &mut Gate,
    timeout: Option<Duration>,
    max_message_size: u32,
) -> Result<(MessageType, BasicStream), LocalError> {
    let mut header_buf = [0u8; HEADER_LEN];
    read_exact(stream, gate, &mut header_buf, timeout)?;

    let header = FrameHeader::parse(&header_buf).map_err(LocalError::from)?;
    let kind = header.validate().map_err(LocalError::from)?;

    let size = header.size.get();
    if size > max_message_size {
        return Err(LocalError::Protocol(
            crate::wire::stream::ProtocolError::MessageTooLarge {
                size,
                max: max_message_size,
            },
        ));
    }

    let mut body = vec![0u8; size as usize - HEADER_LEN];
    read_exact(stream, gate, &mut body, timeout)?;
    Ok((kind, BasicStream::from_vec(body)))
}

fn read_exact(
    stream: &mut TcpStream,
    gate: &mut Gate,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<(), LocalError> {
    let mut off = 0usize;
    while off < buf.len() {
        match stream.read(&mut buf[off..]) {
            Ok(0) => {
                return Err(LocalError::ConnectionLost(
                    "peer closed mid-frame".into(),
                ));
            },
            Ok(n) => off += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if !gate.wait_readable(stream, timeout)? {
                    return Err(LocalError::TimedOut);
                }
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                return Err(LocalError::ConnectionLost(e.to_string()));
            },
            Err(e) => return Err(LocalError::TransportBroken(e.to_string())),
        }
    }
    Ok(())
}
