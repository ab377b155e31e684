// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared fixture: a hand-expanded rendition of what `slice2rs` emits for
//!
//! ```text
//! module Test {
//!     exception OutOfStock { int missing; };
//!     interface Counter {
//!         long take(int amount) throws OutOfStock;
//!         idempotent void refill(int amount);
//!         long split(int amount, out long remainder);
//!         void oops();
//!         void boom();
//!     };
//! };
//! ```
//!
//! plus scripted raw-frame servers for the failure scenarios.

use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU32, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use anyhow::Result;
use floe::{
    cfg::config::Config,
    runtime::{
        adapter::ObjectAdapter,
        current::{Context, Current},
        dispatch::{Direct, Incoming, guard_direct, marshal_reply},
        errors::{Error, LocalError, UserException},
        identity::Identity,
        invocation::{Outgoing, ReplyOutcome},
        object::{DispatchStatus, Object, dispatch_ice_is_a, dispatch_ice_ping},
        proxy::{self, ObjectPrx},
    },
    transport::emitter::Endpoint,
    wire::{
        header::{FrameHeader, HEADER_LEN, MessageType, ReplyStatus},
        stream::BasicStream,
    },
};

pub const COUNTER_ID: &str = "::Test::Counter";
pub const COUNTER_IDS: &[&str] = &["::Ice::Object", "::Test::Counter"];
pub const COUNTER_CLASS_IDS: &[&str] = &["::Ice::Object"];

// ── exceptions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutOfStock {
    pub missing: i32,
}

impl OutOfStock {
    pub const ICE_ID: &'static str = "::Test::OutOfStock";
    pub const ICE_EXCEPTION_IDS: &'static [&'static str] =
        &["::Test::OutOfStock", "::Ice::UserException"];
}

impl UserException for OutOfStock {
    fn ice_name(&self) -> &'static str {
        Self::ICE_ID
    }

    fn ice_exception_ids(&self) -> &'static [&'static str] {
        Self::ICE_EXCEPTION_IDS
    }

    fn ice_write(&self, os: &mut BasicStream) {
        os.write_int(self.missing);
    }

    fn ice_read(
        &mut self,
        is: &mut BasicStream,
    ) -> Result<(), floe::wire::stream::ProtocolError> {
        self.missing = is.read_int()?;
        Ok(())
    }

    fn ice_clone(&self) -> Box<dyn UserException> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Raised by `oops` but never declared, so the boundary must project it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Surprise {}

impl UserException for Surprise {
    fn ice_name(&self) -> &'static str {
        "::Test::Surprise"
    }

    fn ice_exception_ids(&self) -> &'static [&'static str] {
        &["::Test::Surprise", "::Ice::UserException"]
    }

    fn ice_write(&self, _os: &mut BasicStream) {}

    fn ice_read(
        &mut self,
        _is: &mut BasicStream,
    ) -> Result<(), floe::wire::stream::ProtocolError> {
        Ok(())
    }

    fn ice_clone(&self) -> Box<dyn UserException> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// ── servant contract and skeleton ───────────────────────────────────────

pub trait Counter: Send + Sync {
    fn take(&self, amount: i32, current: &Current) -> Result<i64, Error>;
    fn refill(&self, amount: i32, current: &Current) -> Result<(), Error>;
    fn split(&self, amount: i32, current: &Current) -> Result<(i64, i64), Error>;
    fn oops(&self, current: &Current) -> Result<(), Error>;
    fn boom(&self, current: &Current) -> Result<(), Error>;
}

pub struct CounterServer {
    servant: Box<dyn Counter>,
}

impl CounterServer {
    pub fn new(servant: impl Counter + 'static) -> Self {
        Self {
            servant: Box::new(servant),
        }
    }

    pub fn servant(&self) -> &dyn Counter {
        self.servant.as_ref()
    }

    const OPERATIONS: &'static [&'static str] =
        &["boom", "ice_isA", "ice_ping", "oops", "refill", "split", "take"];

    fn dispatch_take(
        &self,
        incoming: &mut Incoming,
    ) -> Result<DispatchStatus, LocalError> {
        let (is, _) = incoming.for_read();
        let amount = is.read_int()?;
        match self.servant.take(amount, incoming.current()) {
            Ok(ret) => {
                let os = incoming.os();
                os.write_long(ret);
                Ok(DispatchStatus::Ok)
            },
            Err(Error::User(ex)) => {
                const THROWS: &[&str] = &["::Test::OutOfStock"];
                if THROWS.binary_search(&ex.ice_name()).is_ok() {
                    let os = incoming.os();
                    os.write_string(ex.ice_name());
                    ex.ice_write(os);
                    Ok(DispatchStatus::UserException)
                } else {
                    Err(LocalError::UnknownUserException(
                        ex.ice_name().to_string(),
                    ))
                }
            },
            Err(Error::Local(e)) => Err(e),
        }
    }

    fn dispatch_refill(
        &self,
        incoming: &mut Incoming,
    ) -> Result<DispatchStatus, LocalError> {
        let (is, _) = incoming.for_read();
        let amount = is.read_int()?;
        match self.servant.refill(amount, incoming.current()) {
            Ok(()) => Ok(DispatchStatus::Ok),
            Err(Error::User(ex)) => Err(LocalError::UnknownUserException(
                ex.ice_name().to_string(),
            )),
            Err(Error::Local(e)) => Err(e),
        }
    }

    fn dispatch_split(
        &self,
        incoming: &mut Incoming,
    ) -> Result<DispatchStatus, LocalError> {
        let (is, _) = incoming.for_read();
        let amount = is.read_int()?;
        match self.servant.split(amount, incoming.current()) {
            Ok((ret, remainder)) => {
                let os = incoming.os();
                os.write_long(remainder);
                os.write_long(ret);
                Ok(DispatchStatus::Ok)
            },
            Err(Error::User(ex)) => Err(LocalError::UnknownUserException(
                ex.ice_name().to_string(),
            )),
            Err(Error::Local(e)) => Err(e),
        }
    }

    fn dispatch_oops(
        &self,
        incoming: &mut Incoming,
    ) -> Result<DispatchStatus, LocalError> {
        match self.servant.oops(incoming.current()) {
            Ok(()) => Ok(DispatchStatus::Ok),
            Err(Error::User(ex)) => Err(LocalError::UnknownUserException(
                ex.ice_name().to_string(),
            )),
            Err(Error::Local(e)) => Err(e),
        }
    }

    fn dispatch_boom(
        &self,
        incoming: &mut Incoming,
    ) -> Result<DispatchStatus, LocalError> {
        match self.servant.boom(incoming.current()) {
            Ok(()) => Ok(DispatchStatus::Ok),
            Err(Error::User(ex)) => Err(LocalError::UnknownUserException(
                ex.ice_name().to_string(),
            )),
            Err(Error::Local(e)) => Err(e),
        }
    }
}

impl Object for CounterServer {
    fn ice_ids(&self) -> &'static [&'static str] {
        COUNTER_IDS
    }

    fn ice_class_ids(&self) -> &'static [&'static str] {
        COUNTER_CLASS_IDS
    }

    fn dispatch(
        &self,
        incoming: &mut Incoming,
    ) -> Result<DispatchStatus, LocalError> {
        match Self::OPERATIONS
            .binary_search(&incoming.current().operation.as_str())
        {
            Ok(0) => self.dispatch_boom(incoming),
            Ok(1) => dispatch_ice_is_a(self, incoming),
            Ok(2) => dispatch_ice_ping(self, incoming),
            Ok(3) => self.dispatch_oops(incoming),
            Ok(4) => self.dispatch_refill(incoming),
            Ok(5) => self.dispatch_split(incoming),
            Ok(6) => self.dispatch_take(incoming),
            _ => Ok(DispatchStatus::OperationNotExist),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// ── proxy, delegates ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CounterPrx {
    base: ObjectPrx,
}

trait CounterDelegate {
    fn take(&self, amount: i32, context: &Context) -> Result<i64, Error>;
    fn refill(&self, amount: i32, context: &Context) -> Result<(), Error>;
    fn split(&self, amount: i32, context: &Context) -> Result<(i64, i64), Error>;
    fn oops(&self, context: &Context) -> Result<(), Error>;
    fn boom(&self, context: &Context) -> Result<(), Error>;
}

struct CounterDelegateM<'a> {
    prx: &'a ObjectPrx,
}

struct CounterDelegateD<'a> {
    prx: &'a ObjectPrx,
    adapter: Arc<ObjectAdapter>,
}

impl CounterPrx {
    pub fn ice_object(&self) -> &ObjectPrx {
        &self.base
    }

    pub fn checked_cast(base: &ObjectPrx, facet: &str) -> Result<Option<Self>, Error> {
        Ok(proxy::checked_cast(base, facet, COUNTER_ID, COUNTER_IDS)?
            .map(|base| Self { base }))
    }

    pub fn unchecked_cast(base: &ObjectPrx, facet: &str) -> Self {
        Self {
            base: proxy::unchecked_cast(base, facet, COUNTER_IDS),
        }
    }

    fn create_delegate(&self) -> Box<dyn CounterDelegate + '_> {
        match self.base.reference().adapter() {
            Some(adapter) => Box::new(CounterDelegateD {
                prx: &self.base,
                adapter,
            }),
            None => Box::new(CounterDelegateM { prx: &self.base }),
        }
    }

    fn invoke_loop<T>(
        &self,
        idempotent: bool,
        call: impl Fn(&dyn CounterDelegate) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut attempts = 0u32;
        loop {
            let delegate = self.create_delegate();
            match call(delegate.as_ref()) {
                Ok(ret) => return Ok(ret),
                Err(Error::Local(LocalError::LocationForward(target))) => {
                    self.base.location_forward(&target)?;
                },
                Err(Error::Local(LocalError::NonRepeatable(inner))) => {
                    if idempotent {
                        self.base.handle_exception(*inner, &mut attempts)?;
                    } else {
                        return Err(ObjectPrx::rethrow_exception(
                            LocalError::NonRepeatable(inner),
                        ));
                    }
                },
                Err(Error::Local(e)) => {
                    self.base.handle_exception(e, &mut attempts)?;
                },
                Err(user) => return Err(user),
            }
        }
    }

    pub fn take(&self, amount: i32, context: &Context) -> Result<i64, Error> {
        self.invoke_loop(false, |d| d.take(amount, context))
    }

    pub fn refill(&self, amount: i32, context: &Context) -> Result<(), Error> {
        self.invoke_loop(true, |d| d.refill(amount, context))
    }

    pub fn split(&self, amount: i32, context: &Context) -> Result<(i64, i64), Error> {
        self.invoke_loop(false, |d| d.split(amount, context))
    }

    pub fn oops(&self, context: &Context) -> Result<(), Error> {
        self.invoke_loop(false, |d| d.oops(context))
    }

    pub fn boom(&self, context: &Context) -> Result<(), Error> {
        self.invoke_loop(false, |d| d.boom(context))
    }
}

impl CounterDelegateM<'_> {
    fn invoke_remote<T>(
        &self,
        operation: &str,
        idempotent: bool,
        context: &Context,
        marshal: impl Fn(&mut BasicStream),
        unmarshal: impl Fn(&mut Outgoing) -> Result<T, Error>,
        throws: &'static [&'static str],
    ) -> Result<T, Error> {
        let mut send_proxy = false;
        loop {
            let attempt = (|| -> Result<T, Error> {
                let mut out =
                    Outgoing::new(self.prx, send_proxy, operation, idempotent, context)?;
                marshal(out.os());
                match out.invoke()? {
                    ReplyOutcome::Success => unmarshal(&mut out),
                    ReplyOutcome::UserException => {
                        if throws.is_empty() {
                            let id = out.is().read_string()?;
                            return Err(Error::Local(
                                LocalError::UnknownUserException(id),
                            ));
                        }
                        match out.is().read_exception_index(throws)? {
                            0 => {
                                let mut ex = OutOfStock::default();
                                ex.ice_read(out.is())?;
                                Err(Error::user(ex))
                            },
                            _ => unreachable!(),
                        }
                    },
                }
            })();
            match attempt {
                Err(Error::Local(LocalError::ProxyRequested)) => send_proxy = true,
                other => return other,
            }
        }
    }
}

impl CounterDelegate for CounterDelegateM<'_> {
    fn take(&self, amount: i32, context: &Context) -> Result<i64, Error> {
        self.invoke_remote(
            "take",
            false,
            context,
            |os| os.write_int(amount),
            |out| Ok(out.is().read_long()?),
            &["::Test::OutOfStock"],
        )
    }

    fn refill(&self, amount: i32, context: &Context) -> Result<(), Error> {
        self.invoke_remote(
            "refill",
            true,
            context,
            |os| os.write_int(amount),
            |_| Ok(()),
            &[],
        )
    }

    fn split(&self, amount: i32, context: &Context) -> Result<(i64, i64), Error> {
        self.invoke_remote(
            "split",
            false,
            context,
            |os| os.write_int(amount),
            |out| {
                let is = out.is();
                let remainder = is.read_long()?;
                let ret = is.read_long()?;
                Ok((ret, remainder))
            },
            &[],
        )
    }

    fn oops(&self, context: &Context) -> Result<(), Error> {
        self.invoke_remote("oops", false, context, |_| {}, |_| Ok(()), &[])
    }

    fn boom(&self, context: &Context) -> Result<(), Error> {
        self.invoke_remote("boom", false, context, |_| {}, |_| Ok(()), &[])
    }
}

impl CounterDelegateD<'_> {
    fn invoke_direct<T>(
        &self,
        operation: &str,
        idempotent: bool,
        context: &Context,
        throws: &'static [&'static str],
        call: impl Fn(&dyn Counter, &Current) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut current = Current::new(
            self.prx.ice_get_identity().clone(),
            self.prx.ice_get_facet(),
            operation,
            idempotent,
            context.clone(),
        );
        loop {
            let direct = Direct::new(&self.adapter, &current)?;
            let Some(server) = direct
                .facet_servant()
                .as_any()
                .downcast_ref::<CounterServer>()
            else {
                return Err(Error::Local(LocalError::OperationNotExist {
                    id: current.identity.to_string(),
                    facet: current.facet.clone(),
                    operation: current.operation.clone(),
                }));
            };
            let outcome = guard_direct(throws, || call(server.servant(), &current));
            match outcome {
                Err(Error::Local(LocalError::ProxyRequested)) => {
                    current.proxy = Some(self.prx.to_string());
                },
                other => return other,
            }
        }
    }
}

impl CounterDelegate for CounterDelegateD<'_> {
    fn take(&self, amount: i32, context: &Context) -> Result<i64, Error> {
        self.invoke_direct("take", false, context, &["::Test::OutOfStock"], |s, c| {
            s.take(amount, c)
        })
    }

    fn refill(&self, amount: i32, context: &Context) -> Result<(), Error> {
        self.invoke_direct("refill", true, context, &[], |s, c| s.refill(amount, c))
    }

    fn split(&self, amount: i32, context: &Context) -> Result<(i64, i64), Error> {
        self.invoke_direct("split", false, context, &[], |s, c| s.split(amount, c))
    }

    fn oops(&self, context: &Context) -> Result<(), Error> {
        self.invoke_direct("oops", false, context, &[], |s, c| s.oops(c))
    }

    fn boom(&self, context: &Context) -> Result<(), Error> {
        self.invoke_direct("boom", false, context, &[], |s, c| s.boom(c))
    }
}

// ── a concrete servant ──────────────────────────────────────────────────

/// Stock-keeping servant counting every user-code invocation.
pub struct StockServant {
    pub stock: AtomicI64,
    pub calls: Arc<AtomicU32>,
}

impl StockServant {
    pub fn with_stock(stock: i64) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                stock: AtomicI64::new(stock),
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl Counter for StockServant {
    fn take(&self, amount: i32, _current: &Current) -> Result<i64, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let available = self.stock.load(Ordering::SeqCst);
        if i64::from(amount) > available {
            return Err(Error::user(OutOfStock {
                missing: amount - available as i32,
            }));
        }
        let remaining = available - i64::from(amount);
        self.stock.store(remaining, Ordering::SeqCst);
        Ok(remaining)
    }

    fn refill(&self, amount: i32, _current: &Current) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.stock.fetch_add(i64::from(amount), Ordering::SeqCst);
        Ok(())
    }

    fn split(&self, amount: i32, _current: &Current) -> Result<(i64, i64), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((i64::from(amount) / 2, i64::from(amount) % 2))
    }

    fn oops(&self, _current: &Current) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::user(Surprise {}))
    }

    fn boom(&self, _current: &Current) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("servant blew up");
    }
}

// ── harness plumbing ────────────────────────────────────────────────────

pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.runtime.max_retries = 2;
    cfg.runtime.retry_backoff = Duration::from_millis(20);
    cfg.runtime.connect_timeout_ms = 2_000;
    cfg.runtime.read_timeout_ms = 2_000;
    cfg.runtime.write_timeout_ms = 2_000;
    cfg
}

/// Activated adapter plus a remote proxy aimed at the registered servant.
pub fn start_counter_server(
    servant: StockServant,
) -> Result<(Arc<ObjectAdapter>, ObjectPrx)> {
    let cfg = test_config();
    let adapter = ObjectAdapter::new("test-counter", &cfg);
    adapter.add(
        &Identity::named("counter"),
        Arc::new(CounterServer::new(servant)),
    );
    adapter.activate(&Endpoint::new("127.0.0.1", 0))?;
    let endpoint = adapter.endpoint().expect("activated");
    let prx = ObjectPrx::from_string(
        &format!("counter -h 127.0.0.1 -p {}", endpoint.port),
        &cfg,
    )?
    .expect("non-null proxy");
    Ok((adapter, prx))
}

// ── scripted raw-frame server ───────────────────────────────────────────

/// What a scripted connection does after reading one request.
pub enum ConnScript {
    /// Close abruptly without replying.
    DropAfterRequest,
    /// Answer every request on the connection with an empty-ok reply.
    ServeOkEmpty,
    /// Redirect the first request to `target`, then drain.
    LocationForward(String),
    /// Answer with a user-exception reply carrying this identifier.
    UserExceptionId(String),
}

pub struct ScriptServer {
    pub port: u16,
    pub requests: Arc<AtomicU32>,
    /// Scripts the client never drives leave the thread parked in accept;
    /// it is detached rather than joined.
    _handle: JoinHandle<()>,
}

fn read_request(stream: &mut TcpStream) -> Result<(i32, Vec<u8>)> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header)?;
    let parsed = FrameHeader::parse(&header)?;
    let mut body = vec![0u8; parsed.size.get() as usize - HEADER_LEN];
    stream.read_exact(&mut body)?;
    let request_id = i32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    Ok((request_id, body))
}

fn send_validate(stream: &mut TcpStream) -> Result<()> {
    let frame = FrameHeader::new(MessageType::ValidateConnection, HEADER_LEN as u32);
    stream.write_all(&frame.to_bytes())?;
    Ok(())
}

/// Runs one scripted connection per entry, counting requests across all
/// of them. The listener closes when the script is exhausted.
pub fn spawn_script_server(scripts: Vec<ConnScript>) -> Result<ScriptServer> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let requests = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&requests);

    let handle = std::thread::spawn(move || {
        for script in scripts {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let _ = stream.set_nodelay(true);
            if send_validate(&mut stream).is_err() {
                return;
            }
            match script {
                ConnScript::DropAfterRequest => {
                    if read_request(&mut stream).is_ok() {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    // Dropping the stream resets the connection mid-call.
                },
                ConnScript::ServeOkEmpty => {
                    while let Ok((request_id, _)) = read_request(&mut stream) {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let reply =
                            marshal_reply(request_id, ReplyStatus::Ok, |os| {
                                os.write_int(0);
                            });
                        if stream.write_all(&reply).is_err() {
                            break;
                        }
                    }
                },
                ConnScript::LocationForward(target) => {
                    if let Ok((request_id, _)) = read_request(&mut stream) {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let reply = marshal_reply(
                            request_id,
                            ReplyStatus::LocationForward,
                            |os| os.write_string(&target),
                        );
                        let _ = stream.write_all(&reply);
                    }
                },
                ConnScript::UserExceptionId(id) => {
                    if let Ok((request_id, _)) = read_request(&mut stream) {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let mut payload = BasicStream::new();
                        payload.write_string(&id);
                        let bytes = payload.into_vec();
                        let reply = marshal_reply(
                            request_id,
                            ReplyStatus::UserException,
                            |os| {
                                os.write_int(bytes.len() as i32);
                                os.write_blob(&bytes);
                            },
                        );
                        let _ = stream.write_all(&reply);
                    }
                },
            }
        }
    });

    Ok(ScriptServer {
        port,
        requests,
        _handle: handle,
    })
}

pub fn proxy_to(port: u16, cfg: &Config) -> Result<ObjectPrx> {
    Ok(
        ObjectPrx::from_string(&format!("counter -h 127.0.0.1 -p {port}"), cfg)?
            .expect("non-null proxy"),
    )
}
