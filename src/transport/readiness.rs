// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{io, time::Duration};

use mio::{Events, Interest, Poll, Token, event::Source};

use crate::runtime::errors::LocalError;

/// Which readiness edge a wait is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Single-socket readiness gate.
///
/// The only suspension point in the transport layer: everything above it is
/// blocking-synchronous. `wait` returns `Ok(true)` when the socket is ready,
/// `Ok(false)` on timeout, and fails with `TransportBroken` on any
/// non-interrupt error. Interrupted waits are restarted transparently with
/// the full timeout.
#[derive(Debug)]
pub struct Gate {
    poll: Poll,
    events: Events,
    registered: bool,
}

const SOCKET: Token = Token(0);

impl Gate {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(4),
            registered: false,
        })
    }

    /// Re-arms the registration for exactly the direction being waited on,
    /// so an unconsumed edge of the other direction cannot be lost.
    fn arm(&mut self, source: &mut impl Source, dir: Direction) -> io::Result<()> {
        let interest = match dir {
            Direction::Read => Interest::READABLE,
            Direction::Write => Interest::WRITABLE,
        };
        if self.registered {
            self.poll.registry().reregister(source, SOCKET, interest)
        } else {
            self.poll.registry().register(source, SOCKET, interest)?;
            self.registered = true;
            Ok(())
        }
    }

    /// Waits until `source` is ready in `dir`, the timeout expires
    /// (`None` = infinite), or the poller reports a failure.
    pub fn wait(
        &mut self,
        source: &mut impl Source,
        dir: Direction,
        timeout: Option<Duration>,
    ) -> Result<bool, LocalError> {
        self.arm(source, dir)
            .map_err(|e| LocalError::TransportBroken(e.to_string()))?;

        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LocalError::TransportBroken(e.to_string())),
                Ok(()) => {},
            }

            if self.events.is_empty() {
                return Ok(false);
            }

            for event in self.events.iter() {
                let ready = match dir {
                    Direction::Read => event.is_readable(),
                    Direction::Write => event.is_writable(),
                };
                // Error and hang-up edges are returned as "ready" so the
                // caller's read/write observes the failure itself.
                if ready || event.is_read_closed() || event.is_write_closed() {
                    return Ok(true);
                }
            }
        }
    }

    pub fn wait_readable(
        &mut self,
        source: &mut impl Source,
        timeout: Option<Duration>,
    ) -> Result<bool, LocalError> {
        self.wait(source, Direction::Read, timeout)
    }

    pub fn wait_writable(
        &mut self,
        source: &mut impl Source,
        timeout: Option<Duration>,
    ) -> Result<bool, LocalError> {
        self.wait(source, Direction::Write, timeout)
    }
}
