// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The typed read/write API over a [`WireBuffer`]. This is the only place
//! that knows the bit-exact encoding:
//!
//! * byte/bool: one octet
//! * short/int/long: little-endian two's complement
//! * float/double: IEEE-754 little-endian
//! * string: `int` length prefix, raw bytes, no terminator
//! * sequence: `int` count then elements; readers grow one element at a
//!   time and never pre-size from the count
//! * map: `int` count then key/value pairs in sender order
//! * proxy: stringified reference, empty string meaning null
//! * user exception: scoped identifier string, then fields base-first

use std::collections::BTreeMap;

use thiserror::Error;

use crate::wire::buffer::WireBuffer;

/// Malformed or truncated frames, unknown discriminators, identifier
/// mismatches. Never retried.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("unmarshalling ran past the end of the buffer")]
    UnmarshalOutOfBounds,
    #[error("bad message magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unsupported version (protocol {protocol}, encoding {encoding})")]
    UnsupportedVersion { protocol: u8, encoding: u8 },
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("unknown reply status {0}")]
    UnknownReplyStatus(u8),
    #[error("compressed frames not supported (flag {0})")]
    CompressionNotSupported(u8),
    #[error("declared frame size {0} shorter than the header")]
    FrameTooShort(u32),
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("string is not valid UTF-8")]
    InvalidString,
    #[error("negative count {0}")]
    NegativeCount(i32),
    #[error("enumerator {0} out of range")]
    InvalidEnumerator(i64),
    #[error("encapsulation size does not match its contents")]
    EncapsulationMismatch,
    #[error("unknown user exception `{0}'")]
    UnknownUserException(String),
}

/// Typed stream over a wire buffer. Owns the buffer exclusively for the
/// duration of a marshal or unmarshal pass.
#[derive(Debug, Default)]
pub struct BasicStream {
    buf: WireBuffer,
    /// Positions of pending write-side encapsulation size slots.
    write_encaps: Vec<usize>,
    /// Read fences of open read-side encapsulations, innermost last.
    read_limits: Vec<usize>,
}

impl BasicStream {
    pub fn new() -> Self {
        Self {
            buf: WireBuffer::new(),
            write_encaps: Vec::new(),
            read_limits: Vec::new(),
        }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            buf: WireBuffer::from_vec(bytes),
            write_encaps: Vec::new(),
            read_limits: Vec::new(),
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.into_vec()
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.buf.position()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Innermost read fence: the end of the current encapsulation, or the
    /// end of the buffer when none is open.
    #[inline]
    fn fence(&self) -> usize {
        self.read_limits
            .last()
            .copied()
            .unwrap_or_else(|| self.buf.len())
    }

    // ── raw access ──────────────────────────────────────────────────────

    #[inline]
    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.buf.write_slice(bytes);
    }

    /// Overwrites a previously written `int` slot, e.g. a frame size field.
    #[inline]
    pub fn patch_int(&mut self, pos: usize, v: i32) -> bool {
        self.buf.patch(pos, &v.to_le_bytes())
    }

    pub fn read_blob(&mut self, n: usize) -> Result<&[u8], ProtocolError> {
        if self.buf.position() + n > self.fence() {
            return Err(ProtocolError::UnmarshalOutOfBounds);
        }
        self.buf
            .read_slice(n)
            .ok_or(ProtocolError::UnmarshalOutOfBounds)
    }

    // ── fixed-width primitives ──────────────────────────────────────────

    #[inline]
    pub fn write_byte(&mut self, v: u8) {
        self.buf.write_slice(&[v]);
    }

    pub fn read_byte(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_blob(1)?[0])
    }

    #[inline]
    pub fn write_bool(&mut self, v: bool) {
        self.write_byte(v as u8);
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_byte()? != 0)
    }

    #[inline]
    pub fn write_short(&mut self, v: i16) {
        self.buf.write_slice(&v.to_le_bytes());
    }

    pub fn read_short(&mut self) -> Result<i16, ProtocolError> {
        let b = self.read_blob(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    #[inline]
    pub fn write_int(&mut self, v: i32) {
        self.buf.write_slice(&v.to_le_bytes());
    }

    pub fn read_int(&mut self) -> Result<i32, ProtocolError> {
        let b = self.read_blob(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    #[inline]
    pub fn write_long(&mut self, v: i64) {
        self.buf.write_slice(&v.to_le_bytes());
    }

    pub fn read_long(&mut self) -> Result<i64, ProtocolError> {
        let b = self.read_blob(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    #[inline]
    pub fn write_float(&mut self, v: f32) {
        self.buf.write_slice(&v.to_le_bytes());
    }

    pub fn read_float(&mut self) -> Result<f32, ProtocolError> {
        let b = self.read_blob(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    #[inline]
    pub fn write_double(&mut self, v: f64) {
        self.buf.write_slice(&v.to_le_bytes());
    }

    pub fn read_double(&mut self) -> Result<f64, ProtocolError> {
        let b = self.read_blob(8)?;
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    // ── strings, counts ─────────────────────────────────────────────────

    pub fn write_string(&mut self, v: &str) {
        self.write_int(v.len() as i32);
        self.buf.write_slice(v.as_bytes());
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let n = self.read_count()?;
        let bytes = self.read_blob(n)?.to_vec();
        String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidString)
    }

    /// Reads a sequence/map/string count, rejecting negative values. The
    /// count is intentionally *not* used to pre-size containers.
    pub fn read_count(&mut self) -> Result<usize, ProtocolError> {
        let n = self.read_int()?;
        if n < 0 {
            return Err(ProtocolError::NegativeCount(n));
        }
        Ok(n as usize)
    }

    pub fn write_string_seq(&mut self, v: &[String]) {
        self.write_int(v.len() as i32);
        for s in v {
            self.write_string(s);
        }
    }

    pub fn read_string_seq(&mut self) -> Result<Vec<String>, ProtocolError> {
        let mut n = self.read_count()?;
        let mut out = Vec::new();
        while n > 0 {
            out.push(self.read_string()?);
            n -= 1;
        }
        Ok(out)
    }

    pub fn write_string_map(&mut self, v: &BTreeMap<String, String>) {
        self.write_int(v.len() as i32);
        for (k, val) in v {
            self.write_string(k);
            self.write_string(val);
        }
    }

    pub fn read_string_map(
        &mut self,
    ) -> Result<BTreeMap<String, String>, ProtocolError> {
        let mut n = self.read_count()?;
        let mut out = BTreeMap::new();
        while n > 0 {
            let k = self.read_string()?;
            let val = self.read_string()?;
            out.insert(k, val);
            n -= 1;
        }
        Ok(out)
    }

    // ── enums ───────────────────────────────────────────────────────────

    /// Writes an enumerator ordinal with the width implied by the enum's
    /// cardinality: byte up to 127 members, short up to 32 767, int up to
    /// 2³¹−1, long beyond.
    pub fn write_enum(&mut self, ordinal: i64, cardinality: usize) {
        if cardinality <= 0x7f {
            self.write_byte(ordinal as u8);
        } else if cardinality <= 0x7fff {
            self.write_short(ordinal as i16);
        } else if cardinality <= 0x7fff_ffff {
            self.write_int(ordinal as i32);
        } else {
            self.write_long(ordinal);
        }
    }

    /// Reads an enumerator ordinal of the width implied by `cardinality`;
    /// the generated validator maps it back onto the declared enumerators.
    pub fn read_enum(&mut self, cardinality: usize) -> Result<i64, ProtocolError> {
        Ok(if cardinality <= 0x7f {
            self.read_byte()? as i64
        } else if cardinality <= 0x7fff {
            self.read_short()? as i64
        } else if cardinality <= 0x7fff_ffff {
            self.read_int()? as i64
        } else {
            self.read_long()?
        })
    }

    // ── proxies ─────────────────────────────────────────────────────────

    /// A proxy travels as its stringified reference; the empty string
    /// denotes null.
    pub fn write_proxy_string(&mut self, v: Option<&str>) {
        self.write_string(v.unwrap_or(""));
    }

    pub fn read_proxy_string(&mut self) -> Result<Option<String>, ProtocolError> {
        let s = self.read_string()?;
        Ok(if s.is_empty() { None } else { Some(s) })
    }

    // ── user exceptions ─────────────────────────────────────────────────

    /// Reads the wire exception identifier and binary-searches it in the
    /// sorted `ids` table. Returns the matching index so the caller can
    /// instantiate and unmarshal the corresponding type.
    pub fn read_exception_index(
        &mut self,
        ids: &[&str],
    ) -> Result<usize, ProtocolError> {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        let wire_id = self.read_string()?;
        ids.binary_search(&wire_id.as_str())
            .map_err(|_| ProtocolError::UnknownUserException(wire_id))
    }

    // ── encapsulations ──────────────────────────────────────────────────

    /// Opens a write-side encapsulation by reserving its size slot. The
    /// size counts the body only, not the four-byte prefix.
    pub fn start_encaps(&mut self) {
        self.write_encaps.push(self.buf.len());
        self.write_int(0);
    }

    /// Closes the innermost write-side encapsulation, patching the size.
    pub fn end_encaps(&mut self) {
        let slot = self
            .write_encaps
            .pop()
            .expect("end_encaps without start_encaps");
        let body = self.buf.len() - slot - 4;
        let patched = self.buf.patch(slot, &(body as i32).to_le_bytes());
        debug_assert!(patched);
    }

    /// Opens a read-side encapsulation: reads the declared size and fences
    /// subsequent reads at its end.
    pub fn start_read_encaps(&mut self) -> Result<(), ProtocolError> {
        let size = self.read_count()?;
        let end = self.buf.position() + size;
        if end > self.fence() {
            return Err(ProtocolError::EncapsulationMismatch);
        }
        self.read_limits.push(end);
        Ok(())
    }

    /// Closes the innermost read-side encapsulation, skipping any bytes the
    /// reader chose not to consume.
    pub fn end_read_encaps(&mut self) -> Result<(), ProtocolError> {
        let end = self
            .read_limits
            .pop()
            .ok_or(ProtocolError::EncapsulationMismatch)?;
        if !self.buf.set_position(end) {
            return Err(ProtocolError::EncapsulationMismatch);
        }
        Ok(())
    }
}
