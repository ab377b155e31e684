// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The fixed 12-byte prelude carried by every wire frame:
//!
//! ```text
//! +----------------+-----+-----+------+------+------------+
//! | magic "IceP"   | pv  | ev  | type | comp | size (LE)  |
//! |     4 B        | 1 B | 1 B | 1 B  | 1 B  |    4 B     |
//! +----------------+-----+-----+------+------+------------+
//! ```
//!
//! `size` counts the whole message, prelude included. All integers are
//! little-endian.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U32};

use crate::wire::stream::ProtocolError;

/// Message magic, the literals `'I' 'c' 'e' 'P'`.
pub const MAGIC: [u8; 4] = *b"IceP";
/// Version of the invocation protocol itself.
pub const PROTOCOL_VERSION: u8 = 1;
/// Version of the marshalling rules inside encapsulations.
pub const ENCODING_VERSION: u8 = 1;
/// Length of the fixed prelude.
pub const HEADER_LEN: usize = 12;

/// All message types understood by the runtime.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request = 0,
    Reply = 1,
    ValidateConnection = 2,
    CloseConnection = 3,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Request,
            1 => Self::Reply,
            2 => Self::ValidateConnection,
            3 => Self::CloseConnection,
            _ => return None,
        })
    }
}

/// Status byte leading every reply body.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok = 0,
    UserException = 1,
    ObjectNotExist = 2,
    FacetNotExist = 3,
    OperationNotExist = 4,
    UnknownLocalException = 5,
    UnknownUserException = 6,
    UnknownException = 7,
    LocationForward = 8,
}

impl ReplyStatus {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Ok,
            1 => Self::UserException,
            2 => Self::ObjectNotExist,
            3 => Self::FacetNotExist,
            4 => Self::OperationNotExist,
            5 => Self::UnknownLocalException,
            6 => Self::UnknownUserException,
            7 => Self::UnknownException,
            8 => Self::LocationForward,
            _ => return None,
        })
    }
}

/// Typed view of the fixed prelude.
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    pub magic: [u8; 4],
    pub protocol_version: u8,
    pub encoding_version: u8,
    pub message_type: u8,
    pub compression: u8,
    pub size: U32<LittleEndian>,
}

impl FrameHeader {
    pub fn new(message_type: MessageType, size: u32) -> Self {
        Self {
            magic: MAGIC,
            protocol_version: PROTOCOL_VERSION,
            encoding_version: ENCODING_VERSION,
            message_type: message_type as u8,
            compression: 0,
            size: U32::new(size),
        }
    }

    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let hdr = Self::read_from_bytes(bytes.as_slice())
            .map_err(|_| ProtocolError::UnmarshalOutOfBounds)?;
        hdr.validate()?;
        Ok(hdr)
    }

    /// Checks magic, versions and the compression flag; returns the typed
    /// message kind.
    pub fn validate(&self) -> Result<MessageType, ProtocolError> {
        if self.magic != MAGIC {
            return Err(ProtocolError::BadMagic(self.magic));
        }
        if self.protocol_version != PROTOCOL_VERSION
            || self.encoding_version != ENCODING_VERSION
        {
            return Err(ProtocolError::UnsupportedVersion {
                protocol: self.protocol_version,
                encoding: self.encoding_version,
            });
        }
        if self.compression != 0 {
            return Err(ProtocolError::CompressionNotSupported(self.compression));
        }
        if (self.size.get() as usize) < HEADER_LEN {
            return Err(ProtocolError::FrameTooShort(self.size.get()));
        }
        MessageType::from_u8(self.message_type)
            .ok_or(ProtocolError::UnknownMessageType(self.message_type))
    }

    #[inline]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out.copy_from_slice(self.as_bytes());
        out
    }
}
