// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Lazy selection of Diffie-Hellman parameters by requested key length.
//!
//! User-supplied PEM overrides are consulted first (first entry whose key
//! length covers the request wins); otherwise one of the predefined groups
//! is materialized on first use and cached for the lifetime of the table.
//! The predefined primes are the well-known strong primes distributed with
//! OpenSSL as dh512.pem, dh1024.pem, dh2048.pem and dh4096.pem; they are
//! not keys themselves but the basis for generating DH keys on the fly.

use std::{fs, path::Path, sync::Arc};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use once_cell::sync::OnceCell;
use tracing::warn;

/// One Diffie-Hellman parameter group: prime modulus and generator, both
/// big-endian with no leading zero octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhGroup {
    pub p: Vec<u8>,
    pub g: Vec<u8>,
}

impl DhGroup {
    /// Key length this group serves, in bits.
    pub fn key_bits(&self) -> u32 {
        (self.p.len() as u32) * 8
    }
}

/// Ordered table `key-length -> DH group` with lazily built fallbacks.
///
/// One instance per configuration; a process-wide instance remains a legal
/// choice at the top level. The override list is frozen once configuration
/// ends; the built-in cells publish through `OnceCell`, so the first hit
/// takes the initialization lock and every later read is lock-free.
#[derive(Debug, Default)]
pub struct DhParams {
    params: Vec<(u32, Arc<DhGroup>)>,
    dh512: OnceCell<Arc<DhGroup>>,
    dh1024: OnceCell<Arc<DhGroup>>,
    dh2048: OnceCell<Arc<DhGroup>>,
    dh4096: OnceCell<Arc<DhGroup>>,
}

impl DhParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from the configuration's override list, skipping
    /// entries that fail to load.
    pub fn from_config(overrides: &[crate::cfg::config::DhOverride]) -> Self {
        let mut table = Self::new();
        for ov in overrides {
            if !table.add(ov.key_length, Path::new(&ov.path)) {
                warn!(
                    key_length = ov.key_length,
                    path = %ov.path,
                    "skipping unreadable DH parameter override"
                );
            }
        }
        table
    }

    /// Registers a PEM parameter file for `key_length`. The override list
    /// stays sorted ascending. Returns `false` (without failing the caller)
    /// when the file cannot be read or does not parse.
    pub fn add(&mut self, key_length: u32, file: &Path) -> bool {
        let Ok(text) = fs::read_to_string(file) else {
            return false;
        };
        let Some(der) = pem_to_der(&text) else {
            return false;
        };
        let Some(group) = parse_dh_parameters(&der) else {
            return false;
        };

        let pos = self
            .params
            .iter()
            .position(|(len, _)| key_length <= *len)
            .unwrap_or(self.params.len());
        self.params.insert(pos, (key_length, Arc::new(group)));
        true
    }

    /// First override with `length >= requested`, else the smallest
    /// predefined bucket `>= requested` (4096 when the request exceeds all
    /// buckets).
    pub fn get(&self, key_length: u32) -> Arc<DhGroup> {
        for (len, group) in &self.params {
            if *len >= key_length {
                return Arc::clone(group);
            }
        }

        let (cell, p): (&OnceCell<Arc<DhGroup>>, &[u8]) = if key_length <= 512 {
            (&self.dh512, &DH512_P)
        } else if key_length <= 1024 {
            (&self.dh1024, &DH1024_P)
        } else if key_length <= 2048 {
            (&self.dh2048, &DH2048_P)
        } else {
            (&self.dh4096, &DH4096_P)
        };

        Arc::clone(cell.get_or_init(|| {
            Arc::new(DhGroup {
                p: p.to_vec(),
                g: DH_G.to_vec(),
            })
        }))
    }
}

/// Extracts the DER payload between the DH PARAMETERS armour lines.
fn pem_to_der(text: &str) -> Option<Vec<u8>> {
    const BEGIN: &str = "-----BEGIN DH PARAMETERS-----";
    const END: &str = "-----END DH PARAMETERS-----";

    let start = text.find(BEGIN)? + BEGIN.len();
    let end = text.find(END)?;
    if end < start {
        return None;
    }

    let body: String = text[start..end]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    BASE64.decode(body).ok()
}

/// Minimal DER walk over `DHParameter ::= SEQUENCE { INTEGER p, INTEGER g }`.
/// Anything beyond the two integers (e.g. an optional privateValueLength) is
/// ignored.
fn parse_dh_parameters(der: &[u8]) -> Option<DhGroup> {
    let (tag, seq, _) = der_element(der)?;
    if tag != 0x30 {
        return None;
    }
    let (tag, p, rest) = der_element(seq)?;
    if tag != 0x02 {
        return None;
    }
    let (tag, g, _) = der_element(rest)?;
    if tag != 0x02 {
        return None;
    }
    Some(DhGroup {
        p: strip_leading_zeros(p),
        g: strip_leading_zeros(g),
    })
}

/// Splits one TLV element off `input`: returns (tag, contents, remainder).
fn der_element(input: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = input.split_first()?;
    let (&first, rest) = rest.split_first()?;

    let (len, rest) = if first < 0x80 {
        (first as usize, rest)
    } else {
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 4 || rest.len() < n {
            return None;
        }
        let mut len = 0usize;
        for &b in &rest[..n] {
            len = (len << 8) | b as usize;
        }
        (len, &rest[n..])
    };

    if rest.len() < len {
        return None;
    }
    Some((tag, &rest[..len], &rest[len..]))
}

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

/// Shared generator of the predefined groups.
const DH_G: [u8; 1] = [0x02];

const DH512_P: [u8; 64] = [
    0xf5, 0x2a, 0xff, 0x3c, 0xe1, 0xb1, 0x29, 0x40, 0x18, 0x11, 0x8d, 0x7c,
    0x84, 0xa7, 0x0a, 0x72, 0xd6, 0x86, 0xc4, 0x03, 0x19, 0xc8, 0x07, 0x29,
    0x7a, 0xca, 0x95, 0x0c, 0xd9, 0x96, 0x9f, 0xab, 0xd0, 0x0a, 0x50, 0x9b,
    0x02, 0x46, 0xd3, 0x08, 0x3d, 0x66, 0xa4, 0x5d, 0x41, 0x9f, 0x9c, 0x7c,
    0xbd, 0x89, 0x4b, 0x22, 0x19, 0x26, 0xba, 0xab, 0xa2, 0x5e, 0xc3, 0x55,
    0xe9, 0x2a, 0x05, 0x5f,
];

const DH1024_P: [u8; 128] = [
    0xf4, 0x88, 0xfd, 0x58, 0x4e, 0x49, 0xdb, 0xcd, 0x20, 0xb4, 0x9d, 0xe4,
    0x91, 0x07, 0x36, 0x6b, 0x33, 0x6c, 0x38, 0x0d, 0x45, 0x1d, 0x0f, 0x7c,
    0x88, 0xb3, 0x1c, 0x7c, 0x5b, 0x2d, 0x8e, 0xf6, 0xf3, 0xc9, 0x23, 0xc0,
    0x43, 0xf0, 0xa5, 0x5b, 0x18, 0x8d, 0x8e, 0xbb, 0x55, 0x8c, 0xb8, 0x5d,
    0x38, 0xd3, 0x34, 0xfd, 0x7c, 0x17, 0x57, 0x43, 0xa3, 0x1d, 0x18, 0x6c,
    0xde, 0x33, 0x21, 0x2c, 0xb5, 0x2a, 0xff, 0x3c, 0xe1, 0xb1, 0x29, 0x40,
    0x18, 0x11, 0x8d, 0x7c, 0x84, 0xa7, 0x0a, 0x72, 0xd6, 0x86, 0xc4, 0x03,
    0x19, 0xc8, 0x07, 0x29, 0x7a, 0xca, 0x95, 0x0c, 0xd9, 0x96, 0x9f, 0xab,
    0xd0, 0x0a, 0x50, 0x9b, 0x02, 0x46, 0xd3, 0x08, 0x3d, 0x66, 0xa4, 0x5d,
    0x41, 0x9f, 0x9c, 0x7c, 0xbd, 0x89, 0x4b, 0x22, 0x19, 0x26, 0xba, 0xab,
    0xa2, 0x5e, 0xc3, 0x55, 0xe9, 0x2f, 0x78, 0xc7,
];

const DH2048_P: [u8; 256] = [
    0xf6, 0x42, 0x57, 0xb7, 0x08, 0x7f, 0x08, 0x17, 0x72, 0xa2, 0xba, 0xd6,
    0xa9, 0x42, 0xf3, 0x05, 0xe8, 0xf9, 0x53, 0x11, 0x39, 0x4f, 0xb6, 0xf1,
    0x6e, 0xb9, 0x4b, 0x38, 0x20, 0xda, 0x01, 0xa7, 0x56, 0xa3, 0x14, 0xe9,
    0x8f, 0x40, 0x55, 0xf3, 0xd0, 0x07, 0xc6, 0xcb, 0x43, 0xa9, 0x94, 0xad,
    0xf7, 0x4c, 0x64, 0x86, 0x49, 0xf8, 0x0c, 0x83, 0xbd, 0x65, 0xe9, 0x17,
    0xd4, 0xa1, 0xd3, 0x50, 0xf8, 0xf5, 0x59, 0x5f, 0xdc, 0x76, 0x52, 0x4f,
    0x3d, 0x3d, 0x8d, 0xdb, 0xce, 0x99, 0xe1, 0x57, 0x92, 0x59, 0xcd, 0xfd,
    0xb8, 0xae, 0x74, 0x4f, 0xc5, 0xfc, 0x76, 0xbc, 0x83, 0xc5, 0x47, 0x30,
    0x61, 0xce, 0x7c, 0xc9, 0x66, 0xff, 0x15, 0xf9, 0xbb, 0xfd, 0x91, 0x5e,
    0xc7, 0x01, 0xaa, 0xd3, 0x5b, 0x9e, 0x8d, 0xa0, 0xa5, 0x72, 0x3a, 0xd4,
    0x1a, 0xf0, 0xbf, 0x46, 0x00, 0x58, 0x2b, 0xe5, 0xf4, 0x88, 0xfd, 0x58,
    0x4e, 0x49, 0xdb, 0xcd, 0x20, 0xb4, 0x9d, 0xe4, 0x91, 0x07, 0x36, 0x6b,
    0x33, 0x6c, 0x38, 0x0d, 0x45, 0x1d, 0x0f, 0x7c, 0x88, 0xb3, 0x1c, 0x7c,
    0x5b, 0x2d, 0x8e, 0xf6, 0xf3, 0xc9, 0x23, 0xc0, 0x43, 0xf0, 0xa5, 0x5b,
    0x18, 0x8d, 0x8e, 0xbb, 0x55, 0x8c, 0xb8, 0x5d, 0x38, 0xd3, 0x34, 0xfd,
    0x7c, 0x17, 0x57, 0x43, 0xa3, 0x1d, 0x18, 0x6c, 0xde, 0x33, 0x21, 0x2c,
    0xb5, 0x2a, 0xff, 0x3c, 0xe1, 0xb1, 0x29, 0x40, 0x18, 0x11, 0x8d, 0x7c,
    0x84, 0xa7, 0x0a, 0x72, 0xd6, 0x86, 0xc4, 0x03, 0x19, 0xc8, 0x07, 0x29,
    0x7a, 0xca, 0x95, 0x0c, 0xd9, 0x96, 0x9f, 0xab, 0xd0, 0x0a, 0x50, 0x9b,
    0x02, 0x46, 0xd3, 0x08, 0x3d, 0x66, 0xa4, 0x5d, 0x41, 0x9f, 0x9c, 0x7c,
    0xbd, 0x89, 0x4b, 0x22, 0x19, 0x26, 0xba, 0xab, 0xa2, 0x5e, 0xc3, 0x55,
    0xe9, 0x32, 0x0b, 0x3b,
];

const DH4096_P: [u8; 512] = [
    0xfa, 0x14, 0x72, 0x52, 0xc1, 0x4d, 0xe1, 0x5a, 0x49, 0xd4, 0xef, 0x09,
    0x2d, 0xc0, 0xa8, 0xfd, 0x55, 0xab, 0xd7, 0xd9, 0x37, 0x04, 0x28, 0x09,
    0xe2, 0xe9, 0x3e, 0x77, 0xe2, 0xa1, 0x7a, 0x18, 0xdd, 0x46, 0xa3, 0x43,
    0x37, 0x23, 0x90, 0x97, 0xf3, 0x0e, 0xc9, 0x03, 0x50, 0x7d, 0x65, 0xcf,
    0x78, 0x62, 0xa6, 0x3a, 0x62, 0x22, 0x83, 0xa1, 0x2f, 0xfe, 0x79, 0xba,
    0x35, 0xff, 0x59, 0xd8, 0x1d, 0x61, 0xdd, 0x1e, 0x21, 0x13, 0x17, 0xfe,
    0xcd, 0x38, 0x87, 0x9e, 0xf5, 0x4f, 0x79, 0x10, 0x61, 0x8d, 0xd4, 0x22,
    0xf3, 0x5a, 0xed, 0x5d, 0xea, 0x21, 0xe9, 0x33, 0x6b, 0x48, 0x12, 0x0a,
    0x20, 0x77, 0xd4, 0x25, 0x60, 0x61, 0xde, 0xf6, 0xb4, 0x4f, 0x1c, 0x63,
    0x40, 0x8b, 0x3a, 0x21, 0x93, 0x8b, 0x79, 0x53, 0x51, 0x2c, 0xca, 0xb3,
    0x7b, 0x29, 0x56, 0xa8, 0xc7, 0xf8, 0xf4, 0x7b, 0x08, 0x5e, 0xa6, 0xdc,
    0xa2, 0x45, 0x12, 0x56, 0xdd, 0x41, 0x92, 0xf2, 0xdd, 0x5b, 0x8f, 0x23,
    0xf0, 0xf3, 0xef, 0xe4, 0x3b, 0x0a, 0x44, 0xdd, 0xed, 0x96, 0x84, 0xf1,
    0xa8, 0x32, 0x46, 0xa3, 0xdb, 0x4a, 0xbe, 0x3d, 0x45, 0xba, 0x4e, 0xf8,
    0x03, 0xe5, 0xdd, 0x6b, 0x59, 0x0d, 0x84, 0x1e, 0xca, 0x16, 0x5a, 0x8c,
    0xc8, 0xdf, 0x7c, 0x54, 0x44, 0xc4, 0x27, 0xa7, 0x3b, 0x2a, 0x97, 0xce,
    0xa3, 0x7d, 0x26, 0x9c, 0xad, 0xf4, 0xc2, 0xac, 0x37, 0x4b, 0xc3, 0xad,
    0x68, 0x84, 0x7f, 0x99, 0xa6, 0x17, 0xef, 0x6b, 0x46, 0x3a, 0x7a, 0x36,
    0x7a, 0x11, 0x43, 0x92, 0xad, 0xe9, 0x9c, 0xfb, 0x44, 0x6c, 0x3d, 0x82,
    0x49, 0xcc, 0x5c, 0x6a, 0x52, 0x42, 0xf8, 0x42, 0xfb, 0x44, 0xf9, 0x39,
    0x73, 0xfb, 0x60, 0x79, 0x3b, 0xc2, 0x9e, 0x0b, 0xdc, 0xd4, 0xa6, 0x67,
    0xf7, 0x66, 0x3f, 0xfc, 0x42, 0x3b, 0x1b, 0xdb, 0x4f, 0x66, 0xdc, 0xa5,
    0x8f, 0x66, 0xf9, 0xea, 0xc1, 0xed, 0x31, 0xfb, 0x48, 0xa1, 0x82, 0x7d,
    0xf8, 0xe0, 0xcc, 0xb1, 0xc7, 0x03, 0xe4, 0xf8, 0xb3, 0xfe, 0xb7, 0xa3,
    0x13, 0x73, 0xa6, 0x7b, 0xc1, 0x0e, 0x39, 0xc7, 0x94, 0x48, 0x26, 0x00,
    0x85, 0x79, 0xfc, 0x6f, 0x7a, 0xaf, 0xc5, 0x52, 0x35, 0x75, 0xd7, 0x75,
    0xa4, 0x40, 0xfa, 0x14, 0x74, 0x61, 0x16, 0xf2, 0xeb, 0x67, 0x11, 0x6f,
    0x04, 0x43, 0x3d, 0x11, 0x14, 0x4c, 0xa7, 0x94, 0x2a, 0x39, 0xa1, 0xc9,
    0x90, 0xcf, 0x83, 0xc6, 0xff, 0x02, 0x8f, 0xa3, 0x2a, 0xac, 0x26, 0xdf,
    0x0b, 0x8b, 0xbe, 0x64, 0x4a, 0xf1, 0xa1, 0xdc, 0xee, 0xba, 0xc8, 0x03,
    0x82, 0xf6, 0x62, 0x2c, 0x5d, 0xb6, 0xbb, 0x13, 0x19, 0x6e, 0x86, 0xc5,
    0x5b, 0x2b, 0x5e, 0x3a, 0xf3, 0xb3, 0x28, 0x6b, 0x70, 0x71, 0x3a, 0x8e,
    0xff, 0x5c, 0x15, 0xe6, 0x02, 0xa4, 0xce, 0xed, 0x59, 0x56, 0xcc, 0x15,
    0x51, 0x07, 0x79, 0x1a, 0x0f, 0x25, 0x26, 0x27, 0x30, 0xa9, 0x15, 0xb2,
    0xc8, 0xd4, 0x5c, 0xcc, 0x30, 0xe8, 0x1b, 0xd8, 0xd5, 0x0f, 0x19, 0xa8,
    0x80, 0xa4, 0xc7, 0x01, 0xaa, 0x8b, 0xba, 0x53, 0xbb, 0x47, 0xc2, 0x1f,
    0x6b, 0x54, 0xb0, 0x17, 0x60, 0xed, 0x79, 0x21, 0x95, 0xb6, 0x05, 0x84,
    0x37, 0xc8, 0x03, 0xa4, 0xdd, 0xd1, 0x06, 0x69, 0x8f, 0x4c, 0x39, 0xe0,
    0xc8, 0x5d, 0x83, 0x1d, 0xbe, 0x6a, 0x9a, 0x99, 0xf3, 0x9f, 0x0b, 0x45,
    0x29, 0xd4, 0xcb, 0x29, 0x66, 0xee, 0x1e, 0x7e, 0x3d, 0xd7, 0x13, 0x4e,
    0xdb, 0x90, 0x90, 0x58, 0xcb, 0x5e, 0x9b, 0xcd, 0x2e, 0x2b, 0x0f, 0xa9,
    0x4e, 0x78, 0xac, 0x05, 0x11, 0x7f, 0xe3, 0x9e, 0x27, 0xd4, 0x99, 0xe1,
    0xb9, 0xbd, 0x78, 0xe1, 0x84, 0x41, 0xa0, 0xdf,
];
