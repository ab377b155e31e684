//! Wire-level encoding: the byte buffer, the typed stream over it, and the
//! fixed frame prelude shared by requests and replies.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Contiguous byte container with a read cursor.
pub mod buffer;
/// Fixed frame header, message types and reply statuses.
pub mod header;
/// Typed marshalling/unmarshalling over a wire buffer.
pub mod stream;
