// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::BTreeMap;

use anyhow::Result;
use floe::wire::stream::{BasicStream, ProtocolError};
use hex_literal::hex;

#[test]
fn int_sequence_wire_bytes() -> Result<()> {
    // [1, 2, 3] as a sequence of ints: count then elements, little-endian.
    let mut os = BasicStream::new();
    os.write_int(3);
    for v in [1i32, 2, 3] {
        os.write_int(v);
    }
    assert_eq!(
        os.as_slice(),
        hex!("03 00 00 00 01 00 00 00 02 00 00 00 03 00 00 00")
    );

    let mut is = BasicStream::from_vec(os.into_vec());
    let mut sz = is.read_count()?;
    let mut decoded = Vec::new();
    while sz > 0 {
        decoded.push(is.read_int()?);
        sz -= 1;
    }
    assert_eq!(decoded, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn primitive_round_trips() -> Result<()> {
    let mut os = BasicStream::new();
    os.write_byte(0x7f);
    os.write_bool(true);
    os.write_short(-2);
    os.write_int(-70_000);
    os.write_long(1 << 40);
    os.write_float(1.5);
    os.write_double(-2.25);
    os.write_string("héllo");

    let mut is = BasicStream::from_vec(os.into_vec());
    assert_eq!(is.read_byte()?, 0x7f);
    assert!(is.read_bool()?);
    assert_eq!(is.read_short()?, -2);
    assert_eq!(is.read_int()?, -70_000);
    assert_eq!(is.read_long()?, 1 << 40);
    assert_eq!(is.read_float()?, 1.5);
    assert_eq!(is.read_double()?, -2.25);
    assert_eq!(is.read_string()?, "héllo");
    Ok(())
}

#[test]
fn little_endian_layout() {
    let mut os = BasicStream::new();
    os.write_short(0x0102);
    os.write_int(0x01020304);
    os.write_long(0x0102030405060708);
    assert_eq!(
        os.as_slice(),
        hex!("02 01 04 03 02 01 08 07 06 05 04 03 02 01")
    );
}

#[test]
fn string_has_no_terminator() {
    let mut os = BasicStream::new();
    os.write_string("ab");
    assert_eq!(os.as_slice(), hex!("02 00 00 00 61 62"));
}

#[test]
fn map_round_trips_in_sender_order() -> Result<()> {
    let mut ctx = BTreeMap::new();
    ctx.insert("retry".to_string(), "no".to_string());
    ctx.insert("trace".to_string(), "1".to_string());

    let mut os = BasicStream::new();
    os.write_string_map(&ctx);
    let mut is = BasicStream::from_vec(os.into_vec());
    assert_eq!(is.read_string_map()?, ctx);
    Ok(())
}

#[test]
fn enum_width_follows_cardinality() -> Result<()> {
    let mut os = BasicStream::new();
    os.write_enum(5, 100);
    assert_eq!(os.len(), 1);

    let mut os = BasicStream::new();
    os.write_enum(5, 1000);
    assert_eq!(os.len(), 2);

    let mut os = BasicStream::new();
    os.write_enum(5, 40_000);
    assert_eq!(os.len(), 4);

    let mut os = BasicStream::new();
    os.write_enum(5, 3_000_000_000);
    assert_eq!(os.len(), 8);

    let mut is = BasicStream::from_vec(os.into_vec());
    assert_eq!(is.read_enum(3_000_000_000)?, 5);
    Ok(())
}

#[test]
fn negative_counts_rejected() {
    let mut os = BasicStream::new();
    os.write_int(-1);
    let mut is = BasicStream::from_vec(os.into_vec());
    assert_eq!(is.read_count(), Err(ProtocolError::NegativeCount(-1)));
}

#[test]
fn proxy_presence_by_emptiness() -> Result<()> {
    let mut os = BasicStream::new();
    os.write_proxy_string(None);
    os.write_proxy_string(Some("x -h h -p 1"));
    let mut is = BasicStream::from_vec(os.into_vec());
    assert_eq!(is.read_proxy_string()?, None);
    assert_eq!(is.read_proxy_string()?, Some("x -h h -p 1".to_string()));
    Ok(())
}

#[test]
fn truncated_frame_is_protocol_error() {
    let mut os = BasicStream::new();
    os.write_string("abcdef");
    let mut bytes = os.into_vec();
    bytes.truncate(6);

    let mut is = BasicStream::from_vec(bytes);
    assert_eq!(is.read_string(), Err(ProtocolError::UnmarshalOutOfBounds));
}
