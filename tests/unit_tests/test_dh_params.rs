// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::PathBuf};

use anyhow::Result;
use floe::transport::dh_params::DhParams;

/// `SEQUENCE { INTEGER 0x00b7010203, INTEGER 2 }`, a 32-bit toy group
/// pre-encoded so the test needs no encoder of its own.
const TOY_PEM: &str = "\
-----BEGIN DH PARAMETERS-----
MAoCBQC3AQIDAgEC
-----END DH PARAMETERS-----
";

fn write_toy_pem(name: &str) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("floe-dh-{name}-{}.pem", std::process::id()));
    fs::write(&path, TOY_PEM)?;
    Ok(path)
}

#[test]
fn override_parses_pem_and_wins() -> Result<()> {
    let path = write_toy_pem("override")?;
    let mut table = DhParams::new();
    assert!(table.add(32, &path));

    // Requests at or below the override's key length hit the override.
    let group = table.get(16);
    assert_eq!(group.key_bits(), 32);
    assert_eq!(group.p, vec![0xb7, 0x01, 0x02, 0x03]);
    assert_eq!(group.g, vec![0x02]);

    // Larger requests fall through to the built-in buckets.
    assert_eq!(table.get(33).key_bits(), 512);

    fs::remove_file(path)?;
    Ok(())
}

#[test]
fn first_covering_override_wins() -> Result<()> {
    let path = write_toy_pem("ordered")?;
    let mut table = DhParams::new();
    // Inserted out of order; the list must stay sorted ascending.
    assert!(table.add(64, &path));
    assert!(table.add(32, &path));

    assert_eq!(table.get(1).key_bits(), 32);
    fs::remove_file(path)?;
    Ok(())
}

#[test]
fn unreadable_or_garbage_file_fails_silently() -> Result<()> {
    let mut table = DhParams::new();
    assert!(!table.add(1024, std::path::Path::new("/no/such/file.pem")));

    let path = std::env::temp_dir()
        .join(format!("floe-dh-garbage-{}.pem", std::process::id()));
    fs::write(&path, "not a pem at all")?;
    assert!(!table.add(1024, &path));
    fs::remove_file(path)?;
    Ok(())
}

#[test]
fn built_in_buckets_cover_all_requests() {
    let table = DhParams::new();
    assert_eq!(table.get(0).key_bits(), 512);
    assert_eq!(table.get(512).key_bits(), 512);
    assert_eq!(table.get(1024).key_bits(), 1024);
    assert_eq!(table.get(2047).key_bits(), 2048);
    assert_eq!(table.get(4097).key_bits(), 4096);
}

#[test]
fn selection_is_monotonic_with_overrides() -> Result<()> {
    let path = write_toy_pem("monotonic")?;
    let mut table = DhParams::new();
    assert!(table.add(700, &path));

    let mut last = 0u32;
    for k in [1u32, 100, 700, 701, 1024, 2048, 4096, 10_000] {
        let bits = table.get(k).key_bits();
        assert!(bits >= last, "get({k}) regressed from {last} to {bits}");
        last = bits;
    }
    fs::remove_file(path)?;
    Ok(())
}
