// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Retry policy against scripted transport failures.

use std::sync::atomic::Ordering;

use anyhow::Result;
use floe::runtime::{
    current::Context,
    errors::{Error, LocalError},
};
use serial_test::serial;

use crate::integration_tests::common::{
    ConnScript, CounterPrx, proxy_to, spawn_script_server, test_config,
};

#[test]
#[serial]
fn idempotent_call_retries_after_connection_loss() -> Result<()> {
    // First connection dies mid-call; the second one serves.
    let server = spawn_script_server(vec![
        ConnScript::DropAfterRequest,
        ConnScript::ServeOkEmpty,
    ])?;
    let cfg = test_config();
    let counter = CounterPrx::unchecked_cast(&proxy_to(server.port, &cfg)?, "");

    counter
        .refill(5, &Context::new())
        .expect("idempotent retry must succeed");
    // Two outgoing frames: the lost one and the retried one.
    assert_eq!(server.requests.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
#[serial]
fn mutating_call_surfaces_the_original_cause() -> Result<()> {
    let server = spawn_script_server(vec![ConnScript::DropAfterRequest])?;
    let cfg = test_config();
    let counter = CounterPrx::unchecked_cast(&proxy_to(server.port, &cfg)?, "");

    let err = counter.take(5, &Context::new()).expect_err("must fail");
    assert!(
        matches!(
            &err,
            Error::Local(LocalError::ConnectionLost(_) | LocalError::TransportBroken(_))
        ),
        "got {err:?}"
    );
    // Exactly one outgoing frame: no transparent duplicate send.
    assert_eq!(server.requests.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
#[serial]
fn retry_ceiling_bounds_the_attempts() -> Result<()> {
    // max_retries = 2 in the test config: initial attempt plus two
    // retries, then the failure surfaces.
    let server = spawn_script_server(vec![
        ConnScript::DropAfterRequest,
        ConnScript::DropAfterRequest,
        ConnScript::DropAfterRequest,
        ConnScript::DropAfterRequest,
    ])?;
    let cfg = test_config();
    let counter = CounterPrx::unchecked_cast(&proxy_to(server.port, &cfg)?, "");

    let err = counter.refill(5, &Context::new()).expect_err("must fail");
    assert!(matches!(&err, Error::Local(e) if e.is_retryable()), "got {err:?}");
    assert_eq!(server.requests.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
#[serial]
fn exception_identifier_outside_the_table_is_unknown_user_exception() -> Result<()> {
    let server = spawn_script_server(vec![ConnScript::UserExceptionId(
        "::Unknown::Thing".to_string(),
    )])?;
    let cfg = test_config();
    let counter = CounterPrx::unchecked_cast(&proxy_to(server.port, &cfg)?, "");

    let err = counter.take(1, &Context::new()).expect_err("must fail");
    assert!(
        matches!(
            &err,
            Error::Local(LocalError::UnknownUserException(id)) if id == "::Unknown::Thing"
        ),
        "got {err:?}"
    );
    Ok(())
}
