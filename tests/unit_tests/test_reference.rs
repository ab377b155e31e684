// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use floe::{
    cfg::config::Config,
    runtime::{identity::Identity, proxy::ObjectPrx, reference::Reference},
    transport::emitter::Endpoint,
};

#[test]
fn stringified_reference_round_trips() -> Result<()> {
    let cfg = Config::default();
    let reference = Reference::remote(
        Identity::new("depot", "bin-12"),
        "ledger",
        Endpoint::new("10.0.0.7", 10_000),
        cfg.clone(),
    );
    let s = reference.to_proxy_string();
    assert_eq!(s, "depot/bin-12 -f ledger -h 10.0.0.7 -p 10000");

    let parsed = Reference::parse_proxy(&s, &cfg)?.expect("non-null");
    assert_eq!(parsed.identity, reference.identity);
    assert_eq!(parsed.facet, reference.facet);
    assert_eq!(parsed.endpoint(), reference.endpoint());
    Ok(())
}

#[test]
fn null_proxy_is_empty_string() -> Result<()> {
    let cfg = Config::default();
    assert!(ObjectPrx::from_string("", &cfg)?.is_none());
    assert!(ObjectPrx::from_string("   ", &cfg)?.is_none());
    Ok(())
}

#[test]
fn endpointless_proxy_rejected() {
    let cfg = Config::default();
    assert!(ObjectPrx::from_string("just-a-name", &cfg).is_err());
}

#[test]
fn facet_navigation_keeps_identity_drops_capabilities() -> Result<()> {
    let cfg = Config::default();
    let base = ObjectPrx::from_string("widget -h localhost -p 9999", &cfg)?
        .expect("non-null");
    base.reference().stamp_capabilities(&["::M::Thing"]);
    assert!(base.reference().has_capability("::M::Thing"));

    let facet = base.ice_new_facet("metrics");
    assert_eq!(facet.ice_get_identity(), base.ice_get_identity());
    assert_eq!(facet.ice_get_facet(), "metrics");
    // A facet is an independent view; the type of the default facet does
    // not transfer.
    assert!(!facet.reference().has_capability("::M::Thing"));
    Ok(())
}

#[test]
fn retarget_switches_endpoint() -> Result<()> {
    let cfg = Config::default();
    let prx = ObjectPrx::from_string("widget -h old-host -p 1000", &cfg)?
        .expect("non-null");
    prx.reference()
        .retarget(Endpoint::new("new-host", 2000));
    assert_eq!(
        prx.to_string(),
        "widget -h new-host -p 2000",
        "location forward must re-aim the same identity"
    );
    Ok(())
}
