// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Exercises the marshalling and ordering semantics of the code the
//! compiler emits, on hand-expanded replicas of its templates.

use std::cmp::Ordering;

use anyhow::Result;
use floe::{
    runtime::errors::UserException,
    wire::stream::{BasicStream, ProtocolError},
};

// struct P { int x; string s; } as the types pass expands it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct P {
    pub x: i32,
    pub s: String,
}

impl P {
    pub fn ice_write(&self, os: &mut BasicStream) {
        os.write_int(self.x);
        os.write_string(&self.s);
    }

    pub fn ice_read(is: &mut BasicStream) -> Result<Self, ProtocolError> {
        Ok(Self {
            x: is.read_int()?,
            s: is.read_string()?,
        })
    }
}

impl PartialOrd for P {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.x.partial_cmp(&other.x) {
            Some(Ordering::Equal) => {},
            ord => return ord,
        }
        self.s.partial_cmp(&other.s)
    }
}

impl Eq for P {}

impl Ord for P {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other).unwrap_or(Ordering::Equal)
    }
}

// exception A { int x; } and B extends A { int y; }, flattened base-first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExcA {
    pub x: i32,
}

impl ExcA {
    pub const ICE_ID: &'static str = "::T::A";
    pub const ICE_EXCEPTION_IDS: &'static [&'static str] =
        &["::T::A", "::Ice::UserException"];
}

impl UserException for ExcA {
    fn ice_name(&self) -> &'static str {
        Self::ICE_ID
    }

    fn ice_exception_ids(&self) -> &'static [&'static str] {
        Self::ICE_EXCEPTION_IDS
    }

    fn ice_write(&self, os: &mut BasicStream) {
        os.write_int(self.x);
    }

    fn ice_read(&mut self, is: &mut BasicStream) -> Result<(), ProtocolError> {
        self.x = is.read_int()?;
        Ok(())
    }

    fn ice_clone(&self) -> Box<dyn UserException> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExcB {
    pub x: i32,
    pub y: i32,
}

impl ExcB {
    pub const ICE_ID: &'static str = "::T::B";
    pub const ICE_EXCEPTION_IDS: &'static [&'static str] =
        &["::T::B", "::T::A", "::Ice::UserException"];
}

impl UserException for ExcB {
    fn ice_name(&self) -> &'static str {
        Self::ICE_ID
    }

    fn ice_exception_ids(&self) -> &'static [&'static str] {
        Self::ICE_EXCEPTION_IDS
    }

    fn ice_write(&self, os: &mut BasicStream) {
        os.write_int(self.x);
        os.write_int(self.y);
    }

    fn ice_read(&mut self, is: &mut BasicStream) -> Result<(), ProtocolError> {
        self.x = is.read_int()?;
        self.y = is.read_int()?;
        Ok(())
    }

    fn ice_clone(&self) -> Box<dyn UserException> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[test]
fn struct_ordering_is_lexicographic_by_field_order() {
    let a = P {
        x: 1,
        s: "b".to_string(),
    };
    let b = P {
        x: 1,
        s: "c".to_string(),
    };
    assert!(a < b);
    assert!(b > a);
    assert!(a != b);

    // First field dominates.
    let c = P {
        x: 0,
        s: "z".to_string(),
    };
    assert!(c < a);
}

#[test]
fn struct_ordering_is_total() {
    let values = [
        P { x: 3, s: "a".into() },
        P { x: 1, s: "z".into() },
        P { x: 1, s: "a".into() },
        P { x: 3, s: "a".into() },
    ];
    for a in &values {
        for b in &values {
            let holds = (a < b) as u8 + (b < a) as u8 + (a == b) as u8;
            assert_eq!(holds, 1, "exactly one relation must hold for {a:?} vs {b:?}");
        }
    }
}

#[test]
fn struct_round_trip() -> Result<()> {
    let value = P {
        x: -9,
        s: "wire".to_string(),
    };
    let mut os = BasicStream::new();
    value.ice_write(&mut os);
    let mut is = BasicStream::from_vec(os.into_vec());
    assert_eq!(P::ice_read(&mut is)?, value);
    Ok(())
}

#[test]
fn exception_body_starts_with_base_fields() -> Result<()> {
    let ex = ExcB { x: 7, y: 9 };
    let mut os = BasicStream::new();
    ex.ice_write(&mut os);

    // A.x first, then B.y.
    let mut is = BasicStream::from_vec(os.into_vec());
    assert_eq!(is.read_int()?, 7);
    assert_eq!(is.read_int()?, 9);

    let mut os = BasicStream::new();
    ex.ice_write(&mut os);
    let mut is = BasicStream::from_vec(os.into_vec());
    let mut decoded = ExcB::default();
    decoded.ice_read(&mut is)?;
    assert_eq!(decoded, ex);
    Ok(())
}

#[test]
fn exception_ids_run_base_chain_to_universal_root() {
    assert_eq!(ExcB::ICE_EXCEPTION_IDS[0], "::T::B");
    assert_eq!(
        *ExcB::ICE_EXCEPTION_IDS.last().expect("non-empty"),
        "::Ice::UserException"
    );
    // The derived exception decodes where its base is anticipated only
    // through its own identifier; the table must carry each id exactly.
    let mut os = BasicStream::new();
    os.write_string(ExcB::ICE_ID);
    let mut is = BasicStream::from_vec(os.into_vec());
    let table = ["::T::A", "::T::B"];
    assert_eq!(is.read_exception_index(&table), Ok(1));
}
