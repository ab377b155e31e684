// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Text-level properties of the compiler's output: pass ordering, sorted
//! dispatch tables and id arrays, throws decoding, retry shape.

use anyhow::Result;
use floe::slice::{ast::Unit, r#gen::Gen, table::TypeTable};

fn warehouse_unit() -> Unit {
    serde_yaml::from_str(
        r#"
name: warehouse
modules:
  - name: Warehouse
    contents:
      - kind: enum
        name: Grade
        enumerators: [Bronze, Silver, Gold]
      - kind: struct
        name: Lot
        members:
          - { name: count, type: int }
          - { name: label, type: string }
      - kind: sequence
        name: LotSeq
        element: "::Warehouse::Lot"
      - kind: dictionary
        name: Stock
        key: string
        value: int
      - kind: exception
        name: Fault
        members: [{ name: code, type: int }]
      - kind: exception
        name: OutOfStock
        base: "::Warehouse::Fault"
        members: [{ name: missing, type: int }]
      - kind: class
        name: Auditor
        interface: true
        operations:
          - name: verify
            idempotent: true
            inputs: [{ name: lot, type: "::Warehouse::Lot" }]
            returns: bool
      - kind: class
        name: Counter
        interface: true
        bases: ["::Warehouse::Auditor"]
        operations:
          - name: take
            inputs: [{ name: amount, type: int }]
            returns: long
            throws: ["::Warehouse::OutOfStock", "::Warehouse::Fault"]
          - name: refill
            idempotent: true
            inputs: [{ name: amount, type: int }]
"#,
    )
    .expect("valid fixture")
}

fn generate() -> Result<String> {
    let unit = warehouse_unit();
    let table = TypeTable::build(&[unit.clone()])?;
    let generator = Gen::new(&table, None);
    Ok(generator.generate(&unit, "warehouse.slice.yaml")?)
}

fn offset(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("`{needle}' not found in generated code"))
}

#[test]
fn header_names_the_source_unit() -> Result<()> {
    let code = generate()?;
    assert!(code.starts_with("// Generated by slice2rs from `warehouse.slice.yaml'."));
    Ok(())
}

#[test]
fn passes_run_in_canonical_order() -> Result<()> {
    let code = generate()?;
    let proxy_decl = offset(&code, "pub struct CounterPrx {");
    let object_decl = offset(&code, "pub const COUNTER_ID: &str");
    let cast_hooks = offset(&code, "pub fn checked_cast(");
    let handles = offset(&code, "pub type CounterPtr");
    let types = offset(&code, "pub struct OutOfStock {");
    let proxy_ops = offset(&code, "pub fn take(&self, amount: i32");
    let delegate_trait = offset(&code, "trait CounterDelegate {");
    let delegate_m = offset(&code, "struct CounterDelegateM<'a>");
    let delegate_d = offset(&code, "struct CounterDelegateD<'a>");
    let object = offset(&code, "pub trait Counter: Send + Sync {");

    let mut order = vec![
        proxy_decl,
        object_decl,
        cast_hooks,
        handles,
        types,
        proxy_ops,
        delegate_trait,
        delegate_m,
        delegate_d,
        object,
    ];
    let sorted = {
        let mut s = order.clone();
        s.sort_unstable();
        s
    };
    assert_eq!(order, sorted, "emission passes out of canonical order");
    order.dedup();
    assert_eq!(order.len(), 10);
    Ok(())
}

#[test]
fn dispatch_table_is_sorted_with_universal_ops() -> Result<()> {
    let code = generate()?;
    // Counter inherits verify from Auditor; the table is the transitive
    // operation set plus the universal pair, sorted, deduplicated.
    let table_src = [
        "\"ice_isA\",",
        "\"ice_ping\",",
        "\"refill\",",
        "\"take\",",
        "\"verify\",",
    ];
    let server = &code[offset(&code, "pub struct CounterServer")..];
    let table_at = offset(server, "const OPERATIONS: &'static [&'static str] = &[");
    let mut last = 0;
    for entry in table_src {
        let at = offset(&server[table_at..], entry);
        assert!(at > last, "`{entry}' out of order in dispatch table");
        last = at;
    }
    Ok(())
}

#[test]
fn interface_ids_are_strictly_ascending() -> Result<()> {
    let code = generate()?;
    let ids_at = offset(&code, "pub const COUNTER_IDS: &[&str] = &[");
    let block = &code[ids_at..ids_at + 300];
    let end = offset(block, "];");
    let ids: Vec<&str> = block[..end]
        .lines()
        .filter_map(|l| l.trim().strip_prefix('"'))
        .filter_map(|l| l.strip_suffix("\","))
        .collect();
    assert!(ids.contains(&"::Ice::Object"));
    assert!(ids.contains(&"::Warehouse::Auditor"));
    assert!(ids.contains(&"::Warehouse::Counter"));
    assert!(
        ids.windows(2).all(|w| w[0] < w[1]),
        "ids not strictly ascending: {ids:?}"
    );

    // The class-id chain for type-identity queries closes with the
    // universal object id.
    let class_ids_at = offset(&code, "pub const COUNTER_CLASS_IDS: &[&str] = &[");
    let block = &code[class_ids_at..class_ids_at + 120];
    assert!(block.contains("\"::Ice::Object\","));
    Ok(())
}

#[test]
fn throws_table_sorted_and_exhaustively_matched() -> Result<()> {
    let code = generate()?;
    let m_at = offset(&code, "struct CounterDelegateM<'a>");
    let remote = &code[m_at..];
    let throws_at = offset(remote, "const __THROWS: &[&str] = &[");
    let block = &remote[throws_at..throws_at + 200];
    // Sorted: Fault before OutOfStock.
    let fault = offset(block, "\"::Warehouse::Fault\",");
    let oos = offset(block, "\"::Warehouse::OutOfStock\",");
    assert!(fault < oos);
    // Each index decodes its exception type.
    assert!(remote.contains("0 => {"));
    assert!(remote.contains("1 => {"));
    assert!(remote.contains("let mut __ex = super::Warehouse::Fault::default();"));
    assert!(remote.contains("let mut __ex = super::Warehouse::OutOfStock::default();"));
    Ok(())
}

#[test]
fn retry_policy_follows_idempotency() -> Result<()> {
    let code = generate()?;
    let take_at = offset(&code, "pub fn take(&self, amount: i32");
    let refill_at = offset(&code, "pub fn refill(&self, amount: i32");
    let take_src = &code[take_at..(take_at + 2600).min(code.len())];
    let refill_src = &code[refill_at..(refill_at + 2600).min(code.len())];

    // Mutating operation: the first mid-send failure surfaces.
    assert!(take_src.contains("rethrow_exception"));
    // Idempotent operation: the non-repeatable wrapper unwraps and retries.
    assert!(refill_src.contains("handle_exception(*__inner, &mut __attempts)?"));
    Ok(())
}

#[test]
fn exception_fields_flatten_base_first() -> Result<()> {
    let code = generate()?;
    let at = offset(&code, "pub struct OutOfStock {");
    let block = &code[at..at + 200];
    let code_field = offset(block, "pub code: i32,");
    let missing_field = offset(block, "pub missing: i32,");
    assert!(code_field < missing_field, "base field must precede derived");
    Ok(())
}

#[test]
fn enum_marshals_by_cardinality() -> Result<()> {
    let code = generate()?;
    assert!(code.contains("pub const CARDINALITY: usize = 3;"));
    assert!(code.contains("os.write_enum(self as i64, Self::CARDINALITY);"));
    Ok(())
}

#[test]
fn sequence_reader_grows_one_element_at_a_time() -> Result<()> {
    let code = generate()?;
    let at = offset(&code, "pub fn read_lot_seq(");
    let block = &code[at..at + 500];
    assert!(block.contains("let mut sz = is.read_count()?;"));
    assert!(block.contains("while sz > 0 {"));
    assert!(!block.contains("with_capacity"), "reader must not pre-size");
    Ok(())
}

#[test]
fn dll_export_is_recorded_in_header_only() -> Result<()> {
    let unit = warehouse_unit();
    let table = TypeTable::build(&[unit.clone()])?;
    let generator = Gen::new(&table, Some("WAREHOUSE_API".to_string()));
    let code = generator.generate(&unit, "warehouse.slice.yaml")?;
    assert!(code.contains("// Export: WAREHOUSE_API"));
    Ok(())
}

#[test]
fn collocated_delegate_downcasts_to_server() -> Result<()> {
    let code = generate()?;
    let at = offset(&code, "struct CounterDelegateD<'a>");
    let block = &code[at..];
    assert!(block.contains("downcast_ref::<CounterServer>()"));
    assert!(block.contains("guard_direct(__THROWS"));
    Ok(())
}

#[test]
fn cross_unit_references_enter_sibling_modules() -> Result<()> {
    let base: Unit = serde_yaml::from_str(
        r#"
name: base
modules:
  - name: Base
    contents:
      - kind: struct
        name: Stamp
        members: [{ name: tick, type: long }]
"#,
    )?;
    let derived: Unit = serde_yaml::from_str(
        r#"
name: derived
includes: [base]
modules:
  - name: Derived
    contents:
      - kind: class
        name: Clock
        interface: true
        operations:
          - name: stamp
            returns: "::Base::Stamp"
"#,
    )?;
    let table = TypeTable::build(&[base, derived.clone()])?;
    let code = Gen::new(&table, None).generate(&derived, "derived.yaml")?;
    assert!(
        code.contains("super::super::base::Base::Stamp"),
        "cross-unit type paths must route through the sibling module"
    );
    Ok(())
}
