//! C translation units built around a serialized object graph
//!
//! Both output kinds share the same skeleton:
//! - the preamble with the layout macros
//! - every static declaration, children first, ending with the deferred hash
//!   table
//! - the startup fixup routine
//! - an init function that accounts for singleton references and patches
//!   deferred hashes
//!
//! and differ only in the entry point appended at the end.

pub mod module_registry;
pub mod script;


use std::fmt::Write;

pub use module_registry::{RegistryEntry, render_registry};
pub use script::render_script;

use crate::{layout, serializer::FrozenUnit};

/// Name of the init function in script units
const SCRIPT_INIT_FUNCTION: &str = "_frozen_init";

/// Everything up to and including the init function
fn render_body(unit: &FrozenUnit, header: &str, init_function: &str, exported: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "/* {header} */");
    let _ = writeln!(
        out,
        "/* Generated by frozen_module {}. Do not edit. */\n",
        env!("CARGO_PKG_VERSION")
    );
    out.push_str(layout::PREAMBLE);
    out.push('\n');
    out.push_str(&unit.render_declarations());
    out.push('\n');
    out.push_str(layout::HASH_FIXUP);
    out.push('\n');
    out.push_str(&render_init_function(unit, init_function, exported));
    out
}

fn render_init_function(unit: &FrozenUnit, name: &str, exported: bool) -> String {
    let mut out = String::new();
    if !exported {
        out.push_str("static ");
    }
    let _ = writeln!(out, "void\n{name}(void)\n{{");
    for adjustment in &unit.refcount_adjustments {
        let _ = writeln!(out, "    {adjustment}");
    }
    out.push_str("    _frozen_fixup_hashes();\n}\n");
    out
}
