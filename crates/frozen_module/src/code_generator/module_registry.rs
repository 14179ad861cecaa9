//! Module registry units
//!
//! This module emits:
//! - the `_frozen_modules` table, one row per module
//! - an exported init function the embedding calls once after
//!   `Py_Initialize`
//! - an exported lookup function the import hook calls by module name

use std::{fmt::Write, path::Path};

use super::render_body;
use crate::{c_literal, config::RegistryConfig, serializer::FrozenUnit};

/// One row of the lookup table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Fully qualified module name
    pub name: String,
    /// Reference expression of the module's code object
    pub code_ref: String,
    /// Whether the module is a package and needs `__path__`
    pub needs_path: bool,
    /// Enclosing package, empty for top-level modules
    pub parent: String,
    pub origin: Option<String>,
    pub cached: Option<String>,
}

impl RegistryEntry {
    /// Path text for the `origin` and `cached` columns
    pub fn path_text(path: Option<&Path>) -> Option<String> {
        path.map(|path| path.to_string_lossy().into_owned())
    }

    pub(crate) fn render_row(&self) -> String {
        format!(
            "{{{}, {}, {}, {}, {}, {}}}",
            c_literal::string_literal(self.name.as_bytes()),
            self.code_ref,
            u8::from(self.needs_path),
            c_literal::string_literal(self.parent.as_bytes()),
            optional_literal(self.origin.as_deref()),
            optional_literal(self.cached.as_deref()),
        )
    }
}

fn optional_literal(text: Option<&str>) -> String {
    text.map_or_else(
        || "NULL".to_owned(),
        |text| c_literal::string_literal(text.as_bytes()),
    )
}

/// Render a unit exposing `entries` through the configured init and lookup
/// functions
pub fn render_registry(
    unit: &FrozenUnit,
    entries: &[RegistryEntry],
    registry: &RegistryConfig,
) -> String {
    let header = format!("Frozen module registry with {} modules", entries.len());
    let mut out = render_body(unit, &header, &registry.init_function, true);

    out.push_str(
        "\nstruct _frozen_module {\n    const char *name;\n    PyObject *code;\n    int \
         needs_path;\n    const char *parent;\n    const char *origin;\n    const char \
         *cached;\n};\n\nstatic const struct _frozen_module _frozen_modules[] = {\n",
    );
    for entry in entries {
        let _ = writeln!(out, "    {},", entry.render_row());
    }
    out.push_str("    {NULL, NULL, 0, NULL, NULL, NULL},\n};\n");

    let lookup = &registry.lookup_function;
    let _ = write!(
        out,
        r#"
/* Borrowed reference to the code object of `name`, or NULL when `name` is not
   frozen. The remaining out parameters may be NULL. */
PyObject *
{lookup}(const char *name, int *needs_path, const char **parent,
         const char **origin, const char **cached)
{{
    const struct _frozen_module *mod;
    for (mod = _frozen_modules; mod->name != NULL; mod++) {{
        if (strcmp(mod->name, name) != 0) {{
            continue;
        }}
        if (needs_path != NULL) {{
            *needs_path = mod->needs_path;
        }}
        if (parent != NULL) {{
            *parent = mod->parent;
        }}
        if (origin != NULL) {{
            *origin = mod->origin;
        }}
        if (cached != NULL) {{
            *cached = mod->cached;
        }}
        return mod->code;
    }}
    return NULL;
}}
"#
    );
    out
}
