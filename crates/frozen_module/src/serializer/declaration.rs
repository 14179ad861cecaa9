//! Forward declarations of static objects

use std::fmt::Write;

use crate::{layout, value::ValueKind};

/// Handle of a declaration inside one serializer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeclId(pub(crate) usize);

/// C type a declaration is emitted with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructType {
    /// Fixed-size struct declared by the host headers
    Host(&'static str),
    /// Anonymous struct; lists the members following the object header
    Inline(Vec<String>),
}

/// One static object definition
///
/// The reference count stays mutable until the unit is rendered, since every
/// later reference to the object bumps it.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub symbol: String,
    pub kind: ValueKind,
    pub refcount: usize,
    pub struct_type: StructType,
    pub type_object: &'static str,
    /// `Some` for variable-size objects
    pub ob_size: Option<isize>,
    /// Initializers of the members after the object header, in order
    pub fields: Vec<String>,
    pub comment: Option<String>,
    /// Auxiliary definitions the object points into
    pub prelude: Vec<String>,
}

impl Declaration {
    /// Reference expression other initializers embed
    pub fn reference(&self) -> String {
        layout::object_ref(&self.symbol, self.kind.is_gc_tracked())
    }

    /// Render the C definition
    pub fn render(&self) -> String {
        let gc_tracked = self.kind.is_gc_tracked();
        let mut out = String::new();

        for prelude in &self.prelude {
            out.push_str(prelude);
            out.push_str("\n\n");
        }
        if let Some(comment) = &self.comment {
            let _ = writeln!(out, "/* {comment} */");
        }

        match &self.struct_type {
            StructType::Host(name) => {
                let _ = writeln!(out, "static {name} {} = {{", self.symbol);
            }
            StructType::Inline(members) => {
                out.push_str("static struct {\n");
                if gc_tracked {
                    out.push_str("    PyGC_Head _gc_head;\n");
                }
                if self.ob_size.is_some() {
                    out.push_str("    PyObject_VAR_HEAD\n");
                } else {
                    out.push_str("    PyObject_HEAD\n");
                }
                for member in members {
                    let _ = writeln!(out, "    {member}");
                }
                let _ = writeln!(out, "}} {} = {{", self.symbol);
            }
        }

        if gc_tracked {
            let _ = writeln!(out, "    {},", layout::GC_HEAD_UNTRACKED);
        }
        match self.ob_size {
            Some(size) => {
                let _ = writeln!(
                    out,
                    "    {{{{{}, &{}}}, {size}}},",
                    self.refcount, self.type_object
                );
            }
            None => {
                let _ = writeln!(out, "    {{{}, &{}}},", self.refcount, self.type_object);
            }
        }
        for field in &self.fields {
            let _ = writeln!(out, "    {field},");
        }
        out.push_str("};\n");
        out
    }
}

/// Brace-enclosed initializer with one element per line
pub(crate) fn braced_list(items: &[String]) -> String {
    let mut out = String::from("{\n");
    for item in items {
        let _ = writeln!(out, "        {item},");
    }
    out.push_str("    }");
    out
}
