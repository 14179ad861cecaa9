//! Runtime values handed to the freezer
//!
//! `Value` is the closed set of objects the compiler front end can place in a
//! constant pool, plus the mutable containers the marshal format can carry.
//! The mutable variants exist only so the serializer can reject them.

use std::fmt;

use num_bigint::BigInt;

/// Code flag set when the function takes `*args`
pub const CO_VARARGS: i32 = 0x0004;
/// Code flag set when the function takes `**kwargs`
pub const CO_VARKEYWORDS: i32 = 0x0008;

/// A single runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Ellipsis,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Complex { real: f64, imag: f64 },
    Bytes(Vec<u8>),
    Str(String),
    Tuple(Vec<Self>),
    FrozenSet(Vec<Self>),
    Code(Box<Code>),
    List(Vec<Self>),
    Dict(Vec<(Self, Self)>),
    Set(Vec<Self>),
}

/// A compiled function or module body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Code {
    pub argcount: i32,
    pub kwonlyargcount: i32,
    pub nlocals: i32,
    pub stacksize: i32,
    pub flags: i32,
    pub code: Vec<u8>,
    pub consts: Vec<Value>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub freevars: Vec<String>,
    pub cellvars: Vec<String>,
    pub filename: String,
    pub name: String,
    pub firstlineno: i32,
    pub lnotab: Vec<u8>,
}

/// Kind tag of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    None,
    Ellipsis,
    Bool,
    Int,
    Float,
    Complex,
    Bytes,
    Str,
    Tuple,
    FrozenSet,
    Code,
    List,
    Dict,
    Set,
}

impl ValueKind {
    /// Number of kinds, used to size per-kind counter tables
    pub const COUNT: usize = 14;

    /// Host runtime type name, as `type(value).__name__` would report it
    pub fn type_name(self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Ellipsis => "ellipsis",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Complex => "complex",
            Self::Bytes => "bytes",
            Self::Str => "str",
            Self::Tuple => "tuple",
            Self::FrozenSet => "frozenset",
            Self::Code => "code",
            Self::List => "list",
            Self::Dict => "dict",
            Self::Set => "set",
        }
    }

    /// Whether the host runtime lays this kind out behind a GC header
    pub fn is_gc_tracked(self) -> bool {
        matches!(self, Self::Tuple | Self::FrozenSet)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Structural identity of a constant
///
/// Every level carries its own kind, so `(1,)` and `(True,)` never compare
/// equal. Floats are keyed by bit pattern, which keeps `0.0` and `-0.0`
/// apart and lets a NaN constant be shared. Frozenset members are sorted so
/// the key does not depend on iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstKey {
    None,
    Ellipsis,
    Bool(bool),
    Int(BigInt),
    Float(u64),
    Complex(u64, u64),
    Bytes(Vec<u8>),
    Str(String),
    Tuple(Vec<Self>),
    FrozenSet(Vec<Self>),
}

impl ConstKey {
    /// Key of a tuple built from `items`, or `None` if any item has no key
    pub fn for_tuple(items: &[Value]) -> Option<Self> {
        items
            .iter()
            .map(Value::const_key)
            .collect::<Option<Vec<_>>>()
            .map(Self::Tuple)
    }

    fn for_frozenset(items: &[Value]) -> Option<Self> {
        let mut keys = items
            .iter()
            .map(Value::const_key)
            .collect::<Option<Vec<_>>>()?;
        keys.sort();
        keys.dedup();
        Some(Self::FrozenSet(keys))
    }
}

impl Value {
    /// Kind tag of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::None => ValueKind::None,
            Self::Ellipsis => ValueKind::Ellipsis,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Complex { .. } => ValueKind::Complex,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Str(_) => ValueKind::Str,
            Self::Tuple(_) => ValueKind::Tuple,
            Self::FrozenSet(_) => ValueKind::FrozenSet,
            Self::Code(_) => ValueKind::Code,
            Self::List(_) => ValueKind::List,
            Self::Dict(_) => ValueKind::Dict,
            Self::Set(_) => ValueKind::Set,
        }
    }

    /// Deduplication key, or `None` for values that are never shared
    ///
    /// Code objects and mutable containers have no key; neither does any
    /// tuple or frozenset that contains one.
    pub fn const_key(&self) -> Option<ConstKey> {
        Some(match self {
            Self::None => ConstKey::None,
            Self::Ellipsis => ConstKey::Ellipsis,
            Self::Bool(b) => ConstKey::Bool(*b),
            Self::Int(i) => ConstKey::Int(i.clone()),
            Self::Float(f) => ConstKey::Float(f.to_bits()),
            Self::Complex { real, imag } => ConstKey::Complex(real.to_bits(), imag.to_bits()),
            Self::Bytes(b) => ConstKey::Bytes(b.clone()),
            Self::Str(s) => ConstKey::Str(s.clone()),
            Self::Tuple(items) => return ConstKey::for_tuple(items),
            Self::FrozenSet(items) => return ConstKey::for_frozenset(items),
            Self::Code(_) | Self::List(_) | Self::Dict(_) | Self::Set(_) => return None,
        })
    }

    /// Convenience constructor for integer constants
    pub fn int(value: impl Into<BigInt>) -> Self {
        Self::Int(value.into())
    }

    /// Convenience constructor for string constants
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }
}

impl Code {
    /// Number of argument slots at the front of `varnames`
    pub fn total_args(&self) -> usize {
        let mut total = self.argcount + self.kwonlyargcount;
        if self.flags & CO_VARARGS != 0 {
            total += 1;
        }
        if self.flags & CO_VARKEYWORDS != 0 {
            total += 1;
        }
        usize::try_from(total).unwrap_or(0)
    }

    /// Map each cell variable to the argument it shadows
    ///
    /// Returns `None` when no cell variable is also an argument, in which
    /// case the host leaves `co_cell2arg` as `NULL`. Cells that are not
    /// arguments map to `-1`.
    pub fn cell2arg(&self) -> Option<Vec<isize>> {
        let total_args = self.total_args().min(self.varnames.len());
        let mut used = false;
        let mapping = self
            .cellvars
            .iter()
            .map(|cell| {
                match self.varnames[..total_args]
                    .iter()
                    .position(|arg| arg == cell)
                {
                    Some(index) => {
                        used = true;
                        index as isize
                    }
                    None => -1,
                }
            })
            .collect();
        used.then_some(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_values_of_different_kinds_have_distinct_keys() {
        assert_ne!(Value::int(1).const_key(), Value::Bool(true).const_key());
        assert_ne!(Value::int(1).const_key(), Value::Float(1.0).const_key());
        assert_ne!(
            Value::Tuple(vec![Value::int(1)]).const_key(),
            Value::Tuple(vec![Value::Bool(true)]).const_key()
        );
    }

    #[test]
    fn test_nested_element_kinds_are_part_of_the_key() {
        let ints = Value::Tuple(vec![Value::Tuple(vec![Value::int(1)])]);
        let bools = Value::Tuple(vec![Value::Tuple(vec![Value::Bool(true)])]);
        assert_ne!(ints.const_key(), bools.const_key());
    }

    #[test]
    fn test_signed_zero_floats_are_distinct() {
        assert_ne!(Value::Float(0.0).const_key(), Value::Float(-0.0).const_key());
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan.const_key(), nan.const_key());
    }

    #[test]
    fn test_frozenset_key_ignores_member_order() {
        let a = Value::FrozenSet(vec![Value::str("a"), Value::int(2)]);
        let b = Value::FrozenSet(vec![Value::int(2), Value::str("a")]);
        assert_eq!(a.const_key(), b.const_key());
    }

    #[test]
    fn test_code_and_mutable_values_have_no_key() {
        assert!(Value::Code(Box::default()).const_key().is_none());
        assert!(Value::List(vec![]).const_key().is_none());
        assert!(
            Value::Tuple(vec![Value::int(1), Value::Dict(vec![])])
                .const_key()
                .is_none()
        );
    }

    #[test]
    fn test_cell2arg_maps_cells_that_shadow_arguments() {
        let code = Code {
            argcount: 2,
            varnames: vec!["a".into(), "b".into(), "tmp".into()],
            cellvars: vec!["b".into(), "inner".into()],
            ..Code::default()
        };
        assert_eq!(code.cell2arg(), Some(vec![1, -1]));
    }

    #[test]
    fn test_cell2arg_is_absent_without_argument_cells() {
        let code = Code {
            argcount: 1,
            varnames: vec!["a".into(), "x".into()],
            cellvars: vec!["x".into()],
            ..Code::default()
        };
        assert_eq!(code.cell2arg(), None);
    }

    #[test]
    fn test_total_args_counts_star_parameters() {
        let code = Code {
            argcount: 1,
            kwonlyargcount: 1,
            flags: CO_VARARGS | CO_VARKEYWORDS,
            ..Code::default()
        };
        assert_eq!(code.total_args(), 4);
    }
}
