//! Per-kind encoders
//!
//! Each encoder resolves references to its children first, then appends one
//! declaration laid out exactly like the host's object of that kind.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{ToPrimitive, Zero};

use super::{DeclId, Declaration, DeferredHash, Serializer, StructType, declaration::braced_list};
use crate::{
    c_literal,
    error::FreezeError,
    hashing::{frozenset_hash, is_statically_hashable, static_hash},
    layout::{self, PYLONG_SHIFT, SET_MINSIZE},
    value::{Code, Value, ValueKind},
};

/// Digits of `magnitude` in the host's integer radix, least significant first
pub(crate) fn pylong_digits(magnitude: &BigUint) -> Vec<u32> {
    let mask = BigUint::from((1u32 << PYLONG_SHIFT) - 1);
    let mut rest = magnitude.clone();
    let mut digits = Vec::new();
    while !rest.is_zero() {
        digits.push((&rest & &mask).to_u32().unwrap_or_default());
        rest >>= PYLONG_SHIFT;
    }
    digits
}

/// Storage class of a string's code points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrWidth {
    Ascii,
    Ucs1,
    Ucs2,
    Ucs4,
}

impl StrWidth {
    fn of(code_points: &[u32]) -> Self {
        match code_points.iter().copied().max().unwrap_or(0) {
            0..=0x7f => Self::Ascii,
            0x80..=0xff => Self::Ucs1,
            0x100..=0xffff => Self::Ucs2,
            _ => Self::Ucs4,
        }
    }

    fn kind_constant(self) -> &'static str {
        match self {
            Self::Ascii | Self::Ucs1 => "PyUnicode_1BYTE_KIND",
            Self::Ucs2 => "PyUnicode_2BYTE_KIND",
            Self::Ucs4 => "PyUnicode_4BYTE_KIND",
        }
    }

    fn unit_type(self) -> &'static str {
        match self {
            Self::Ascii | Self::Ucs1 => "Py_UCS1",
            Self::Ucs2 => "Py_UCS2",
            Self::Ucs4 => "Py_UCS4",
        }
    }
}

impl Serializer {
    pub(super) fn encode_int(&mut self, value: &BigInt) -> DeclId {
        let digits = pylong_digits(value.magnitude());
        let ndigits = digits.len() as isize;
        let ob_size = if value.sign() == Sign::Minus {
            -ndigits
        } else {
            ndigits
        };

        let symbol = self.gensym(ValueKind::Int);
        let (struct_type, digit_init) = if digits.len() <= 1 {
            (
                StructType::Host("PyLongObject"),
                format!("{{{}}}", digits.first().copied().unwrap_or(0)),
            )
        } else {
            let rendered: Vec<String> = digits.iter().map(u32::to_string).collect();
            (
                StructType::Inline(vec![format!("digit ob_digit[{}];", digits.len())]),
                format!("{{{}}}", rendered.join(", ")),
            )
        };

        self.declare(Declaration {
            symbol,
            kind: ValueKind::Int,
            refcount: 0,
            struct_type,
            type_object: "PyLong_Type",
            ob_size: Some(ob_size),
            fields: vec![digit_init],
            comment: Some(value.to_string()),
            prelude: Vec::new(),
        })
    }

    pub(super) fn encode_float(&mut self, value: f64) -> DeclId {
        let symbol = self.gensym(ValueKind::Float);
        self.declare(Declaration {
            symbol,
            kind: ValueKind::Float,
            refcount: 0,
            struct_type: StructType::Inline(vec![
                "union { double value; uint64_t bits; } ob_fval;".to_owned(),
            ]),
            type_object: "PyFloat_Type",
            ob_size: None,
            fields: vec![format!("{{.bits = UINT64_C(0x{:016x})}}", value.to_bits())],
            comment: Some(format!("{value:?}")),
            prelude: Vec::new(),
        })
    }

    pub(super) fn encode_complex(&mut self, real: f64, imag: f64) -> DeclId {
        let symbol = self.gensym(ValueKind::Complex);
        self.declare(Declaration {
            symbol,
            kind: ValueKind::Complex,
            refcount: 0,
            struct_type: StructType::Inline(vec![
                "union { Py_complex value; struct { uint64_t real; uint64_t imag; } bits; } cval;"
                    .to_owned(),
            ]),
            type_object: "PyComplex_Type",
            ob_size: None,
            fields: vec![format!(
                "{{.bits = {{UINT64_C(0x{:016x}), UINT64_C(0x{:016x})}}}}",
                real.to_bits(),
                imag.to_bits()
            )],
            comment: Some(format!("({real:?}+{imag:?}j)")),
            prelude: Vec::new(),
        })
    }

    pub(super) fn encode_bytes(&mut self, bytes: &[u8]) -> DeclId {
        let symbol = self.gensym(ValueKind::Bytes);
        // The host struct reserves one byte of payload inline
        let struct_type = if bytes.len() <= 1 {
            StructType::Host("PyBytesObject")
        } else {
            StructType::Inline(vec![
                "Py_hash_t ob_shash;".to_owned(),
                format!("char ob_sval[{}];", bytes.len() + 1),
            ])
        };
        self.declare(Declaration {
            symbol,
            kind: ValueKind::Bytes,
            refcount: 0,
            struct_type,
            type_object: "PyBytes_Type",
            ob_size: Some(bytes.len() as isize),
            fields: vec!["-1".to_owned(), c_literal::string_literal(bytes)],
            comment: None,
            prelude: Vec::new(),
        })
    }

    pub(super) fn encode_str(&mut self, text: &str) -> DeclId {
        let code_points: Vec<u32> = text.chars().map(u32::from).collect();
        let width = StrWidth::of(&code_points);
        let len = code_points.len();
        let symbol = self.gensym(ValueKind::Str);

        let mut members = vec![
            "Py_ssize_t length;".to_owned(),
            "Py_hash_t hash;".to_owned(),
            "_frozen_unicode_state state;".to_owned(),
            "wchar_t *wstr;".to_owned(),
        ];
        if width != StrWidth::Ascii {
            members.extend([
                "Py_ssize_t utf8_length;".to_owned(),
                "char *utf8;".to_owned(),
                "Py_ssize_t wstr_length;".to_owned(),
            ]);
        }
        members.push(format!("{} _data[{}];", width.unit_type(), len + 1));

        // Only the layout matching the platform's wchar_t shares its data
        let (wstr, wstr_length) = match width {
            StrWidth::Ascii | StrWidth::Ucs1 => ("NULL".to_owned(), "0".to_owned()),
            StrWidth::Ucs2 => (
                format!("FROZEN_WSTR_UCS2({symbol}._data)"),
                format!("FROZEN_WSTR_LENGTH_UCS2({len})"),
            ),
            StrWidth::Ucs4 => (
                format!("FROZEN_WSTR_UCS4({symbol}._data)"),
                format!("FROZEN_WSTR_LENGTH_UCS4({len})"),
            ),
        };

        let mut fields = vec![
            len.to_string(),
            "-1".to_owned(),
            format!(
                "{{SSTATE_NOT_INTERNED, {}, 1, {}, 1}}",
                width.kind_constant(),
                u8::from(width == StrWidth::Ascii)
            ),
            wstr,
        ];
        if width != StrWidth::Ascii {
            fields.extend(["0".to_owned(), "NULL".to_owned(), wstr_length]);
        }
        fields.push(match width {
            StrWidth::Ascii => c_literal::string_literal(text.as_bytes()),
            StrWidth::Ucs1 => c_literal::code_unit_array(&code_points, 2),
            StrWidth::Ucs2 => c_literal::code_unit_array(&code_points, 4),
            StrWidth::Ucs4 => c_literal::code_unit_array(&code_points, 8),
        });

        self.declare(Declaration {
            symbol,
            kind: ValueKind::Str,
            refcount: 0,
            struct_type: StructType::Inline(members),
            type_object: "PyUnicode_Type",
            ob_size: None,
            fields,
            comment: Some(c_literal::comment_text(text)),
            prelude: Vec::new(),
        })
    }

    pub(super) fn encode_tuple(&mut self, items: &[Value]) -> Result<DeclId, FreezeError> {
        let refs = items
            .iter()
            .map(|item| self.get_ref(item))
            .collect::<Result<Vec<_>, _>>()?;

        let symbol = self.gensym(ValueKind::Tuple);
        let (members, fields) = if refs.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            (
                vec![format!("PyObject *ob_item[{}];", refs.len())],
                vec![braced_list(&refs)],
            )
        };

        Ok(self.declare(Declaration {
            symbol,
            kind: ValueKind::Tuple,
            refcount: 0,
            struct_type: StructType::Inline(members),
            type_object: "PyTuple_Type",
            ob_size: Some(refs.len() as isize),
            fields,
            comment: None,
            prelude: Vec::new(),
        }))
    }

    pub(super) fn encode_frozenset(&mut self, items: &[Value]) -> Result<DeclId, FreezeError> {
        let refs = items
            .iter()
            .map(|item| self.get_ref(item))
            .collect::<Result<Vec<_>, _>>()?;
        // An unpinned singleton hash leaves a statically hashable member
        // without a value, so it is deferred as well
        let hashes: Vec<Option<i64>> = items
            .iter()
            .map(|item| {
                is_statically_hashable(item)
                    .then(|| static_hash(item, self.singleton_hashes))
                    .flatten()
            })
            .collect();

        let size = layout::set_table_size(items.len());
        let mut table: Vec<Option<(String, i64)>> = vec![None; size];
        let mut deferred_slots = Vec::new();
        let all_static = hashes.iter().all(Option::is_some);

        if all_static {
            let mut occupied = vec![false; size];
            for (reference, hash) in refs.into_iter().zip(hashes.iter().flatten()) {
                let slot = layout::probe_set_slot(&occupied, *hash);
                occupied[slot] = true;
                table[slot] = Some((reference, *hash));
            }
        } else {
            // Placement depends on hashes the startup fixup computes, which
            // re-places the whole table afterwards
            for (slot, (reference, hash)) in refs.into_iter().zip(&hashes).enumerate() {
                if hash.is_none() {
                    deferred_slots.push(slot);
                }
                table[slot] = Some((reference, hash.unwrap_or(-1)));
            }
        }

        let symbol = self.gensym(ValueKind::FrozenSet);
        self.deferred_hashes
            .extend(deferred_slots.into_iter().map(|slot| DeferredHash {
                symbol: symbol.clone(),
                slot,
            }));

        let set_hash = if all_static {
            frozenset_hash(&hashes.iter().flatten().copied().collect::<Vec<_>>())
        } else {
            -1
        };

        let entries: Vec<String> = table
            .iter()
            .map(|entry| match entry {
                Some((reference, hash)) => format!("{{{reference}, {hash}}}"),
                None => "{NULL, 0}".to_owned(),
            })
            .collect();

        let mut prelude = Vec::new();
        let (table_ref, smalltable) = if size == SET_MINSIZE {
            (format!("{symbol}.smalltable"), braced_list(&entries))
        } else {
            let table_symbol = format!("{symbol}_table");
            prelude.push(format!(
                "static setentry {table_symbol}[{size}] = {};",
                braced_list(&entries)
            ));
            (table_symbol, "{{NULL, 0}}".to_owned())
        };

        Ok(self.declare(Declaration {
            symbol,
            kind: ValueKind::FrozenSet,
            refcount: 0,
            struct_type: StructType::Inline(vec![
                "Py_ssize_t fill;".to_owned(),
                "Py_ssize_t used;".to_owned(),
                "Py_ssize_t mask;".to_owned(),
                "setentry *table;".to_owned(),
                "Py_hash_t hash;".to_owned(),
                "Py_ssize_t finger;".to_owned(),
                "setentry smalltable[PySet_MINSIZE];".to_owned(),
                "PyObject *weakreflist;".to_owned(),
            ]),
            type_object: "PyFrozenSet_Type",
            ob_size: None,
            fields: vec![
                items.len().to_string(),
                items.len().to_string(),
                (size - 1).to_string(),
                table_ref,
                set_hash.to_string(),
                "0".to_owned(),
                smalltable,
                "NULL".to_owned(),
            ],
            comment: None,
            prelude,
        }))
    }

    fn names_ref(&mut self, names: &[String]) -> Result<String, FreezeError> {
        let items = names.iter().map(|name| Value::Str(name.clone())).collect();
        self.get_ref(&Value::Tuple(items))
    }

    /// Code objects are declared afresh on every encounter; only their
    /// constants are shared
    pub(super) fn encode_code(&mut self, code: &Code) -> Result<DeclId, FreezeError> {
        let co_code = self.get_ref(&Value::Bytes(code.code.clone()))?;
        let consts = self.get_ref(&Value::Tuple(code.consts.clone()))?;
        let names = self.names_ref(&code.names)?;
        let varnames = self.names_ref(&code.varnames)?;
        let freevars = self.names_ref(&code.freevars)?;
        let cellvars = self.names_ref(&code.cellvars)?;
        let filename = self.get_ref(&Value::Str(code.filename.clone()))?;
        let name = self.get_ref(&Value::Str(code.name.clone()))?;
        let lnotab = self.get_ref(&Value::Bytes(code.lnotab.clone()))?;

        let symbol = self.gensym(ValueKind::Code);
        let mut prelude = Vec::new();
        let cell2arg = match code.cell2arg() {
            Some(mapping) => {
                let array = format!("{symbol}_cell2arg");
                let rendered: Vec<String> = mapping.iter().map(isize::to_string).collect();
                prelude.push(format!(
                    "static Py_ssize_t {array}[] = {{{}}};",
                    rendered.join(", ")
                ));
                array
            }
            None => "NULL".to_owned(),
        };

        Ok(self.declare(Declaration {
            symbol,
            kind: ValueKind::Code,
            refcount: 0,
            struct_type: StructType::Host("PyCodeObject"),
            type_object: "PyCode_Type",
            ob_size: None,
            fields: vec![
                code.argcount.to_string(),
                code.kwonlyargcount.to_string(),
                code.nlocals.to_string(),
                code.stacksize.to_string(),
                code.flags.to_string(),
                code.firstlineno.to_string(),
                co_code,
                consts,
                names,
                varnames,
                freevars,
                cellvars,
                cell2arg,
                filename,
                name,
                lnotab,
                "NULL".to_owned(),
                "NULL".to_owned(),
                "NULL".to_owned(),
            ],
            comment: Some(format!(
                "code object {} from {}, line {}",
                c_literal::comment_text(&code.name),
                c_literal::comment_text(&code.filename),
                code.firstlineno
            )),
            prelude,
        }))
    }
}
