//! Object graph serializer
//!
//! Walks a value graph depth first and turns every distinct constant into a
//! static C definition. Children are always declared before their parents,
//! so the declaration list can be emitted in order without prototypes.
//!
//! One `Serializer` owns all state of one freeze: the symbol counters, the
//! table of already-declared constants, the singleton usage counters and the
//! deferred hash slots. Concurrent freezes need separate instances.

mod declaration;
mod encoders;


use std::fmt::Write;

use log::{debug, trace};
use rustc_hash::FxHashMap;

pub use self::declaration::{DeclId, Declaration, StructType};
use crate::{
    error::FreezeError,
    hashing::SingletonHashes,
    layout,
    value::{ConstKey, Value, ValueKind},
};

/// Objects the host runtime provides and the freezer only references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Singleton {
    None,
    True,
    False,
    Ellipsis,
}

impl Singleton {
    const ALL: [Self; 4] = [Self::None, Self::True, Self::False, Self::Ellipsis];

    /// The singleton `value` stands for, if any
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::None => Some(Self::None),
            Value::Bool(true) => Some(Self::True),
            Value::Bool(false) => Some(Self::False),
            Value::Ellipsis => Some(Self::Ellipsis),
            _ => None,
        }
    }

    /// Host expression naming the singleton
    pub fn expression(self) -> &'static str {
        match self {
            Self::None => "Py_None",
            Self::True => "Py_True",
            Self::False => "Py_False",
            Self::Ellipsis => "Py_Ellipsis",
        }
    }
}

/// A set slot whose hash is computed at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredHash {
    /// Symbol of the frozenset owning the slot
    pub symbol: String,
    /// Index into the set's entry table
    pub slot: usize,
}

/// Everything the templates need from a finished freeze
#[derive(Debug, Clone)]
pub struct FrozenUnit {
    /// Definitions in emission order
    pub declarations: Vec<Declaration>,
    /// Null-terminated table of deferred hash slots
    pub hash_slot_table: String,
    /// Statements that account for references to host singletons
    pub refcount_adjustments: Vec<String>,
}

impl FrozenUnit {
    /// All definitions, ending with the deferred hash table
    pub fn render_declarations(&self) -> String {
        let mut out = String::new();
        for declaration in &self.declarations {
            out.push_str(&declaration.render());
            out.push('\n');
        }
        out.push_str(&self.hash_slot_table);
        out
    }
}

/// Converts value graphs into static declarations
#[derive(Debug, Default)]
pub struct Serializer {
    singleton_hashes: SingletonHashes,
    counters: [usize; ValueKind::COUNT],
    declarations: Vec<Declaration>,
    refs: FxHashMap<ConstKey, DeclId>,
    singleton_refs: [usize; 4],
    deferred_hashes: Vec<DeferredHash>,
}

impl Serializer {
    /// Create a serializer for one freeze
    pub fn new(singleton_hashes: SingletonHashes) -> Self {
        Self {
            singleton_hashes,
            ..Self::default()
        }
    }

    /// Fresh symbol for a value of `kind`
    pub fn gensym(&mut self, kind: ValueKind) -> String {
        let counter = &mut self.counters[kind as usize];
        let symbol = format!("_{}_obj_{}", kind.type_name(), *counter);
        *counter += 1;
        symbol
    }

    /// Whether `value` already has a declaration
    pub fn has_ref(&self, value: &Value) -> bool {
        self.lookup(value).is_some()
    }

    /// Register `id` as the declaration of `value`
    ///
    /// Values without a deduplication key (code objects) are never shared,
    /// so registering them has no effect.
    pub fn store_ref(&mut self, value: &Value, id: DeclId) {
        if let Some(key) = value.const_key() {
            self.refs.insert(key, id);
        }
    }

    /// Reference expression for an already-declared `value`
    ///
    /// Counts one reference against the declaration. Panics if `value` was
    /// never stored, which means the walk emitted a parent before its child.
    pub fn load_ref(&mut self, value: &Value) -> String {
        if let Some(singleton) = Singleton::of(value) {
            self.singleton_refs[singleton as usize] += 1;
            return singleton.expression().to_owned();
        }
        let id = self.lookup(value).unwrap_or_else(|| {
            panic!(
                "no declaration registered for {} constant {value:?}",
                value.kind()
            )
        });
        self.count_ref(id)
    }

    /// Reference expression for `value`, declaring it and its children first
    /// if needed
    pub fn get_ref(&mut self, value: &Value) -> Result<String, FreezeError> {
        if Singleton::of(value).is_none() && !self.has_ref(value) {
            let id = self.encode(value)?;
            if value.const_key().is_none() {
                // Nothing can look this declaration up again
                return Ok(self.count_ref(id));
            }
            self.store_ref(value, id);
        }
        Ok(self.load_ref(value))
    }

    /// Reference expression for a root value
    ///
    /// Roots are referenced from the generated entry point rather than from
    /// another declaration, so no reference is counted here.
    pub fn root_ref(&mut self, value: &Value) -> Result<String, FreezeError> {
        if let Some(singleton) = Singleton::of(value) {
            return Ok(singleton.expression().to_owned());
        }
        let id = match self.lookup(value) {
            Some(id) => id,
            None => {
                let id = self.encode(value)?;
                self.store_ref(value, id);
                id
            }
        };
        Ok(self.declarations[id.0].reference())
    }

    /// Close the freeze and hand the output to the templates
    ///
    /// Every declaration reports a reference count of at least one, as a
    /// freshly allocated object would.
    pub fn finish(mut self) -> FrozenUnit {
        for declaration in &mut self.declarations {
            declaration.refcount = declaration.refcount.max(1);
        }

        let refcount_adjustments = Singleton::ALL
            .iter()
            .zip(self.singleton_refs)
            .filter(|(_, count)| *count > 0)
            .map(|(singleton, count)| {
                format!("Py_REFCNT({}) += {count};", singleton.expression())
            })
            .collect();

        debug!(
            "Serialized {} declarations with {} deferred hash slots",
            self.declarations.len(),
            self.deferred_hashes.len()
        );

        FrozenUnit {
            hash_slot_table: render_hash_slots(&self.deferred_hashes),
            declarations: self.declarations,
            refcount_adjustments,
        }
    }

    fn lookup(&self, value: &Value) -> Option<DeclId> {
        value
            .const_key()
            .and_then(|key| self.refs.get(&key).copied())
    }

    fn count_ref(&mut self, id: DeclId) -> String {
        let declaration = &mut self.declarations[id.0];
        declaration.refcount += 1;
        declaration.reference()
    }

    fn encode(&mut self, value: &Value) -> Result<DeclId, FreezeError> {
        match value {
            Value::Int(int) => Ok(self.encode_int(int)),
            Value::Float(float) => Ok(self.encode_float(*float)),
            Value::Complex { real, imag } => Ok(self.encode_complex(*real, *imag)),
            Value::Bytes(bytes) => Ok(self.encode_bytes(bytes)),
            Value::Str(text) => Ok(self.encode_str(text)),
            Value::Tuple(items) => self.encode_tuple(items),
            Value::FrozenSet(items) => self.encode_frozenset(items),
            Value::Code(code) => self.encode_code(code),
            Value::None | Value::Ellipsis | Value::Bool(_) => {
                unreachable!("host singletons are referenced, never declared")
            }
            Value::List(_) | Value::Dict(_) | Value::Set(_) => Err(FreezeError::UnsupportedValue {
                kind: value.kind(),
            }),
        }
    }

    fn declare(&mut self, declaration: Declaration) -> DeclId {
        trace!(
            "Declared {} for {} value",
            declaration.symbol, declaration.kind
        );
        let id = DeclId(self.declarations.len());
        self.declarations.push(declaration);
        id
    }
}

fn render_hash_slots(deferred: &[DeferredHash]) -> String {
    let mut out = String::from("static const struct _frozen_hash_slot _frozen_hash_slots[] = {\n");
    for slot in deferred {
        let _ = writeln!(
            out,
            "    {{{}, {}}},",
            layout::object_ref(&slot.symbol, true),
            slot.slot
        );
    }
    out.push_str("    {NULL, 0},\n};\n");
    out
}
