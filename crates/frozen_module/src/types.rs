//! Shared collection aliases
//!
//! Every table whose iteration order reaches the generated output is an
//! insertion-ordered map, so output is stable from run to run.

use std::hash::BuildHasherDefault;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;

/// Type alias for FxHasher-based IndexMap
pub type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Type alias for FxHasher-based IndexSet
pub type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;
