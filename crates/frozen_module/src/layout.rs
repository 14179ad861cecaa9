//! Host runtime object layout
//!
//! Constants and helpers that mirror the memory layout the host runtime
//! reads directly out of the emitted static data. Everything here must match
//! the host build the generated unit is linked into.

/// Bits per digit of the host's arbitrary precision integers
pub const PYLONG_SHIFT: u32 = 30;

/// Number of inline slots in a set object
pub const SET_MINSIZE: usize = 8;

/// Slots probed linearly before perturbation kicks in
pub const LINEAR_PROBES: usize = 9;

/// Shift applied to the perturbation value between probe rounds
pub const PERTURB_SHIFT: u32 = 5;

/// Initializer of an untracked GC header
pub const GC_HEAD_UNTRACKED: &str = "FROZEN_GC_UNTRACKED";

/// Reference expression for an object emitted as `symbol`
///
/// GC objects are declared with their `PyGC_Head` in front, so the visible
/// object starts right after it.
pub fn object_ref(symbol: &str, gc_tracked: bool) -> String {
    if gc_tracked {
        format!("FROM_GC(&{symbol})")
    } else {
        format!("(PyObject *)&{symbol}")
    }
}

/// Final table size the host reaches after inserting `len` distinct keys
/// one by one into an empty set
pub fn set_table_size(len: usize) -> usize {
    let mut size = SET_MINSIZE;
    for fill in 1..=len {
        if fill * 5 >= (size - 1) * 3 {
            let min_used = if fill > 50_000 { fill * 2 } else { fill * 4 };
            size = SET_MINSIZE;
            while size <= min_used {
                size <<= 1;
            }
        }
    }
    size
}

/// Slot the host's insertion probe settles on for `hash`
///
/// `occupied` must have a power-of-two length and at least one free slot.
pub fn probe_set_slot(occupied: &[bool], hash: i64) -> usize {
    let mask = occupied.len() - 1;
    let mut perturb = hash as u64;
    let mut index = (hash as u64 as usize) & mask;
    if !occupied[index] {
        return index;
    }
    loop {
        if index + LINEAR_PROBES <= mask {
            for step in 1..=LINEAR_PROBES {
                if !occupied[index + step] {
                    return index + step;
                }
            }
        }
        perturb >>= PERTURB_SHIFT;
        index = index
            .wrapping_mul(5)
            .wrapping_add(1)
            .wrapping_add(perturb as usize)
            & mask;
        if !occupied[index] {
            return index;
        }
    }
}

/// Macros and helper types every generated unit starts with
pub const PREAMBLE: &str = r"#include <Python.h>

#include <stdint.h>

#define FROM_GC(g) ((PyObject *)(((PyGC_Head *)(g)) + 1))
#define FROZEN_GC_UNTRACKED \
    {{NULL, NULL, (Py_ssize_t)((size_t)_PyGC_REFS_UNTRACKED << _PyGC_REFS_SHIFT)}}

#if SIZEOF_WCHAR_T == 2
#  define FROZEN_WSTR_UCS2(data) ((wchar_t *)(data))
#  define FROZEN_WSTR_LENGTH_UCS2(n) (n)
#else
#  define FROZEN_WSTR_UCS2(data) NULL
#  define FROZEN_WSTR_LENGTH_UCS2(n) 0
#endif

#if SIZEOF_WCHAR_T == 4
#  define FROZEN_WSTR_UCS4(data) ((wchar_t *)(data))
#  define FROZEN_WSTR_LENGTH_UCS4(n) (n)
#else
#  define FROZEN_WSTR_UCS4(data) NULL
#  define FROZEN_WSTR_LENGTH_UCS4(n) 0
#endif

typedef struct {
    unsigned int interned:2;
    unsigned int kind:3;
    unsigned int compact:1;
    unsigned int ascii:1;
    unsigned int ready:1;
    unsigned int :24;
} _frozen_unicode_state;

struct _frozen_hash_slot {
    PyObject *set;
    Py_ssize_t slot;
};
";

/// Startup routine that patches deferred hashes and re-places the
/// affected set entries
pub const HASH_FIXUP: &str = r"static void
_frozen_rehash_set(PySetObject *so)
{
    setentry entries[so->mask + 1];
    size_t mask = (size_t)so->mask;
    size_t n = 0;
    for (size_t i = 0; i <= mask; i++) {
        if (so->table[i].key != NULL) {
            entries[n++] = so->table[i];
            so->table[i].key = NULL;
            so->table[i].hash = 0;
        }
    }
    for (size_t k = 0; k < n; k++) {
        size_t perturb = (size_t)entries[k].hash;
        size_t i = (size_t)entries[k].hash & mask;
        while (so->table[i].key != NULL) {
            size_t j;
            if (i + 9 <= mask) {
                for (j = 1; j <= 9; j++) {
                    if (so->table[i + j].key == NULL) {
                        break;
                    }
                }
                if (j <= 9) {
                    i += j;
                    break;
                }
            }
            perturb >>= 5;
            i = (i * 5 + 1 + perturb) & mask;
        }
        so->table[i] = entries[k];
    }
}

static void
_frozen_fixup_hashes(void)
{
    const struct _frozen_hash_slot *fix;
    for (fix = _frozen_hash_slots; fix->set != NULL; fix++) {
        PySetObject *so = (PySetObject *)fix->set;
        setentry *entry = &so->table[fix->slot];
        entry->hash = PyObject_Hash(entry->key);
        if (fix[1].set != fix->set) {
            _frozen_rehash_set(so);
        }
    }
}
";
