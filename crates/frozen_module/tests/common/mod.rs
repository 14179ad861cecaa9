//! Hand-rolled marshal data for integration tests
#![allow(dead_code)]

use std::{fmt::Write, fs, path::Path, time::UNIX_EPOCH};

use frozen_module::marshal::PY37_MAGIC;

pub const NONE: &[u8] = b"N";
pub const TRUE: &[u8] = b"T";
pub const FALSE: &[u8] = b"F";

pub fn int(value: i32) -> Vec<u8> {
    let mut out = vec![b'i'];
    out.extend_from_slice(&value.to_le_bytes());
    out
}

pub fn string(text: &str) -> Vec<u8> {
    let mut out = vec![b'u'];
    out.extend_from_slice(&(text.len() as i32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out
}

pub fn bytes(payload: &[u8]) -> Vec<u8> {
    let mut out = vec![b's'];
    out.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn optional_str(text: Option<&str>) -> Vec<u8> {
    text.map_or_else(|| NONE.to_vec(), string)
}

fn sequence(code: u8, items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![code];
    out.extend_from_slice(&(items.len() as i32).to_le_bytes());
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

pub fn tuple(items: &[Vec<u8>]) -> Vec<u8> {
    sequence(b'(', items)
}

pub fn list(items: &[Vec<u8>]) -> Vec<u8> {
    sequence(b'[', items)
}

pub fn frozenset(items: &[Vec<u8>]) -> Vec<u8> {
    sequence(b'>', items)
}

fn names(values: &[&str]) -> Vec<u8> {
    tuple(&values.iter().map(|value| string(value)).collect::<Vec<_>>())
}

/// Module-level code object returning None
pub fn module_code(filename: &str, consts: &[Vec<u8>], global_names: &[&str]) -> Vec<u8> {
    let mut out = vec![b'c'];
    // argcount, kwonlyargcount, nlocals, stacksize, flags
    for field in [0i32, 0, 0, 2, 64] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend(bytes(&[100, 0, 83, 0]));
    out.extend(tuple(consts));
    out.extend(names(global_names));
    out.extend(names(&[]));
    out.extend(names(&[]));
    out.extend(names(&[]));
    out.extend(string(filename));
    out.extend(string("<module>"));
    out.extend_from_slice(&1i32.to_le_bytes());
    out.extend(bytes(&[]));
    out
}

/// Timestamp-based cache file around `payload`
pub fn pyc(payload: &[u8], source_mtime: u32, source_size: u32) -> Vec<u8> {
    let mut out = PY37_MAGIC.to_vec();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&source_mtime.to_le_bytes());
    out.extend_from_slice(&source_size.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Cache file that is fresh for the existing `source`
pub fn pyc_for_source(payload: &[u8], source: &Path) -> Vec<u8> {
    let metadata = fs::metadata(source).unwrap();
    let mtime = metadata
        .modified()
        .unwrap()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as u32;
    pyc(payload, mtime, metadata.len() as u32)
}

/// Shell `printf` format reproducing `bytes` exactly
pub fn printf_format(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for byte in bytes {
        let _ = write!(out, "\\{byte:03o}");
    }
    out
}
