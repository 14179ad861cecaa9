//! Reader for the interpreter's marshal format
//!
//! Decodes version 4 data as written by a 3.7 interpreter, including
//! back-references (`FLAG_REF`), the short string codes and 3.7 code records.
//! Mutable containers decode to their own [`Value`] variants; rejecting them
//! is left to the serializer.

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, trace};
use num_bigint::BigInt;

use crate::value::{Code, Value};

/// Magic number of 3.7 cache files
pub const PY37_MAGIC: [u8; 4] = [0x42, 0x0d, 0x0d, 0x0a];

/// Size of the header in front of a cache file's payload
pub const PYC_HEADER_SIZE: usize = 16;

const FLAG_REF: u8 = 0x80;
const MAX_DEPTH: usize = 2000;
const LONG_SHIFT: u32 = 15;

/// Decode one marshalled value
pub fn loads(data: &[u8]) -> Result<Value> {
    let mut reader = Reader::new(data);
    let value = reader.read_object()?;
    if reader.pos != data.len() {
        debug!(
            "Ignoring {} trailing bytes after marshalled value",
            data.len() - reader.pos
        );
    }
    Ok(value)
}

/// Decode a marshalled code object
pub fn loads_code(data: &[u8]) -> Result<Code> {
    match loads(data)? {
        Value::Code(code) => Ok(*code),
        other => bail!("expected a code object, found {}", other.kind()),
    }
}

/// Validate a cache file's header and decode its code object
///
/// With `expected_magic`, files written by another interpreter version are
/// rejected instead of being misread.
pub fn load_pyc(data: &[u8], expected_magic: Option<&[u8; 4]>) -> Result<Code> {
    if data.len() < PYC_HEADER_SIZE {
        bail!(
            "cache file is truncated: {} bytes is shorter than the {PYC_HEADER_SIZE} byte header",
            data.len()
        );
    }
    let magic = &data[..4];
    if magic[2..] != *b"\r\n" {
        bail!("bad magic number {magic:02x?}: not a compiled Python file");
    }
    if let Some(expected) = expected_magic
        && magic != expected
    {
        bail!("bad magic number {magic:02x?}, the target interpreter expects {expected:02x?}");
    }

    let flags = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if flags & !0b11 != 0 {
        bail!("invalid cache file flags {flags:#x}");
    }
    trace!(
        "Cache file is {}",
        if flags & 1 == 0 {
            "timestamp based"
        } else {
            "hash based"
        }
    );

    loads_code(&data[PYC_HEADER_SIZE..]).context("Failed to decode cache file payload")
}

/// Whether a timestamp-based cache file records `source_mtime` and
/// `source_size` for its source
///
/// Hash-based cache files are never considered fresh, since checking them
/// needs the interpreter's source hash.
pub fn pyc_matches_source(data: &[u8], source_mtime: u32, source_size: u32) -> bool {
    if data.len() < PYC_HEADER_SIZE {
        return false;
    }
    let word = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
    word(4) == 0 && word(8) == source_mtime && word(12) == source_size
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    refs: Vec<Option<Value>>,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            refs: Vec::new(),
            depth: 0,
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| anyhow!("marshal data ends in the middle of an object"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_i64()? as u64))
    }

    fn read_len(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| anyhow!("bad marshal data (negative size {len})"))
    }

    fn read_text_float(&mut self) -> Result<f64> {
        let len = usize::from(self.read_u8()?);
        let text = std::str::from_utf8(self.take(len)?)
            .context("bad marshal data (float text is not ASCII)")?;
        text.parse()
            .with_context(|| format!("bad marshal data (invalid float literal {text:?})"))
    }

    fn read_str(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).context("bad marshal data (string is not valid UTF-8)")
    }

    fn read_long(&mut self) -> Result<BigInt> {
        let n = self.read_i32()?;
        let mut digits = Vec::with_capacity(n.unsigned_abs() as usize);
        for _ in 0..n.unsigned_abs() {
            let bytes = self.take(2)?;
            let digit = u16::from_le_bytes([bytes[0], bytes[1]]);
            if u32::from(digit) >= 1 << LONG_SHIFT {
                bail!("bad marshal data (digit out of range in long)");
            }
            digits.push(digit);
        }
        let mut magnitude = BigInt::from(0);
        for &digit in digits.iter().rev() {
            magnitude = (magnitude << LONG_SHIFT) + digit;
        }
        Ok(if n < 0 { -magnitude } else { magnitude })
    }

    fn read_sequence(&mut self, len: usize) -> Result<Vec<Value>> {
        (0..len).map(|_| self.read_object()).collect()
    }

    fn read_object(&mut self) -> Result<Value> {
        if self.depth >= MAX_DEPTH {
            bail!("marshal data nests deeper than {MAX_DEPTH} levels");
        }
        self.depth += 1;
        let result = self.read_object_inner();
        self.depth -= 1;
        result
    }

    fn read_object_inner(&mut self) -> Result<Value> {
        let start = self.pos;
        let byte = self.read_u8()?;
        let code = byte & !FLAG_REF;

        if code == b'r' {
            let index = self.read_i32()?;
            return usize::try_from(index)
                .ok()
                .and_then(|index| self.refs.get(index))
                .ok_or_else(|| anyhow!("bad marshal data (invalid reference {index})"))?
                .clone()
                .ok_or_else(|| anyhow!("bad marshal data (reference {index} to an unfinished object)"));
        }

        // Back-reference slots are numbered in the order objects start
        let slot = (byte & FLAG_REF != 0).then(|| {
            self.refs.push(None);
            self.refs.len() - 1
        });

        let value = match code {
            b'N' => Value::None,
            b'F' => Value::Bool(false),
            b'T' => Value::Bool(true),
            b'.' => Value::Ellipsis,
            b'i' => Value::int(self.read_i32()?),
            b'I' => Value::int(self.read_i64()?),
            b'l' => Value::Int(self.read_long()?),
            b'f' => Value::Float(self.read_text_float()?),
            b'g' => Value::Float(self.read_f64()?),
            b'x' => Value::Complex {
                real: self.read_text_float()?,
                imag: self.read_text_float()?,
            },
            b'y' => Value::Complex {
                real: self.read_f64()?,
                imag: self.read_f64()?,
            },
            b's' => {
                let len = self.read_len()?;
                Value::Bytes(self.take(len)?.to_vec())
            }
            b'u' | b't' | b'a' | b'A' => {
                let len = self.read_len()?;
                Value::Str(self.read_str(len)?)
            }
            b'z' | b'Z' => {
                let len = usize::from(self.read_u8()?);
                Value::Str(self.read_str(len)?)
            }
            b'(' => {
                let len = self.read_len()?;
                Value::Tuple(self.read_sequence(len)?)
            }
            b')' => {
                let len = usize::from(self.read_u8()?);
                Value::Tuple(self.read_sequence(len)?)
            }
            b'[' => {
                let len = self.read_len()?;
                Value::List(self.read_sequence(len)?)
            }
            b'<' => {
                let len = self.read_len()?;
                Value::Set(self.read_sequence(len)?)
            }
            b'>' => {
                let len = self.read_len()?;
                Value::FrozenSet(self.read_sequence(len)?)
            }
            b'{' => Value::Dict(self.read_dict()?),
            b'c' => Value::Code(Box::new(self.read_code()?)),
            b'0' => bail!("bad marshal data (NULL object at offset {start})"),
            b'S' => bail!("cannot load StopIteration from marshal data"),
            other => bail!(
                "bad marshal data (unknown type code {:?} at offset {start})",
                char::from(other)
            ),
        };

        if let Some(slot) = slot {
            self.refs[slot] = Some(value.clone());
        }
        Ok(value)
    }

    fn read_dict(&mut self) -> Result<Vec<(Value, Value)>> {
        let mut entries = Vec::new();
        loop {
            if self.data.get(self.pos) == Some(&b'0') {
                self.pos += 1;
                return Ok(entries);
            }
            let key = self.read_object()?;
            let value = self.read_object()?;
            entries.push((key, value));
        }
    }

    fn read_code(&mut self) -> Result<Code> {
        let argcount = self.read_i32()?;
        let kwonlyargcount = self.read_i32()?;
        let nlocals = self.read_i32()?;
        let stacksize = self.read_i32()?;
        let flags = self.read_i32()?;
        let code = expect_bytes(self.read_object()?, "co_code")?;
        let consts = expect_tuple(self.read_object()?, "co_consts")?;
        let names = expect_names(self.read_object()?, "co_names")?;
        let varnames = expect_names(self.read_object()?, "co_varnames")?;
        let freevars = expect_names(self.read_object()?, "co_freevars")?;
        let cellvars = expect_names(self.read_object()?, "co_cellvars")?;
        let filename = expect_str(self.read_object()?, "co_filename")?;
        let name = expect_str(self.read_object()?, "co_name")?;
        let firstlineno = self.read_i32()?;
        let lnotab = expect_bytes(self.read_object()?, "co_lnotab")?;

        trace!("Decoded code object {name} from {filename}");
        Ok(Code {
            argcount,
            kwonlyargcount,
            nlocals,
            stacksize,
            flags,
            code,
            consts,
            names,
            varnames,
            freevars,
            cellvars,
            filename,
            name,
            firstlineno,
            lnotab,
        })
    }
}

fn expect_bytes(value: Value, field: &str) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        other => bail!("bad marshal data ({field} is {}, expected bytes)", other.kind()),
    }
}

fn expect_str(value: Value, field: &str) -> Result<String> {
    match value {
        Value::Str(text) => Ok(text),
        other => bail!("bad marshal data ({field} is {}, expected str)", other.kind()),
    }
}

fn expect_tuple(value: Value, field: &str) -> Result<Vec<Value>> {
    match value {
        Value::Tuple(items) => Ok(items),
        other => bail!("bad marshal data ({field} is {}, expected tuple)", other.kind()),
    }
}

fn expect_names(value: Value, field: &str) -> Result<Vec<String>> {
    expect_tuple(value, field)?
        .into_iter()
        .map(|item| expect_str(item, field))
        .collect()
}
