//! Helpers for writing C literals and comments

use std::fmt::Write;

const BYTES_PER_LINE: usize = 48;

/// C string literal holding exactly `bytes`
///
/// Non-printable bytes use three-digit octal escapes so the following
/// character can never be absorbed into the escape. Long payloads are split
/// into adjacent literals, which the C compiler concatenates.
pub fn string_literal(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "\"\"".to_owned();
    }
    let mut out = String::with_capacity(bytes.len() + 2);
    for (index, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        if index > 0 {
            out.push_str("\n        ");
        }
        out.push('"');
        for &byte in chunk {
            match byte {
                b'"' => out.push_str("\\\""),
                b'\\' => out.push_str("\\\\"),
                // Keeps trigraph sequences from forming
                b'?' => out.push_str("\\?"),
                0x20..=0x7e => out.push(byte as char),
                _ => {
                    let _ = write!(out, "\\{byte:03o}");
                }
            }
        }
        out.push('"');
    }
    out
}

/// Brace-enclosed array initializer of `values` in hex, followed by a zero
/// terminator
pub fn code_unit_array(values: &[u32], hex_width: usize) -> String {
    let mut out = String::from("{");
    for (index, value) in values.iter().enumerate() {
        if index % 8 == 0 {
            out.push_str("\n        ");
        } else {
            out.push(' ');
        }
        let _ = write!(out, "0x{value:0hex_width$x},");
    }
    out.push_str("\n        0,\n    }");
    out
}

/// Readable rendering of `text` for a C block comment
///
/// Returns a neutral placeholder when the rendering itself would open or
/// close a comment.
pub fn comment_text(text: &str) -> String {
    let rendered = format!("{text:?}");
    if rendered.contains("/*") || rendered.contains("*/") {
        "<string contains comment delimiters>".to_owned()
    } else {
        rendered
    }
}
