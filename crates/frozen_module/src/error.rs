//! Errors raised while freezing an object graph

use std::fmt;

use crate::value::ValueKind;

/// Faults that abort a freeze
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreezeError {
    /// The value kind has no static layout
    UnsupportedValue { kind: ValueKind },
}

impl fmt::Display for FreezeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedValue { kind } => {
                write!(f, "cannot freeze a value of type '{kind}'")
            }
        }
    }
}

impl std::error::Error for FreezeError {}
