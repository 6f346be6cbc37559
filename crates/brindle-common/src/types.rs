//! Attribute types and scan operators.

use serde::{Deserialize, Serialize};

/// Datatype of the relation attribute an index is declared over.
///
/// The tag is persisted in the index header page and checked on reopen.
/// Only `Integer` is supported by the current tree; the other tags exist so
/// the header format does not change when further key types are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum AttrType {
    Integer = 0,
    Double = 1,
    String = 2,
}

impl AttrType {
    /// Returns the on-disk tag for this type.
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Decodes an on-disk tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(AttrType::Integer),
            1 => Some(AttrType::Double),
            2 => Some(AttrType::String),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttrType::Integer => "INTEGER",
            AttrType::Double => "DOUBLE",
            AttrType::String => "STRING",
        };
        write!(f, "{}", name)
    }
}

/// Comparison operator for scan bounds.
///
/// A range scan takes a lower bound with `Gt`/`Gte` and an upper bound with
/// `Lt`/`Lte`; the same operators drive descent through internal nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanOp {
    Lt,
    Lte,
    Gte,
    Gt,
}

impl ScanOp {
    /// Evaluates `x <op> y`.
    pub fn compare(self, x: i32, y: i32) -> bool {
        match self {
            ScanOp::Lt => x < y,
            ScanOp::Lte => x <= y,
            ScanOp::Gte => x >= y,
            ScanOp::Gt => x > y,
        }
    }

    /// Returns true if this operator is valid as a scan lower bound.
    pub fn is_lower_bound(self) -> bool {
        matches!(self, ScanOp::Gt | ScanOp::Gte)
    }

    /// Returns true if this operator is valid as a scan upper bound.
    pub fn is_upper_bound(self) -> bool {
        matches!(self, ScanOp::Lt | ScanOp::Lte)
    }
}

impl std::fmt::Display for ScanOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScanOp::Lt => "<",
            ScanOp::Lte => "<=",
            ScanOp::Gte => ">=",
            ScanOp::Gt => ">",
        };
        write!(f, "{}", name)
    }
}
