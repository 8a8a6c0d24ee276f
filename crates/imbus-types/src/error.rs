//! Validation errors for decoded wire structures.

use thiserror::Error;

/// A structurally well-formed message whose contents break a wire invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("attribute range {start}..{end} outside text of length {len}")]
    AttributeRange { start: u32, end: u32, len: u32 },

    #[error("lookup table page size must be non-zero")]
    ZeroPageSize,

    #[error("lookup table cursor {cursor} outside {len} candidates")]
    CursorOutOfRange { cursor: u32, len: u32 },

    #[error("property name must not be empty")]
    EmptyPropertyName,

    #[error("property nesting exceeds {max} levels")]
    PropertyTooDeep { max: usize },

    #[error("invalid object path: {0:?}")]
    ObjectPath(String),

    #[error("invalid bus name: {0:?}")]
    BusName(String),
}
