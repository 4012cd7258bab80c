//! Error types for section assignment and attribute-table decoding.
//!
//! Only precondition, geometry, and format violations surface as
//! [`MatchError`]. Data-quality outcomes (points with no section in range,
//! low-coverage runs) are ordinary engine outputs and never error.

use thiserror::Error;

/// Errors produced by the association engine, session store, and codec.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    /// Two parallel inputs disagree on length.
    #[error("length mismatch in {context}: expected {expected}, got {actual}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A feature's geometry kind is wrong for the requested operation.
    #[error("geometry mismatch: expected {expected}, got {actual}")]
    GeometryMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A feature id does not exist in the collection.
    #[error("unknown feature id {fid}")]
    UnknownFeature { fid: u32 },

    /// A run or feature belongs to a different collection than the one
    /// being operated on.
    #[error("feature {fid} does not belong to collection '{collection}'")]
    ForeignFeature { fid: u32, collection: String },

    /// A section id does not resolve in the sections collection.
    #[error("no section with id '{id}'")]
    UnknownSection { id: String },

    /// A required attribute field is missing from the table.
    #[error("attribute table has no '{name}' field")]
    MissingField { name: String },

    /// Two sections declare the same unique id.
    #[error("duplicate section id '{id}'")]
    DuplicateSectionId { id: String },

    /// An attribute field declares a type tag the codec does not support.
    #[error("unknown field type tag 0x{tag:02x} for field '{name}'")]
    UnknownFieldType { tag: u8, name: String },

    /// The attribute buffer disagrees with what its header declares.
    #[error("malformed attribute table: {reason}")]
    MalformedTable { reason: String },

    /// A value does not fit the byte width its field descriptor declares.
    #[error("value '{value}' overflows field '{field}' (width {width})")]
    ValueOverflow {
        field: String,
        value: String,
        width: u8,
    },
}

/// Convenient result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_mismatch_display_includes_context() {
        let err = MatchError::LengthMismatch {
            context: "section labels",
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "length mismatch in section labels: expected 3, got 2"
        );
    }

    #[test]
    fn unknown_tag_formats_as_hex() {
        let err = MatchError::UnknownFieldType {
            tag: 0x51,
            name: "WIDTH".to_string(),
        };
        assert!(err.to_string().contains("0x51"));
        assert!(err.to_string().contains("WIDTH"));
    }

    #[test]
    fn errors_are_comparable() {
        let a = MatchError::UnknownFeature { fid: 7 };
        let b = MatchError::UnknownFeature { fid: 7 };
        assert_eq!(a, b);
    }
}
