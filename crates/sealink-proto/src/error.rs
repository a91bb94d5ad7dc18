//! Protocol-level decode errors.

use thiserror::Error;

/// Errors produced while encoding or decoding wire frames.
///
/// All of these are structural. A frame that decodes cleanly may still fail
/// cryptographic verification downstream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame length does not match the fixed layout.
    #[error("frame length {actual} does not match expected {expected}")]
    LengthMismatch {
        /// Required length for this frame type.
        expected: usize,
        /// Length received.
        actual: usize,
    },

    /// Frame ended before a declared field.
    #[error("frame truncated: needed {needed} more bytes")]
    Truncated {
        /// Bytes missing from the declared layout.
        needed: usize,
    },

    /// A length field claims more than the frame can hold.
    #[error("declared field length {declared} exceeds remaining {remaining} bytes")]
    FieldTooLong {
        /// Length declared by the frame.
        declared: usize,
        /// Bytes actually remaining.
        remaining: usize,
    },

    /// A fixed-size field carried the wrong length.
    #[error("field `{field}` has length {actual}, expected {expected}")]
    BadFieldLength {
        /// Field name.
        field: &'static str,
        /// Required length.
        expected: usize,
        /// Declared length.
        actual: usize,
    },

    /// Unsupported protocol version.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    /// Bytes remained after the declared layout was consumed.
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_without_payload_content() {
        let err = ProtocolError::FieldTooLong { declared: 4096, remaining: 10 };
        assert_eq!(err.to_string(), "declared field length 4096 exceeds remaining 10 bytes");
    }
}
