use thiserror::Error;

/// Failures while encoding or decoding wire fields.
///
/// Decoding never substitutes a default value: a short buffer, an oversized
/// length prefix or malformed text always surfaces as one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("truncated {field}: need {needed} bytes, have {remaining}")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("{field} is {len} bytes, limit is {max}")]
    OversizedField {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("VarInt is longer than 5 bytes")]
    VarIntTooLong,

    #[error("negative length {len} for {field}")]
    NegativeLength { field: &'static str, len: i32 },

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("could not grow packet buffer to {requested} bytes")]
    Alloc { requested: usize },
}
