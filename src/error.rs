//! Structured error type for the EWF segment-file and chunk I/O engine.
//!
//! Every fallible operation in this crate returns [`EwfError`]. Each variant
//! carries an [`ErrorDomain`] classification and, where applicable, chains
//! the underlying cause via `#[source]` so a low-level I/O error surfaces
//! together with the high-level context that produced it.

use std::io;

/// Broad classification of an [`EwfError`], independent of its specific kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    Arguments,
    Runtime,
    Io,
    Compression,
    Conversion,
}

/// All error kinds produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum EwfError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("corrupt segment: {reason}")]
    CorruptSegment { reason: String },

    #[error("checksum mismatch for chunk {chunk}: stored 0x{stored:08x}, computed 0x{computed:08x}")]
    Checksum {
        chunk: usize,
        stored: u32,
        computed: u32,
    },

    #[error("decompression failed: {reason}")]
    Decompression { reason: String },

    #[error("malformed LEF record: {reason}")]
    MalformedRecord { reason: String },

    #[error("value out of bounds for column '{column}': {value}")]
    ValueOutOfBounds { column: String, value: String },

    #[error("unexpected LEF category header '{header}'")]
    UnexpectedCategory { header: String },

    #[error("cumulative offset would overflow the format's 63-bit limit")]
    WouldOverflow,

    #[error("not supported: {reason}")]
    NotSupported { reason: String },
}

impl EwfError {
    pub fn domain(&self) -> ErrorDomain {
        match self {
            EwfError::InvalidArgument { .. } => ErrorDomain::Arguments,
            EwfError::NotFound { .. } => ErrorDomain::Runtime,
            EwfError::Io { .. } => ErrorDomain::Io,
            EwfError::CorruptSegment { .. } => ErrorDomain::Io,
            EwfError::Checksum { .. } => ErrorDomain::Io,
            EwfError::Decompression { .. } => ErrorDomain::Compression,
            EwfError::MalformedRecord { .. } => ErrorDomain::Conversion,
            EwfError::ValueOutOfBounds { .. } => ErrorDomain::Conversion,
            EwfError::UnexpectedCategory { .. } => ErrorDomain::Conversion,
            EwfError::WouldOverflow => ErrorDomain::Runtime,
            EwfError::NotSupported { .. } => ErrorDomain::Runtime,
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        EwfError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EwfError>;

/// Maps a bare [`io::Error`] into an [`EwfError`] with no extra context.
/// Prefer [`EwfError::io`] when a human-readable context string is available.
impl From<io::Error> for EwfError {
    fn from(source: io::Error) -> Self {
        EwfError::Io {
            context: "I/O operation".to_string(),
            source,
        }
    }
}
