//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The message kind byte is not a known kind.
    #[error("unknown message kind: {0}")]
    UnknownKind(u8),

    /// The file type byte is not a known type.
    #[error("unknown file type: {0}")]
    UnknownFileType(u8),

    /// Reserved flag bits were set.
    #[error("invalid flags: {0:#04x}")]
    InvalidFlags(u8),

    /// The frame ended before the named field was complete.
    #[error("truncated frame: {0}")]
    Truncated(&'static str),

    /// The declared body length exceeds the frame limit.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// The declared body length disagrees with the decoded fields.
    #[error("frame length mismatch: declared {declared}, decoded {decoded}")]
    LengthMismatch {
        /// Length announced by the prefix.
        declared: usize,
        /// Length consumed by the fields.
        decoded: usize,
    },

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    /// A field is too long for its length prefix.
    #[error("{0} too long: {1} bytes")]
    FieldTooLong(&'static str, usize),

    /// A chunk declares more bytes than its payload holds.
    #[error("chunk declares {declared} bytes but carries {carried}")]
    ChunkOverrun {
        /// Size announced in the frame.
        declared: u64,
        /// Bytes actually present.
        carried: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
