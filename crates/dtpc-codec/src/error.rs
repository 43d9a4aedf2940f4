use dtpc_core::DtpcError;
use thiserror::Error;

/// Errors returned by frame encode/decode operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a complete field could be read.
    #[error("truncated frame: {0}")]
    Truncated(&'static str),
    /// SDNV longer than any value this codec can hold.
    #[error("sdnv overflow")]
    SdnvOverflow,
    /// Reserved version bits set in the type byte.
    #[error("unsupported frame version bits {0:#04x}")]
    UnsupportedVersion(u8),
    /// Type byte names no known message kind.
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),
    /// Frame-level schema violation.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
    /// Bytes left over after a fixed-shape frame.
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
    /// Decoded value does not fit the target type.
    #[error("value out of range: {0}")]
    Range(#[from] DtpcError),
}
