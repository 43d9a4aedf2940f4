use thiserror::Error;

/// Shared lightweight error type for core primitive operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DtpcError {
    /// Invalid caller input or malformed primitive value.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Endpoint id that cannot be parsed or used as an address.
    #[error("invalid endpoint id: {0}")]
    InvalidEndpoint(String),
    /// Value does not fit the sequence counter range.
    #[error("sequence number out of range")]
    SeqOutOfRange,
}
