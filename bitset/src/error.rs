//! Error types for serialization and deserialization.

/// Error type for bit-set stream operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed stream: unknown block type, truncated or inconsistent header.
    Format(String),

    /// Invalid input or parameter errors.
    InvalidInput(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Format(msg) => write!(f, "Format error: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

/// Result type alias for bit-set stream operations.
pub type Result<T> = std::result::Result<T, Error>;
