/// Error types for the wire-level decoding and building layers
use std::fmt;

/// Result type alias for reader and builder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for message decoding and building
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A read or write would cross the end of the buffer or segment
    OutOfBounds {
        /// Byte offset where the access started
        offset: usize,
        /// Number of bytes the access needed
        len: usize,
        /// Bytes actually available
        available: usize,
    },

    /// Pointer word whose geometry does not fit the message
    MalformedPointer(String),

    /// Pointer kind we refuse to follow (capabilities, double-far pads)
    UnsupportedPointer(String),

    /// Far pointer encountered in a buffer with no segment table
    FarInSingleSegment,

    /// Union field accessor invoked while a different variant is active
    WrongUnionVariant {
        /// Tag value the accessor expected
        expected: u16,
        /// Tag value actually stored in the message
        actual: u16,
    },

    /// Field kind the code generator cannot materialize yet
    Unsupported(String),

    /// I/O failure while mapping or reading message bytes
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfBounds {
                offset,
                len,
                available,
            } => write!(
                f,
                "Out of bounds: {} bytes at offset {} (only {} available)",
                len, offset, available
            ),
            Error::MalformedPointer(msg) => write!(f, "Malformed pointer: {}", msg),
            Error::UnsupportedPointer(msg) => write!(f, "Unsupported pointer: {}", msg),
            Error::FarInSingleSegment => {
                write!(f, "Cannot follow a far pointer inside a single-segment message")
            }
            Error::WrongUnionVariant { expected, actual } => write!(
                f,
                "Wrong union variant: accessor expects tag {}, message holds tag {}",
                expected, actual
            ),
            Error::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Build an `OutOfBounds` for a failed range check
    pub(crate) fn out_of_bounds(offset: usize, len: usize, available: usize) -> Self {
        Error::OutOfBounds {
            offset,
            len,
            available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = Error::out_of_bounds(16, 8, 20);
        assert_eq!(
            e.to_string(),
            "Out of bounds: 8 bytes at offset 16 (only 20 available)"
        );

        let e = Error::WrongUnionVariant {
            expected: 1,
            actual: 3,
        };
        assert!(e.to_string().contains("tag 1"));
        assert!(e.to_string().contains("tag 3"));

        assert!(Error::FarInSingleSegment.to_string().contains("far pointer"));
    }
}
