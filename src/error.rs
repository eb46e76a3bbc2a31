//! Error types produced while building an archive.

use std::io;

use thiserror::Error;

/// Everything that can go wrong while writing a zip archive.
#[derive(Debug, Error)]
pub enum ZipError {
    /// I/O error from the underlying sink.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The deflate compressor reported a failure.
    #[error("Deflate error: {0}")]
    Deflate(#[from] flate2::CompressError),

    /// An argument was rejected before anything was written.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the argument.
        message: String,
    },

    /// A size or checksum outside of the unsigned 32-bit range.
    #[error("{field} out of range: {value} is not within 0..=0xFFFFFFFF")]
    OutOfRange {
        /// Name of the rejected field.
        field: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// Malformed extra field data.
    #[error("Malformed extra field: {message} (data: {bytes:02x?})")]
    Format {
        /// Description of the problem.
        message: String,
        /// The bytes that failed to parse.
        bytes: Vec<u8>,
    },

    /// Operation not allowed in the current writer state.
    #[error("Illegal state: {message}")]
    IllegalState {
        /// Description of the violated state.
        message: String,
    },

    /// A value does not fit into the classic (non-zip64) format.
    #[error("{what} exceeds the zip format limit: {value}")]
    LimitExceeded {
        /// The quantity that overflowed.
        what: &'static str,
        /// Its value.
        value: u64,
    },
}

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, ZipError>;

impl ZipError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn out_of_range(field: &'static str, value: i64) -> Self {
        Self::OutOfRange { field, value }
    }

    pub fn format(message: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::Format {
            message: message.into(),
            bytes: bytes.into(),
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    pub fn limit_exceeded(what: &'static str, value: u64) -> Self {
        Self::LimitExceeded { what, value }
    }
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(err) => err,
            ZipError::InvalidArgument { .. }
            | ZipError::OutOfRange { .. }
            | ZipError::LimitExceeded { .. } => io::Error::new(io::ErrorKind::InvalidInput, err),
            ZipError::Format { .. } => io::Error::new(io::ErrorKind::InvalidData, err),
            ZipError::Deflate(_) | ZipError::IllegalState { .. } => io::Error::other(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ZipError::out_of_range("size", -2);
        assert!(err.to_string().contains("size out of range"));

        let err = ZipError::format("truncated", vec![0x55, 0x54]);
        assert!(err.to_string().contains("55, 54"));
    }

    #[test]
    fn test_io_round_trip() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        let err: ZipError = io_err.into();
        assert!(matches!(err, ZipError::Io(_)));

        let back: io::Error = err.into();
        assert_eq!(back.kind(), io::ErrorKind::BrokenPipe);

        let back: io::Error = ZipError::illegal_state("finished").into();
        assert_eq!(back.kind(), io::ErrorKind::Other);
    }
}
