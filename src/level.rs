//! Compression level

use core::fmt::Display;
use std::error::Error;

use flate2::Compression;

/// Compression level used for deflated entries.
///
/// The deflate backends only understand levels 0 to 9, so those are the only ones accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    /// Returns `None` if `level` is above 9.
    #[inline]
    pub const fn new(level: u8) -> Option<Self> {
        if level <= 9 {
            Some(Self(level))
        } else {
            None
        }
    }

    /// Level 0, deflate blocks without compression.
    #[inline]
    pub const fn none() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn fast() -> Self {
        Self(1)
    }

    #[inline]
    pub const fn best() -> Self {
        Self(9)
    }

    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(6)
    }
}

impl From<CompressionLevel> for Compression {
    #[inline]
    fn from(value: CompressionLevel) -> Self {
        Compression::new(value.0.into())
    }
}

/// Returned when converting an integer above 9 into a [`CompressionLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevelError(u8);

impl Display for CompressionLevelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "compression level {} is not within 0..=9", self.0)
    }
}

impl Error for CompressionLevelError {}

impl TryFrom<u8> for CompressionLevel {
    type Error = CompressionLevelError;

    #[inline]
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(CompressionLevelError(value))
    }
}
