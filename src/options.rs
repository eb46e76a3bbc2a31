//! Archive-wide writer settings.

use derivative::Derivative;
use encoding_rs::Encoding;

use crate::{
    error::{Result, ZipError},
    level::CompressionLevel,
    CompressionType,
};

/// Defaults applied by a [`ZipWriter`](crate::ZipWriter) to every entry it writes.
///
/// ```
/// use stzip::{CompressionLevel, CompressionType, WriterOptions};
///
/// let options = WriterOptions::new()
///     .with_level(CompressionLevel::best())
///     .with_method(CompressionType::Deflate)
///     .with_encoding("latin1")
///     .unwrap()
///     .with_comment("built by stzip");
/// assert_eq!(options.encoding().name(), "windows-1252");
/// ```
#[derive(Derivative, Clone)]
#[derivative(Debug, Default)]
pub struct WriterOptions {
    level: CompressionLevel,
    method: CompressionType,
    #[derivative(Default(value = "encoding_rs::UTF_8"))]
    encoding: &'static Encoding,
    comment: String,
}

impl WriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Level used for deflated entries.
    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    /// Method for entries that don't specify one.
    pub fn with_method(mut self, method: CompressionType) -> Self {
        self.method = method;
        self
    }

    /// Text encoding of entry names and comments, given as a WHATWG label such as `"utf-8"`,
    /// `"utf8"` or `"latin1"`.
    pub fn with_encoding(mut self, label: &str) -> Result<Self> {
        self.encoding = encoding_for_label(label)?;
        Ok(self)
    }

    /// Archive comment written in the end of central directory record.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    pub fn method(&self) -> CompressionType {
        self.method
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Whether names are written as UTF-8, which is flagged in every header.
    pub fn is_utf8(&self) -> bool {
        self.encoding == encoding_rs::UTF_8
    }

    pub(crate) fn set_level(&mut self, level: CompressionLevel) {
        self.level = level;
    }

    pub(crate) fn set_method(&mut self, method: CompressionType) {
        self.method = method;
    }

    pub(crate) fn set_encoding(&mut self, encoding: &'static Encoding) {
        self.encoding = encoding;
    }

    pub(crate) fn set_comment(&mut self, comment: String) {
        self.comment = comment;
    }

    /// Encodes `text` for a header field, which holds at most 65535 bytes.
    pub(crate) fn encode(&self, what: &str, text: &str) -> Result<Vec<u8>> {
        let (bytes, _, had_errors) = self.encoding.encode(text);
        if had_errors {
            return Err(ZipError::invalid_argument(format!(
                "{what} {text:?} cannot be represented in {}",
                self.encoding.name()
            )));
        }
        if bytes.len() > u16::MAX as usize {
            return Err(ZipError::invalid_argument(format!(
                "{what} is {} bytes long, at most 65535 are allowed",
                bytes.len()
            )));
        }
        Ok(bytes.into_owned())
    }
}

/// Resolves a label to the encoding actually produced when encoding with it.
pub(crate) fn encoding_for_label(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .map(Encoding::output_encoding)
        .ok_or_else(|| ZipError::invalid_argument(format!("unknown text encoding {label:?}")))
}
