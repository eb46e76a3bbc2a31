pub mod codec;
pub mod data;
pub mod dos_time;
pub mod extra_field;
pub mod file;
pub mod sink;

use std::io::Write;

/// Forwards writes to the archive output, keeping the running archive offset up to date.
pub(crate) struct CountingWriter<'a, W> {
    inner: &'a mut W,
    written: &'a mut u64,
}

impl<'a, W: Write> CountingWriter<'a, W> {
    #[inline]
    pub(crate) fn new(inner: &'a mut W, written: &'a mut u64) -> Self {
        Self { inner, written }
    }
}

impl<W: Write> Write for CountingWriter<'_, W> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        *self.written += n as u64;
        Ok(n)
    }

    #[inline]
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
