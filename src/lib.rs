//! Writing zip archives entry by entry.
//!
//! A [`ZipWriter`] streams every entry straight to its output: it writes the local file header,
//! passes the data through a stored or deflate [`EntrySink`], and writes the central directory
//! when the archive is finished. On a seekable output the CRC and sizes are patched into the
//! local header once an entry is closed. On a streaming output they follow the data in a data
//! descriptor instead.
//!
//! ```
//! use std::io::{Cursor, Write};
//!
//! use stzip::{ZipEntry, ZipWriter};
//!
//! # fn main() -> stzip::Result<()> {
//! let mut writer = ZipWriter::new(Cursor::new(Vec::new()))?;
//! writer.put_entry(ZipEntry::new("a.txt"))?;
//! writer.write_all(b"hello")?;
//! writer.add_directory("dir")?;
//! let archive = writer.close()?.into_inner();
//! assert_eq!(&archive[..4], b"PK\x03\x04");
//! # Ok(())
//! # }
//! ```
//!
//! Only the classic format is produced: entries, sizes and offsets are limited to what fits
//! in the 16 and 32-bit header fields.

use std::{
    fs,
    io::{self, ErrorKind, Read, Seek, SeekFrom, Write},
    path::Path,
};

use chrono::Utc;
use derivative::Derivative;
use log::{debug, trace};

mod error;
mod level;
mod options;
mod platform;
mod zip_archive_parts;

pub use error::{Result, ZipError};
pub use level::{CompressionLevel, CompressionLevelError};
pub use options::WriterOptions;
pub use zip_archive_parts::{
    codec, dos_time,
    extra_field::{
        ExtraField, ExtraFieldContext, ExtraFields, EXTENDED_TIMESTAMP_HEADER_ID, NTFS_HEADER_ID,
        UNIX_ATTRS_HEADER_ID,
    },
    file::{Platform, ZipEntry},
    sink::EntrySink,
};

use platform::{DEFAULT_UNIX_DIR_ATTRS, DEFAULT_UNIX_FILE_ATTRS};
use zip_archive_parts::{
    codec::HeaderBuffer,
    data::{CentralDirectoryEnd, DataDescriptor},
    file::{EntryInfo, LOCAL_FILE_HEADER_CRC_OFFSET, LOCAL_FILE_HEADER_LENGTH},
    sink::DeflatePool,
    CountingWriter,
};

const VERSION_NEEDED_TO_EXTRACT: u16 = 10;
const VERSION_NEEDED_WITH_DATA_DESCRIPTOR: u16 = 20;

const DATA_DESCRIPTOR_FLAG: u16 = 1 << 3;
const UTF8_NAMES_FLAG: u16 = 1 << 11;

/// Compression method of an entry.
#[repr(u16)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CompressionType {
    Stored = 0,
    #[default]
    Deflate = 8,
}

impl TryFrom<u16> for CompressionType {
    type Error = ZipError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Self::Stored),
            8 => Ok(Self::Deflate),
            _ => Err(ZipError::invalid_argument(format!(
                "compression method {value} is not supported, use 0 (stored) or 8 (deflate)"
            ))),
        }
    }
}

/// Writes `bytes` at absolute position `at`, then returns to `resume`.
type PatchFn<W> = fn(&mut W, u64, &[u8], u64) -> io::Result<()>;

fn patch_in_place<W: Write + Seek>(
    inner: &mut W,
    at: u64,
    bytes: &[u8],
    resume: u64,
) -> io::Result<()> {
    inner.seek(SeekFrom::Start(at))?;
    inner.write_all(bytes)?;
    inner.seek(SeekFrom::Start(resume))?;
    Ok(())
}

#[derive(Debug)]
enum WriterState {
    Idle,
    EntryOpen(EntrySink),
    Finished,
}

/// Builds a zip archive on `W`, one entry at a time.
///
/// Entries are opened with [`put_entry`](Self::put_entry), receive their data through
/// [`write_entry_data`](Self::write_entry_data) or the [`Write`] implementation, and are closed
/// explicitly with [`close_entry`](Self::close_entry) or implicitly by opening the next entry or
/// finishing the archive.
///
/// Writing through [`Write`] while no entry is open copies the bytes to the output unchanged,
/// which lets callers put a preamble (such as a self-extractor stub) in front of the archive.
///
/// Dropping a writer without calling [`finish`](Self::finish) or [`close`](Self::close) leaves
/// an archive without a central directory.
#[derive(Derivative)]
#[derivative(Debug(bound = "W: std::fmt::Debug"))]
pub struct ZipWriter<W> {
    inner: W,
    /// Present when the output is seekable
    #[derivative(Debug = "ignore")]
    patch: Option<PatchFn<W>>,
    /// Output position the archive starts at
    start_position: u64,
    written: u64,
    options: WriterOptions,
    entries: Vec<ZipEntry>,
    state: WriterState,
    header: HeaderBuffer,
    pool: DeflatePool,
}

impl<W: Write + Seek> ZipWriter<W> {
    /// Writer on a seekable output. Local headers are patched in place, no data descriptors are
    /// written.
    pub fn new(inner: W) -> Result<Self> {
        Self::with_options(inner, WriterOptions::default())
    }

    pub fn with_options(mut inner: W, options: WriterOptions) -> Result<Self> {
        let start_position = inner.stream_position()?;
        Ok(Self::build(
            inner,
            Some(patch_in_place::<W>),
            start_position,
            options,
        ))
    }
}

impl<W: Write> ZipWriter<W> {
    /// Writer on an output that is never seeked. Every entry is followed by a data descriptor.
    pub fn new_streaming(inner: W) -> Self {
        Self::streaming_with_options(inner, WriterOptions::default())
    }

    pub fn streaming_with_options(inner: W, options: WriterOptions) -> Self {
        Self::build(inner, None, 0, options)
    }

    fn build(
        inner: W,
        patch: Option<PatchFn<W>>,
        start_position: u64,
        options: WriterOptions,
    ) -> Self {
        Self {
            inner,
            patch,
            start_position,
            written: 0,
            options,
            entries: Vec::new(),
            state: WriterState::Idle,
            header: HeaderBuffer::with_capacity(1024),
            pool: DeflatePool::new(),
        }
    }

    pub fn is_seekable(&self) -> bool {
        self.patch.is_some()
    }

    /// Bytes written since the writer was created.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, WriterState::Finished)
    }

    /// All entries opened so far, in the order they were opened.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn current_entry(&self) -> Option<&ZipEntry> {
        match self.state {
            WriterState::EntryOpen(_) => self.entries.last(),
            _ => None,
        }
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Level for entries opened from now on.
    pub fn set_level(&mut self, level: CompressionLevel) {
        self.options.set_level(level);
    }

    /// Method for entries opened from now on that don't specify one.
    pub fn set_method(&mut self, method: CompressionType) {
        self.options.set_method(method);
    }

    /// Encoding of names and comments of entries opened from now on, and of the archive comment.
    pub fn set_encoding(&mut self, label: &str) -> Result<()> {
        self.options.set_encoding(options::encoding_for_label(label)?);
        Ok(())
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) -> Result<()> {
        let comment = comment.into();
        self.options.encode("archive comment", &comment)?;
        self.options.set_comment(comment);
        Ok(())
    }

    /// Closes the current entry, if any, and starts `entry`.
    ///
    /// An unset method or modification time is filled in from the writer defaults and the
    /// current time. Names, comments and extra fields are validated before anything is written.
    pub fn put_entry(&mut self, mut entry: ZipEntry) -> Result<()> {
        self.ensure_not_finished()?;
        self.close_entry()?;

        if self.entries.len() >= u16::MAX as usize {
            return Err(ZipError::limit_exceeded(
                "entry count",
                self.entries.len() as u64 + 1,
            ));
        }
        let header_offset = self.written;
        checked_u32("local header offset", header_offset)?;

        entry.resolve_defaults(self.options.method(), Utc::now().timestamp_millis());
        let name = self.options.encode("entry name", entry.name())?;
        let comment = match entry.comment() {
            Some(comment) => self.options.encode("entry comment", comment)?,
            None => Vec::new(),
        };
        let local_extra = checked_extra(entry.local_extra())?;
        let central_extra = checked_extra(entry.central_extra())?;

        let (version_needed, flags) = self.version_and_flags();
        let info = EntryInfo {
            header_offset,
            data_offset: header_offset
                + LOCAL_FILE_HEADER_LENGTH
                + name.len() as u64
                + local_extra.len() as u64,
            version_needed,
            flags,
            name,
            comment,
            central_extra,
        };

        self.header.clear();
        entry.write_local_file_header(&info, &local_extra, &mut self.header);
        self.emit_header()?;

        let sink = match entry.method().unwrap_or_default() {
            CompressionType::Stored => EntrySink::stored(),
            CompressionType::Deflate => self.pool.take(self.options.level()),
        };
        debug!(
            "Opened entry {} at offset {} ({:?})",
            entry.name(),
            header_offset,
            sink.compression_type()
        );

        entry.info = Some(info);
        self.entries.push(entry);
        self.state = WriterState::EntryOpen(sink);
        Ok(())
    }

    /// Data of the current entry. Fails if no entry is open.
    pub fn write_entry_data(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.state {
            WriterState::EntryOpen(sink) => {
                sink.write(data, &mut CountingWriter::new(&mut self.inner, &mut self.written))
            }
            _ => Err(ZipError::illegal_state("no entry is open")),
        }
    }

    /// Finishes the data of the current entry and records its CRC and sizes, either in its
    /// local header or in a data descriptor. Does nothing if no entry is open.
    pub fn close_entry(&mut self) -> Result<()> {
        let mut sink = match std::mem::replace(&mut self.state, WriterState::Idle) {
            WriterState::EntryOpen(sink) => sink,
            other => {
                self.state = other;
                return Ok(());
            }
        };

        sink.finish(&mut CountingWriter::new(&mut self.inner, &mut self.written))?;
        let crc = sink.crc();
        let size = checked_u32("entry size", sink.total_in())?;
        let compressed_size = checked_u32("compressed entry size", sink.total_out())?;
        self.pool.give_back(sink);

        let entry = self
            .entries
            .last_mut()
            .ok_or_else(|| ZipError::illegal_state("open entry missing from the entry list"))?;
        entry.set_written_sizes(crc, compressed_size, size);
        let header_offset = entry.header_offset().unwrap_or_default();

        self.header.clear();
        match self.patch {
            Some(patch) => {
                self.header.push_u32(crc);
                self.header.push_u32(compressed_size);
                self.header.push_u32(size);
                let at = self.start_position + header_offset + LOCAL_FILE_HEADER_CRC_OFFSET;
                patch(
                    &mut self.inner,
                    at,
                    self.header.as_slice(),
                    self.start_position + self.written,
                )?;
                trace!("Patched local header at {at}");
            }
            None => {
                DataDescriptor {
                    crc,
                    compressed_size,
                    uncompressed_size: size,
                }
                .write(&mut self.header);
                self.emit_header()?;
                trace!("Appended {} byte data descriptor", DataDescriptor::LENGTH);
            }
        }

        debug!(
            "Closed entry #{}: {} bytes, {} compressed, crc {:#010x}",
            self.entries.len(),
            size,
            compressed_size,
            crc
        );
        Ok(())
    }

    /// Closes the current entry and writes the central directory and its end record.
    ///
    /// The writer accepts nothing afterwards; finishing a second time is an error.
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_not_finished()?;
        self.close_entry()?;

        let comment = self.options.encode("archive comment", self.options.comment())?;
        let central_dir_offset = self.written;
        let central_dir_offset_u32 = checked_u32("central directory offset", central_dir_offset)?;

        for entry in &self.entries {
            self.header.clear();
            entry.write_central_directory_entry(&mut self.header)?;
            CountingWriter::new(&mut self.inner, &mut self.written)
                .write_all(self.header.as_slice())?;
        }
        let central_dir_size = self.written - central_dir_offset;

        self.header.clear();
        CentralDirectoryEnd {
            // Bounded when entries are opened
            entries: self.entries.len() as u16,
            central_dir_size: checked_u32("central directory size", central_dir_size)?,
            central_dir_offset: central_dir_offset_u32,
            comment: &comment,
        }
        .write(&mut self.header);
        self.emit_header()?;
        self.inner.flush()?;

        self.state = WriterState::Finished;
        debug!(
            "Finished archive: {} entries, {} bytes",
            self.entries.len(),
            self.written
        );
        Ok(())
    }

    /// Finishes the archive if needed, flushes and returns the output.
    pub fn close(mut self) -> Result<W> {
        if !self.is_finished() {
            self.finish()?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }

    /// Writes a whole entry: opens it, copies `reader` into it and closes it. Returns the number
    /// of bytes copied.
    pub fn write_entry<R: Read>(&mut self, entry: ZipEntry, mut reader: R) -> Result<u64> {
        self.put_entry(entry)?;
        let mut buf = [0; 8 * 1024];
        let mut copied = 0;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            self.write_entry_data(&buf[..n])?;
            copied += n as u64;
        }
        self.close_entry()?;
        Ok(copied)
    }

    /// Adds a stored directory entry with default Unix permissions.
    pub fn add_directory(&mut self, archive_name: &str) -> Result<()> {
        let mut entry = ZipEntry::directory(archive_name);
        entry.set_unix_mode(DEFAULT_UNIX_DIR_ATTRS);
        entry.set_compression_type(CompressionType::Stored);
        self.put_entry(entry)?;
        self.close_entry()
    }

    /// Adds a file entry holding `data`, with default Unix permissions.
    pub fn add_file_from_slice(&mut self, data: &[u8], archive_name: &str) -> Result<()> {
        let mut entry = ZipEntry::new(archive_name);
        entry.set_unix_mode(DEFAULT_UNIX_FILE_ATTRS);
        self.write_entry(entry, data)?;
        Ok(())
    }

    /// Adds a file or directory from the filesystem, keeping its modification time and
    /// permissions.
    pub fn add_file(&mut self, fs_path: impl AsRef<Path>, archive_name: &str) -> Result<()> {
        let fs_path = fs_path.as_ref();
        let metadata = fs::metadata(fs_path)?;
        let mut entry = ZipEntry::from_metadata(archive_name, &metadata);
        if entry.is_directory() {
            entry.set_compression_type(CompressionType::Stored);
            self.put_entry(entry)?;
            return self.close_entry();
        }
        let file = fs::File::open(fs_path)?;
        self.write_entry(entry, file)?;
        Ok(())
    }

    fn ensure_not_finished(&self) -> Result<()> {
        if self.is_finished() {
            return Err(ZipError::illegal_state("archive already finished"));
        }
        Ok(())
    }

    fn emit_header(&mut self) -> Result<()> {
        CountingWriter::new(&mut self.inner, &mut self.written).write_all(self.header.as_slice())?;
        Ok(())
    }

    /// Header fields shared by all entries: data descriptors exactly when the output can't be
    /// patched, the language encoding flag when names are UTF-8.
    fn version_and_flags(&self) -> (u16, u16) {
        let utf8 = if self.options.is_utf8() {
            UTF8_NAMES_FLAG
        } else {
            0
        };
        if self.is_seekable() {
            (VERSION_NEEDED_TO_EXTRACT, utf8)
        } else {
            (
                VERSION_NEEDED_WITH_DATA_DESCRIPTOR,
                utf8 | DATA_DESCRIPTOR_FLAG,
            )
        }
    }
}

impl<W: Write> Write for ZipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.state {
            WriterState::EntryOpen(sink) => {
                sink.write(buf, &mut CountingWriter::new(&mut self.inner, &mut self.written))?;
                Ok(buf.len())
            }
            WriterState::Idle => {
                let n = self.inner.write(buf)?;
                self.written += n as u64;
                trace!("Passed {n} bytes through outside of any entry");
                Ok(n)
            }
            WriterState::Finished => {
                Err(ZipError::illegal_state("archive already finished").into())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[inline]
fn checked_u32(what: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| ZipError::limit_exceeded(what, value))
}

#[inline]
fn checked_extra(data: Vec<u8>) -> Result<Vec<u8>> {
    if data.len() > u16::MAX as usize {
        return Err(ZipError::invalid_argument(format!(
            "extra fields are {} bytes long, at most 65535 are allowed",
            data.len()
        )));
    }
    Ok(data)
}
