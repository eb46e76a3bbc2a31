use std::fs::Metadata;

use chrono::{DateTime, Utc};

use super::{
    codec::HeaderBuffer,
    dos_time,
    extra_field::{ExtraField, ExtraFieldContext, ExtraFields},
};
use crate::{
    error::{Result, ZipError},
    platform, CompressionType,
};

const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034B50;
const CENTRAL_FILE_HEADER_SIGNATURE: u32 = 0x02014B50;

/// Fixed part of a local file header, before the name and extra field.
pub(crate) const LOCAL_FILE_HEADER_LENGTH: u64 = 30;
/// Position of the CRC field inside a local file header, followed by both sizes.
pub(crate) const LOCAL_FILE_HEADER_CRC_OFFSET: u64 = 14;

/// Version of the format this library writes, as stored in "version made by".
const SPECIFICATION_VERSION: u16 = 20;

/// MS-DOS read-only attribute bit.
pub(crate) const DOS_READ_ONLY: u32 = 0x01;
/// MS-DOS directory attribute bit.
pub(crate) const DOS_DIRECTORY: u32 = 0x10;

/// Host system the attributes of an entry are meaningful on.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Platform {
    /// MS-DOS/FAT attributes only.
    #[default]
    Fat = 0,
    /// Unix permission bits in the upper half of the external attributes.
    Unix = 3,
}

/// Bookkeeping recorded when an entry is written. Only meaningful while the archive that wrote
/// it is being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryInfo {
    pub(crate) header_offset: u64,
    pub(crate) data_offset: u64,
    pub(crate) version_needed: u16,
    pub(crate) flags: u16,
    pub(crate) name: Vec<u8>,
    pub(crate) comment: Vec<u8>,
    pub(crate) central_extra: Vec<u8>,
}

/// One member of an archive: its name and all the metadata stored in its headers.
///
/// Sizes and the CRC are unset until the entry has been written; the writer fills them in from
/// the data it compressed. A name ending in `/` makes the entry a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    name: String,
    size: Option<u32>,
    compressed_size: Option<u32>,
    crc: Option<u32>,
    time: Option<i64>,
    dos_time: Option<u32>,
    method: Option<CompressionType>,
    comment: Option<String>,
    platform: Platform,
    internal_attributes: u16,
    external_attributes: u32,
    extra_fields: ExtraFields,
    pub(crate) info: Option<EntryInfo>,
}

impl ZipEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            compressed_size: None,
            crc: None,
            time: None,
            dos_time: None,
            method: None,
            comment: None,
            platform: Platform::Fat,
            internal_attributes: 0,
            external_attributes: 0,
            extra_fields: ExtraFields::default(),
            info: None,
        }
    }

    /// A directory entry; a trailing `/` is appended to `name` if missing.
    pub fn directory(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Self::new(name)
    }

    /// An entry describing a file or directory on disk: modification time, permissions,
    /// timestamp/owner extra fields and, for files, the size are taken from `metadata`.
    pub fn from_metadata(name: impl Into<String>, metadata: &Metadata) -> Self {
        let mut entry = if metadata.is_dir() {
            Self::directory(name)
        } else {
            let mut entry = Self::new(name);
            entry.size = u32::try_from(metadata.len()).ok();
            entry
        };
        if let Ok(modified) = metadata.modified() {
            entry.set_time(DateTime::<Utc>::from(modified).timestamp_millis());
        }
        platform::apply_fs_attributes(&mut entry, metadata);
        entry.extra_fields = ExtraFields::new_from_fs(metadata);
        entry
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Uncompressed size.
    pub fn size(&self) -> Option<u32> {
        self.size
    }

    /// Fails with [`ZipError::OutOfRange`] unless `size` fits in an unsigned 32-bit integer.
    pub fn set_size(&mut self, size: i64) -> Result<()> {
        self.size = Some(checked_u32("size", size)?);
        Ok(())
    }

    pub fn clear_size(&mut self) {
        self.size = None;
    }

    pub fn compressed_size(&self) -> Option<u32> {
        self.compressed_size
    }

    pub fn set_compressed_size(&mut self, size: i64) -> Result<()> {
        self.compressed_size = Some(checked_u32("compressed size", size)?);
        Ok(())
    }

    pub fn clear_compressed_size(&mut self) {
        self.compressed_size = None;
    }

    /// CRC-32 of the uncompressed data.
    pub fn crc(&self) -> Option<u32> {
        self.crc
    }

    pub fn set_crc(&mut self, crc: i64) -> Result<()> {
        self.crc = Some(checked_u32("crc", crc)?);
        Ok(())
    }

    pub fn clear_crc(&mut self) {
        self.crc = None;
    }

    /// Modification time in milliseconds since the Unix epoch.
    pub fn time(&self) -> Option<i64> {
        self.time
    }

    /// Sets the modification time, recomputing the DOS form stored in the headers.
    pub fn set_time(&mut self, millis: i64) {
        self.time = Some(millis);
        self.dos_time = dos_time::to_dos_time(self.time);
    }

    pub fn clear_time(&mut self) {
        self.time = None;
        self.dos_time = None;
    }

    /// Modification time as written to the headers.
    pub fn dos_time(&self) -> Option<u32> {
        self.dos_time
    }

    pub fn set_dos_time(&mut self, dos_time: u32) {
        self.dos_time = Some(dos_time);
        self.time = dos_time::to_epoch_millis(self.dos_time);
    }

    /// Compression method, `None` to use the writer's default.
    pub fn method(&self) -> Option<CompressionType> {
        self.method
    }

    /// Sets the method from its numeric id; only 0 (stored) and 8 (deflate) are accepted.
    pub fn set_method(&mut self, method: u16) -> Result<()> {
        self.method = Some(CompressionType::try_from(method)?);
        Ok(())
    }

    pub fn set_compression_type(&mut self, method: CompressionType) {
        self.method = Some(method);
    }

    pub fn clear_method(&mut self) {
        self.method = None;
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Fails if the comment has more than 65535 characters, which no text encoding fits in a
    /// header. The byte length depends on the writer's encoding and is checked when the entry
    /// is written.
    pub fn set_comment(&mut self, comment: impl Into<String>) -> Result<()> {
        let comment = comment.into();
        let chars = comment.chars().count();
        if chars > u16::MAX as usize {
            return Err(ZipError::invalid_argument(format!(
                "comment has {chars} characters, at most 65535 are allowed"
            )));
        }
        self.comment = Some(comment);
        Ok(())
    }

    pub fn clear_comment(&mut self) {
        self.comment = None;
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn set_platform(&mut self, platform: Platform) {
        self.platform = platform;
    }

    pub fn internal_attributes(&self) -> u16 {
        self.internal_attributes
    }

    pub fn set_internal_attributes(&mut self, attributes: u16) {
        self.internal_attributes = attributes;
    }

    pub fn external_attributes(&self) -> u32 {
        self.external_attributes
    }

    pub fn set_external_attributes(&mut self, attributes: u32) {
        self.external_attributes = attributes;
    }

    /// Stores Unix permission bits in the upper half of the external attributes, together with
    /// the MS-DOS read-only and directory bits derived from them, and marks the entry as
    /// created on Unix.
    pub fn set_unix_mode(&mut self, mode: u32) {
        let read_only = if mode & 0o200 == 0 { DOS_READ_ONLY } else { 0 };
        let directory = if self.is_directory() { DOS_DIRECTORY } else { 0 };
        self.external_attributes = ((mode & 0xFFFF) << 16) | read_only | directory;
        self.platform = Platform::Unix;
    }

    /// Unix permission bits, 0 unless the entry was created on Unix.
    pub fn unix_mode(&self) -> u32 {
        match self.platform {
            Platform::Unix => (self.external_attributes >> 16) & 0xFFFF,
            Platform::Fat => 0,
        }
    }

    pub fn extra_fields(&self) -> &ExtraFields {
        &self.extra_fields
    }

    pub fn extra_fields_mut(&mut self) -> &mut ExtraFields {
        &mut self.extra_fields
    }

    pub fn set_extra_fields(&mut self, fields: ExtraFields) {
        self.extra_fields = fields;
    }

    /// Adds a field, replacing the one with the same header id.
    pub fn add_extra_field(&mut self, field: ExtraField) -> Option<ExtraField> {
        self.extra_fields.add(field)
    }

    pub fn extra_field(&self, header_id: u16) -> Option<&ExtraField> {
        self.extra_fields.get(header_id)
    }

    pub fn remove_extra_field(&mut self, header_id: u16) -> Option<ExtraField> {
        self.extra_fields.remove(header_id)
    }

    /// Replaces the extra fields with those parsed from local file header data.
    pub fn set_extra(&mut self, data: &[u8]) -> Result<()> {
        self.extra_fields = ExtraFields::parse(data, ExtraFieldContext::LocalHeader)?;
        Ok(())
    }

    /// Merges extra field data from a central directory header into the current fields.
    pub fn set_central_extra(&mut self, data: &[u8]) -> Result<()> {
        self.extra_fields.merge_central(data)
    }

    pub fn local_extra(&self) -> Vec<u8> {
        self.extra_fields.local_data()
    }

    pub fn central_extra(&self) -> Vec<u8> {
        self.extra_fields.central_data()
    }

    /// Offset of the local file header in the archive, once written.
    pub fn header_offset(&self) -> Option<u64> {
        self.info.as_ref().map(|info| info.header_offset)
    }

    /// Offset of the entry data in the archive, once written.
    pub fn data_offset(&self) -> Option<u64> {
        self.info.as_ref().map(|info| info.data_offset)
    }

    pub(crate) fn resolve_defaults(&mut self, method: CompressionType, now_millis: i64) {
        self.method.get_or_insert(method);
        if self.time.is_none() {
            self.set_time(now_millis);
        }
    }

    pub(crate) fn set_written_sizes(&mut self, crc: u32, compressed_size: u32, size: u32) {
        self.crc = Some(crc);
        self.compressed_size = Some(compressed_size);
        self.size = Some(size);
    }

    #[inline]
    fn method_id(&self) -> u16 {
        self.method.unwrap_or_default() as u16
    }

    /// Local file header with zeroed CRC and sizes, which are either patched in place or
    /// repeated in a data descriptor once the data is written.
    pub(crate) fn write_local_file_header(
        &self,
        info: &EntryInfo,
        local_extra: &[u8],
        buf: &mut HeaderBuffer,
    ) {
        // signature
        buf.push_u32(LOCAL_FILE_HEADER_SIGNATURE);
        // version needed to extract
        buf.push_u16(info.version_needed);
        // general purpose bit flag
        buf.push_u16(info.flags);
        // compression type
        buf.push_u16(self.method_id());
        // Last modification time and date
        buf.push_u32(self.dos_time.unwrap_or(dos_time::DOS_TIME_MIN));
        // crc
        buf.push_u32(0);
        // Compressed size
        buf.push_u32(0);
        // Uncompressed size
        buf.push_u32(0);
        // Filename size, range checked when the entry was opened
        buf.push_u16(info.name.len() as u16);
        // extra field size
        buf.push_u16(local_extra.len() as u16);

        // Filename
        buf.push_bytes(&info.name);
        // Extra field
        buf.push_bytes(local_extra);
    }

    pub(crate) fn write_central_directory_entry(&self, buf: &mut HeaderBuffer) -> Result<()> {
        let info = self.info.as_ref().ok_or_else(|| {
            ZipError::illegal_state(format!("entry {} was never written", self.name))
        })?;

        // signature
        buf.push_u32(CENTRAL_FILE_HEADER_SIGNATURE);
        // version made by
        buf.push_u16(((self.platform as u16) << 8) | SPECIFICATION_VERSION);
        // version needed to extract
        buf.push_u16(info.version_needed);
        // general purpose bit flag
        buf.push_u16(info.flags);
        // compression type
        buf.push_u16(self.method_id());
        // Last modification time and date
        buf.push_u32(self.dos_time.unwrap_or(dos_time::DOS_TIME_MIN));
        // crc
        buf.push_u32(self.crc.unwrap_or(0));
        // Compressed size
        buf.push_u32(self.compressed_size.unwrap_or(0));
        // Uncompressed size
        buf.push_u32(self.size.unwrap_or(0));
        // Filename size
        buf.push_u16(info.name.len() as u16);
        // extra field size
        buf.push_u16(info.central_extra.len() as u16);
        // comment size
        buf.push_u16(info.comment.len() as u16);
        // disk number start
        buf.push_u16(0);
        // internal file attributes
        buf.push_u16(self.internal_attributes);
        // external file attributes
        buf.push_u32(self.external_attributes);
        // relative offset of local header, range checked when the entry was opened
        buf.push_u32(info.header_offset as u32);

        // Filename
        buf.push_bytes(&info.name);
        // Extra field
        buf.push_bytes(&info.central_extra);
        // Comment
        buf.push_bytes(&info.comment);

        Ok(())
    }
}

#[inline]
fn checked_u32(field: &'static str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| ZipError::out_of_range(field, value))
}
