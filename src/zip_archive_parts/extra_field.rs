//! ZIP file extra field

use std::fs::Metadata;

use cfg_if::cfg_if;

use super::codec::{read_le16, read_le32};
use crate::error::{Result, ZipError};

/// Header id of the NTFS timestamps field.
pub const NTFS_HEADER_ID: u16 = 0x000a;
/// Header id of the Info-ZIP extended timestamp field ("UT").
pub const EXTENDED_TIMESTAMP_HEADER_ID: u16 = 0x5455;
/// Header id of the Info-ZIP Unix owner field ("ux").
pub const UNIX_ATTRS_HEADER_ID: u16 = 0x7875;

/// Which header the extra field data belongs to. Some fields carry a shorter payload in the
/// central directory than in the local file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraFieldContext {
    LocalHeader,
    CentralDirectory,
}

/// The ordered set of [`ExtraField`]s associated with an entry, at most one per header id.
///
/// [`parse`](Self::parse) reads the raw `[id][length][payload]` records found in a header,
/// [`local_data`](Self::local_data) and [`central_data`](Self::central_data) produce them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    values: Vec<ExtraField>,
}

impl ExtraFields {
    /// Collects `fields`, later fields replacing earlier ones with the same header id.
    pub fn new<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = ExtraField>,
    {
        let mut collection = Self::default();
        for field in fields {
            collection.add(field);
        }
        collection
    }

    /// Builds the timestamp and ownership fields the filesystem can provide for `metadata`.
    pub fn new_from_fs(metadata: &Metadata) -> Self {
        cfg_if! {
            if #[cfg(unix)] {
                Self::new_unix(metadata)
            } else if #[cfg(target_os = "windows")] {
                Self::new_windows(metadata)
            } else {
                let _ = metadata;
                Self::default()
            }
        }
    }

    #[cfg(unix)]
    fn new_unix(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        let mod_time = i32::try_from(metadata.mtime()).ok();
        let ac_time = i32::try_from(metadata.atime()).ok();
        let cr_time = i32::try_from(metadata.ctime()).ok();

        Self::new([
            ExtraField::UnixExtendedTimestamp {
                mod_time,
                ac_time,
                cr_time,
            },
            ExtraField::UnixAttrs {
                uid: metadata.uid(),
                gid: metadata.gid(),
            },
        ])
    }

    #[cfg(target_os = "windows")]
    fn new_windows(metadata: &Metadata) -> Self {
        use std::os::windows::fs::MetadataExt;

        Self::new([ExtraField::Ntfs {
            mtime: metadata.last_write_time(),
            atime: metadata.last_access_time(),
            ctime: metadata.creation_time(),
        }])
    }

    /// Adds `field`. A field with the same header id is replaced in place and returned.
    pub fn add(&mut self, field: ExtraField) -> Option<ExtraField> {
        let header_id = field.header_id();
        match self.values.iter_mut().find(|f| f.header_id() == header_id) {
            Some(existing) => Some(std::mem::replace(existing, field)),
            None => {
                self.values.push(field);
                None
            }
        }
    }

    pub fn get(&self, header_id: u16) -> Option<&ExtraField> {
        self.values.iter().find(|f| f.header_id() == header_id)
    }

    pub fn remove(&mut self, header_id: u16) -> Option<ExtraField> {
        let index = self.values.iter().position(|f| f.header_id() == header_id)?;
        Some(self.values.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtraField> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parses the extra field area of a header.
    ///
    /// Unknown header ids, and known ids whose payload does not have the expected shape, are
    /// kept verbatim as [`ExtraField::Unrecognized`]. A record whose declared length runs past
    /// the end of `data` is a format error. Trailing zero bytes too short to form a record are
    /// treated as alignment padding and skipped.
    pub fn parse(data: &[u8], context: ExtraFieldContext) -> Result<Self> {
        let mut fields = Self::default();
        let mut offset = 0;
        while offset < data.len() {
            let (Some(header_id), Some(length)) =
                (read_le16(data, offset), read_le16(data, offset + 2))
            else {
                if data[offset..].iter().all(|b| *b == 0) {
                    break;
                }
                return Err(ZipError::format(
                    format!("truncated record header at offset {offset}"),
                    data,
                ));
            };
            let start = offset + 4;
            let end = start + length as usize;
            if end > data.len() {
                return Err(ZipError::format(
                    format!(
                        "record {header_id:#06x} at offset {offset} declares {length} bytes, \
                         only {} remain",
                        data.len() - start
                    ),
                    data,
                ));
            }
            fields.add(ExtraField::parse(header_id, &data[start..end], context));
            offset = end;
        }
        Ok(fields)
    }

    /// Merges extra field data read from a central directory header into this set.
    ///
    /// Fields missing from the set are added. For unrecognized fields already present, the
    /// parsed payload becomes their central directory payload.
    pub fn merge_central(&mut self, data: &[u8]) -> Result<()> {
        let central = Self::parse(data, ExtraFieldContext::CentralDirectory)?;
        for field in central.values {
            match (self.values.iter_mut().find(|f| f.header_id() == field.header_id()), field) {
                (
                    Some(ExtraField::Unrecognized { central, .. }),
                    ExtraField::Unrecognized { local, .. },
                ) => *central = Some(local),
                (Some(_), _) => {}
                (None, field) => self.values.push(field),
            }
        }
        Ok(())
    }

    /// Total serialized length, record headers included.
    pub fn data_length(&self, central_header: bool) -> usize {
        self.values
            .iter()
            .map(|f| 4 + f.field_size(central_header))
            .sum()
    }

    /// Serialized form for a local file header. Empty if there are no fields.
    pub fn local_data(&self) -> Vec<u8> {
        self.to_bytes(false)
    }

    /// Serialized form for a central directory header. Empty if there are no fields.
    pub fn central_data(&self) -> Vec<u8> {
        self.to_bytes(true)
    }

    fn to_bytes(&self, central_header: bool) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.data_length(central_header));
        for field in &self.values {
            field.write_to_vec(&mut data, central_header);
        }
        data
    }
}

impl<'a> IntoIterator for &'a ExtraFields {
    type Item = &'a ExtraField;
    type IntoIter = std::slice::Iter<'a, ExtraField>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Extra data that can be associated with a file or directory.
///
/// Filesystem properties in NTFS or Unix format are understood, anything else is carried as
/// opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    /// NTFS file properties.
    Ntfs {
        /// Last modification timestamp
        mtime: u64,
        /// Last access timestamp
        atime: u64,
        /// File/directory creation timestamp
        ctime: u64,
    },
    /// Unix timestamps in seconds. Only the modification time is stored in the central
    /// directory.
    UnixExtendedTimestamp {
        mod_time: Option<i32>,
        ac_time: Option<i32>,
        cr_time: Option<i32>,
    },
    /// Unix owner ids.
    UnixAttrs { uid: u32, gid: u32 },
    /// Any other field, kept as raw payload bytes.
    Unrecognized {
        header_id: u16,
        local: Vec<u8>,
        /// Payload for the central directory, if it differs from the local one.
        central: Option<Vec<u8>>,
    },
}

const MOD_TIME_PRESENT: u8 = 1;
const AC_TIME_PRESENT: u8 = 1 << 1;
const CR_TIME_PRESENT: u8 = 1 << 2;

const NTFS_TIMES_TAG: u16 = 1;
const NTFS_TIMES_SIZE: u16 = 24;

impl ExtraField {
    #[inline]
    pub fn header_id(&self) -> u16 {
        match self {
            Self::Ntfs { .. } => NTFS_HEADER_ID,
            Self::UnixExtendedTimestamp { .. } => EXTENDED_TIMESTAMP_HEADER_ID,
            Self::UnixAttrs { .. } => UNIX_ATTRS_HEADER_ID,
            Self::Unrecognized { header_id, .. } => *header_id,
        }
    }

    #[inline]
    const fn optional_field_size<T: Sized>(field: &Option<T>) -> usize {
        match field {
            Some(_) => std::mem::size_of::<T>(),
            None => 0,
        }
    }

    /// Payload size, without the 4-byte record header.
    #[inline]
    pub fn field_size(&self, central_header: bool) -> usize {
        match self {
            Self::Ntfs { .. } => 32,
            Self::UnixExtendedTimestamp {
                mod_time,
                ac_time,
                cr_time,
            } => {
                1 + Self::optional_field_size(mod_time)
                    + if central_header {
                        0
                    } else {
                        Self::optional_field_size(ac_time) + Self::optional_field_size(cr_time)
                    }
            }
            Self::UnixAttrs { .. } => 11,
            Self::Unrecognized { local, central, .. } => match (central_header, central) {
                (true, Some(central)) => central.len(),
                _ => local.len(),
            },
        }
    }

    #[inline]
    const fn if_present(val: Option<i32>, if_present: u8) -> u8 {
        match val {
            Some(_) => if_present,
            None => 0,
        }
    }

    fn write_to_vec(&self, out: &mut Vec<u8>, central_header: bool) {
        // Header ID
        out.extend_from_slice(&self.header_id().to_le_bytes());
        // Field data size, range checked by the archive writer
        out.extend_from_slice(&(self.field_size(central_header) as u16).to_le_bytes());

        match self {
            Self::Ntfs {
                mtime,
                atime,
                ctime,
            } => {
                // Reserved field
                out.extend_from_slice(&0_u32.to_le_bytes());
                // Tag1 number
                out.extend_from_slice(&NTFS_TIMES_TAG.to_le_bytes());
                // Tag1 size
                out.extend_from_slice(&NTFS_TIMES_SIZE.to_le_bytes());
                out.extend_from_slice(&mtime.to_le_bytes());
                out.extend_from_slice(&atime.to_le_bytes());
                out.extend_from_slice(&ctime.to_le_bytes());
            }
            Self::UnixExtendedTimestamp {
                mod_time,
                ac_time,
                cr_time,
            } => {
                let flags = Self::if_present(*mod_time, MOD_TIME_PRESENT)
                    | Self::if_present(*ac_time, AC_TIME_PRESENT)
                    | Self::if_present(*cr_time, CR_TIME_PRESENT);
                out.push(flags);
                if let Some(mod_time) = mod_time {
                    out.extend_from_slice(&mod_time.to_le_bytes());
                }
                if !central_header {
                    if let Some(ac_time) = ac_time {
                        out.extend_from_slice(&ac_time.to_le_bytes());
                    }
                    if let Some(cr_time) = cr_time {
                        out.extend_from_slice(&cr_time.to_le_bytes());
                    }
                }
            }
            Self::UnixAttrs { uid, gid } => {
                // Version of the field
                out.push(1);
                out.push(4);
                out.extend_from_slice(&uid.to_le_bytes());
                out.push(4);
                out.extend_from_slice(&gid.to_le_bytes());
            }
            Self::Unrecognized { local, central, .. } => match (central_header, central) {
                (true, Some(central)) => out.extend_from_slice(central),
                _ => out.extend_from_slice(local),
            },
        }
    }

    /// Interprets one record payload. Never fails: payloads that don't match the expected
    /// layout of their header id come back as [`ExtraField::Unrecognized`], and so do payloads
    /// the typed form would not write back byte for byte (extra NTFS tags, timestamp flags
    /// announcing times the central directory doesn't carry, trailing bytes).
    pub fn parse(header_id: u16, payload: &[u8], context: ExtraFieldContext) -> Self {
        let parsed = match header_id {
            NTFS_HEADER_ID => Self::parse_ntfs(payload),
            EXTENDED_TIMESTAMP_HEADER_ID => Self::parse_extended_timestamp(payload, context),
            UNIX_ATTRS_HEADER_ID => Self::parse_unix_attrs(payload),
            _ => None,
        };
        parsed
            .filter(|field| field.writes_back(payload, context))
            .unwrap_or_else(|| Self::Unrecognized {
                header_id,
                local: payload.to_vec(),
                central: None,
            })
    }

    fn writes_back(&self, payload: &[u8], context: ExtraFieldContext) -> bool {
        let mut data = Vec::with_capacity(4 + payload.len());
        self.write_to_vec(&mut data, context == ExtraFieldContext::CentralDirectory);
        data.get(4..) == Some(payload)
    }

    fn parse_ntfs(payload: &[u8]) -> Option<Self> {
        // Skip the reserved field, then walk the attribute tags
        let mut offset = 4;
        while offset + 4 <= payload.len() {
            let tag = read_le16(payload, offset)?;
            let size = read_le16(payload, offset + 2)?;
            offset += 4;
            if tag == NTFS_TIMES_TAG && size == NTFS_TIMES_SIZE {
                let time = |at: usize| -> Option<u64> {
                    let low = read_le32(payload, at)?;
                    let high = read_le32(payload, at + 4)?;
                    Some(u64::from(low) | (u64::from(high) << 32))
                };
                return Some(Self::Ntfs {
                    mtime: time(offset)?,
                    atime: time(offset + 8)?,
                    ctime: time(offset + 16)?,
                });
            }
            offset += size as usize;
        }
        None
    }

    fn parse_extended_timestamp(payload: &[u8], context: ExtraFieldContext) -> Option<Self> {
        let (&flags, _) = payload.split_first()?;
        let mut offset = 1;
        let mut next = |present: bool| -> Option<i32> {
            if !present {
                return None;
            }
            let value = read_le32(payload, offset)?;
            offset += 4;
            Some(value as i32)
        };

        let mod_time = next(flags & MOD_TIME_PRESENT != 0);
        let (ac_time, cr_time) = match context {
            ExtraFieldContext::LocalHeader => (
                next(flags & AC_TIME_PRESENT != 0),
                next(flags & CR_TIME_PRESENT != 0),
            ),
            ExtraFieldContext::CentralDirectory => (None, None),
        };
        Some(Self::UnixExtendedTimestamp {
            mod_time,
            ac_time,
            cr_time,
        })
    }

    fn parse_unix_attrs(payload: &[u8]) -> Option<Self> {
        if payload.first() != Some(&1) {
            return None;
        }
        let read_id = |offset: usize| -> Option<(u32, usize)> {
            let size = *payload.get(offset)? as usize;
            let bytes = payload.get(offset + 1..offset + 1 + size)?;
            if size == 0 || size > 4 {
                return None;
            }
            let value = bytes
                .iter()
                .rev()
                .fold(0_u32, |acc, b| (acc << 8) | u32::from(*b));
            Some((value, offset + 1 + size))
        };
        let (uid, offset) = read_id(1)?;
        let (gid, offset) = read_id(offset)?;
        (offset == payload.len()).then_some(Self::UnixAttrs { uid, gid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamp() -> ExtraField {
        ExtraField::UnixExtendedTimestamp {
            mod_time: Some(0x01020304),
            ac_time: Some(5),
            cr_time: None,
        }
    }

    #[test]
    fn test_empty_serializes_to_empty() {
        let fields = ExtraFields::default();
        assert!(fields.local_data().is_empty());
        assert!(fields.central_data().is_empty());
        assert_eq!(fields.data_length(false), 0);
    }

    #[test]
    fn test_timestamp_is_truncated_in_central_directory() {
        let fields = ExtraFields::new([timestamp()]);
        assert_eq!(
            fields.local_data(),
            [0x55, 0x54, 9, 0, 0x03, 0x04, 0x03, 0x02, 0x01, 5, 0, 0, 0]
        );
        assert_eq!(
            fields.central_data(),
            [0x55, 0x54, 5, 0, 0x03, 0x04, 0x03, 0x02, 0x01]
        );
        assert_eq!(fields.data_length(false), 13);
        assert_eq!(fields.data_length(true), 9);
    }

    #[test]
    fn test_add_replaces_in_place() {
        let mut fields = ExtraFields::new([ExtraField::UnixAttrs { uid: 1, gid: 2 }, timestamp()]);
        let old = fields.add(ExtraField::UnixAttrs { uid: 3, gid: 4 });
        assert_eq!(old, Some(ExtraField::UnixAttrs { uid: 1, gid: 2 }));
        let ids: Vec<u16> = fields.iter().map(ExtraField::header_id).collect();
        assert_eq!(ids, [UNIX_ATTRS_HEADER_ID, EXTENDED_TIMESTAMP_HEADER_ID]);
        assert_eq!(
            fields.get(UNIX_ATTRS_HEADER_ID),
            Some(&ExtraField::UnixAttrs { uid: 3, gid: 4 })
        );
        assert!(fields.remove(UNIX_ATTRS_HEADER_ID).is_some());
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn test_parse_known_fields() {
        let original = ExtraFields::new([
            timestamp(),
            ExtraField::UnixAttrs { uid: 1000, gid: 100 },
            ExtraField::Ntfs {
                mtime: 1,
                atime: u64::MAX,
                ctime: 3,
            },
        ]);
        let parsed =
            ExtraFields::parse(&original.local_data(), ExtraFieldContext::LocalHeader).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_parse_central_timestamp() {
        let data = [0x55, 0x54, 5, 0, 0x01, 0x04, 0x03, 0x02, 0x01];
        let parsed = ExtraFields::parse(&data, ExtraFieldContext::CentralDirectory).unwrap();
        assert_eq!(
            parsed.get(EXTENDED_TIMESTAMP_HEADER_ID),
            Some(&ExtraField::UnixExtendedTimestamp {
                mod_time: Some(0x01020304),
                ac_time: None,
                cr_time: None,
            })
        );
        assert_eq!(parsed.central_data(), data);
    }

    #[test]
    fn test_timestamp_flags_survive_a_round_trip() {
        // Access time flagged in the central directory, which only stores the modification time
        let central = [0x55, 0x54, 5, 0, 0x03, 0x01, 0x02, 0x03, 0x04];
        let parsed = ExtraFields::parse(&central, ExtraFieldContext::CentralDirectory).unwrap();
        assert!(matches!(
            parsed.get(EXTENDED_TIMESTAMP_HEADER_ID),
            Some(ExtraField::Unrecognized { .. })
        ));
        assert_eq!(parsed.central_data(), central);
        assert_eq!(parsed.local_data(), central);

        // Creation time flagged but missing, trailing bytes after the modification time
        let local = [0x55, 0x54, 7, 0, 0x05, 0x01, 0x02, 0x03, 0x04, 0x09, 0x09];
        let parsed = ExtraFields::parse(&local, ExtraFieldContext::LocalHeader).unwrap();
        assert!(matches!(
            parsed.get(EXTENDED_TIMESTAMP_HEADER_ID),
            Some(ExtraField::Unrecognized { .. })
        ));
        assert_eq!(parsed.local_data(), local);

        // Fully described local field stays typed
        let local = [0x55, 0x54, 9, 0, 0x05, 0x01, 0x02, 0x03, 0x04, 0x09, 0x09, 0, 0];
        let parsed = ExtraFields::parse(&local, ExtraFieldContext::LocalHeader).unwrap();
        assert_eq!(
            parsed.get(EXTENDED_TIMESTAMP_HEADER_ID),
            Some(&ExtraField::UnixExtendedTimestamp {
                mod_time: Some(0x04030201),
                ac_time: None,
                cr_time: Some(0x0909),
            })
        );
        assert_eq!(parsed.local_data(), local);
    }

    #[test]
    fn test_ntfs_with_extra_tags_is_kept_verbatim() {
        let mut data = vec![0x0a, 0x00, 40, 0, 0, 0, 0, 0, 1, 0, 24, 0];
        data.extend_from_slice(&[7; 24]);
        data.extend_from_slice(&[2, 0, 4, 0, 1, 2, 3, 4]);
        let parsed = ExtraFields::parse(&data, ExtraFieldContext::LocalHeader).unwrap();
        assert!(matches!(
            parsed.get(NTFS_HEADER_ID),
            Some(ExtraField::Unrecognized { .. })
        ));
        assert_eq!(parsed.local_data(), data);
    }

    #[test]
    fn test_unknown_ids_are_preserved() {
        let data = [0xCA, 0xFE, 3, 0, 1, 2, 3, 0x75, 0x78, 1, 0, 9];
        let parsed = ExtraFields::parse(&data, ExtraFieldContext::LocalHeader).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed.get(0xFECA),
            Some(&ExtraField::Unrecognized {
                header_id: 0xFECA,
                local: vec![1, 2, 3],
                central: None,
            })
        );
        // A Unix owner field with a bogus version byte is kept as is
        assert!(matches!(
            parsed.get(UNIX_ATTRS_HEADER_ID),
            Some(ExtraField::Unrecognized { .. })
        ));
        assert_eq!(parsed.local_data(), data);
    }

    #[test]
    fn test_overrunning_length_is_an_error() {
        let data = [0x55, 0x54, 9, 0, 1, 0, 0];
        let err = ExtraFields::parse(&data, ExtraFieldContext::LocalHeader).unwrap_err();
        match err {
            ZipError::Format { bytes, .. } => assert_eq!(bytes, data),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_trailing_padding() {
        let data = [0xCA, 0xFE, 0, 0, 0, 0];
        let parsed = ExtraFields::parse(&data, ExtraFieldContext::LocalHeader).unwrap();
        assert_eq!(parsed.len(), 1);

        let data = [0xCA, 0xFE, 0, 0, 7];
        assert!(ExtraFields::parse(&data, ExtraFieldContext::LocalHeader).is_err());
    }

    #[test]
    fn test_merge_central() {
        let mut fields = ExtraFields::new([ExtraField::Unrecognized {
            header_id: 0x1234,
            local: vec![1, 2, 3, 4],
            central: None,
        }]);
        fields
            .merge_central(&[0x34, 0x12, 1, 0, 9, 0x55, 0x54, 1, 0, 0])
            .unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.local_data()[..8], [0x34, 0x12, 4, 0, 1, 2, 3, 4]);
        assert_eq!(fields.central_data()[..5], [0x34, 0x12, 1, 0, 9]);
    }
}
