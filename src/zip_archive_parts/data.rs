//! Records written after entry data: data descriptors and the end of central directory.

use super::codec::HeaderBuffer;

const END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x06054B50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074B50;

/// Data descriptor record, following the data of an entry whose local header could not be
/// patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DataDescriptor {
    pub(crate) crc: u32,
    pub(crate) compressed_size: u32,
    pub(crate) uncompressed_size: u32,
}

impl DataDescriptor {
    pub(crate) const LENGTH: usize = 16;

    pub(crate) fn write(&self, buf: &mut HeaderBuffer) {
        buf.push_u32(DATA_DESCRIPTOR_SIGNATURE);
        buf.push_u32(self.crc);
        buf.push_u32(self.compressed_size);
        buf.push_u32(self.uncompressed_size);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CentralDirectoryEnd<'a> {
    pub(crate) entries: u16,
    pub(crate) central_dir_size: u32,
    pub(crate) central_dir_offset: u32,
    pub(crate) comment: &'a [u8],
}

impl CentralDirectoryEnd<'_> {
    #[cfg(test)]
    pub(crate) const FOOTER_LENGTH: usize = 22;

    pub(crate) fn write(&self, buf: &mut HeaderBuffer) {
        // Signature
        buf.push_u32(END_OF_CENTRAL_DIR_SIGNATURE);
        // number of this disk
        buf.push_u16(0);
        // number of the disk with start
        buf.push_u16(0);
        // Number of entries on this disk
        buf.push_u16(self.entries);
        // Number of entries
        buf.push_u16(self.entries);
        // Central dir size
        buf.push_u32(self.central_dir_size);
        // Central dir offset
        buf.push_u32(self.central_dir_offset);
        // Comment length, range checked by the writer
        buf.push_u16(self.comment.len() as u16);
        // Comment
        buf.push_bytes(self.comment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_descriptor_layout() {
        let mut buf = HeaderBuffer::default();
        DataDescriptor {
            crc: 0x3610a686,
            compressed_size: 7,
            uncompressed_size: 5,
        }
        .write(&mut buf);
        assert_eq!(buf.len(), DataDescriptor::LENGTH);
        assert_eq!(
            buf.as_slice(),
            [0x50, 0x4B, 0x07, 0x08, 0x86, 0xA6, 0x10, 0x36, 7, 0, 0, 0, 5, 0, 0, 0]
        );
    }

    #[test]
    fn test_end_of_central_directory_layout() {
        let mut buf = HeaderBuffer::default();
        CentralDirectoryEnd {
            entries: 2,
            central_dir_size: 0x60,
            central_dir_offset: 0x1234,
            comment: b"hi",
        }
        .write(&mut buf);
        assert_eq!(buf.len(), CentralDirectoryEnd::FOOTER_LENGTH + 2);
        assert_eq!(
            buf.as_slice(),
            [
                0x50, 0x4B, 0x05, 0x06, 0, 0, 0, 0, 2, 0, 2, 0, 0x60, 0, 0, 0, 0x34, 0x12, 0, 0, 2,
                0, b'h', b'i'
            ]
        );
    }
}
