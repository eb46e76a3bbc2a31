//! Little-endian integer conversion for header fields.
//!
//! The encoders write into caller-owned scratch arrays and hand the same array back, so header
//! assembly on the hot path never allocates.

/// Encodes `value` into `buf` as two little-endian bytes.
#[inline]
pub fn le16(value: u16, buf: &mut [u8; 2]) -> &[u8; 2] {
    buf[0] = (value & 0xFF) as u8;
    buf[1] = (value >> 8) as u8;
    buf
}

/// Encodes `value` into `buf` as four little-endian bytes.
#[inline]
pub fn le32(value: u32, buf: &mut [u8; 4]) -> &[u8; 4] {
    buf[0] = (value & 0xFF) as u8;
    buf[1] = ((value >> 8) & 0xFF) as u8;
    buf[2] = ((value >> 16) & 0xFF) as u8;
    buf[3] = (value >> 24) as u8;
    buf
}

/// Reads a little-endian `u16` at `offset`, or `None` if the slice is too short.
#[inline]
pub fn read_le16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset.checked_add(2)?)?;
    Some(u16::from(raw[0]) | (u16::from(raw[1]) << 8))
}

/// Reads a little-endian `u32` at `offset`, or `None` if the slice is too short.
#[inline]
pub fn read_le32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    Some(
        u32::from(raw[0])
            | (u32::from(raw[1]) << 8)
            | (u32::from(raw[2]) << 16)
            | (u32::from(raw[3]) << 24),
    )
}

/// Reusable buffer a writer assembles each header record in before handing it to the sink.
#[derive(Debug, Default)]
pub(crate) struct HeaderBuffer {
    bytes: Vec<u8>,
    short: [u8; 2],
    word: [u8; 4],
}

impl HeaderBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    #[inline]
    pub(crate) fn clear(&mut self) {
        self.bytes.clear();
    }

    #[inline]
    pub(crate) fn push_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(le16(value, &mut self.short));
    }

    #[inline]
    pub(crate) fn push_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(le32(value, &mut self.word));
    }

    #[inline]
    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }
}
