//! Shared, immutable byte ranges backing every decoded firmware node.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{sync::Arc, vec::Vec};
use core::fmt;
use r_efi::efi;

use crate::FormatError;

/// A contiguous `[offset, offset + len)` window onto a shared buffer.
///
/// Cloning or sub-slicing never copies the underlying bytes. Decompressed payloads get a buffer of
/// their own.
#[derive(Clone)]
pub struct ByteImage {
    buffer: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl ByteImage {
    /// Wraps an entire buffer.
    pub fn new(buffer: impl Into<Arc<[u8]>>) -> Self {
        let buffer = buffer.into();
        let len = buffer.len();
        Self { buffer, offset: 0, len }
    }

    /// Binds a window of `buffer` starting at `offset`.
    ///
    /// Without a `declared_size` the window runs to the end of the buffer.
    pub fn from_buffer(buffer: Arc<[u8]>, offset: usize, declared_size: Option<usize>) -> Result<Self, FormatError> {
        let available = buffer.len().checked_sub(offset).ok_or(FormatError::OutOfRange)?;
        let len = match declared_size {
            Some(size) if size > available => Err(FormatError::InvalidSize)?,
            Some(size) => size,
            None => available,
        };
        Ok(Self { buffer, offset, len })
    }

    /// Length of the window in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the window within its backing buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Borrow the bytes of the window.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.len]
    }

    /// Copy the bytes of the window.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// A child window of `len` bytes starting `offset` bytes into this one.
    pub fn slice(&self, offset: usize, len: usize) -> Result<ByteImage, FormatError> {
        let end = offset.checked_add(len).ok_or(FormatError::OutOfRange)?;
        if end > self.len {
            Err(FormatError::OutOfRange)?;
        }
        Ok(Self { buffer: self.buffer.clone(), offset: self.offset + offset, len })
    }

    /// A child window running from `offset` to the end of this one.
    pub fn tail(&self, offset: usize) -> Result<ByteImage, FormatError> {
        let len = self.len.checked_sub(offset).ok_or(FormatError::OutOfRange)?;
        self.slice(offset, len)
    }

    /// Borrow `len` bytes at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&[u8], FormatError> {
        let end = offset.checked_add(len).ok_or(FormatError::OutOfRange)?;
        self.as_slice().get(offset..end).ok_or(FormatError::OutOfRange)
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N], FormatError> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.bytes(offset, N)?);
        Ok(raw)
    }

    /// Reads a byte.
    pub fn read_u8(&self, offset: usize) -> Result<u8, FormatError> {
        Ok(self.array::<1>(offset)?[0])
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&self, offset: usize) -> Result<u16, FormatError> {
        Ok(u16::from_le_bytes(self.array(offset)?))
    }

    /// Reads a little-endian 24-bit size field.
    pub fn read_u24(&self, offset: usize) -> Result<u32, FormatError> {
        let [b0, b1, b2] = self.array::<3>(offset)?;
        Ok(u32::from_le_bytes([b0, b1, b2, 0]))
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&self, offset: usize) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.array(offset)?))
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64(&self, offset: usize) -> Result<u64, FormatError> {
        Ok(u64::from_le_bytes(self.array(offset)?))
    }

    /// Reads a GUID in its wire format.
    pub fn read_guid(&self, offset: usize) -> Result<efi::Guid, FormatError> {
        Ok(efi::Guid::from_bytes(&self.array(offset)?))
    }
}

impl fmt::Debug for ByteImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteImage").field("offset", &self.offset).field("len", &self.len).finish()
    }
}

impl From<Vec<u8>> for ByteImage {
    fn from(value: Vec<u8>) -> Self {
        ByteImage::new(value)
    }
}

impl From<&[u8]> for ByteImage {
    fn from(value: &[u8]) -> Self {
        ByteImage::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn reads_should_be_little_endian() {
        let image = ByteImage::new(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(image.read_u8(1), Ok(0x02));
        assert_eq!(image.read_u16(0), Ok(0x0201));
        assert_eq!(image.read_u24(1), Ok(0x040302));
        assert_eq!(image.read_u32(4), Ok(0x08070605));
        assert_eq!(image.read_u64(0), Ok(0x0807060504030201));
    }

    #[test]
    fn reads_outside_the_window_should_fail() {
        let image = ByteImage::new(vec![0u8; 8]);
        let child = image.slice(2, 4).unwrap();
        assert_eq!(child.offset(), 2);
        assert_eq!(child.read_u32(0), Ok(0));
        assert_eq!(child.read_u32(1), Err(FormatError::OutOfRange));
        assert_eq!(child.read_u8(usize::MAX), Err(FormatError::OutOfRange));
        assert_eq!(image.slice(6, 4).unwrap_err(), FormatError::OutOfRange);
        assert_eq!(image.tail(9).unwrap_err(), FormatError::OutOfRange);
        assert!(image.tail(8).unwrap().is_empty());
    }

    #[test]
    fn from_buffer_should_check_declared_size() {
        let buffer: Arc<[u8]> = Arc::from(vec![0xAAu8; 16]);
        assert_eq!(ByteImage::from_buffer(buffer.clone(), 4, Some(12)).unwrap().len(), 12);
        assert_eq!(ByteImage::from_buffer(buffer.clone(), 4, None).unwrap().len(), 12);
        assert_eq!(ByteImage::from_buffer(buffer.clone(), 4, Some(13)).unwrap_err(), FormatError::InvalidSize);
        assert_eq!(ByteImage::from_buffer(buffer, 17, None).unwrap_err(), FormatError::OutOfRange);
    }
}
