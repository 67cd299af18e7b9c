//! Error and diagnostic types for the Firmware File System (FFS) crate.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

use core::fmt;

use crate::file::FfsId;

/// Error definitions for decoding a single firmware node.
///
/// These never escape the node that produced them: the enclosing walk treats the node as opaque
/// (or stops walking the enclosing container) and carries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// A read fell outside the bytes backing the node.
    OutOfRange,
    /// The header is invalid or malformed.
    InvalidHeader,
    /// The declared size is smaller than the header or larger than the enclosing buffer.
    InvalidSize,
    /// The firmware volume signature is not `_FVH`.
    InvalidSignature,
    /// Encapsulated content is nested deeper than the configured limit.
    NestingTooDeep,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::OutOfRange => f.write_str("read outside of the node's bytes"),
            FormatError::InvalidHeader => f.write_str("invalid header"),
            FormatError::InvalidSize => f.write_str("invalid size"),
            FormatError::InvalidSignature => f.write_str("invalid firmware volume signature"),
            FormatError::NestingTooDeep => f.write_str("nesting too deep"),
        }
    }
}

impl core::error::Error for FormatError {}

/// Error definitions for the [`Decompressor`](crate::Decompressor) seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The requested algorithm is not provided by this decompressor.
    Unsupported,
    /// The compressed data is corrupt.
    DataCorrupt,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Unsupported => f.write_str("unsupported compression algorithm"),
            CodecError::DataCorrupt => f.write_str("corrupt compressed data"),
        }
    }
}

impl core::error::Error for CodecError {}

/// Two files in one volume claim the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateIdentityError {
    /// The contested identity.
    pub id: FfsId,
    /// Volume offset of the file that was kept.
    pub first_offset: usize,
    /// Volume offset of the file that was dropped.
    pub duplicate_offset: usize,
}

impl fmt::Display for DuplicateIdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file {} at {:#x} duplicates the file at {:#x}",
            self.id, self.duplicate_offset, self.first_offset
        )
    }
}

impl core::error::Error for DuplicateIdentityError {}

/// Non-fatal findings recorded while parsing a firmware volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A file identity was seen twice; the first file wins.
    DuplicateIdentity(DuplicateIdentityError),
    /// The 16-bit sum over the volume header is not zero.
    ChecksumMismatch {
        /// The checksum field as stored in the header.
        stored: u16,
        /// The 16-bit sum over the whole header, including `stored`.
        sum: u16,
    },
    /// A file header at `offset` could not be decoded; the rest of the volume was not walked.
    TruncatedFile {
        /// Volume offset of the damaged file header.
        offset: usize,
        /// Why the header was rejected.
        error: FormatError,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DuplicateIdentity(err) => err.fmt(f),
            Diagnostic::ChecksumMismatch { stored, sum } => {
                write!(f, "volume header checksum {stored:#06x} does not sum to zero (sum {sum:#06x})")
            }
            Diagnostic::TruncatedFile { offset, error } => write!(f, "file at {offset:#x}: {error}"),
        }
    }
}
