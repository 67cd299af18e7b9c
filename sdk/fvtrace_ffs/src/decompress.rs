//! The seam through which encapsulation sections are expanded.
//!
//! The parser never carries codec implementations of its own. Callers hand a [`Decompressor`] to the
//! [`ParseContext`](crate::ParseContext); `fvtrace_ffs_extractors` provides the real ones.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use core::fmt;

use crate::CodecError;

/// Compression algorithms found in firmware volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Algorithm {
    /// EFI standard compression (compression section, type 1).
    Efi,
    /// The Tiano variant of EFI compression.
    Tiano,
    /// LZMA, as emitted by the `LzmaCompress` build tool.
    Lzma,
    /// Brotli, prefixed with the 16-byte size header emitted by the `BrotliCompress` build tool.
    Brotli,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Efi => f.write_str("EFI"),
            Algorithm::Tiano => f.write_str("Tiano"),
            Algorithm::Lzma => f.write_str("LZMA"),
            Algorithm::Brotli => f.write_str("Brotli"),
        }
    }
}

/// Expands compressed section payloads.
///
/// An implementation should return:
/// - `Ok(Vec<u8>)` with the decompressed bytes, which the parser re-scans as a flat section list.
/// - `Err(CodecError::Unsupported)` if it does not implement `algorithm`.
/// - `Err(CodecError::DataCorrupt)` if `data` could not be decoded.
#[cfg_attr(any(test, feature = "mockall"), mockall::automock)]
pub trait Decompressor {
    /// Decompress `data` with `algorithm`.
    fn decompress(&self, algorithm: Algorithm, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// A decompressor that supports nothing. Encapsulated content stays unexpanded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDecompressor;

impl Decompressor for NullDecompressor {
    fn decompress(&self, _algorithm: Algorithm, _data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Unsupported)
    }
}
