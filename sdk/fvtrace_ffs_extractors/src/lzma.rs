//! Module for LZMA decompression.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use fvtrace_ffs::{Algorithm, CodecError, Decompressor};
use std::io::Cursor;

use crate::MAX_DECOMPRESSED_SIZE;

/// Properties byte, dictionary size and unpacked size.
const LZMA_HEADER_LENGTH: usize = 13;

pub const LZMA_UNKNOWN_UNPACKED_SIZE_MAGIC_VALUE: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Provides decompression for LZMA GUID-defined sections.
#[derive(Debug, Default, Clone, Copy)]
pub struct LzmaDecompressor;

impl Decompressor for LzmaDecompressor {
    fn decompress(&self, algorithm: Algorithm, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        if algorithm != Algorithm::Lzma {
            Err(CodecError::Unsupported)?;
        }
        if data.len() < LZMA_HEADER_LENGTH {
            Err(CodecError::DataCorrupt)?;
        }

        // Get unpacked size to pre-allocate vector, if available
        // See https://github.com/tukaani-project/xz/blob/dd4a1b259936880e04669b43e778828b60619860/doc/lzma-file-format.txt#L131
        let mut unpacked_size = [0u8; 8];
        unpacked_size.copy_from_slice(&data[5..13]);
        let unpacked_size = u64::from_le_bytes(unpacked_size);
        let mut decompressed = if unpacked_size == LZMA_UNKNOWN_UNPACKED_SIZE_MAGIC_VALUE {
            Vec::<u8>::new()
        } else if unpacked_size > MAX_DECOMPRESSED_SIZE as u64 {
            Err(CodecError::DataCorrupt)?
        } else {
            Vec::<u8>::with_capacity(unpacked_size as usize)
        };

        lzma_rs::lzma_decompress(&mut Cursor::new(data), &mut decompressed).map_err(|err| {
            log::debug!("LZMA stream rejected: {err}");
            CodecError::DataCorrupt
        })?;

        Ok(decompressed)
    }
}
