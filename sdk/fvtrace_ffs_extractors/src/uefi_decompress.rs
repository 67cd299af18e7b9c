//! Module for UEFI decompression.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{vec, vec::Vec};
use fvtrace_ffs::{Algorithm, CodecError, Decompressor};
use mu_rust_helpers::uefi_decompress::{DecompressionAlgorithm, decompress_into_with_algo};

use crate::MAX_DECOMPRESSED_SIZE;

/// Provides decompression for compression sections using the EFI standard algorithm and for TianoCompress
/// GUID-defined sections.
#[derive(Debug, Default, Clone, Copy)]
pub struct UefiDecompressor;

impl Decompressor for UefiDecompressor {
    fn decompress(&self, algorithm: Algorithm, src: &[u8]) -> Result<Vec<u8>, CodecError> {
        let algo = match algorithm {
            Algorithm::Efi => DecompressionAlgorithm::UefiDecompress,
            Algorithm::Tiano => DecompressionAlgorithm::TianoDecompress,
            _ => Err(CodecError::Unsupported)?,
        };

        //sanity check the src data
        if src.len() < 8 {
            Err(CodecError::DataCorrupt)?;
        }

        let compressed_size = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if compressed_size > src.len() - 8 {
            Err(CodecError::DataCorrupt)?;
        }

        // allocate a buffer to hold the decompressed data
        let decompressed_size = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if decompressed_size > MAX_DECOMPRESSED_SIZE {
            Err(CodecError::DataCorrupt)?;
        }
        let mut decompressed_buffer = vec![0u8; decompressed_size];

        decompress_into_with_algo(src, &mut decompressed_buffer, algo).map_err(|_err| CodecError::DataCorrupt)?;
        log::trace!("{algorithm} payload: {compressed_size} -> {decompressed_size} bytes");
        Ok(decompressed_buffer)
    }
}
