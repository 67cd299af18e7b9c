//! Module for a composite of the brotli, uefi and lzma decompressors.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use fvtrace_ffs::{Algorithm, CodecError, Decompressor};

#[cfg(feature = "brotli")]
use crate::BrotliDecompressor;
#[cfg(feature = "lzma")]
use crate::LzmaDecompressor;
#[cfg(feature = "uefi_decompress")]
use crate::UefiDecompressor;

/// Provides a composite decompressor that combines all decompressors based on enabled feature flags.
///
/// Each codec is asked in turn; one that reports [`CodecError::Unsupported`] is skipped, any other result is
/// final.
#[derive(Debug, Clone, Copy)]
pub struct CompositeDecompressor {
    #[cfg(feature = "uefi_decompress")]
    uefi_decompress: UefiDecompressor,
    #[cfg(feature = "brotli")]
    brotli: BrotliDecompressor,
    #[cfg(feature = "lzma")]
    lzma: LzmaDecompressor,
}

impl Default for CompositeDecompressor {
    fn default() -> Self {
        Self {
            #[cfg(feature = "uefi_decompress")]
            uefi_decompress: UefiDecompressor,
            #[cfg(feature = "brotli")]
            brotli: BrotliDecompressor,
            #[cfg(feature = "lzma")]
            lzma: LzmaDecompressor,
        }
    }
}

impl Decompressor for CompositeDecompressor {
    fn decompress(&self, _algorithm: Algorithm, _data: &[u8]) -> Result<Vec<u8>, CodecError> {
        #[cfg(feature = "uefi_decompress")]
        {
            match self.uefi_decompress.decompress(_algorithm, _data) {
                Err(CodecError::Unsupported) => (),
                Err(err) => return Err(err),
                Ok(buffer) => return Ok(buffer),
            }
        }

        #[cfg(feature = "brotli")]
        {
            match self.brotli.decompress(_algorithm, _data) {
                Err(CodecError::Unsupported) => (),
                Err(err) => return Err(err),
                Ok(buffer) => return Ok(buffer),
            }
        }

        #[cfg(feature = "lzma")]
        {
            match self.lzma.decompress(_algorithm, _data) {
                Err(CodecError::Unsupported) => (),
                Err(err) => return Err(err),
                Ok(buffer) => return Ok(buffer),
            }
        }

        Err(CodecError::Unsupported)
    }
}
