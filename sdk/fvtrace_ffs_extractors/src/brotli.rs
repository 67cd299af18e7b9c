//! Module for Brotli decompression.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{boxed::Box, vec, vec::Vec};
use alloc_no_stdlib::{self, SliceWrapper, SliceWrapperMut, define_index_ops_mut};
use brotli_decompressor::{BrotliDecompressStream, BrotliResult, BrotliState, HuffmanCode};
use fvtrace_ffs::{Algorithm, CodecError, Decompressor};

use crate::MAX_DECOMPRESSED_SIZE;

/// `BrotliCompress` prefixes the stream with the output size and the scratch size, 8 bytes each.
const BROTLI_HEADER_LENGTH: usize = 16;

//Rebox and HeapAllocator exist to satisfy BrotliDecompress custom allocation requirements.
//They essentially wrap Box for heap allocations.
struct Rebox<T>(Box<[T]>);

impl<T> core::default::Default for Rebox<T> {
    fn default() -> Self {
        Rebox(Vec::new().into_boxed_slice())
    }
}
define_index_ops_mut!(T, Rebox<T>);

impl<T> alloc_no_stdlib::SliceWrapper<T> for Rebox<T> {
    fn slice(&self) -> &[T] {
        &self.0
    }
}

impl<T> alloc_no_stdlib::SliceWrapperMut<T> for Rebox<T> {
    fn slice_mut(&mut self) -> &mut [T] {
        &mut self.0
    }
}

struct HeapAllocator<T: Clone> {
    pub default_value: T,
}

impl<T: Clone> alloc_no_stdlib::Allocator<T> for HeapAllocator<T> {
    type AllocatedMemory = Rebox<T>;
    fn alloc_cell(self: &mut HeapAllocator<T>, len: usize) -> Rebox<T> {
        Rebox(vec![self.default_value.clone(); len].into_boxed_slice())
    }
    fn free_cell(self: &mut HeapAllocator<T>, _data: Rebox<T>) {}
}

/// Provides decompression for Brotli GUID-defined sections.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrotliDecompressor;

impl Decompressor for BrotliDecompressor {
    fn decompress(&self, algorithm: Algorithm, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        if algorithm != Algorithm::Brotli {
            Err(CodecError::Unsupported)?;
        }
        if data.len() < BROTLI_HEADER_LENGTH {
            Err(CodecError::DataCorrupt)?;
        }

        let mut out_size = [0u8; 8];
        out_size.copy_from_slice(&data[0..8]);
        let out_size = u64::from_le_bytes(out_size);
        if out_size > MAX_DECOMPRESSED_SIZE as u64 {
            Err(CodecError::DataCorrupt)?;
        }

        let mut brotli_state = BrotliState::new(
            HeapAllocator::<u8> { default_value: 0 },
            HeapAllocator::<u32> { default_value: 0 },
            HeapAllocator::<HuffmanCode> { default_value: Default::default() },
        );
        let in_data = &data[BROTLI_HEADER_LENGTH..];
        let mut out_data = vec![0u8; out_size as usize];
        let mut out_data_size = 0;
        let result = BrotliDecompressStream(
            &mut in_data.len(),
            &mut 0,
            in_data,
            &mut out_data.len(),
            &mut 0,
            out_data.as_mut_slice(),
            &mut out_data_size,
            &mut brotli_state,
        );

        match result {
            BrotliResult::ResultSuccess => {
                out_data.truncate(out_data_size);
                Ok(out_data)
            }
            _ => Err(CodecError::DataCorrupt),
        }
    }
}
