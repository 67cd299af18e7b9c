//! # Decompressor Implementations
//!
//! This crate provides a set of implementations of the `fvtrace_ffs::Decompressor` trait.
//!
//! ## Features
//!
//! Each feature corresponds to one codec. The crate is configured in this manner to reduce
//! compilation times, by only compiling the necessary implementations.
//! - `uefi_decompress`: Enables [`UefiDecompressor`] for EFI standard compression and its Tiano variant.
//! - `brotli`: Enables [`BrotliDecompressor`] for Brotli GUID-defined sections.
//! - `lzma`: Enables [`LzmaDecompressor`] for LZMA GUID-defined sections. Requires `std`.
//!
//! [`CompositeDecompressor`] combines every enabled codec and is what a caller normally hands to the parser.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]
extern crate alloc;

#[cfg(feature = "brotli")]
mod brotli;
#[cfg(feature = "brotli")]
pub use brotli::BrotliDecompressor;

#[cfg(feature = "lzma")]
mod lzma;
#[cfg(feature = "lzma")]
pub use lzma::LzmaDecompressor;

#[cfg(feature = "uefi_decompress")]
mod uefi_decompress;
#[cfg(feature = "uefi_decompress")]
pub use uefi_decompress::UefiDecompressor;

mod composite;
pub use composite::CompositeDecompressor;

/// Upper bound on the size of a decompressed payload.
///
/// Size fields are taken from the (untrusted) compressed stream; anything larger than a flash part is
/// treated as corrupt rather than allocated.
pub const MAX_DECOMPRESSED_SIZE: usize = 0x1000_0000;
