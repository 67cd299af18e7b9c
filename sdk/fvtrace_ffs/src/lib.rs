//! Support for Firmware File System as described in the UEFI Platform
//! Initialization Specification.
//!
//! This crate implements best-effort, read-only decoding of Firmware Volume
//! (FV), Firmware File System (FFS) file and section structures for offline
//! analysis of flash images.
//!
//! Parsing never fails as a whole because one node is damaged: a section that
//! cannot be decoded degrades to an opaque node, a compressed payload that
//! cannot be expanded yields no children, and a volume records what it could
//! not make sense of as [`Diagnostic`]s.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(test), not(feature = "mockall")), no_std)]

extern crate alloc;

#[cfg(any(test, feature = "builder"))]
pub mod builder;
pub mod context;
pub mod decompress;
pub mod err;
pub mod file;
pub mod guid;
pub mod image;
pub mod multiple;
pub mod section;
pub mod volume;

pub use context::ParseContext;
pub use decompress::{Algorithm, Decompressor, NullDecompressor};
#[cfg(any(test, feature = "mockall"))]
pub use decompress::MockDecompressor;
pub use err::{CodecError, Diagnostic, DuplicateIdentityError, FormatError};
pub use file::{Ffs, FfsId, FileType};
pub use guid::OrdGuid;
pub use image::ByteImage;
pub use multiple::MultipleFv;
pub use volume::{FfsDict, FirmwareVolume};
