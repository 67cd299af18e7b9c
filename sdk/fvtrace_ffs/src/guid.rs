//! GUID helpers and well-known GUIDs used while decoding firmware images.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::{cmp::Ordering, fmt};
use r_efi::efi;
use uuid::Uuid;

/// GUID-defined section whose payload is protected by a CRC32.
pub const CRC32_SECTION_GUID: efi::Guid =
    efi::Guid::from_fields(0xFC1BCDB0, 0x7D31, 0x49AA, 0x93, 0x6A, &[0xA4, 0x60, 0x0D, 0x9D, 0xD0, 0x83]);

/// GUID-defined section compressed with the Tiano variant of the EFI compression algorithm.
pub const TIANO_DECOMPRESS_SECTION_GUID: efi::Guid =
    efi::Guid::from_fields(0xA31280AD, 0x481E, 0x41B6, 0x95, 0xE8, &[0x12, 0x7F, 0x4C, 0x98, 0x47, 0x79]);

/// GUID-defined section compressed with LZMA.
pub const LZMA_SECTION_GUID: efi::Guid =
    efi::Guid::from_fields(0xEE4E5898, 0x3914, 0x4259, 0x9D, 0x6E, &[0xDC, 0x7B, 0xD7, 0x94, 0x03, 0xCF]);

/// GUID-defined section compressed with Brotli.
pub const BROTLI_SECTION_GUID: efi::Guid =
    efi::Guid::from_fields(0x3D532050, 0x5CDA, 0x4FD0, 0x87, 0x9E, &[0x0F, 0x7F, 0x63, 0x0D, 0x5A, 0xFB]);

/// EFI_FIRMWARE_FILE_SYSTEM2_GUID
pub const FIRMWARE_FILE_SYSTEM2_GUID: efi::Guid =
    efi::Guid::from_fields(0x8C8CE578, 0x8A3D, 0x4F1C, 0x99, 0x35, &[0x89, 0x61, 0x85, 0xC3, 0x2D, 0xD3]);

/// EFI_FIRMWARE_FILE_SYSTEM3_GUID
pub const FIRMWARE_FILE_SYSTEM3_GUID: efi::Guid =
    efi::Guid::from_fields(0x5473C07A, 0x3DCB, 0x4DCA, 0xBD, 0x6F, &[0x1E, 0x96, 0x89, 0xE7, 0x34, 0x9A]);

/// A GUID with a total order, so it can key ordered collections.
///
/// Ordering compares the raw (wire format) bytes. `Display` renders the registry format in upper
/// case, e.g. `8C8CE578-8A3D-4F1C-9935-896185C32DD3`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct OrdGuid(pub efi::Guid);

impl OrdGuid {
    /// The wrapped GUID.
    pub fn guid(&self) -> efi::Guid {
        self.0
    }
}

impl PartialOrd for OrdGuid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdGuid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl From<efi::Guid> for OrdGuid {
    fn from(value: efi::Guid) -> Self {
        OrdGuid(value)
    }
}

impl fmt::Display for OrdGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&Uuid::from_bytes_le(*self.0.as_bytes()), f)
    }
}

/// Parses a registry-format GUID string (`xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, any case).
pub fn parse_guid(text: &str) -> Option<efi::Guid> {
    let uuid = Uuid::parse_str(text.trim()).ok()?;
    Some(efi::Guid::from_bytes(&uuid.to_bytes_le()))
}

/// Decodes a flat array of GUIDs, ignoring any incomplete trailing bytes.
pub fn guid_list(bytes: &[u8]) -> impl Iterator<Item = efi::Guid> + '_ {
    bytes.chunks_exact(16).map(|chunk| {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(chunk);
        efi::Guid::from_bytes(&raw)
    })
}
