//! Encoders for synthetic firmware volumes, files and sections.
//!
//! These produce the exact on-flash layout the decoders in this crate read, so tests can build an image
//! byte-for-byte and check what comes back out. They do not compress anything; compressed sections are
//! written with whatever payload the caller supplies.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{vec, vec::Vec};
use r_efi::efi;

use crate::{
    FileType,
    file::{ATTRIB_CHECKSUM, ATTRIB_LARGE_FILE, FILE_HEADER_LENGTH, FILE_HEADER2_LENGTH},
    guid::{CRC32_SECTION_GUID, FIRMWARE_FILE_SYSTEM2_GUID},
    section::{GUIDED_AUTH_STATUS_VALID, NOT_COMPRESSED, SectionType, align_up},
    volume::{ATTRIB_ERASE_POLARITY, FV_HEADER_LENGTH, FV_SIGNATURE},
};

/// Default volume attributes: all read/write/lock capabilities plus `EFI_FVB2_ERASE_POLARITY`.
pub const DEFAULT_FV_ATTRIBUTES: u32 = 0x0004_FEFF;

const FV_EXT_HEADER_LENGTH: usize = 20;

/// Builds one section.
#[derive(Debug, Clone)]
pub struct SectionBuilder {
    section_type: u8,
    header_extra: Vec<u8>,
    body: Vec<u8>,
    extended: bool,
}

impl SectionBuilder {
    /// A section of any type with `payload` following the common header.
    pub fn leaf(section_type: u8, payload: &[u8]) -> Self {
        Self { section_type, header_extra: Vec::new(), body: payload.to_vec(), extended: false }
    }

    pub fn raw(payload: &[u8]) -> Self {
        Self::leaf(SectionType::Raw.raw(), payload)
    }

    /// A NUL terminated UCS-2 name.
    pub fn user_interface(name: &str) -> Self {
        Self::leaf(SectionType::UserInterface.raw(), &ucs2(name))
    }

    pub fn version(build: u16, text: &str) -> Self {
        let mut payload = build.to_le_bytes().to_vec();
        payload.extend(ucs2(text));
        Self::leaf(SectionType::Version.raw(), &payload)
    }

    pub fn pei_depex(expression: &[u8]) -> Self {
        Self::leaf(SectionType::PeiDepex.raw(), expression)
    }

    pub fn dxe_depex(expression: &[u8]) -> Self {
        Self::leaf(SectionType::DxeDepex.raw(), expression)
    }

    /// A compression section that stores `children` uncompressed.
    pub fn compression(children: &[SectionBuilder]) -> Self {
        let body = section_list(children);
        Self::compressed(body.len() as u32, NOT_COMPRESSED, &body)
    }

    /// A compression section with an arbitrary header and payload.
    pub fn compressed(uncompressed_length: u32, compression_type: u8, payload: &[u8]) -> Self {
        let mut header_extra = uncompressed_length.to_le_bytes().to_vec();
        header_extra.push(compression_type);
        Self { section_type: SectionType::Compression.raw(), header_extra, body: payload.to_vec(), extended: false }
    }

    /// A GUID-defined section. `guid_data` sits between the fixed header and `DataOffset`.
    pub fn guid_defined(guid: efi::Guid, attributes: u16, guid_data: &[u8], payload: &[u8]) -> Self {
        let mut header_extra = guid.as_bytes().to_vec();
        // Data offset is filled in by `build`, once the header length is known.
        header_extra.extend_from_slice(&[0, 0]);
        header_extra.extend_from_slice(&attributes.to_le_bytes());
        header_extra.extend_from_slice(guid_data);
        Self { section_type: SectionType::GuidDefined.raw(), header_extra, body: payload.to_vec(), extended: false }
    }

    /// A CRC32 GUID-defined section over `children`.
    pub fn crc32(children: &[SectionBuilder]) -> Self {
        let body = section_list(children);
        let crc = crc32fast::hash(&body);
        Self::guid_defined(CRC32_SECTION_GUID, GUIDED_AUTH_STATUS_VALID, &crc.to_le_bytes(), &body)
    }

    /// A firmware volume image section.
    pub fn firmware_volume(volume: &[u8]) -> Self {
        Self::leaf(SectionType::FirmwareVolumeImage.raw(), volume)
    }

    /// Use the 8-byte header with the `ExtendedSize` field.
    pub fn extended(mut self) -> Self {
        self.extended = true;
        self
    }

    /// Serializes the section.
    pub fn build(&self) -> Vec<u8> {
        let header_length = if self.extended { 8 } else { 4 };
        let size = header_length + self.header_extra.len() + self.body.len();

        let mut bytes = Vec::with_capacity(size);
        if self.extended {
            bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF, self.section_type]);
            bytes.extend_from_slice(&(size as u32).to_le_bytes());
        } else {
            bytes.extend_from_slice(&(size as u32).to_le_bytes()[..3]);
            bytes.push(self.section_type);
        }
        bytes.extend_from_slice(&self.header_extra);
        if self.section_type == SectionType::GuidDefined.raw() {
            let data_offset = (header_length + self.header_extra.len()) as u16;
            bytes[header_length + 16..header_length + 18].copy_from_slice(&data_offset.to_le_bytes());
        }
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Serializes `sections` back to back, 4-byte aligned.
pub fn section_list(sections: &[SectionBuilder]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for section in sections {
        bytes.resize(align_up(bytes.len(), 4), 0);
        bytes.extend(section.build());
    }
    bytes
}

fn ucs2(text: &str) -> Vec<u8> {
    text.encode_utf16().chain([0]).flat_map(u16::to_le_bytes).collect()
}

/// Builds one FFS file.
#[derive(Debug, Clone)]
pub struct FileBuilder {
    name: efi::Guid,
    file_type: FileType,
    attributes: u8,
    data: Vec<u8>,
    large: bool,
}

impl FileBuilder {
    pub fn new(name: efi::Guid, file_type: FileType) -> Self {
        Self { name, file_type, attributes: 0, data: Vec::new(), large: false }
    }

    /// A pad file with `len` bytes of data.
    pub fn pad(len: usize) -> Self {
        let name = efi::Guid::from_bytes(&[0xFF; 16]);
        Self::new(name, FileType::Pad).with_data(&vec![0xFF; len])
    }

    pub fn with_attributes(mut self, attributes: u8) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_sections(mut self, sections: &[SectionBuilder]) -> Self {
        self.data = section_list(sections);
        self
    }

    pub fn with_data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    /// Use `EFI_FFS_FILE_HEADER2`.
    pub fn large(mut self) -> Self {
        self.large = true;
        self
    }

    /// Serializes the file in the `DATA_VALID` state for the given erase polarity.
    pub fn build(&self, erase_polarity: bool) -> Vec<u8> {
        let attributes = if self.large { self.attributes | ATTRIB_LARGE_FILE } else { self.attributes };
        let header_length = if self.large { FILE_HEADER2_LENGTH } else { FILE_HEADER_LENGTH };
        let size = header_length + self.data.len();

        let mut header = vec![0u8; header_length];
        header[0..16].copy_from_slice(self.name.as_bytes());
        header[18] = self.file_type.raw();
        header[19] = attributes;
        if self.large {
            header[24..32].copy_from_slice(&(size as u64).to_le_bytes());
        } else {
            header[20..23].copy_from_slice(&(size as u32).to_le_bytes()[..3]);
        }

        // The header checksum covers the header with the state and file checksum treated as zero.
        header[16] = checksum8(&header);
        header[17] = if attributes & ATTRIB_CHECKSUM != 0 { checksum8(&self.data) } else { 0xAA };
        // HEADER_CONSTRUCTION | HEADER_VALID | DATA_VALID
        header[23] = if erase_polarity { !0x07 } else { 0x07 };

        header.extend_from_slice(&self.data);
        header
    }
}

fn checksum8(bytes: &[u8]) -> u8 {
    0u8.wrapping_sub(bytes.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte)))
}

/// Builds a firmware volume.
#[derive(Debug, Clone)]
pub struct VolumeBuilder {
    file_system_guid: efi::Guid,
    attributes: u32,
    fv_name: Option<efi::Guid>,
    files: Vec<FileBuilder>,
    capacity: Option<usize>,
}

impl Default for VolumeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeBuilder {
    /// An FFS2 volume with erase polarity 1.
    pub fn new() -> Self {
        Self {
            file_system_guid: FIRMWARE_FILE_SYSTEM2_GUID,
            attributes: DEFAULT_FV_ATTRIBUTES,
            fv_name: None,
            files: Vec::new(),
            capacity: None,
        }
    }

    pub fn with_file_system_guid(mut self, guid: efi::Guid) -> Self {
        self.file_system_guid = guid;
        self
    }

    pub fn erase_polarity(mut self, erase_polarity: bool) -> Self {
        if erase_polarity {
            self.attributes |= ATTRIB_ERASE_POLARITY;
        } else {
            self.attributes &= !ATTRIB_ERASE_POLARITY;
        }
        self
    }

    /// Adds an extended header carrying `fv_name`.
    pub fn with_fv_name(mut self, fv_name: efi::Guid) -> Self {
        self.fv_name = Some(fv_name);
        self
    }

    pub fn with_file(mut self, file: FileBuilder) -> Self {
        self.files.push(file);
        self
    }

    /// Pads the volume with erased bytes up to `capacity`.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Serializes the volume.
    pub fn build(&self) -> Vec<u8> {
        let erase_polarity = self.attributes & ATTRIB_ERASE_POLARITY != 0;
        let erase_byte = if erase_polarity { 0xFF } else { 0x00 };
        // One block map entry plus the terminating entry.
        let header_length = FV_HEADER_LENGTH + 16;

        let mut body = Vec::new();
        let mut ext_header_offset = 0u16;
        if let Some(fv_name) = self.fv_name {
            ext_header_offset = header_length as u16;
            body.extend_from_slice(fv_name.as_bytes());
            body.extend_from_slice(&(FV_EXT_HEADER_LENGTH as u32).to_le_bytes());
        }
        for file in &self.files {
            let aligned = align_up(header_length + body.len(), 8) - header_length;
            body.resize(aligned, erase_byte);
            body.extend(file.build(erase_polarity));
        }

        let mut size = align_up(header_length + body.len(), 8);
        if let Some(capacity) = self.capacity {
            size = size.max(capacity);
        }
        body.resize(size - header_length, erase_byte);

        let mut header = vec![0u8; header_length];
        header[16..32].copy_from_slice(self.file_system_guid.as_bytes());
        header[32..40].copy_from_slice(&(size as u64).to_le_bytes());
        header[40..44].copy_from_slice(&FV_SIGNATURE.to_le_bytes());
        header[44..48].copy_from_slice(&self.attributes.to_le_bytes());
        header[48..50].copy_from_slice(&(header_length as u16).to_le_bytes());
        header[52..54].copy_from_slice(&ext_header_offset.to_le_bytes());
        header[55] = 2;
        header[56..60].copy_from_slice(&1u32.to_le_bytes());
        header[60..64].copy_from_slice(&(size as u32).to_le_bytes());

        let sum =
            header.chunks_exact(2).fold(0u16, |sum, pair| sum.wrapping_add(u16::from_le_bytes([pair[0], pair[1]])));
        header[50..52].copy_from_slice(&0u16.wrapping_sub(sum).to_le_bytes());

        header.extend(body);
        header
    }
}
