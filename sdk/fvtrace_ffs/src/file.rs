//! Firmware File System (FFS) file decoding.
//!
//! An [`Ffs`] is one file entry of a firmware volume. Its header is decoded eagerly; its sections are
//! decoded into a [`SectionTree`] unless the file type carries no sections (pad and raw files).
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{string::String, vec::Vec};
use core::fmt;

use fvtrace_depex::Depex;
use log::debug;
use r_efi::efi;

use crate::{
    ByteImage, FirmwareVolume, FormatError, OrdGuid, ParseContext,
    section::{Payload, SectionNode, SectionTree, SectionType},
};

/// Size of `EFI_FFS_FILE_HEADER`.
pub const FILE_HEADER_LENGTH: usize = 24;
/// Size of `EFI_FFS_FILE_HEADER2`, used by large files.
pub const FILE_HEADER2_LENGTH: usize = 32;

/// `FFS_ATTRIB_LARGE_FILE`
pub const ATTRIB_LARGE_FILE: u8 = 0x01;
/// `FFS_ATTRIB_FIXED`
pub const ATTRIB_FIXED: u8 = 0x04;
/// `FFS_ATTRIB_DATA_ALIGNMENT`
pub const ATTRIB_DATA_ALIGNMENT: u8 = 0x38;
/// `FFS_ATTRIB_CHECKSUM`
pub const ATTRIB_CHECKSUM: u8 = 0x40;

/// File types defined by the PI specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileType {
    Raw,
    Freeform,
    SecCore,
    PeiCore,
    DxeCore,
    Peim,
    Driver,
    CombinedPeimDriver,
    Application,
    Mm,
    FirmwareVolumeImage,
    CombinedMmDxe,
    MmCore,
    MmStandalone,
    MmCoreStandalone,
    Pad,
    Unknown(u8),
}

impl FileType {
    /// The on-disk value.
    pub fn raw(&self) -> u8 {
        match self {
            FileType::Raw => 0x01,
            FileType::Freeform => 0x02,
            FileType::SecCore => 0x03,
            FileType::PeiCore => 0x04,
            FileType::DxeCore => 0x05,
            FileType::Peim => 0x06,
            FileType::Driver => 0x07,
            FileType::CombinedPeimDriver => 0x08,
            FileType::Application => 0x09,
            FileType::Mm => 0x0A,
            FileType::FirmwareVolumeImage => 0x0B,
            FileType::CombinedMmDxe => 0x0C,
            FileType::MmCore => 0x0D,
            FileType::MmStandalone => 0x0E,
            FileType::MmCoreStandalone => 0x0F,
            FileType::Pad => 0xF0,
            FileType::Unknown(value) => *value,
        }
    }

    /// Whether files of this type are a sequence of sections.
    pub fn has_sections(&self) -> bool {
        !matches!(self, FileType::Raw | FileType::Pad)
    }
}

impl From<u8> for FileType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => FileType::Raw,
            0x02 => FileType::Freeform,
            0x03 => FileType::SecCore,
            0x04 => FileType::PeiCore,
            0x05 => FileType::DxeCore,
            0x06 => FileType::Peim,
            0x07 => FileType::Driver,
            0x08 => FileType::CombinedPeimDriver,
            0x09 => FileType::Application,
            0x0A => FileType::Mm,
            0x0B => FileType::FirmwareVolumeImage,
            0x0C => FileType::CombinedMmDxe,
            0x0D => FileType::MmCore,
            0x0E => FileType::MmStandalone,
            0x0F => FileType::MmCoreStandalone,
            0xF0 => FileType::Pad,
            other => FileType::Unknown(other),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileType::Raw => "RAW",
            FileType::Freeform => "FREEFORM",
            FileType::SecCore => "SEC_CORE",
            FileType::PeiCore => "PEI_CORE",
            FileType::DxeCore => "DXE_CORE",
            FileType::Peim => "PEIM",
            FileType::Driver => "DRIVER",
            FileType::CombinedPeimDriver => "COMBINED_PEIM_DRIVER",
            FileType::Application => "APPLICATION",
            FileType::Mm => "MM",
            FileType::FirmwareVolumeImage => "FIRMWARE_VOLUME_IMAGE",
            FileType::CombinedMmDxe => "COMBINED_MM_DXE",
            FileType::MmCore => "MM_CORE",
            FileType::MmStandalone => "MM_STANDALONE",
            FileType::MmCoreStandalone => "MM_CORE_STANDALONE",
            FileType::Pad => "PAD",
            FileType::Unknown(value) => return write!(f, "UNKNOWN({value:#04x})"),
        };
        f.write_str(name)
    }
}

/// The identity a file is registered under.
///
/// Pad files all carry the same name, so each one is given a serial from the [`ParseContext`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FfsId {
    Name(OrdGuid),
    Pad(u32),
}

impl FfsId {
    /// The file name, for non-pad files.
    pub fn guid(&self) -> Option<efi::Guid> {
        match self {
            FfsId::Name(name) => Some(name.guid()),
            FfsId::Pad(_) => None,
        }
    }
}

impl From<efi::Guid> for FfsId {
    fn from(value: efi::Guid) -> Self {
        FfsId::Name(OrdGuid(value))
    }
}

impl fmt::Display for FfsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FfsId::Name(name) => name.fmt(f),
            FfsId::Pad(serial) => write!(f, "PAD-{serial}"),
        }
    }
}

/// The kind of dependency expression section to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepexKind {
    Pei,
    Dxe,
    Mm,
}

impl DepexKind {
    fn section_type(&self) -> SectionType {
        match self {
            DepexKind::Pei => SectionType::PeiDepex,
            DepexKind::Dxe => SectionType::DxeDepex,
            DepexKind::Mm => SectionType::MmDepex,
        }
    }
}

/// A decoded FFS file.
#[derive(Debug, Clone)]
pub struct Ffs {
    id: FfsId,
    name: efi::Guid,
    file_type: FileType,
    attributes: u8,
    size: u64,
    state: u8,
    header_length: usize,
    offset: usize,
    image: ByteImage,
    data: ByteImage,
    sections: SectionTree,
    free_space: u64,
}

impl Ffs {
    /// Decodes the file at the start of `image`.
    ///
    /// `offset` is the position of the file in its volume and is only recorded. `depth` is the nesting level
    /// of the enclosing volume. A section that does not decode ends the section walk but not the file.
    pub fn parse(image: &ByteImage, offset: usize, ctx: &mut ParseContext, depth: usize) -> Result<Self, FormatError> {
        let name = image.read_guid(0)?;
        let file_type = FileType::from(image.read_u8(18)?);
        let attributes = image.read_u8(19)?;
        let state = image.read_u8(23)?;

        let (size, header_length) = if attributes & ATTRIB_LARGE_FILE != 0 {
            (image.read_u64(FILE_HEADER_LENGTH)?, FILE_HEADER2_LENGTH)
        } else {
            (image.read_u24(20)? as u64, FILE_HEADER_LENGTH)
        };

        if size < header_length as u64 || size > image.len() as u64 {
            Err(FormatError::InvalidSize)?;
        }

        let image = image.slice(0, size as usize)?;
        let data = image.tail(header_length)?;

        let id = match file_type {
            FileType::Pad => FfsId::Pad(ctx.next_pad_serial()),
            _ => FfsId::from(name),
        };

        let sections = if file_type.has_sections() {
            SectionTree::parse(&data, header_length, ctx, depth)
        } else {
            SectionTree::default()
        };

        debug!("{file_type} file {id} at {offset:#x}, {size:#x} bytes, {} sections", sections.len());

        Ok(Self {
            id,
            name,
            file_type,
            attributes,
            size,
            state,
            header_length,
            offset,
            image,
            data,
            sections,
            free_space: 0,
        })
    }

    /// The identity the file is registered under.
    pub fn id(&self) -> FfsId {
        self.id
    }

    /// The `Name` field.
    pub fn name(&self) -> efi::Guid {
        self.name
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// The raw `Attributes` field.
    pub fn attributes(&self) -> u8 {
        self.attributes
    }

    /// Total size of the file including its header.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The raw `State` field.
    pub fn state(&self) -> u8 {
        self.state
    }

    /// 24, or 32 for large files.
    pub fn header_length(&self) -> usize {
        self.header_length
    }

    /// Offset of the file within its volume.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The whole file, header included.
    pub fn image(&self) -> &ByteImage {
        &self.image
    }

    /// Whether the file must stay at a fixed address.
    pub fn is_fixed(&self) -> bool {
        self.attributes & ATTRIB_FIXED != 0
    }

    /// Whether the data checksum is in use.
    pub fn has_checksum(&self) -> bool {
        self.attributes & ATTRIB_CHECKSUM != 0
    }

    /// Whether the file uses the large file header.
    pub fn is_large(&self) -> bool {
        self.attributes & ATTRIB_LARGE_FILE != 0
    }

    /// Encoded data alignment, from 0 (1 byte) to 7 (64 KiB).
    pub fn alignment_exponent(&self) -> u8 {
        (self.attributes & ATTRIB_DATA_ALIGNMENT) >> 3
    }

    /// Unused bytes between the end of this file and the start of the next one, or the end of the volume.
    pub fn free_space(&self) -> u64 {
        self.free_space
    }

    pub(crate) fn set_free_space(&mut self, free_space: u64) {
        self.free_space = free_space;
    }

    /// The decoded sections.
    pub fn sections(&self) -> &SectionTree {
        &self.sections
    }

    /// The bytes following the file header, for files that are not made of sections.
    pub fn raw_content(&self) -> &ByteImage {
        &self.data
    }

    /// Content of the first top level RAW section.
    pub fn raw_section_content(&self) -> Option<&ByteImage> {
        self.sections
            .top_level()
            .find(|(_, node)| node.section_type() == SectionType::Raw)
            .map(|(_, node)| &node.content)
    }

    /// The UI name of the file.
    pub fn user_interface(&self) -> Option<&str> {
        self.sections.iter().find_map(|(_, node)| match &node.payload {
            Payload::UserInterface(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// The build number and version string.
    pub fn version(&self) -> Option<(u16, &str)> {
        self.sections.iter().find_map(|(_, node)| match &node.payload {
            Payload::Version { build, text } => Some((*build, text.as_str())),
            _ => None,
        })
    }

    /// Locates a dependency expression of the given kind.
    ///
    /// The depex section is either at the top level or a direct child of a top level compression section.
    /// GUID-defined sections and deeper nesting are not searched; a depex found only there counts as absent.
    pub fn depex(&self, kind: DepexKind) -> Option<&Depex> {
        let wanted = kind.section_type();
        let top_level: Vec<&SectionNode> = self.sections.top_level().map(|(_, node)| node).collect();
        if let Some(node) = top_level.iter().find(|node| node.section_type() == wanted) {
            return node.depex();
        }

        let compressed = top_level.iter().filter(|node| node.section_type() == SectionType::Compression);
        for outer in compressed {
            let mut inner = outer.payload.children().iter().filter_map(|id| self.sections.get(*id));
            if let Some(node) = inner.find(|node| node.section_type() == wanted) {
                return node.depex();
            }
        }
        None
    }

    /// Firmware volumes carried in firmware volume image sections, at any section depth.
    pub fn nested_volumes(&self) -> impl Iterator<Item = &FirmwareVolume> + '_ {
        self.sections.iter().filter_map(|(_, node)| match &node.payload {
            Payload::FirmwareVolume(volume) => Some(volume.as_ref()),
            _ => None,
        })
    }

    /// A short description for logs and reports: the UI name if there is one, else the identity.
    pub fn display_name(&self) -> String {
        match self.user_interface() {
            Some(name) => String::from(name),
            None => alloc::format!("{}", self.id),
        }
    }
}
