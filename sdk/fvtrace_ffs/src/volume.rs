//! Firmware Volume (FV) decoding.
//!
//! A [`FirmwareVolume`] validates the volume header and walks the 8-byte aligned sequence of files that
//! follows it. Problems that do not prevent the walk (checksum mismatches, duplicate file names, a damaged
//! file header near the end) are kept as [`Diagnostic`]s on the volume.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{collections::BTreeMap, vec::Vec};

use log::{debug, warn};
use r_efi::efi;

use crate::{
    ByteImage, Diagnostic, DuplicateIdentityError, Ffs, FfsId, FormatError, OrdGuid, ParseContext,
    file::{ATTRIB_LARGE_FILE, FILE_HEADER_LENGTH},
    section::align_up,
};

/// `_FVH`
pub const FV_SIGNATURE: u32 = u32::from_le_bytes(*b"_FVH");
/// Size of `EFI_FIRMWARE_VOLUME_HEADER` without its block map.
pub const FV_HEADER_LENGTH: usize = 56;
/// `EFI_FVB2_ERASE_POLARITY`
pub const ATTRIB_ERASE_POLARITY: u32 = 0x0000_0800;

const FV_LENGTH_OFFSET: usize = 32;
const SIGNATURE_OFFSET: usize = 40;
const ATTRIBUTES_OFFSET: usize = 44;
const HEADER_LENGTH_OFFSET: usize = 48;
const CHECKSUM_OFFSET: usize = 50;
const EXT_HEADER_OFFSET_OFFSET: usize = 52;
const REVISION_OFFSET: usize = 55;

/// One `EFI_FV_BLOCK_MAP_ENTRY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMapEntry {
    pub num_blocks: u32,
    pub length: u32,
}

/// Files keyed by identity, iterated in insertion order.
#[derive(Debug, Clone, Default)]
pub struct FfsDict {
    order: Vec<FfsId>,
    entries: BTreeMap<FfsId, Ffs>,
}

impl FfsDict {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `file` unless its identity is already present, in which case `file` is handed back.
    pub fn insert_first_wins(&mut self, file: Ffs) -> Result<(), Ffs> {
        let id = file.id();
        if self.entries.contains_key(&id) {
            return Err(file);
        }
        self.order.push(id);
        self.entries.insert(id, file);
        Ok(())
    }

    /// Inserts `file`, replacing any file with the same identity in place and returning it.
    pub fn insert_replace(&mut self, file: Ffs) -> Option<Ffs> {
        let id = file.id();
        let previous = self.entries.insert(id, file);
        if previous.is_none() {
            self.order.push(id);
        }
        previous
    }

    /// Removes a file. The relative order of the others is preserved.
    pub fn remove(&mut self, id: &FfsId) -> Option<Ffs> {
        let removed = self.entries.remove(id)?;
        self.order.retain(|entry| entry != id);
        Some(removed)
    }

    pub fn get(&self, id: &FfsId) -> Option<&Ffs> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &FfsId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Identities in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = FfsId> + '_ {
        self.order.iter().copied()
    }

    /// Files in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Ffs> + '_ {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }
}

/// A decoded firmware volume.
#[derive(Debug, Clone)]
pub struct FirmwareVolume {
    file_system_guid: efi::Guid,
    size: u64,
    attributes: u32,
    header_length: u16,
    checksum: u16,
    ext_header_offset: u16,
    revision: u8,
    fv_name: Option<efi::Guid>,
    block_map: Vec<BlockMapEntry>,
    files: FfsDict,
    diagnostics: Vec<Diagnostic>,
    image: ByteImage,
}

impl FirmwareVolume {
    /// Decodes the volume at the start of `image`.
    pub fn parse(image: ByteImage, ctx: &mut ParseContext) -> Result<Self, FormatError> {
        Self::parse_nested(image, ctx, 0)
    }

    /// Decodes a volume found `depth` levels deep inside other volumes.
    ///
    /// Only a bad volume header fails the parse. Everything found after it is best effort.
    pub fn parse_nested(image: ByteImage, ctx: &mut ParseContext, depth: usize) -> Result<Self, FormatError> {
        if image.len() < FV_HEADER_LENGTH {
            Err(FormatError::InvalidHeader)?;
        }
        if image.read_u32(SIGNATURE_OFFSET)? != FV_SIGNATURE {
            Err(FormatError::InvalidSignature)?;
        }

        let file_system_guid = image.read_guid(16)?;
        let size = image.read_u64(FV_LENGTH_OFFSET)?;
        let attributes = image.read_u32(ATTRIBUTES_OFFSET)?;
        let header_length = image.read_u16(HEADER_LENGTH_OFFSET)?;
        let checksum = image.read_u16(CHECKSUM_OFFSET)?;
        let ext_header_offset = image.read_u16(EXT_HEADER_OFFSET_OFFSET)?;
        let revision = image.read_u8(REVISION_OFFSET)?;

        if (header_length as usize) < FV_HEADER_LENGTH || (header_length as u64) > size {
            Err(FormatError::InvalidHeader)?;
        }
        if size > image.len() as u64 {
            Err(FormatError::InvalidSize)?;
        }
        let image = image.slice(0, size as usize)?;

        let header = image.bytes(0, header_length as usize)?;
        let sum = header
            .chunks_exact(2)
            .fold(0u16, |sum, pair| sum.wrapping_add(u16::from_le_bytes([pair[0], pair[1]])));

        let mut volume = Self {
            file_system_guid,
            size,
            attributes,
            header_length,
            checksum,
            ext_header_offset,
            revision,
            fv_name: None,
            block_map: Self::block_map(&image, header_length as usize),
            files: FfsDict::new(),
            diagnostics: Vec::new(),
            image,
        };

        if sum != 0 {
            warn!("Volume {} header checksum does not sum to zero", OrdGuid(file_system_guid));
            volume.diagnostics.push(Diagnostic::ChecksumMismatch { stored: checksum, sum });
        }

        let mut offset = header_length as usize;
        if ext_header_offset != 0 {
            match volume.ext_header(ext_header_offset as usize) {
                Ok((fv_name, ext_size)) => {
                    volume.fv_name = Some(fv_name);
                    offset = offset.max(ext_header_offset as usize + ext_size);
                }
                Err(err) => warn!("Volume extended header at {ext_header_offset:#x} ignored: {err}"),
            }
        }

        volume.walk_files(align_up(offset, 8), ctx, depth);
        debug!(
            "Volume {} ({:#x} bytes): {} files, {} diagnostics",
            OrdGuid(file_system_guid),
            size,
            volume.files.len(),
            volume.diagnostics.len()
        );
        Ok(volume)
    }

    fn block_map(image: &ByteImage, header_length: usize) -> Vec<BlockMapEntry> {
        let mut entries = Vec::new();
        let mut offset = FV_HEADER_LENGTH;
        while offset + 8 <= header_length {
            let (Ok(num_blocks), Ok(length)) = (image.read_u32(offset), image.read_u32(offset + 4)) else {
                break;
            };
            if num_blocks == 0 && length == 0 {
                break;
            }
            entries.push(BlockMapEntry { num_blocks, length });
            offset += 8;
        }
        entries
    }

    fn ext_header(&self, offset: usize) -> Result<(efi::Guid, usize), FormatError> {
        let fv_name = self.image.read_guid(offset)?;
        let ext_size = self.image.read_u32(offset + 16)? as usize;
        if ext_size < 20 || offset + ext_size > self.image.len() {
            Err(FormatError::InvalidSize)?;
        }
        Ok((fv_name, ext_size))
    }

    fn walk_files(&mut self, start: usize, ctx: &mut ParseContext, depth: usize) {
        let erase_byte = if self.erase_polarity() { 0xFF } else { 0x00 };
        let end = self.image.len();
        let mut offset = start;
        let mut previous: Option<(FfsId, usize)> = None;

        while offset + FILE_HEADER_LENGTH <= end {
            let Ok(header) = self.image.bytes(offset, FILE_HEADER_LENGTH) else { break };
            if self.is_end_of_files(header, erase_byte) {
                debug!("End of files at {offset:#x}");
                break;
            }

            let file = self.image.tail(offset).and_then(|remaining| Ffs::parse(&remaining, offset, ctx, depth));
            let file = match file {
                Ok(file) => file,
                Err(error) => {
                    warn!("Volume {}: file at {offset:#x} is damaged: {error}", OrdGuid(self.file_system_guid));
                    self.diagnostics.push(Diagnostic::TruncatedFile { offset, error });
                    break;
                }
            };

            let file_end = offset + file.size() as usize;
            let next = align_up(file_end, 8);
            self.set_free_space(previous, offset);
            previous = Some((file.id(), file_end));

            if let Err(duplicate) = self.files.insert_first_wins(file) {
                let first_offset = self.files.get(&duplicate.id()).map(|kept| kept.offset()).unwrap_or_default();
                let diagnostic = DuplicateIdentityError { id: duplicate.id(), first_offset, duplicate_offset: offset };
                warn!("{diagnostic}");
                self.diagnostics.push(Diagnostic::DuplicateIdentity(diagnostic));
                previous = None;
            }
            offset = next;
        }

        self.set_free_space(previous, end);
    }

    fn is_end_of_files(&self, header: &[u8], erase_byte: u8) -> bool {
        if header.iter().all(|byte| *byte == erase_byte) {
            return true;
        }
        let size = [header[20], header[21], header[22]];
        let large = header[19] & ATTRIB_LARGE_FILE != 0;
        match erase_byte {
            0xFF => size == [0xFF; 3],
            _ => size == [0x00; 3] && !large,
        }
    }

    fn set_free_space(&mut self, previous: Option<(FfsId, usize)>, next_start: usize) {
        let Some((id, file_end)) = previous else { return };
        if let Some(file) = self.files.entries.get_mut(&id) {
            file.set_free_space(next_start.saturating_sub(file_end) as u64);
        }
    }

    /// `FileSystemGuid`
    pub fn file_system_guid(&self) -> efi::Guid {
        self.file_system_guid
    }

    /// `FvLength`
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The raw `Attributes` field.
    pub fn attributes(&self) -> u32 {
        self.attributes
    }

    /// Whether erased flash reads as `0xFF`.
    pub fn erase_polarity(&self) -> bool {
        self.attributes & ATTRIB_ERASE_POLARITY != 0
    }

    pub fn header_length(&self) -> u16 {
        self.header_length
    }

    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    pub fn ext_header_offset(&self) -> u16 {
        self.ext_header_offset
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    /// `FvName` from the extended header, if present.
    pub fn fv_name(&self) -> Option<efi::Guid> {
        self.fv_name
    }

    pub fn block_map_entries(&self) -> &[BlockMapEntry] {
        &self.block_map
    }

    /// The files of the volume in volume order.
    pub fn files(&self) -> &FfsDict {
        &self.files
    }

    /// Findings that did not stop the parse.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// The bytes of the volume, `[0, FvLength)`.
    pub fn image(&self) -> &ByteImage {
        &self.image
    }
}
