//! Section decoding for UEFI Firmware File System (FFS) files.
//!
//! A file's sections form a tree: encapsulation sections (compression and GUID-defined) own the sections
//! found in their expanded payload, and firmware volume image sections own a whole nested volume. The tree
//! is stored as an arena ([`SectionTree`]) whose nodes refer to their children by [`SectionId`], so deeply
//! nested input never recurses on the stack.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{
    boxed::Box,
    collections::{BTreeMap, VecDeque},
    string::String,
    vec::Vec,
};
use core::fmt;

use fvtrace_depex::Depex;
use log::{debug, warn};
use r_efi::efi;

use crate::{
    Algorithm, ByteImage, CodecError, FirmwareVolume, FormatError, OrdGuid, ParseContext,
    guid::{BROTLI_SECTION_GUID, CRC32_SECTION_GUID, LZMA_SECTION_GUID, TIANO_DECOMPRESS_SECTION_GUID},
};

const STANDARD_HEADER_LENGTH: usize = 4;
const EXTENDED_HEADER_LENGTH: usize = 8;
const EXTENDED_SIZE_MARKER: u32 = 0xFF_FFFF;

const COMPRESSION_HEADER_LENGTH: usize = 5;
const GUID_DEFINED_HEADER_LENGTH: usize = 20;

/// `CompressionType` of a compression section whose payload is stored as is.
pub const NOT_COMPRESSED: u8 = 0x00;
/// `CompressionType` of a compression section using EFI standard compression.
pub const STANDARD_COMPRESSION: u8 = 0x01;

/// GUID-defined section attribute: the payload must be processed before it can be used.
pub const GUIDED_PROCESSING_REQUIRED: u16 = 0x01;
/// GUID-defined section attribute: the payload carries authentication status.
pub const GUIDED_AUTH_STATUS_VALID: u16 = 0x02;

/// Section types defined by the PI specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectionType {
    Compression,
    GuidDefined,
    Disposable,
    Pe32,
    Pic,
    Te,
    DxeDepex,
    Version,
    UserInterface,
    Compatibility16,
    FirmwareVolumeImage,
    FreeformSubtypeGuid,
    Raw,
    PeiDepex,
    MmDepex,
    Unknown(u8),
}

impl SectionType {
    /// The on-disk value.
    pub fn raw(&self) -> u8 {
        match self {
            SectionType::Compression => 0x01,
            SectionType::GuidDefined => 0x02,
            SectionType::Disposable => 0x03,
            SectionType::Pe32 => 0x10,
            SectionType::Pic => 0x11,
            SectionType::Te => 0x12,
            SectionType::DxeDepex => 0x13,
            SectionType::Version => 0x14,
            SectionType::UserInterface => 0x15,
            SectionType::Compatibility16 => 0x16,
            SectionType::FirmwareVolumeImage => 0x17,
            SectionType::FreeformSubtypeGuid => 0x18,
            SectionType::Raw => 0x19,
            SectionType::PeiDepex => 0x1B,
            SectionType::MmDepex => 0x1C,
            SectionType::Unknown(value) => *value,
        }
    }
}

impl From<u8> for SectionType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => SectionType::Compression,
            0x02 => SectionType::GuidDefined,
            0x03 => SectionType::Disposable,
            0x10 => SectionType::Pe32,
            0x11 => SectionType::Pic,
            0x12 => SectionType::Te,
            0x13 => SectionType::DxeDepex,
            0x14 => SectionType::Version,
            0x15 => SectionType::UserInterface,
            0x16 => SectionType::Compatibility16,
            0x17 => SectionType::FirmwareVolumeImage,
            0x18 => SectionType::FreeformSubtypeGuid,
            0x19 => SectionType::Raw,
            0x1B => SectionType::PeiDepex,
            0x1C => SectionType::MmDepex,
            other => SectionType::Unknown(other),
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionType::Unknown(value) => write!(f, "UNKNOWN({value:#04x})"),
            known => fmt::Debug::fmt(known, f),
        }
    }
}

/// The common header of every section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Decoded `Type` field.
    pub section_type: SectionType,
    /// Total size of the section including its header. Comes from `ExtendedSize` for large sections.
    pub size: u32,
    /// 4 for the standard header, 8 when the extended size field is present.
    pub header_length: usize,
}

impl SectionHeader {
    /// Decodes the header at the start of `image`.
    ///
    /// Fails if the declared size is smaller than the header or larger than `image`.
    pub fn parse(image: &ByteImage) -> Result<Self, FormatError> {
        let size = image.read_u24(0)?;
        let section_type = SectionType::from(image.read_u8(3)?);
        let (size, header_length) = if size == EXTENDED_SIZE_MARKER {
            (image.read_u32(4)?, EXTENDED_HEADER_LENGTH)
        } else {
            (size, STANDARD_HEADER_LENGTH)
        };

        if (size as usize) < header_length || size as usize > image.len() {
            Err(FormatError::InvalidSize)?;
        }
        Ok(Self { section_type, size, header_length })
    }

    /// Whether the extended size field is in use.
    pub fn is_extended(&self) -> bool {
        self.header_length == EXTENDED_HEADER_LENGTH
    }
}

/// A section found by [`SectionIterator`], before its payload is interpreted.
#[derive(Debug, Clone)]
pub struct RawSection {
    /// Offset of the section within the scanned buffer.
    pub offset: usize,
    /// The decoded header.
    pub header: SectionHeader,
    /// The whole section, header included.
    pub image: ByteImage,
    /// The bytes following the header.
    pub content: ByteImage,
}

/// Walks a buffer as a flat, 4-byte aligned sequence of sections.
///
/// The walk stops at the end of the buffer or at the first header that does not decode; the latter is
/// available from [`SectionIterator::error`] afterwards.
pub struct SectionIterator {
    data: ByteImage,
    offset: usize,
    error: Option<(usize, FormatError)>,
}

impl SectionIterator {
    /// Creates an iterator over the sections in `data`.
    pub fn new(data: ByteImage) -> Self {
        Self { data, offset: 0, error: None }
    }

    /// Where and why the walk stopped early, if it did.
    pub fn error(&self) -> Option<(usize, FormatError)> {
        self.error
    }
}

impl Iterator for SectionIterator {
    type Item = RawSection;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error.is_some() || self.offset + STANDARD_HEADER_LENGTH > self.data.len() {
            return None;
        }

        let offset = self.offset;
        let parsed = self.data.tail(offset).and_then(|remaining| {
            let header = SectionHeader::parse(&remaining)?;
            let image = remaining.slice(0, header.size as usize)?;
            let content = image.tail(header.header_length)?;
            Ok((header, image, content))
        });

        match parsed {
            Ok((header, image, content)) => {
                self.offset = align_up(offset + header.size as usize, 4);
                Some(RawSection { offset, header, image, content })
            }
            Err(err) => {
                debug!("Section walk stopped at {offset:#x}: {err}");
                self.error = Some((offset, err));
                None
            }
        }
    }
}

/// Index of a node within a [`SectionTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SectionId(usize);

impl SectionId {
    /// Position of the node in the arena.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A compression section (`EFI_COMPRESSION_SECTION`).
#[derive(Debug, Clone)]
pub struct CompressedImage {
    /// The declared size of the expanded payload.
    pub uncompressed_length: u32,
    /// `CompressionType` as stored.
    pub compression_type: u8,
    /// The algorithm that expanded the payload, if any was needed and one succeeded.
    pub algorithm: Option<Algorithm>,
    /// Sections found in the expanded payload.
    pub children: Vec<SectionId>,
    /// Why the payload could not be expanded.
    pub failure: Option<CodecError>,
}

/// A GUID-defined section (`EFI_GUID_DEFINED_SECTION`).
#[derive(Debug, Clone)]
pub struct GuidDefinedImage {
    /// `SectionDefinitionGuid`, selecting how the payload is interpreted.
    pub guid: efi::Guid,
    /// Offset of the payload from the start of the section.
    pub data_offset: u16,
    /// `Attributes` as stored.
    pub attributes: u16,
    /// Sections found in the interpreted payload. Empty for unknown GUIDs.
    pub children: Vec<SectionId>,
    /// Why the payload could not be expanded.
    pub failure: Option<CodecError>,
    /// For CRC32 sections, whether the stored CRC matched the payload.
    pub crc_valid: Option<bool>,
}

/// What a section carries, as selected by its type.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Content that is not interpreted further, or that failed to decode.
    Opaque,
    Compressed(CompressedImage),
    GuidDefined(GuidDefinedImage),
    FirmwareVolume(Box<FirmwareVolume>),
    Depex(Depex),
    /// The file's UI name.
    UserInterface(String),
    Version { build: u16, text: String },
}

impl Payload {
    /// The encapsulated children, empty for leaf payloads.
    pub fn children(&self) -> &[SectionId] {
        match self {
            Payload::Compressed(compressed) => &compressed.children,
            Payload::GuidDefined(guided) => &guided.children,
            _ => &[],
        }
    }

    fn children_mut(&mut self) -> Option<&mut Vec<SectionId>> {
        match self {
            Payload::Compressed(compressed) => Some(&mut compressed.children),
            Payload::GuidDefined(guided) => Some(&mut guided.children),
            _ => None,
        }
    }
}

/// One decoded section.
#[derive(Debug, Clone)]
pub struct SectionNode {
    /// Offset of the section within the buffer it was found in: the file for top level sections, the
    /// expanded payload for encapsulated ones.
    pub offset: usize,
    pub header: SectionHeader,
    /// The whole section, header included.
    pub image: ByteImage,
    /// The bytes following the header.
    pub content: ByteImage,
    pub payload: Payload,
    /// The encapsulation section this one was found in.
    pub parent: Option<SectionId>,
}

impl SectionNode {
    /// Shorthand for `header.section_type`.
    pub fn section_type(&self) -> SectionType {
        self.header.section_type
    }

    /// The decoded dependency expression, for depex sections.
    pub fn depex(&self) -> Option<&Depex> {
        match &self.payload {
            Payload::Depex(depex) => Some(depex),
            _ => None,
        }
    }
}

/// The arena holding all sections of one file.
#[derive(Debug, Clone, Default)]
pub struct SectionTree {
    nodes: Vec<SectionNode>,
    top_level: BTreeMap<usize, SectionId>,
}

impl SectionTree {
    /// Decodes the sections in `data`, expanding encapsulations through `ctx`.
    ///
    /// `base` is added to the offsets of top level sections, so a file can key them by their offset from
    /// the file header. `depth` is the nesting level of `data` itself.
    pub fn parse(data: &ByteImage, base: usize, ctx: &mut ParseContext, depth: usize) -> Self {
        let mut tree = SectionTree::default();
        let mut worklist = VecDeque::from([(None, data.clone(), depth)]);

        while let Some((parent, buffer, level)) = worklist.pop_front() {
            let mut sections = SectionIterator::new(buffer);
            let mut children = Vec::new();

            for raw in sections.by_ref() {
                let id = SectionId(tree.nodes.len());
                let (payload, expanded) = match decode_payload(&raw, ctx, level) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        warn!("{} section at {:#x} is treated as opaque: {err}", raw.header.section_type, raw.offset);
                        (Payload::Opaque, None)
                    }
                };
                debug!("{} section at {:#x}, {} bytes", raw.header.section_type, raw.offset, raw.header.size);

                if let Some(expanded) = expanded {
                    if level + 1 > ctx.max_depth() {
                        warn!("Section at {:#x} not expanded: {}", raw.offset, FormatError::NestingTooDeep);
                    } else {
                        worklist.push_back((Some(id), expanded, level + 1));
                    }
                }

                let offset = if parent.is_none() { base + raw.offset } else { raw.offset };
                let RawSection { header, image, content, .. } = raw;
                tree.nodes.push(SectionNode { offset, header, image, content, payload, parent });
                match parent {
                    None => {
                        tree.top_level.insert(offset, id);
                    }
                    Some(_) => children.push(id),
                }
            }

            if let Some((offset, err)) = sections.error() {
                warn!("Sections after {offset:#x} skipped: {err}");
            }

            if let Some(slot) = parent.and_then(|SectionId(index)| tree.nodes[index].payload.children_mut()) {
                *slot = children;
            }
        }

        tree
    }

    /// Number of sections at any level.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the file has no sections.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a node.
    pub fn get(&self, id: SectionId) -> Option<&SectionNode> {
        self.nodes.get(id.0)
    }

    /// The top level sections keyed by offset.
    pub fn top_level(&self) -> impl Iterator<Item = (usize, &SectionNode)> + '_ {
        self.top_level.iter().map(|(offset, id)| (*offset, &self.nodes[id.0]))
    }

    /// The immediate children of an encapsulation section.
    pub fn children(&self, id: SectionId) -> impl Iterator<Item = &SectionNode> + '_ {
        let children = self.get(id).map(|node| node.payload.children()).unwrap_or(&[]);
        children.iter().filter_map(|child| self.get(*child))
    }

    /// Iterates every section depth-first, children right after their encapsulation.
    pub fn iter(&self) -> SectionTreeIter<'_> {
        let mut stack: Vec<SectionId> = self.top_level.values().copied().collect();
        stack.reverse();
        SectionTreeIter { tree: self, stack }
    }
}

/// Depth-first iterator over a [`SectionTree`].
pub struct SectionTreeIter<'a> {
    tree: &'a SectionTree,
    stack: Vec<SectionId>,
}

impl<'a> Iterator for SectionTreeIter<'a> {
    type Item = (SectionId, &'a SectionNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.tree.get(id)?;
        self.stack.extend(node.payload.children().iter().rev().copied());
        Some((id, node))
    }
}

fn decode_payload(
    raw: &RawSection,
    ctx: &mut ParseContext,
    depth: usize,
) -> Result<(Payload, Option<ByteImage>), FormatError> {
    let content = raw.content.clone();
    match raw.header.section_type {
        SectionType::Compression => decode_compression(&content, ctx),
        SectionType::GuidDefined => decode_guid_defined(raw, &content, ctx),
        SectionType::FirmwareVolumeImage => {
            if depth + 1 > ctx.max_depth() {
                Err(FormatError::NestingTooDeep)?;
            }
            let volume = FirmwareVolume::parse_nested(content, ctx, depth + 1)?;
            Ok((Payload::FirmwareVolume(Box::new(volume)), None))
        }
        SectionType::DxeDepex | SectionType::PeiDepex | SectionType::MmDepex => {
            Ok((Payload::Depex(Depex::from(content.as_slice())), None))
        }
        SectionType::UserInterface => Ok((Payload::UserInterface(ucs2_string(content.as_slice())), None)),
        SectionType::Version => {
            let build = content.read_u16(0)?;
            let text = ucs2_string(content.bytes(2, content.len() - 2)?);
            Ok((Payload::Version { build, text }, None))
        }
        _ => Ok((Payload::Opaque, None)),
    }
}

fn decode_compression(
    content: &ByteImage,
    ctx: &mut ParseContext,
) -> Result<(Payload, Option<ByteImage>), FormatError> {
    let uncompressed_length = content.read_u32(0)?;
    let compression_type = content.read_u8(4)?;
    let data = content.tail(COMPRESSION_HEADER_LENGTH)?;

    let mut compressed =
        CompressedImage { uncompressed_length, compression_type, algorithm: None, children: Vec::new(), failure: None };

    let expanded = match compression_type {
        NOT_COMPRESSED => Some(data),
        STANDARD_COMPRESSION => {
            let decompressor = ctx.decompressor();
            let result = decompressor
                .decompress(Algorithm::Efi, data.as_slice())
                .map(|buffer| (Algorithm::Efi, buffer))
                .or_else(|_| {
                    decompressor.decompress(Algorithm::Tiano, data.as_slice()).map(|buffer| (Algorithm::Tiano, buffer))
                });
            match result {
                Ok((algorithm, buffer)) => {
                    compressed.algorithm = Some(algorithm);
                    Some(ByteImage::new(buffer))
                }
                Err(err) => {
                    warn!("Compression section payload not expanded: {err}");
                    compressed.failure = Some(err);
                    None
                }
            }
        }
        other => {
            warn!("Unknown compression type {other:#04x}");
            compressed.failure = Some(CodecError::Unsupported);
            None
        }
    };

    match &expanded {
        Some(buffer) if buffer.len() != uncompressed_length as usize => {
            warn!("Compression section expanded to {} bytes, header declares {uncompressed_length}", buffer.len());
        }
        _ => (),
    }

    Ok((Payload::Compressed(compressed), expanded))
}

fn decode_guid_defined(
    raw: &RawSection,
    content: &ByteImage,
    ctx: &mut ParseContext,
) -> Result<(Payload, Option<ByteImage>), FormatError> {
    let guid = content.read_guid(0)?;
    let data_offset = content.read_u16(16)?;
    let attributes = content.read_u16(18)?;
    if (data_offset as usize) < raw.header.header_length + GUID_DEFINED_HEADER_LENGTH {
        Err(FormatError::InvalidHeader)?;
    }
    let data = raw.image.tail(data_offset as usize)?;

    let mut guided =
        GuidDefinedImage { guid, data_offset, attributes, children: Vec::new(), failure: None, crc_valid: None };

    if guid == CRC32_SECTION_GUID {
        let stored = content.read_u32(GUID_DEFINED_HEADER_LENGTH)?;
        let computed = crc32fast::hash(data.as_slice());
        if stored != computed {
            warn!("CRC32 section: stored {stored:#010x}, computed {computed:#010x}");
        }
        guided.crc_valid = Some(stored == computed);
        return Ok((Payload::GuidDefined(guided), Some(data)));
    }

    let Some(algorithm) = guided_algorithm(&guid) else {
        debug!("GUID-defined section {} is not interpreted", OrdGuid(guid));
        return Ok((Payload::GuidDefined(guided), None));
    };

    match ctx.decompressor().decompress(algorithm, data.as_slice()) {
        Ok(buffer) => Ok((Payload::GuidDefined(guided), Some(ByteImage::new(buffer)))),
        Err(err) => {
            warn!("{algorithm} section payload not expanded: {err}");
            guided.failure = Some(err);
            Ok((Payload::GuidDefined(guided), None))
        }
    }
}

fn guided_algorithm(guid: &efi::Guid) -> Option<Algorithm> {
    [
        (TIANO_DECOMPRESS_SECTION_GUID, Algorithm::Tiano),
        (LZMA_SECTION_GUID, Algorithm::Lzma),
        (BROTLI_SECTION_GUID, Algorithm::Brotli),
    ]
    .into_iter()
    .find_map(|(known, algorithm)| (known == *guid).then_some(algorithm))
}

fn ucs2_string(bytes: &[u8]) -> String {
    let mut units: Vec<u16> = bytes.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]])).collect();
    while units.last() == Some(&0) {
        units.pop();
    }
    String::from_utf16_lossy(&units)
}

pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        MockDecompressor, NullDecompressor,
        builder::{SectionBuilder, section_list},
    };
    use alloc::{vec, vec::Vec};
    use fvtrace_depex::Opcode;

    fn parse(bytes: Vec<u8>, ctx: &mut ParseContext) -> SectionTree {
        SectionTree::parse(&ByteImage::new(bytes), 0, ctx, 0)
    }

    #[test]
    fn section_header_should_reject_bad_sizes() {
        assert_eq!(SectionHeader::parse(&ByteImage::new(vec![0x03, 0, 0, 0x19])), Err(FormatError::InvalidSize));
        assert_eq!(SectionHeader::parse(&ByteImage::new(vec![0x10, 0, 0, 0x19])), Err(FormatError::InvalidSize));
        assert_eq!(SectionHeader::parse(&ByteImage::new(vec![0x10, 0, 0])), Err(FormatError::OutOfRange));

        let header = SectionHeader::parse(&ByteImage::new(vec![0x04, 0, 0, 0x19])).unwrap();
        assert_eq!(header, SectionHeader { section_type: SectionType::Raw, size: 4, header_length: 4 });
    }

    #[test]
    fn extended_section_header_should_use_extended_size() {
        let bytes = SectionBuilder::raw(&[0xA5; 12]).extended().build();
        let header = SectionHeader::parse(&ByteImage::new(bytes)).unwrap();
        assert!(header.is_extended());
        assert_eq!(header.size, 20);
        assert_eq!(header.header_length, 8);
    }

    #[test]
    fn section_iterator_should_align_and_stop_on_bad_header() {
        let mut bytes = section_list(&[SectionBuilder::raw(&[1, 2, 3]), SectionBuilder::raw(&[4, 5, 6, 7])]);
        bytes.extend_from_slice(&[0x40, 0, 0, 0x19]);

        let mut iter = SectionIterator::new(ByteImage::new(bytes));
        let offsets: Vec<usize> = iter.by_ref().map(|raw| raw.offset).collect();
        assert_eq!(offsets, [0, 8]);
        assert_eq!(iter.error(), Some((16, FormatError::InvalidSize)));
    }

    #[test]
    fn leaf_payloads_should_decode_by_type() {
        let depex = [0x02u8].into_iter().chain(CRC32_SECTION_GUID.as_bytes().iter().copied()).chain([0x08]);
        let bytes = section_list(&[
            SectionBuilder::user_interface("DxeCore"),
            SectionBuilder::version(0x1234, "1.0"),
            SectionBuilder::dxe_depex(&depex.collect::<Vec<u8>>()),
            SectionBuilder::leaf(0x10, &[0x4D, 0x5A]),
        ]);
        let tree = parse(bytes, &mut ParseContext::new(&NullDecompressor));

        let nodes: Vec<&SectionNode> = tree.top_level().map(|(_, node)| node).collect();
        assert_eq!(nodes.len(), 4);
        assert!(matches!(&nodes[0].payload, Payload::UserInterface(name) if name == "DxeCore"));
        assert!(matches!(&nodes[1].payload, Payload::Version { build: 0x1234, text } if text == "1.0"));
        let pushed = uuid::Uuid::from_bytes_le(*CRC32_SECTION_GUID.as_bytes());
        assert_eq!(nodes[2].depex().unwrap().opcodes(), [Opcode::Push(pushed), Opcode::End]);
        assert!(matches!(nodes[3].payload, Payload::Opaque));
        assert_eq!(nodes[3].section_type(), SectionType::Pe32);
        assert_eq!(nodes[3].content.as_slice(), [0x4D, 0x5A]);
    }

    #[test]
    fn uncompressed_encapsulation_should_expose_children() {
        let bytes = section_list(&[SectionBuilder::compression(&[
            SectionBuilder::pei_depex(&[0x06, 0x08]),
            SectionBuilder::raw(&[0xAA; 5]),
        ])]);
        let tree = parse(bytes, &mut ParseContext::new(&NullDecompressor));

        assert_eq!(tree.len(), 3);
        let (_, outer) = tree.top_level().next().unwrap();
        let Payload::Compressed(compressed) = &outer.payload else { panic!("expected a compression section") };
        assert_eq!(compressed.compression_type, NOT_COMPRESSED);
        assert_eq!(compressed.children.len(), 2);
        assert!(compressed.failure.is_none());

        let children: Vec<SectionType> = tree.children(SectionId(0)).map(|node| node.section_type()).collect();
        assert_eq!(children, [SectionType::PeiDepex, SectionType::Raw]);
        assert!(tree.children(SectionId(0)).all(|node| node.parent == Some(SectionId(0))));
    }

    #[test]
    fn standard_compression_should_fall_back_to_tiano() {
        let inner = section_list(&[SectionBuilder::raw(b"payload")]);
        let expanded = inner.clone();

        let mut decompressor = MockDecompressor::new();
        decompressor
            .expect_decompress()
            .withf(|algorithm, _| *algorithm == Algorithm::Efi)
            .returning(|_, _| Err(CodecError::DataCorrupt));
        decompressor
            .expect_decompress()
            .withf(|algorithm, data| *algorithm == Algorithm::Tiano && data == [0xC0, 0xDE])
            .returning(move |_, _| Ok(expanded.clone()));

        let bytes =
            section_list(&[SectionBuilder::compressed(inner.len() as u32, STANDARD_COMPRESSION, &[0xC0, 0xDE])]);
        let tree = parse(bytes, &mut ParseContext::new(&decompressor));

        let (_, outer) = tree.top_level().next().unwrap();
        let Payload::Compressed(compressed) = &outer.payload else { panic!("expected a compression section") };
        assert_eq!(compressed.algorithm, Some(Algorithm::Tiano));
        assert_eq!(tree.children(SectionId(0)).count(), 1);
    }

    #[test]
    fn codec_failure_should_yield_no_children() {
        let mut decompressor = MockDecompressor::new();
        decompressor.expect_decompress().returning(|_, _| Err(CodecError::DataCorrupt));

        let bytes = section_list(&[
            SectionBuilder::compressed(64, STANDARD_COMPRESSION, &[0xFF; 16]),
            SectionBuilder::guid_defined(LZMA_SECTION_GUID, GUIDED_PROCESSING_REQUIRED, &[], &[0xFF; 16]),
            SectionBuilder::raw(b"sibling"),
        ]);
        let tree = parse(bytes, &mut ParseContext::new(&decompressor));

        let nodes: Vec<&SectionNode> = tree.top_level().map(|(_, node)| node).collect();
        assert_eq!(nodes.len(), 3);
        let Payload::Compressed(compressed) = &nodes[0].payload else { panic!("expected a compression section") };
        assert!(compressed.children.is_empty());
        assert_eq!(compressed.failure, Some(CodecError::DataCorrupt));
        let Payload::GuidDefined(guided) = &nodes[1].payload else { panic!("expected a GUID-defined section") };
        assert!(guided.children.is_empty());
        assert_eq!(guided.failure, Some(CodecError::DataCorrupt));
        assert_eq!(nodes[2].content.as_slice(), b"sibling");
    }

    #[test]
    fn crc32_section_should_verify_and_expose_children() {
        let children = [SectionBuilder::raw(b"protected")];
        let good = section_list(&[SectionBuilder::crc32(&children)]);
        let tree = parse(good.clone(), &mut ParseContext::new(&NullDecompressor));
        let (_, node) = tree.top_level().next().unwrap();
        assert!(matches!(&node.payload, Payload::GuidDefined(g) if g.crc_valid == Some(true) && g.children.len() == 1));

        // A bad CRC is reported but the payload is still walked.
        let mut bad = good;
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let tree = parse(bad, &mut ParseContext::new(&NullDecompressor));
        let (_, node) = tree.top_level().next().unwrap();
        assert!(matches!(&node.payload, Payload::GuidDefined(g) if g.crc_valid == Some(false) && g.children.len() == 1));
    }

    #[test]
    fn unknown_guid_defined_section_should_have_no_children() {
        let unknown = efi::Guid::from_fields(0x12345678, 0x1234, 0x5678, 0x9A, 0xBC, &[1, 2, 3, 4, 5, 6]);
        let inner = section_list(&[SectionBuilder::raw(b"x")]);
        let bytes = section_list(&[SectionBuilder::guid_defined(unknown, 0, &[0xEE; 4], &inner)]);
        let tree = parse(bytes, &mut ParseContext::new(&NullDecompressor));

        assert_eq!(tree.len(), 1);
        let (_, node) = tree.top_level().next().unwrap();
        let Payload::GuidDefined(guided) = &node.payload else { panic!("expected a GUID-defined section") };
        assert_eq!(guided.guid, unknown);
        assert_eq!(guided.data_offset, 4 + 20 + 4);
        assert!(guided.failure.is_none());
    }

    #[test]
    fn malformed_payload_should_degrade_to_opaque() {
        // A GUID-defined section too short for its own header.
        let bytes = section_list(&[SectionBuilder::leaf(0x02, &[0u8; 8]), SectionBuilder::raw(b"next")]);
        let tree = parse(bytes, &mut ParseContext::new(&NullDecompressor));
        let nodes: Vec<&SectionNode> = tree.top_level().map(|(_, node)| node).collect();
        assert_eq!(nodes.len(), 2);
        assert!(matches!(nodes[0].payload, Payload::Opaque));
        assert_eq!(nodes[1].content.as_slice(), b"next");
    }

    #[test]
    fn nesting_beyond_the_limit_should_not_expand() {
        let mut section = SectionBuilder::raw(b"deep");
        for _ in 0..4 {
            section = SectionBuilder::compression(&[section]);
        }
        let bytes = section_list(&[section]);

        assert_eq!(parse(bytes.clone(), &mut ParseContext::new(&NullDecompressor)).len(), 5);
        assert_eq!(parse(bytes, &mut ParseContext::new(&NullDecompressor).with_max_depth(2)).len(), 3);
    }

    #[test]
    fn iter_should_be_depth_first() {
        let bytes = section_list(&[
            SectionBuilder::compression(&[
                SectionBuilder::compression(&[SectionBuilder::raw(b"a")]),
                SectionBuilder::raw(b"b"),
            ]),
            SectionBuilder::raw(b"c"),
        ]);
        let tree = parse(bytes, &mut ParseContext::new(&NullDecompressor));
        let order: Vec<Vec<u8>> = tree
            .iter()
            .filter(|(_, node)| node.section_type() == SectionType::Raw)
            .map(|(_, node)| node.content.to_vec())
            .collect();
        assert_eq!(order, [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
