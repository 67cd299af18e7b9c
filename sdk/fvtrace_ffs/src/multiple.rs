//! Merging several independently loaded firmware volumes into one namespace.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{string::String, vec::Vec};

use log::{info, warn};
use r_efi::efi;

use crate::{ByteImage, FfsDict, FirmwareVolume, FormatError, OrdGuid, ParseContext};

/// Where one loaded volume came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSource {
    /// Caller supplied name, typically the file the volume was read from.
    pub name: String,
    pub file_system_guid: efi::Guid,
    pub fv_name: Option<efi::Guid>,
    pub size: u64,
}

/// A source that did not decode as a firmware volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSource {
    pub name: String,
    pub error: FormatError,
}

/// The union of several firmware volumes.
///
/// Files are merged last-writer-wins: a file whose identity was already seen replaces the earlier file
/// but keeps its position.
#[derive(Debug, Clone, Default)]
pub struct MultipleFv {
    volumes: Vec<FirmwareVolume>,
    sources: Vec<VolumeSource>,
    failed: Vec<FailedSource>,
    files: FfsDict,
}

impl MultipleFv {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and merges every `(name, bytes)` pair in order.
    pub fn load<I, N>(sources: I, ctx: &mut ParseContext, expand_nested: bool) -> Self
    where
        I: IntoIterator<Item = (N, ByteImage)>,
        N: Into<String>,
    {
        let mut multiple = Self::new();
        for (name, image) in sources {
            // A failed source is already recorded.
            let _ = multiple.add(name, image, ctx, expand_nested);
        }
        multiple
    }

    /// Decodes one volume and merges its files.
    ///
    /// With `expand_nested`, files found in firmware volume image sections are merged right after the file
    /// that carries them.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        image: ByteImage,
        ctx: &mut ParseContext,
        expand_nested: bool,
    ) -> Result<(), FormatError> {
        let name = name.into();
        let volume = match FirmwareVolume::parse(image, ctx) {
            Ok(volume) => volume,
            Err(error) => {
                warn!("{name} is not a firmware volume: {error}");
                self.failed.push(FailedSource { name, error });
                return Err(error);
            }
        };

        info!(
            "Loaded {name}: volume {} ({:#x} bytes, {} files)",
            OrdGuid(volume.file_system_guid()),
            volume.size(),
            volume.files().len()
        );

        self.sources.push(VolumeSource {
            name,
            file_system_guid: volume.file_system_guid(),
            fv_name: volume.fv_name(),
            size: volume.size(),
        });
        self.merge(&volume, expand_nested);
        self.volumes.push(volume);
        Ok(())
    }

    fn merge(&mut self, volume: &FirmwareVolume, expand_nested: bool) {
        for file in volume.files().iter() {
            if self.files.insert_replace(file.clone()).is_some() {
                info!("File {} replaced by a later volume", file.id());
            }
            // Nesting is bounded by the parse depth limit.
            if expand_nested {
                for inner in file.nested_volumes() {
                    self.merge(inner, true);
                }
            }
        }
    }

    /// Every volume that decoded, in load order.
    pub fn volumes(&self) -> &[FirmwareVolume] {
        &self.volumes
    }

    /// The provenance of every volume that decoded.
    pub fn sources(&self) -> &[VolumeSource] {
        &self.sources
    }

    /// Sources that did not decode.
    pub fn failed(&self) -> &[FailedSource] {
        &self.failed
    }

    /// The merged files.
    pub fn files(&self) -> &FfsDict {
        &self.files
    }
}
