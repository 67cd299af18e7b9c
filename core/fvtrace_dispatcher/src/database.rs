//! The oracle answering which capabilities a module installs.
//!
//! The dispatcher never inspects module code. What a module produces (the PPIs and protocols it installs
//! once it runs) comes from a [`Database`], typically built offline from the platform sources.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use std::collections::BTreeMap;

use fvtrace_ffs::OrdGuid;
use r_efi::efi;
use serde::Deserialize;

use crate::config::{ConfigError, YamlGuid};

/// Which capability set a GUID joins once installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CapabilityKind {
    Ppi,
    Protocol,
}

/// A PPI or protocol a module installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub guid: efi::Guid,
    pub kind: CapabilityKind,
}

impl Capability {
    pub fn ppi(guid: efi::Guid) -> Self {
        Self { guid, kind: CapabilityKind::Ppi }
    }

    pub fn protocol(guid: efi::Guid) -> Self {
        Self { guid, kind: CapabilityKind::Protocol }
    }
}

/// Answers what a module produces.
///
/// Queried once per dispatched module, with the module's file name.
#[cfg_attr(any(test, feature = "mockall"), mockall::automock)]
pub trait Database {
    /// The capabilities `module` installs when it runs. Unknown modules produce nothing.
    fn produced(&self, module: &efi::Guid) -> Vec<Capability>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseFile {
    modules: Vec<ModuleEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleEntry {
    module: YamlGuid,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    ppis: Vec<YamlGuid>,
    #[serde(default)]
    protocols: Vec<YamlGuid>,
}

/// A [`Database`] backed by a fixed table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticDatabase {
    modules: BTreeMap<OrdGuid, Vec<Capability>>,
}

impl StaticDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `module` produces `capability`. Repeated capabilities are kept once.
    pub fn insert(&mut self, module: efi::Guid, capability: Capability) {
        let produced = self.modules.entry(OrdGuid(module)).or_default();
        if !produced.contains(&capability) {
            produced.push(capability);
        }
    }

    /// Builder form of [`StaticDatabase::insert`] for several capabilities.
    pub fn with_module(mut self, module: efi::Guid, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.modules.entry(OrdGuid(module)).or_default();
        for capability in capabilities {
            self.insert(module, capability);
        }
        self
    }

    /// Number of modules with an entry.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Reads a table from YAML.
    ///
    /// ```yaml
    /// modules:
    ///   - module: 9B3ADA4F-AE56-4C24-8DEA-F03B7558AE50
    ///     name: PcdPeim
    ///     ppis:
    ///       - 06E81C58-4AD7-44BC-8390-F10265F72480
    ///     protocols: []
    /// ```
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let file: DatabaseFile = serde_yaml::from_str(text)?;
        let mut database = Self::new();
        for entry in file.modules {
            log::debug!("Database entry {} ({})", OrdGuid(entry.module.0), entry.name.as_deref().unwrap_or("unnamed"));
            let ppis = entry.ppis.into_iter().map(|guid| Capability::ppi(guid.0));
            let protocols = entry.protocols.into_iter().map(|guid| Capability::protocol(guid.0));
            database = database.with_module(entry.module.0, ppis.chain(protocols));
        }
        Ok(database)
    }
}

impl Database for StaticDatabase {
    fn produced(&self, module: &efi::Guid) -> Vec<Capability> {
        self.modules.get(&OrdGuid(*module)).cloned().unwrap_or_default()
    }
}
