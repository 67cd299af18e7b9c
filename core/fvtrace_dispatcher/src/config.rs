//! Dispatch configuration.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt;

use fvtrace_ffs::{OrdGuid, context::DEFAULT_MAX_DEPTH, guid::parse_guid};
use r_efi::efi;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// Default bound on the number of passes of one fixpoint phase.
pub const DEFAULT_MAX_PASSES: usize = 1024;

/// The architectural protocols every DXE driver without a depex section implicitly depends on, per PI spec
/// v1.2 Vol 2 section 10.9.
pub const ARCH_PROTOCOLS: [efi::Guid; 12] = [
    // BDS Arch
    efi::Guid::from_fields(0x665e3ff6, 0x46cc, 0x11d4, 0x9a, 0x38, &[0x00, 0x90, 0x27, 0x3f, 0xc1, 0x4d]),
    // Cpu Arch
    efi::Guid::from_fields(0x26baccb1, 0x6f42, 0x11d4, 0xbc, 0xe7, &[0x00, 0x80, 0xc7, 0x3c, 0x88, 0x81]),
    // Metronome Arch
    efi::Guid::from_fields(0x26baccb2, 0x6f42, 0x11d4, 0xbc, 0xe7, &[0x00, 0x80, 0xc7, 0x3c, 0x88, 0x81]),
    // Monotonic Counter Arch
    efi::Guid::from_fields(0x1da97072, 0xbddc, 0x4b30, 0x99, 0xf1, &[0x72, 0xa0, 0xb5, 0x6f, 0xff, 0x2a]),
    // Real Time Clock Arch
    efi::Guid::from_fields(0x27cfac87, 0x46cc, 0x11d4, 0x9a, 0x38, &[0x00, 0x90, 0x27, 0x3f, 0xc1, 0x4d]),
    // Reset Arch
    efi::Guid::from_fields(0x27cfac88, 0x46cc, 0x11d4, 0x9a, 0x38, &[0x00, 0x90, 0x27, 0x3f, 0xc1, 0x4d]),
    // Runtime Arch
    efi::Guid::from_fields(0xb7dfb4e1, 0x052f, 0x449f, 0x87, 0xbe, &[0x98, 0x18, 0xfc, 0x91, 0xb7, 0x33]),
    // Security Arch
    efi::Guid::from_fields(0xa46423e3, 0x4617, 0x49f1, 0xb9, 0xff, &[0xd1, 0xbf, 0xa9, 0x11, 0x58, 0x39]),
    // Timer Arch
    efi::Guid::from_fields(0x26baccb3, 0x6f42, 0x11d4, 0xbc, 0xe7, &[0x00, 0x80, 0xc7, 0x3c, 0x88, 0x81]),
    // Variable Write Arch
    efi::Guid::from_fields(0x6441f818, 0x6362, 0x4e44, 0xb5, 0x70, &[0x7d, 0xba, 0x31, 0xdd, 0x24, 0x53]),
    // Variable Arch
    efi::Guid::from_fields(0x1e5668e2, 0x8481, 0x11d4, 0xbc, 0xf1, &[0x00, 0x80, 0xc7, 0x3c, 0x88, 0x81]),
    // Watchdog Arch
    efi::Guid::from_fields(0x665e3ff5, 0x46cc, 0x11d4, 0x9a, 0x38, &[0x00, 0x90, 0x27, 0x3f, 0xc1, 0x4d]),
];

/// Error definitions for configuration and database loading.
#[derive(Debug)]
pub enum ConfigError {
    /// The document is not valid YAML, or does not have the expected shape.
    Yaml(serde_yaml::Error),
    /// A field holds a value that cannot be used.
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Yaml(err) => write!(f, "malformed YAML: {err}"),
            ConfigError::InvalidValue(field) => write!(f, "invalid value for `{field}`"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Yaml(err) => Some(err),
            ConfigError::InvalidValue(_) => None,
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

/// A GUID written in registry format in YAML documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct YamlGuid(pub efi::Guid);

impl<'de> Deserialize<'de> for YamlGuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_guid(&text).map(YamlGuid).ok_or_else(|| de::Error::custom(format!("invalid GUID {text:?}")))
    }
}

impl Serialize for YamlGuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&OrdGuid(self.0))
    }
}

/// The on-disk form of [`DispatchConfig`]. Every field is optional and falls back to the default.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    arch_protocols: Option<Vec<YamlGuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_passes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_nesting_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expand_nested_volumes: Option<bool>,
}

/// Settings for loading volumes and replaying dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    arch_protocols: Vec<efi::Guid>,
    max_passes: usize,
    max_nesting_depth: usize,
    expand_nested_volumes: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            arch_protocols: ARCH_PROTOCOLS.to_vec(),
            max_passes: DEFAULT_MAX_PASSES,
            max_nesting_depth: DEFAULT_MAX_DEPTH,
            expand_nested_volumes: true,
        }
    }
}

impl DispatchConfig {
    /// Replaces the architectural protocol list.
    pub fn with_arch_protocols(mut self, arch_protocols: impl IntoIterator<Item = efi::Guid>) -> Self {
        self.arch_protocols = arch_protocols.into_iter().collect();
        self
    }

    /// Bounds the number of passes of each fixpoint phase.
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Bounds the nesting of encapsulation sections and nested volumes.
    pub fn with_max_nesting_depth(mut self, max_nesting_depth: usize) -> Self {
        self.max_nesting_depth = max_nesting_depth;
        self
    }

    /// Whether files of volumes nested in firmware volume image files take part in dispatch.
    pub fn with_expand_nested_volumes(mut self, expand_nested_volumes: bool) -> Self {
        self.expand_nested_volumes = expand_nested_volumes;
        self
    }

    pub fn arch_protocols(&self) -> &[efi::Guid] {
        &self.arch_protocols
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    pub fn max_nesting_depth(&self) -> usize {
        self.max_nesting_depth
    }

    pub fn expand_nested_volumes(&self) -> bool {
        self.expand_nested_volumes
    }

    /// Reads a configuration from YAML. Absent fields keep their defaults.
    ///
    /// ```yaml
    /// max_passes: 64
    /// expand_nested_volumes: false
    /// arch_protocols:
    ///   - 665E3FF6-46CC-11D4-9A38-0090273FC14D
    /// ```
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(text)?;
        let mut config = Self::default();
        if let Some(arch_protocols) = file.arch_protocols {
            config.arch_protocols = arch_protocols.into_iter().map(|guid| guid.0).collect();
        }
        if let Some(max_passes) = file.max_passes {
            if max_passes == 0 {
                Err(ConfigError::InvalidValue("max_passes"))?;
            }
            config.max_passes = max_passes;
        }
        if let Some(max_nesting_depth) = file.max_nesting_depth {
            config.max_nesting_depth = max_nesting_depth;
        }
        if let Some(expand_nested_volumes) = file.expand_nested_volumes {
            config.expand_nested_volumes = expand_nested_volumes;
        }
        Ok(config)
    }

    /// Writes the configuration as YAML, in the form [`DispatchConfig::from_yaml`] reads.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        let file = ConfigFile {
            arch_protocols: Some(self.arch_protocols.iter().copied().map(YamlGuid).collect()),
            max_passes: Some(self.max_passes),
            max_nesting_depth: Some(self.max_nesting_depth),
            expand_nested_volumes: Some(self.expand_nested_volumes),
        };
        Ok(serde_yaml::to_string(&file)?)
    }
}
