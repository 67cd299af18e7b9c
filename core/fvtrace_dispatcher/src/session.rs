//! Loading firmware images and replaying their dispatch.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt;
use std::{
    io,
    path::{Path, PathBuf},
};

use fvtrace_ffs::{ByteImage, Decompressor, FormatError, MultipleFv, ParseContext};
use log::info;

use crate::{config::DispatchConfig, database::Database, engine::DispatchEngine, report::DispatchReport};

/// Error definitions for loading a session from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A file could not be read.
    Io { path: PathBuf, kind: io::ErrorKind },
    /// None of the files decoded as a firmware volume.
    NoVolumes,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Io { path, kind } => write!(f, "cannot read {}: {kind}", path.display()),
            SessionError::NoVolumes => f.write_str("no firmware volume could be loaded"),
        }
    }
}

impl std::error::Error for SessionError {}

/// The loaded volumes of one firmware image, ready to be dispatched.
///
/// A session owns everything it parsed. Nothing is shared between sessions.
pub struct Session<'a> {
    ctx: ParseContext<'a>,
    volumes: MultipleFv,
    config: DispatchConfig,
}

impl<'a> Session<'a> {
    /// Creates a session with no volumes.
    pub fn new(decompressor: &'a dyn Decompressor, config: DispatchConfig) -> Self {
        let ctx = ParseContext::new(decompressor).with_max_depth(config.max_nesting_depth());
        Self { ctx, volumes: MultipleFv::new(), config }
    }

    /// Creates a session from named in-memory volumes. Sources that do not decode are recorded and skipped.
    pub fn load<I, N>(sources: I, decompressor: &'a dyn Decompressor, config: DispatchConfig) -> Self
    where
        I: IntoIterator<Item = (N, ByteImage)>,
        N: Into<String>,
    {
        let mut session = Self::new(decompressor, config);
        for (name, image) in sources {
            // A failed source is already recorded.
            let _ = session.add(name, image);
        }
        session
    }

    /// Creates a session from volume files, naming each source after its file stem.
    ///
    /// Fails if a file cannot be read, or if none of them holds a firmware volume.
    pub fn load_files<I, P>(
        paths: I,
        decompressor: &'a dyn Decompressor,
        config: DispatchConfig,
    ) -> Result<Self, SessionError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut session = Self::new(decompressor, config);
        for path in paths {
            let path = path.as_ref();
            let bytes =
                std::fs::read(path).map_err(|err| SessionError::Io { path: path.to_path_buf(), kind: err.kind() })?;
            let name = path.file_stem().unwrap_or(path.as_os_str()).to_string_lossy().into_owned();
            // A failed source is already recorded.
            let _ = session.add(name, ByteImage::new(bytes));
        }

        if session.volumes.volumes().is_empty() {
            Err(SessionError::NoVolumes)?;
        }
        Ok(session)
    }

    /// Decodes one more volume and merges its files over the ones already loaded.
    pub fn add(&mut self, name: impl Into<String>, image: ByteImage) -> Result<(), FormatError> {
        self.volumes.add(name, image, &mut self.ctx, self.config.expand_nested_volumes())
    }

    /// The merged volumes.
    pub fn volumes(&self) -> &MultipleFv {
        &self.volumes
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Replays dispatch over the loaded files.
    ///
    /// Every call starts from scratch, so repeated calls with the same database agree.
    pub fn dispatch(&self, database: &dyn Database) -> DispatchReport {
        info!(
            "Dispatching {} files from {} volumes",
            self.volumes.files().len(),
            self.volumes.volumes().len()
        );
        DispatchEngine::new(self.volumes.files(), database, &self.config).run()
    }
}
