//! Offline replay of the firmware module dispatchers.
//!
//! Given the firmware volumes of a flash image and a [`Database`] describing what each module installs,
//! this crate reproduces the order in which the SEC, PEI and DXE dispatchers would load the modules, and
//! lists the modules that would never load.
//!
//! ```no_run
//! use fvtrace_dispatcher::{DispatchConfig, Session, StaticDatabase};
//! use fvtrace_ffs::NullDecompressor;
//!
//! let session = Session::load_files(["FVMAIN.fv"], &NullDecompressor, DispatchConfig::default()).unwrap();
//! let report = session.dispatch(&StaticDatabase::new());
//! println!("{report}");
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
pub mod config;
pub mod database;
pub mod engine;
pub mod report;
pub mod session;

pub use config::{ConfigError, DispatchConfig};
pub use database::{Capability, CapabilityKind, Database, StaticDatabase};
#[cfg(any(test, feature = "mockall"))]
pub use database::MockDatabase;
pub use engine::DispatchEngine;
pub use report::{DispatchReport, DispatchedModule, PassRecord, Phase};
pub use session::{Session, SessionError};
