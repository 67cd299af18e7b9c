//! The outcome of a dispatch replay.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt;
use std::collections::{BTreeMap, BTreeSet};

use fvtrace_depex::Relation;
use fvtrace_ffs::{FfsId, FileType, OrdGuid};
use r_efi::efi;

/// The step of the boot flow a module was dispatched in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Sec,
    PeiCore,
    PeiApriori,
    Pei,
    DxeCore,
    DxeApriori,
    Dxe,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Sec => "SEC",
            Phase::PeiCore => "PEI core",
            Phase::PeiApriori => "PEI apriori",
            Phase::Pei => "PEI",
            Phase::DxeCore => "DXE core",
            Phase::DxeApriori => "DXE apriori",
            Phase::Dxe => "DXE",
        };
        f.pad(name)
    }
}

/// One entry of the simulated load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedModule {
    pub id: FfsId,
    pub name: efi::Guid,
    pub file_type: FileType,
    /// UI name, or the identity when the file has none.
    pub display_name: String,
    pub phase: Phase,
    /// Pass number within a fixpoint phase, starting at 1. Zero for core and apriori dispatch.
    pub pass: usize,
    /// For `BEFORE`/`AFTER` modules, the target and where the module was placed relative to it.
    pub placement: Option<(efi::Guid, Relation)>,
}

/// What one pass of a fixpoint phase did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRecord {
    pub phase: Phase,
    pub pass: usize,
    /// Modules dispatched by the pass, in the order they were committed.
    pub dispatched: Vec<FfsId>,
}

/// The simulated load order and everything that explains it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// The load order.
    pub ordered: Vec<DispatchedModule>,
    /// Dispatchable modules that never became satisfiable, in universe order.
    pub undispatched: Vec<FfsId>,
    /// Rendered dependency expression of every module whose depex was evaluated.
    pub depex_text: BTreeMap<FfsId, String>,
    /// PPIs installed by the end of the run.
    pub ppis: BTreeSet<OrdGuid>,
    /// Protocols installed by the end of the run.
    pub protocols: BTreeSet<OrdGuid>,
    pub passes: Vec<PassRecord>,
}

impl DispatchReport {
    /// Identities in load order.
    pub fn ordered_ids(&self) -> Vec<FfsId> {
        self.ordered.iter().map(|module| module.id).collect()
    }

    /// Position of a module in the load order.
    pub fn position(&self, id: &FfsId) -> Option<usize> {
        self.ordered.iter().position(|module| module.id == *id)
    }

    pub fn is_dispatched(&self, id: &FfsId) -> bool {
        self.position(id).is_some()
    }

    /// The passes run for one phase.
    pub fn passes_of(&self, phase: Phase) -> impl Iterator<Item = &PassRecord> + '_ {
        self.passes.iter().filter(move |record| record.phase == phase)
    }
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, module) in self.ordered.iter().enumerate() {
            write!(f, "{index:4} {:<12} {} {}", module.phase, module.file_type, module.display_name)?;
            if let Some((target, relation)) = module.placement {
                write!(f, " ({relation:?} {})", OrdGuid(target))?;
            }
            writeln!(f)?;
        }
        for id in &self.undispatched {
            match self.depex_text.get(id) {
                Some(text) => writeln!(f, "     not dispatched {id}: {text}")?,
                None => writeln!(f, "     not dispatched {id}")?,
            }
        }
        Ok(())
    }
}
