//! The fixpoint replay of the firmware dispatchers.
//!
//! Modules move one way, from undispatched to dispatched, in seven steps: the SEC core, the PEI core, the
//! PEI apriori list, repeated PEI passes, the DXE core, the DXE apriori list and repeated DXE passes. A
//! fixpoint phase ends with the first pass that dispatches nothing, or when no candidate is left.
//!
//! PEI dispatches a module as soon as its depex holds, so later modules of the same pass see its PPIs. DXE
//! collects the satisfied modules of a pass in a schedule list and commits them together at the end of
//! the pass; their protocols become visible to the next pass only. A DXE module whose depex is a
//! satisfied `BEFORE`/`AFTER` expression is spliced directly before or after its target in the load order
//! instead of being appended. When several modules of one pass target the same module, the one committed
//! last ends up adjacent to it.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use std::collections::{BTreeMap, BTreeSet};

use fvtrace_depex::{Evaluation, Relation};
use fvtrace_ffs::{Ffs, FfsDict, FfsId, FileType, OrdGuid, file::DepexKind, guid::guid_list, section::SectionType};
use log::{debug, info, warn};
use r_efi::efi;

use crate::{
    config::DispatchConfig,
    database::{CapabilityKind, Database},
    report::{DispatchReport, DispatchedModule, PassRecord, Phase},
};

/// `PEI_APRIORI_FILE_NAME_GUID`
pub const PEI_APRIORI_FILE_GUID: efi::Guid =
    efi::Guid::from_fields(0x1b45cc0a, 0x156a, 0x428a, 0xaf, 0x62, &[0x49, 0x86, 0x4d, 0xa0, 0xe6, 0xe6]);
/// `EFI_APRIORI_GUID`
pub const DXE_APRIORI_FILE_GUID: efi::Guid =
    efi::Guid::from_fields(0xfc510ee7, 0xffdc, 0x11d4, 0xbd, 0x41, &[0x00, 0x80, 0xc7, 0x3c, 0x88, 0x81]);

/// File types the dispatchers load. Everything else is data.
const DISPATCHABLE: [FileType; 6] = [
    FileType::SecCore,
    FileType::PeiCore,
    FileType::Peim,
    FileType::CombinedPeimDriver,
    FileType::DxeCore,
    FileType::Driver,
];

const PEI_CANDIDATES: [FileType; 2] = [FileType::Peim, FileType::CombinedPeimDriver];
const DXE_CANDIDATES: [FileType; 2] = [FileType::Driver, FileType::CombinedPeimDriver];

#[derive(Default)]
struct DispatchState {
    /// Files not dispatched yet, in universe order.
    undispatched: Vec<FfsId>,
    ordered: Vec<DispatchedModule>,
    ppis: BTreeSet<OrdGuid>,
    protocols: BTreeSet<OrdGuid>,
    depex_text: BTreeMap<FfsId, String>,
    passes: Vec<PassRecord>,
}

/// One replay over a fixed set of files.
pub struct DispatchEngine<'a> {
    files: &'a FfsDict,
    database: &'a dyn Database,
    config: &'a DispatchConfig,
    state: DispatchState,
}

impl<'a> DispatchEngine<'a> {
    /// Prepares a replay over `files`, in their dictionary order.
    ///
    /// The apriori files only steer dispatch and are not part of the universe.
    pub fn new(files: &'a FfsDict, database: &'a dyn Database, config: &'a DispatchConfig) -> Self {
        let is_apriori = |id: &FfsId| {
            matches!(id.guid(), Some(guid) if guid == PEI_APRIORI_FILE_GUID || guid == DXE_APRIORI_FILE_GUID)
        };
        let undispatched = files.ids().filter(|id| !is_apriori(id)).collect();
        Self { files, database, config, state: DispatchState { undispatched, ..Default::default() } }
    }

    /// Runs every phase and reports the result.
    ///
    /// The phases are not gated on their core: an image without a PEI or DXE core file still has its
    /// apriori list and fixpoint passes replayed for that phase.
    pub fn run(mut self) -> DispatchReport {
        self.dispatch_cores(FileType::SecCore, Phase::Sec);
        self.dispatch_cores(FileType::PeiCore, Phase::PeiCore);
        self.dispatch_apriori(PEI_APRIORI_FILE_GUID, Phase::PeiApriori);
        self.fixpoint(Phase::Pei, &PEI_CANDIDATES);
        self.dispatch_cores(FileType::DxeCore, Phase::DxeCore);
        self.dispatch_apriori(DXE_APRIORI_FILE_GUID, Phase::DxeApriori);
        self.fixpoint(Phase::Dxe, &DXE_CANDIDATES);
        self.into_report()
    }

    fn candidates(&self, file_types: &[FileType]) -> Vec<FfsId> {
        let files = self.files;
        self.state
            .undispatched
            .iter()
            .copied()
            .filter(|id| files.get(id).is_some_and(|file| file_types.contains(&file.file_type())))
            .collect()
    }

    /// Removes `id` from the undispatched list.
    fn take(&mut self, id: FfsId) -> Option<&'a Ffs> {
        let files: &'a FfsDict = self.files;
        let index = self.state.undispatched.iter().position(|entry| *entry == id)?;
        self.state.undispatched.remove(index);
        files.get(&id)
    }

    /// Adds a taken module to the load order and installs what it produces.
    fn commit(&mut self, file: &Ffs, phase: Phase, pass: usize, placement: Option<(efi::Guid, Relation)>) {
        let ordered = &self.state.ordered;
        let index = match placement {
            Some((target, relation)) => match ordered.iter().position(|module| module.name == target) {
                Some(position) if relation == Relation::Before => position,
                Some(position) => position + 1,
                None => ordered.len(),
            },
            None => ordered.len(),
        };

        let module = DispatchedModule {
            id: file.id(),
            name: file.name(),
            file_type: file.file_type(),
            display_name: file.display_name(),
            phase,
            pass,
            placement,
        };
        match placement {
            Some((target, relation)) => {
                info!("{phase}: dispatched {} ({relation:?} {}) at {index}", module.display_name, OrdGuid(target))
            }
            None => info!("{phase}: dispatched {}", module.display_name),
        }
        self.state.ordered.insert(index, module);

        for capability in self.database.produced(&file.name()) {
            let installed = match capability.kind {
                CapabilityKind::Ppi => &mut self.state.ppis,
                CapabilityKind::Protocol => &mut self.state.protocols,
            };
            if installed.insert(OrdGuid(capability.guid)) {
                debug!("{} installs {:?} {}", file.display_name(), capability.kind, OrdGuid(capability.guid));
            }
        }
    }

    fn dispatch_cores(&mut self, file_type: FileType, phase: Phase) {
        for id in self.candidates(&[file_type]) {
            if let Some(file) = self.take(id) {
                self.commit(file, phase, 0, None);
            }
        }
    }

    /// Dispatches the modules listed by an apriori file, in list order and without depex checks.
    fn dispatch_apriori(&mut self, apriori: efi::Guid, phase: Phase) {
        let files: &'a FfsDict = self.files;
        let Some(file) = files.get(&FfsId::from(apriori)) else {
            return;
        };
        // The list is the content of the file's RAW section.
        let Some(list) = file.raw_section_content() else {
            warn!("{phase}: apriori file has no RAW section");
            return;
        };
        let raw_sections =
            file.sections().top_level().filter(|(_, node)| node.section_type() == SectionType::Raw).count();
        if raw_sections > 1 {
            warn!("{phase}: apriori file has {raw_sections} RAW sections, only the first is used");
        }

        for guid in guid_list(list.as_slice()) {
            match self.take(FfsId::from(guid)) {
                Some(module) => self.commit(module, phase, 0, None),
                None => warn!("{phase}: apriori entry {} is missing or already dispatched", OrdGuid(guid)),
            }
        }
    }

    /// Evaluates the depex of `kind` if the file has one, recording its text the first time.
    fn evaluate(&mut self, file: &Ffs, kind: DepexKind) -> Option<Evaluation> {
        let depex = file.depex(kind)?;
        let available = match kind {
            DepexKind::Pei => &self.state.ppis,
            _ => &self.state.protocols,
        };
        let ordered = &self.state.ordered;
        let evaluation = depex.evaluate(
            |guid| available.contains(&OrdGuid(*guid)),
            |guid| ordered.iter().any(|module| module.name == *guid),
        );
        debug!("{}: {} => {}", file.display_name(), evaluation.text, evaluation.satisfiable);
        self.state.depex_text.entry(file.id()).or_insert_with(|| evaluation.text.clone());
        Some(evaluation)
    }

    fn fixpoint(&mut self, phase: Phase, file_types: &[FileType]) {
        let mut pass = 0;
        loop {
            let candidates = self.candidates(file_types);
            if candidates.is_empty() {
                break;
            }
            if pass == self.config.max_passes() {
                warn!("{phase}: pass limit {pass} reached with {} candidates left", candidates.len());
                break;
            }
            pass += 1;

            let dispatched = match phase {
                Phase::Pei => self.pei_pass(&candidates, pass),
                _ => self.dxe_pass(&candidates, pass),
            };
            info!("{phase} pass {pass}: dispatched {} of {} candidates", dispatched.len(), candidates.len());

            let progress = !dispatched.is_empty();
            self.state.passes.push(PassRecord { phase, pass, dispatched });
            if !progress {
                break;
            }
        }
    }

    /// A PEIM runs as soon as its depex holds. Missing depex means no dependencies; a `BEFORE`/`AFTER`
    /// directive is not honoured and the module is appended.
    fn pei_pass(&mut self, candidates: &[FfsId], pass: usize) -> Vec<FfsId> {
        let files: &'a FfsDict = self.files;
        let mut dispatched = Vec::new();
        for id in candidates {
            let Some(file) = files.get(id) else { continue };
            let satisfiable = self.evaluate(file, DepexKind::Pei).map_or(true, |evaluation| evaluation.satisfiable);
            if satisfiable {
                self.take(*id);
                self.commit(file, Phase::Pei, pass, None);
                dispatched.push(*id);
            }
        }
        dispatched
    }

    /// Collects the satisfied drivers of the pass in a schedule list, then commits it in order.
    ///
    /// A driver without a depex section waits for every architectural protocol.
    fn dxe_pass(&mut self, candidates: &[FfsId], pass: usize) -> Vec<FfsId> {
        let files: &'a FfsDict = self.files;
        let protocols = &self.state.protocols;
        let arch_ready = self.config.arch_protocols().iter().all(|guid| protocols.contains(&OrdGuid(*guid)));

        let mut schedule: Vec<(&Ffs, Option<(efi::Guid, Relation)>)> = Vec::new();
        for id in candidates {
            let Some(file) = files.get(id) else { continue };
            let (satisfiable, directive) = match self.evaluate(file, DepexKind::Dxe) {
                Some(evaluation) => (evaluation.satisfiable, evaluation.directive),
                None => (arch_ready, None),
            };
            if satisfiable {
                schedule.push((file, directive));
            }
        }

        let mut dispatched = Vec::new();
        for (file, placement) in schedule {
            self.take(file.id());
            self.commit(file, Phase::Dxe, pass, placement);
            dispatched.push(file.id());
        }
        dispatched
    }

    fn into_report(self) -> DispatchReport {
        let files = self.files;
        let undispatched: Vec<FfsId> = self
            .state
            .undispatched
            .into_iter()
            .filter(|id| files.get(id).is_some_and(|file| DISPATCHABLE.contains(&file.file_type())))
            .collect();
        info!("Dispatch complete: {} dispatched, {} not dispatched", self.state.ordered.len(), undispatched.len());

        DispatchReport {
            ordered: self.state.ordered,
            undispatched,
            depex_text: self.state.depex_text,
            ppis: self.state.ppis,
            protocols: self.state.protocols,
            passes: self.state.passes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Capability, MockDatabase, StaticDatabase};
    use fvtrace_ffs::{
        ByteImage, MultipleFv, NullDecompressor, ParseContext,
        builder::{FileBuilder, SectionBuilder, VolumeBuilder},
    };

    fn guid(n: u8) -> efi::Guid {
        efi::Guid::from_fields(0x6000_0000 + n as u32, 0, 0, 0, 0, &[0, 0, 0, 0, 0, n])
    }

    fn push(targets: &[u8]) -> Vec<u8> {
        let mut depex = Vec::new();
        for (index, target) in targets.iter().enumerate() {
            depex.push(0x02);
            depex.extend_from_slice(guid(*target).as_bytes());
            if index > 0 {
                depex.push(0x03);
            }
        }
        depex.push(0x08);
        depex
    }

    fn files(builder: VolumeBuilder) -> FfsDict {
        let mut ctx = ParseContext::new(&NullDecompressor);
        MultipleFv::load([("test", ByteImage::new(builder.build()))], &mut ctx, false).files().clone()
    }

    #[test]
    fn peims_should_see_ppis_installed_earlier_in_the_pass() {
        let files = files(
            VolumeBuilder::new()
                .with_file(FileBuilder::new(guid(1), FileType::PeiCore))
                .with_file(FileBuilder::new(guid(2), FileType::Peim).with_sections(&[SectionBuilder::pei_depex(&push(&[20]))]))
                .with_file(FileBuilder::new(guid(3), FileType::Peim).with_sections(&[SectionBuilder::pei_depex(&push(&[30]))]))
                .with_file(FileBuilder::new(guid(4), FileType::Peim)),
        );
        let database = StaticDatabase::new()
            .with_module(guid(1), [Capability::ppi(guid(30))])
            .with_module(guid(3), [Capability::ppi(guid(20))]);
        let config = DispatchConfig::default();
        let report = DispatchEngine::new(&files, &database, &config).run();

        // 2 needs the PPI that 3 installs later in the same pass, so it waits for pass 2.
        let ids: Vec<FfsId> = [1, 3, 4, 2].iter().map(|n| FfsId::from(guid(*n))).collect();
        assert_eq!(report.ordered_ids(), ids);
        assert_eq!(report.ordered[1].pass, 1);
        assert_eq!(report.ordered[3].pass, 2);
        assert_eq!(report.passes_of(Phase::Pei).count(), 2);
        assert!(report.undispatched.is_empty());
        assert!(report.ppis.contains(&OrdGuid(guid(20))));
    }

    #[test]
    fn drivers_without_depex_should_wait_for_arch_protocols() {
        let files = files(
            VolumeBuilder::new()
                .with_file(FileBuilder::new(guid(1), FileType::DxeCore))
                .with_file(FileBuilder::new(guid(2), FileType::Driver))
                .with_file(FileBuilder::new(guid(3), FileType::Driver).with_sections(&[SectionBuilder::dxe_depex(&[0x06, 0x08])])),
        );
        let config = DispatchConfig::default().with_arch_protocols([guid(50), guid(51)]);

        let database = StaticDatabase::new().with_module(guid(3), [Capability::protocol(guid(50))]);
        let report = DispatchEngine::new(&files, &database, &config).run();
        assert_eq!(report.undispatched, [FfsId::from(guid(2))]);

        let database = database.with_module(guid(1), [Capability::protocol(guid(51))]);
        let report = DispatchEngine::new(&files, &database, &config).run();
        assert_eq!(report.ordered_ids(), [FfsId::from(guid(1)), FfsId::from(guid(3)), FfsId::from(guid(2))]);
        assert_eq!(report.ordered[2].pass, 2);
        assert!(!report.depex_text.contains_key(&FfsId::from(guid(2))));
        assert_eq!(report.depex_text.get(&FfsId::from(guid(3))).map(String::as_str), Some("TRUE"));
    }

    #[test]
    fn database_should_be_queried_once_per_dispatched_module() {
        let files = files(
            VolumeBuilder::new()
                .with_file(FileBuilder::new(guid(1), FileType::SecCore))
                .with_file(FileBuilder::new(guid(2), FileType::PeiCore))
                .with_file(FileBuilder::new(guid(3), FileType::Peim).with_sections(&[SectionBuilder::pei_depex(&push(&[9]))]))
                .with_file(FileBuilder::new(guid(4), FileType::Freeform)),
        );
        let mut database = MockDatabase::new();
        database.expect_produced().withf(|module| *module == guid(1)).times(1).returning(|_| Vec::new());
        database.expect_produced().withf(|module| *module == guid(2)).times(1).returning(|_| vec![Capability::ppi(guid(9))]);
        database.expect_produced().withf(|module| *module == guid(3)).times(1).returning(|_| Vec::new());

        let config = DispatchConfig::default();
        let report = DispatchEngine::new(&files, &database, &config).run();
        assert_eq!(report.ordered.iter().map(|module| module.phase).collect::<Vec<_>>(), [Phase::Sec, Phase::PeiCore, Phase::Pei]);
        // Freeform files are data, never reported as undispatched.
        assert!(report.undispatched.is_empty());
    }

    #[test]
    fn pass_limit_should_stop_a_phase() {
        let mut builder = VolumeBuilder::new();
        // Each PEIM depends on a PPI of the next one, so one module per pass from the end.
        for n in 1..=5u8 {
            let depex = if n == 5 { vec![0x06, 0x08] } else { push(&[100 + n + 1]) };
            builder = builder.with_file(FileBuilder::new(guid(n), FileType::Peim).with_sections(&[SectionBuilder::pei_depex(&depex)]));
        }
        let files = files(builder);
        let mut database = StaticDatabase::new();
        for n in 1..=5u8 {
            database.insert(guid(n), Capability::ppi(guid(100 + n)));
        }

        let config = DispatchConfig::default().with_max_passes(3);
        let report = DispatchEngine::new(&files, &database, &config).run();
        assert_eq!(report.passes_of(Phase::Pei).count(), 3);
        assert_eq!(report.ordered_ids(), [FfsId::from(guid(5)), FfsId::from(guid(4)), FfsId::from(guid(3))]);
        assert_eq!(report.undispatched, [FfsId::from(guid(1)), FfsId::from(guid(2))]);
    }
}
