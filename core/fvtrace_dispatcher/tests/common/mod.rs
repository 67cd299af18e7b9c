//! Shared helpers for the integration tests.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![allow(dead_code)]

use fvtrace_ffs::{
    FfsId, FileType,
    builder::{FileBuilder, SectionBuilder},
};
use log::{Level, LevelFilter, Metadata, Record};
use r_efi::efi;

// Sample logger for log crate to dump stuff in tests
struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("{}", record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: SimpleLogger = SimpleLogger;

pub fn set_logger() {
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Info));
}

/// A distinct, recognizable GUID per `n`.
pub fn guid(n: u8) -> efi::Guid {
    efi::Guid::from_fields(0x8000_0000 + n as u32, 0xD15B, 0x0001, 0x80, n, &[0xCA, 0xFE, 0x00, 0x00, 0x00, n])
}

pub fn id(n: u8) -> FfsId {
    FfsId::from(guid(n))
}

pub fn ids(ns: &[u8]) -> Vec<FfsId> {
    ns.iter().map(|n| id(*n)).collect()
}

/// `PUSH` every operand and `AND` them together.
pub fn requires(operands: &[u8]) -> Vec<u8> {
    let mut depex = Vec::new();
    for (index, operand) in operands.iter().enumerate() {
        depex.push(0x02);
        depex.extend_from_slice(guid(*operand).as_bytes());
        if index > 0 {
            depex.push(0x03);
        }
    }
    depex.push(0x08);
    depex
}

pub fn before(target: u8) -> Vec<u8> {
    let mut depex = vec![0x00];
    depex.extend_from_slice(guid(target).as_bytes());
    depex.push(0x08);
    depex
}

pub fn after(target: u8) -> Vec<u8> {
    let mut depex = vec![0x01];
    depex.extend_from_slice(guid(target).as_bytes());
    depex.push(0x08);
    depex
}

pub fn module(n: u8, file_type: FileType) -> FileBuilder {
    FileBuilder::new(guid(n), file_type)
}

pub fn peim(n: u8, depex: &[u8]) -> FileBuilder {
    module(n, FileType::Peim).with_sections(&[SectionBuilder::pei_depex(depex), SectionBuilder::leaf(0x10, &[0x4D, 0x5A])])
}

pub fn driver(n: u8, depex: &[u8]) -> FileBuilder {
    module(n, FileType::Driver).with_sections(&[SectionBuilder::dxe_depex(depex), SectionBuilder::leaf(0x10, &[0x4D, 0x5A])])
}

/// An apriori file listing `entries`.
pub fn apriori(name: efi::Guid, entries: &[u8]) -> FileBuilder {
    let list: Vec<u8> = entries.iter().flat_map(|n| *guid(*n).as_bytes()).collect();
    FileBuilder::new(name, FileType::Freeform).with_sections(&[SectionBuilder::raw(&list)])
}
