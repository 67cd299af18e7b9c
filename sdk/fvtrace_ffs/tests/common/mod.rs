//! Shared helpers for the integration tests.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![allow(dead_code)]

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
    efi::Guid::from_fields(0x3000_0000 + n as u32, 0x0F0F, 0x1234, 0xA0, n, &[0xDE, 0xAD, 0xBE, 0xEF, 0x00, n])
}
