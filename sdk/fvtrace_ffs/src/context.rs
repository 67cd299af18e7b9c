//! Per-session parse state.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::Decompressor;

/// Default bound on nested encapsulations and nested firmware volumes.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// State threaded through one parse of one or more firmware volumes.
///
/// Pad files all share the same name, so each one receives a serial from this context instead. Keeping the
/// counter here rather than in a global lets independent sessions run side by side.
pub struct ParseContext<'a> {
    decompressor: &'a dyn Decompressor,
    max_depth: usize,
    next_pad_serial: u32,
}

impl<'a> ParseContext<'a> {
    /// Creates a context that expands encapsulations with `decompressor`.
    pub fn new(decompressor: &'a dyn Decompressor) -> Self {
        Self { decompressor, max_depth: DEFAULT_MAX_DEPTH, next_pad_serial: 0 }
    }

    /// Sets the nesting bound.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// The configured decompressor.
    pub fn decompressor(&self) -> &'a dyn Decompressor {
        self.decompressor
    }

    /// The nesting bound.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Hands out the next pad serial.
    pub fn next_pad_serial(&mut self) -> u32 {
        let serial = self.next_pad_serial;
        self.next_pad_serial = self.next_pad_serial.wrapping_add(1);
        serial
    }
}
