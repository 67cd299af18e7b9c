//! UEFI Dependency Expression (DEPEX) support
//!
//! This crate provides a decoder and evaluator for UEFI dependency expressions as found in the
//! PEI, DXE and MM depex sections of firmware files.
//!
//! Unlike a runtime dispatcher, evaluation here never consults a live protocol database. The caller
//! supplies two oracles: one answering whether a capability GUID is available, and one answering
//! whether a module GUID has already been dispatched (used by `BEFORE`/`AFTER` expressions).
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{format, string::String, vec::Vec};
use core::{fmt, mem};
use r_efi::efi;
use uuid::Uuid;

/// The size of a GUID in bytes
const GUID_SIZE: usize = mem::size_of::<r_efi::efi::Guid>();

/// The initial size of the dependency expression stack
const DEPEX_STACK_SIZE_INCREMENT: usize = 0x100;

/// A UEFI dependency expression (DEPEX) opcode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    /// If present, this must be the first and only opcode,
    /// may be used by DXE and SMM drivers.
    Before(Uuid),
    /// If present, this must be the first and only opcode,
    /// may be used by DXE and SMM drivers.
    After(Uuid),
    /// A Push opcode is followed by a GUID.
    Push(Uuid),
    /// A logical AND operation of the two operands on the top
    /// of the stack.
    And,
    /// A logical OR operation of the two operands on the top
    /// of the stack.
    Or,
    /// A logical NOT operation of the operand on the top of
    /// the stack.
    Not,
    /// Pushes a true value onto the stack.
    True,
    /// Pushes a false value onto the stack.
    False,
    /// The End opcode is the last opcode in the expression.
    End,
    /// If present, this must be the first opcode in the expression.
    /// Used to schedule on request.
    Sor,
    /// An unrecognized opcode value. Decoding stops here.
    Unknown(u8),
    /// A known opcode with an unexpected payload length.
    Malformed {
        /// The unhandled opcode value.
        opcode: u8,
        /// The length of the payload sent with the opcode.
        len: usize,
    },
}

/// Converts a UUID to an EFI GUID.
fn guid_from_uuid(uuid: &Uuid) -> efi::Guid {
    efi::Guid::from_bytes(&uuid.to_bytes_le())
}

/// Converts a byte slice to a GUID.
fn uuid_from_slice(slice: Option<&[u8]>) -> Option<Uuid> {
    Uuid::from_slice_le(slice?).ok()
}

impl<'a> From<&'a [u8]> for Opcode {
    /// Creates an Opcode from a byte slice.
    fn from(bytes: &'a [u8]) -> Self {
        let Some(&opcode) = bytes.first() else {
            return Opcode::Malformed { opcode: 0, len: 0 };
        };
        match opcode {
            0x00 => match uuid_from_slice(bytes.get(1..GUID_SIZE + 1)) {
                Some(uuid) => Opcode::Before(uuid),
                None => Opcode::Malformed { opcode: 0x00, len: bytes.len() - 1 },
            },
            0x01 => match uuid_from_slice(bytes.get(1..GUID_SIZE + 1)) {
                Some(uuid) => Opcode::After(uuid),
                None => Opcode::Malformed { opcode: 0x01, len: bytes.len() - 1 },
            },
            0x02 => match uuid_from_slice(bytes.get(1..GUID_SIZE + 1)) {
                Some(uuid) => Opcode::Push(uuid),
                None => Opcode::Malformed { opcode: 0x02, len: bytes.len() - 1 },
            },
            0x03 => Opcode::And,
            0x04 => Opcode::Or,
            0x05 => Opcode::Not,
            0x06 => Opcode::True,
            0x07 => Opcode::False,
            0x08 => Opcode::End,
            0x09 => Opcode::Sor,
            other => Opcode::Unknown(other),
        }
    }
}

impl Opcode {
    fn byte_size(&self) -> usize {
        match *self {
            Opcode::Before(_) | Opcode::After(_) | Opcode::Push(_) => 1 + GUID_SIZE,
            Opcode::Malformed { len, .. } => 1 + len,
            _ => 1,
        }
    }

    /// Whether decoding stops after this opcode.
    fn terminates(&self) -> bool {
        matches!(self, Opcode::End | Opcode::Unknown(_) | Opcode::Malformed { .. })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Before(uuid) => write!(f, "BEFORE {uuid:X}"),
            Opcode::After(uuid) => write!(f, "AFTER {uuid:X}"),
            Opcode::Push(uuid) => write!(f, "PUSH {uuid:X}"),
            Opcode::And => f.write_str("AND"),
            Opcode::Or => f.write_str("OR"),
            Opcode::Not => f.write_str("NOT"),
            Opcode::True => f.write_str("TRUE"),
            Opcode::False => f.write_str("FALSE"),
            Opcode::End => f.write_str("END"),
            Opcode::Sor => f.write_str("SOR"),
            Opcode::Unknown(value) => write!(f, "<unknown opcode {value:#04x}>"),
            Opcode::Malformed { opcode, len } => write!(f, "<malformed opcode {opcode:#04x}, {len} byte payload>"),
        }
    }
}

/// Represents an associated dependency, where one guid must execute before or after another guid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociatedDependency {
    /// Indicates that the associated guid must be executed before the guid in the enum.
    Before(efi::Guid),
    /// Indicates that the associated guid must be executed after the guid in the enum.
    After(efi::Guid),
}

/// Placement of a module relative to the target of a `BEFORE`/`AFTER` expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Place immediately before the target.
    Before,
    /// Place immediately after the target.
    After,
}

/// The outcome of evaluating a [`Depex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Whether the expression is satisfied by the supplied oracles.
    pub satisfiable: bool,
    /// Human readable infix rendering of the expression.
    pub text: String,
    /// For a satisfied `BEFORE`/`AFTER` expression, the target module and the requested placement.
    pub directive: Option<(efi::Guid, Relation)>,
}

/// A UEFI dependency expression (DEPEX)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Depex {
    expression: Vec<Opcode>,
    trailing: usize,
}

impl From<&[u8]> for Depex {
    fn from(value: &[u8]) -> Self {
        let mut depex_parser = DepexParser::new(value);
        let expression = depex_parser.by_ref().collect();
        Self { expression, trailing: value.len().saturating_sub(depex_parser.index) }
    }
}

impl From<Vec<u8>> for Depex {
    fn from(value: Vec<u8>) -> Self {
        Self::from(value.as_slice())
    }
}

impl From<&[Opcode]> for Depex {
    fn from(value: &[Opcode]) -> Self {
        Self { expression: value.to_vec(), trailing: 0 }
    }
}

impl Depex {
    /// The decoded opcodes, up to and including the first `END` (or the first undecodable opcode).
    pub fn opcodes(&self) -> &[Opcode] {
        &self.expression
    }

    /// Number of bytes found after the terminating opcode.
    pub fn trailing_bytes(&self) -> usize {
        self.trailing
    }

    /// Evaluates a DEPEX expression against a flat list of available capabilities.
    ///
    /// `BEFORE`/`AFTER` expressions never evaluate true through this entry point since no module is
    /// considered dispatched.
    pub fn eval(&self, protocols: &[efi::Guid]) -> bool {
        self.evaluate(|guid| protocols.contains(guid), |_| false).satisfiable
    }

    /// Evaluates the expression.
    ///
    /// `available` answers whether a `PUSH` operand is installed; `dispatched` answers whether the
    /// target of a `BEFORE`/`AFTER` expression has already been dispatched. Malformed expressions
    /// evaluate as unsatisfiable.
    pub fn evaluate<A, D>(&self, available: A, dispatched: D) -> Evaluation
    where
        A: Fn(&efi::Guid) -> bool,
        D: Fn(&efi::Guid) -> bool,
    {
        let text = self.text();
        let (satisfiable, directive) = self.run(&available, &dispatched);
        Evaluation { satisfiable, text, directive }
    }

    fn run<A, D>(&self, available: &A, dispatched: &D) -> (bool, Option<(efi::Guid, Relation)>)
    where
        A: Fn(&efi::Guid) -> bool,
        D: Fn(&efi::Guid) -> bool,
    {
        log::trace!("Depex:");
        if let Some(association) = self.is_associated() {
            if self.expression.len() != 2 || self.expression[1] != Opcode::End || self.trailing != 0 {
                log::warn!("Invalid BEFORE or AFTER with additional opcodes {:x?}.", self.expression);
                return (false, None);
            }
            let (target, relation) = match association {
                AssociatedDependency::Before(guid) => (guid, Relation::Before),
                AssociatedDependency::After(guid) => (guid, Relation::After),
            };
            let satisfied = dispatched(&target);
            log::trace!("  {:x?} => target dispatched: {satisfied:?}", self.expression[0]);
            return if satisfied { (true, Some((target, relation))) } else { (false, None) };
        }

        let start = if self.is_sor() { 1 } else { 0 };
        let mut stack: Vec<bool> = Vec::with_capacity(DEPEX_STACK_SIZE_INCREMENT);
        for (index, opcode) in self.expression.iter().enumerate().skip(start) {
            match opcode {
                Opcode::Before(_) | Opcode::After(_) => {
                    log::warn!("Invalid BEFORE or AFTER not at start of depex {:x?}", self.expression);
                    return (false, None);
                }
                Opcode::Sor => {
                    log::warn!("Invalid SOR not at start of depex.");
                    return (false, None);
                }
                Opcode::Push(uuid) => {
                    stack.push(available(&guid_from_uuid(uuid)));
                    log::trace!(
                        "  {opcode:x?} => {:?}, stack ->{:?}",
                        stack.last(),
                        stack.iter().rev().collect::<Vec<_>>()
                    );
                }
                Opcode::And | Opcode::Or => {
                    let (Some(operator1), Some(operator2)) = (stack.pop(), stack.pop()) else {
                        log::warn!("Depex stack underflow at {opcode:x?}.");
                        return (false, None);
                    };
                    stack.push(if *opcode == Opcode::And { operator1 && operator2 } else { operator1 || operator2 });
                    log::trace!(
                        "  {opcode:x?}({operator1:?},{operator2:?}) => {:?}, stack ->{:?}",
                        stack.last(),
                        stack.iter().rev().collect::<Vec<_>>()
                    );
                }
                Opcode::Not => {
                    let Some(operator) = stack.pop() else {
                        log::warn!("Depex stack underflow at {opcode:x?}.");
                        return (false, None);
                    };
                    stack.push(!operator);
                    log::trace!("  {opcode:x?}({operator:?}) => {:?}", stack.last());
                }
                Opcode::True => stack.push(true),
                Opcode::False => stack.push(false),
                Opcode::End => {
                    if index + 1 != self.expression.len() || self.trailing != 0 {
                        log::warn!("Depex has {} byte(s) after END.", self.trailing);
                        return (false, None);
                    }
                    let result = stack.pop();
                    if !stack.is_empty() {
                        log::warn!("Depex left {} unused value(s) on the stack.", stack.len());
                        return (false, None);
                    }
                    log::trace!("  {opcode:x?} => final result: {result:?}");
                    return (result.unwrap_or(false), None);
                }
                Opcode::Unknown(value) => {
                    log::warn!("Exiting early due to an unknown opcode {value:#x}.");
                    return (false, None);
                }
                Opcode::Malformed { opcode, len } => {
                    log::warn!("Opcode [0x{opcode:x?}] expects a guid, only has a length of: {len}");
                    return (false, None);
                }
            }
        }
        log::warn!("Depex is missing END.");
        (false, None)
    }

    /// Renders the expression in infix form, e.g. `(A AND NOT B)`.
    ///
    /// Operands are shown as registry-format GUID strings. Opcodes that cannot be placed in the
    /// expression tree (stack underflow, undecodable bytes) are appended verbatim.
    pub fn text(&self) -> String {
        let mut stack: Vec<String> = Vec::new();
        let mut leftovers: Vec<String> = Vec::new();
        for opcode in &self.expression {
            match opcode {
                Opcode::Push(uuid) => stack.push(format!("{uuid:X}")),
                Opcode::True => stack.push(String::from("TRUE")),
                Opcode::False => stack.push(String::from("FALSE")),
                Opcode::And | Opcode::Or => match (stack.pop(), stack.pop()) {
                    (Some(rhs), Some(lhs)) => stack.push(format!("({lhs} {opcode} {rhs})")),
                    (Some(rhs), None) => leftovers.push(format!("{opcode} {rhs}")),
                    _ => leftovers.push(format!("{opcode}")),
                },
                Opcode::Not => match stack.pop() {
                    Some(operand) => stack.push(format!("NOT {operand}")),
                    None => leftovers.push(String::from("NOT")),
                },
                Opcode::End => (),
                Opcode::Before(_) | Opcode::After(_) | Opcode::Sor => leftovers.push(format!("{opcode}")),
                Opcode::Unknown(_) | Opcode::Malformed { .. } => stack.push(format!("{opcode}")),
            }
        }
        leftovers.extend(stack);
        leftovers.join(" ")
    }

    /// If the depex expression is an associated dependency, it returns the associated dependency.
    pub fn is_associated(&self) -> Option<AssociatedDependency> {
        match self.expression.first() {
            Some(Opcode::Before(uid)) => Some(AssociatedDependency::Before(guid_from_uuid(uid))),
            Some(Opcode::After(uid)) => Some(AssociatedDependency::After(guid_from_uuid(uid))),
            _ => None,
        }
    }

    /// indicates that this is a "schedule on request" depex.
    pub fn is_sor(&self) -> bool {
        self.expression.first() == Some(&Opcode::Sor)
    }
}

impl fmt::Display for Depex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

struct DepexParser<'a> {
    expression: &'a [u8],
    index: usize,
    done: bool,
}

impl<'a> DepexParser<'a> {
    fn new(expression: &'a [u8]) -> Self {
        Self { expression, index: 0, done: false }
    }
}

impl Iterator for DepexParser<'_> {
    type Item = Opcode;

    /// Iterates over the DEPEX expression, returning the next Opcode.
    fn next(&mut self) -> Option<Opcode> {
        if self.done || self.index >= self.expression.len() {
            return None;
        }

        let opcode = Opcode::from(&self.expression[self.index..]);
        self.index += opcode.byte_size();
        self.done = opcode.terminates();
        Some(opcode)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use alloc::vec;
    use core::str::FromStr;
    use r_efi::efi;
    use std::println;
    use uuid::Uuid;

    use super::*;

    const TARGET: &str = "76b6bdfa-2acd-4462-9e3f-cb58c969d937";

    fn guid(text: &str) -> efi::Guid {
        guid_from_uuid(&Uuid::from_str(text).unwrap())
    }

    fn push(text: &str) -> Vec<u8> {
        let mut bytes = vec![0x02];
        bytes.extend_from_slice(guid(text).as_bytes());
        bytes
    }

    #[test]
    fn malformed_opcodes_should_generate_correct_malformed_opcode_enum_variant() {
        // Verify "Before" opcode with no GUID
        assert_eq!(Opcode::from([0x00u8].as_slice()), Opcode::Malformed { opcode: 0x00, len: 0 });
        assert_eq!(
            Opcode::from([0x00u8, 0x01u8, 0x02u8, 0x03u8].as_slice()),
            Opcode::Malformed { opcode: 0x00, len: 3 }
        );

        // Verify "After" opcode with no GUID
        assert_eq!(Opcode::from([0x01u8].as_slice()), Opcode::Malformed { opcode: 0x01, len: 0 });

        // Verify "Push" opcode with no GUID
        assert_eq!(
            Opcode::from([0x02u8, 0x01u8, 0x02u8, 0x03u8].as_slice()),
            Opcode::Malformed { opcode: 0x02, len: 3 }
        );
    }

    #[test]
    fn true_should_eval_true() {
        let depex = Depex::from(vec![0x06, 0x08]);
        assert!(depex.eval(&[]));
    }

    #[test]
    fn false_should_eval_false() {
        let depex = Depex::from(vec![0x07, 0x08]);
        assert!(!depex.eval(&[]));
    }

    #[test]
    fn push_should_follow_availability() {
        let a = "0379be4e-d706-437d-b037-edb82fb772a4";
        let mut bytes = push(a);
        bytes.push(0x08);
        let depex = Depex::from(bytes);

        assert!(depex.eval(&[guid(a)]));
        assert!(!depex.eval(&[]));
    }

    #[test]
    fn push_push_and_should_require_both() {
        let a = "0379be4e-d706-437d-b037-edb82fb772a4";
        let b = "0fd96974-23aa-4cdc-b9cb-98d17750322a";
        let mut bytes = push(a);
        bytes.extend(push(b));
        bytes.extend([0x03, 0x08]);
        let depex = Depex::from(bytes);

        assert!(depex.eval(&[guid(a), guid(b)]));
        assert!(!depex.eval(&[guid(a)]));
        assert!(!depex.eval(&[guid(b)]));
        assert_eq!(depex.text(), "(0379BE4E-D706-437D-B037-EDB82FB772A4 AND 0FD96974-23AA-4CDC-B9CB-98D17750322A)");
    }

    /// The GUID scheme the workspace's synthetic images use for modules and capabilities.
    fn platform_guid(n: u8) -> efi::Guid {
        efi::Guid::from_fields(0x8000_0000 + n as u32, 0xD15B, 0x0001, 0x80, n, &[0xCA, 0xFE, 0x00, 0x00, 0x00, n])
    }

    fn push_platform(n: u8) -> Vec<u8> {
        let mut bytes = vec![0x02];
        bytes.extend_from_slice(platform_guid(n).as_bytes());
        bytes
    }

    #[test]
    fn sor_or_not_expression_should_evaluate_platform_capabilities() {
        // SOR (A OR B) AND NOT C
        let mut bytes = vec![0x09];
        bytes.extend(push_platform(0x90));
        bytes.extend(push_platform(0x91));
        bytes.push(0x04);
        bytes.extend(push_platform(0xA0));
        bytes.extend([0x05, 0x03, 0x08]);
        let depex = Depex::from(bytes);
        assert!(depex.is_sor());
        assert_eq!(depex.trailing_bytes(), 0);

        let installed = |set: &'static [u8]| move |g: &efi::Guid| set.iter().any(|n| platform_guid(*n) == *g);
        assert!(depex.evaluate(installed(&[0x91]), |_| false).satisfiable);
        assert!(depex.evaluate(installed(&[0x90, 0x91]), |_| false).satisfiable);
        assert!(!depex.evaluate(installed(&[0x90, 0xA0]), |_| false).satisfiable);
        assert!(!depex.evaluate(installed(&[]), |_| false).satisfiable);
        assert_eq!(
            depex.text(),
            "SOR ((80000090-D15B-0001-8090-CAFE00000090 OR 80000091-D15B-0001-8091-CAFE00000091) AND \
             NOT 800000A0-D15B-0001-80A0-CAFE000000A0)"
        );
    }

    #[test]
    fn before_should_be_unsatisfiable_until_target_dispatched() {
        let depex = Depex::from(vec![
            0x00, 0xFA, 0xBD, 0xB6, 0x76, 0xCD, 0x2A, 0x62, 0x44, 0x9E, 0x3F, 0xCB, 0x58, 0xC9, 0x69, 0xD9, 0x37, 0x08,
        ]);
        let target = guid(TARGET);

        let evaluation = depex.evaluate(|_| true, |_| false);
        assert!(!evaluation.satisfiable);
        assert_eq!(evaluation.directive, None);

        let evaluation = depex.evaluate(|_| false, |g| *g == target);
        assert!(evaluation.satisfiable);
        assert_eq!(evaluation.directive, Some((target, Relation::Before)));
        assert_eq!(evaluation.text, "BEFORE 76B6BDFA-2ACD-4462-9E3F-CB58C969D937");
    }

    #[test]
    fn after_should_produce_after_directive() {
        let depex = Depex::from(vec![
            0x01, 0xFA, 0xBD, 0xB6, 0x76, 0xCD, 0x2A, 0x62, 0x44, 0x9E, 0x3F, 0xCB, 0x58, 0xC9, 0x69, 0xD9, 0x37, 0x08,
        ]);
        let target = guid(TARGET);
        assert!(!depex.eval(&[]));
        assert_eq!(depex.evaluate(|_| false, |_| true).directive, Some((target, Relation::After)));
    }

    #[test]
    fn before_should_return_is_associated() {
        let depex = Depex::from(vec![
            0x00, 0xFA, 0xBD, 0xB6, 0x76, 0xCD, 0x2A, 0x62, 0x44, 0x9E, 0x3F, 0xCB, 0x58, 0xC9, 0x69, 0xD9, 0x37, 0x08,
        ]);

        assert_eq!(depex.is_associated(), Some(AssociatedDependency::Before(guid(TARGET))));
    }

    #[test]
    fn after_should_return_is_associated() {
        let depex = Depex::from(vec![
            0x01, 0xFA, 0xBD, 0xB6, 0x76, 0xCD, 0x2A, 0x62, 0x44, 0x9E, 0x3F, 0xCB, 0x58, 0xC9, 0x69, 0xD9, 0x37, 0x08,
        ]);

        assert_eq!(depex.is_associated(), Some(AssociatedDependency::After(guid(TARGET))));
    }

    #[test]
    fn before_with_additional_opcodes_should_eval_false() {
        let opcodes = [Opcode::Before(Uuid::from_str(TARGET).unwrap()), Opcode::True, Opcode::End];
        let depex = Depex::from(opcodes.as_slice());
        assert!(!depex.evaluate(|_| true, |_| true).satisfiable);

        let opcodes = [Opcode::Before(Uuid::from_str(TARGET).unwrap())];
        let depex = Depex::from(opcodes.as_slice());
        assert!(!depex.evaluate(|_| true, |_| true).satisfiable);
    }

    #[test]
    fn before_not_at_start_should_eval_false() {
        let opcodes = [Opcode::True, Opcode::After(Uuid::from_str(TARGET).unwrap()), Opcode::End];
        let depex = Depex::from(opcodes.as_slice());
        assert!(!depex.evaluate(|_| true, |_| true).satisfiable);
    }

    #[test]
    fn sor_first_opcode_should_be_skipped() {
        let depex = Depex::from(vec![0x09, 0x06, 0x08]);
        assert!(depex.is_sor());
        assert!(depex.eval(&[]));

        let depex = Depex::from(vec![0x09, 0x07, 0x08]);
        assert!(!depex.eval(&[]));
    }

    #[test]
    fn sor_alone_should_eval_false() {
        let depex = Depex::from(vec![0x09, 0x08]);
        assert!(!depex.eval(&[]));
    }

    #[test]
    fn sor_not_first_opcode_should_eval_false() {
        let depex = Depex::from(vec![0x06, 0x09, 0x08]);
        assert!(!depex.eval(&[]));
    }

    #[test]
    fn unknown_opcode_should_stop_decoding_and_eval_false() {
        let depex = Depex::from(vec![0x06, 0xE0, 0x08]);
        assert_eq!(depex.opcodes(), &[Opcode::True, Opcode::Unknown(0xE0)]);
        assert_eq!(depex.trailing_bytes(), 1);
        assert!(!depex.eval(&[]));
    }

    #[test]
    fn truncated_push_should_eval_false() {
        let depex = Depex::from(vec![0x02, 0x4E, 0xBE, 0x79]);
        assert_eq!(depex.opcodes(), &[Opcode::Malformed { opcode: 0x02, len: 3 }]);
        assert_eq!(depex.trailing_bytes(), 0);
        assert!(!depex.eval(&[]));
    }

    #[test]
    fn bytes_after_end_should_eval_false() {
        let depex = Depex::from(vec![0x06, 0x08, 0x06]);
        assert_eq!(depex.opcodes(), &[Opcode::True, Opcode::End]);
        assert_eq!(depex.trailing_bytes(), 1);
        assert!(!depex.eval(&[]));
    }

    #[test]
    fn missing_end_should_eval_false() {
        let depex = Depex::from(vec![0x06]);
        assert!(!depex.eval(&[]));
        assert!(!Depex::from(Vec::new()).eval(&[]));
    }

    #[test]
    fn stack_underflow_should_eval_false() {
        assert!(!Depex::from(vec![0x06, 0x03, 0x08]).eval(&[]));
        assert!(!Depex::from(vec![0x05, 0x08]).eval(&[]));
        assert!(!Depex::from(vec![0x08]).eval(&[]));
    }

    #[test]
    fn leftover_stack_values_should_eval_false() {
        assert!(!Depex::from(vec![0x06, 0x06, 0x08]).eval(&[]));
    }

    #[test]
    fn not_true_should_eval_false() {
        let depex = Depex::from(vec![0x06, 0x05, 0x08]);
        assert!(!depex.eval(&[]));
        assert_eq!(depex.text(), "NOT TRUE");
    }

    #[test]
    fn not_false_should_eval_true() {
        let depex = Depex::from(vec![0x07, 0x05, 0x08]);
        assert!(depex.eval(&[]));
    }

    #[test]
    /// Tests a DEPEX expression with all AND operations that should evaluate to true when all protocols are installed.
    ///
    /// This test is based on the following dependency expression:
    ///   PUSH EfiPcdProtocolGuid
    ///   PUSH EfiDevicePathUtilitiesProtocolGuid
    ///   PUSH EfiHiiStringProtocolGuid
    ///   PUSH EfiHiiDatabaseProtocolGuid
    ///   PUSH EfiHiiConfigRoutingProtocolGuid
    ///   PUSH EfiResetArchProtocolGuid
    ///   PUSH EfiVariableWriteArchProtocolGuid
    ///   PUSH EfiVariableArchProtocolGuid
    ///   AND
    ///   AND
    ///   AND
    ///   AND
    ///   AND
    ///   AND
    ///   AND
    ///   END
    fn all_protocols_installed_and_should_eval_true() {
        let protocols = [
            guid("13a3f0f6-264a-3ef0-f2e0-dec512342f34"),
            guid("0379be4e-d706-437d-b037-edb82fb772a4"),
            guid("0fd96974-23aa-4cdc-b9cb-98d17750322a"),
            guid("ef9fc172-a1b2-4693-b327-6d32fc416042"),
            guid("587e72d7-cc50-4f79-8209-ca291fc1a10f"),
            guid("27cfac88-46cc-11d4-9a38-0090273fc14d"),
            guid("6441f818-6362-eb44-5700-7dba31dd2453"),
            guid("1e5668e2-8481-11d4-bcf1-0080c73c8881"),
        ];

        println!("Testing DEPEX for BdsDxe DXE driver...\n");

        let expression: &[u8] = &[
            0x02, 0xF6, 0xF0, 0xA3, 0x13, 0x4A, 0x26, 0xF0, 0x3E, 0xF2, 0xE0, 0xDE, 0xC5, 0x12, 0x34, 0x2F, 0x34, 0x02,
            0x4E, 0xBE, 0x79, 0x03, 0x06, 0xD7, 0x7D, 0x43, 0xB0, 0x37, 0xED, 0xB8, 0x2F, 0xB7, 0x72, 0xA4, 0x02, 0x74,
            0x69, 0xD9, 0x0F, 0xAA, 0x23, 0xDC, 0x4C, 0xB9, 0xCB, 0x98, 0xD1, 0x77, 0x50, 0x32, 0x2A, 0x02, 0x72, 0xC1,
            0x9F, 0xEF, 0xB2, 0xA1, 0x93, 0x46, 0xB3, 0x27, 0x6D, 0x32, 0xFC, 0x41, 0x60, 0x42, 0x02, 0xD7, 0x72, 0x7E,
            0x58, 0x50, 0xCC, 0x79, 0x4F, 0x82, 0x09, 0xCA, 0x29, 0x1F, 0xC1, 0xA1, 0x0F, 0x02, 0x88, 0xAC, 0xCF, 0x27,
            0xCC, 0x46, 0xD4, 0x11, 0x9A, 0x38, 0x00, 0x90, 0x27, 0x3F, 0xC1, 0x4D, 0x02, 0x18, 0xF8, 0x41, 0x64, 0x62,
            0x63, 0x44, 0xEB, 0x57, 0x00, 0x7D, 0xBA, 0x31, 0xDD, 0x24, 0x53, 0x02, 0xE2, 0x68, 0x56, 0x1E, 0x81, 0x84,
            0xD4, 0x11, 0xBC, 0xF1, 0x00, 0x80, 0xC7, 0x3C, 0x88, 0x81, 0x03, 0x03, 0x03, 0x03, 0x03, 0x03, 0x03, 0x08,
        ];
        let depex = Depex::from(expression);

        assert!(depex.eval(&protocols));
        assert!(!depex.eval(&protocols[1..]));
        assert_eq!(depex.trailing_bytes(), 0);
    }

    #[test]
    /// Tests a DEPEX expression with AND and OR operations.
    ///
    /// This test is based on the following dependency expression:
    ///   PUSH EfiVariableArchProtocolGuid
    ///   PUSH EfiVariableWriteArchProtocolGuid
    ///   PUSH EfiTcgProtocolGuid
    ///   PUSH EfiTrEEProtocolGuid
    ///   OR
    ///   AND
    ///   AND
    ///   PUSH EfiPcdProtocolGuid
    ///   PUSH EfiDevicePathUtilitiesProtocolGuid
    ///   AND
    ///   AND
    ///   END
    fn tcg_mor_depex_should_accept_either_tpm_protocol() {
        let var_arch = guid("1e5668e2-8481-11d4-bcf1-0080c73c8881");
        let var_write_arch = guid("6441f818-6362-eb44-5700-7dba31dd2453");
        let tcg = guid("f541796d-a62e-4954-a775-9584f61b9cdd");
        let tree = guid("607f766c-7455-42be-930b-e4d76db2720f");
        let pcd = guid("13a3f0f6-264a-3ef0-f2e0-dec512342f34");
        let device_path_utilities = guid("0379be4e-d706-437d-b037-edb82fb772a4");

        let expression: &[u8] = &[
            0x02, 0xE2, 0x68, 0x56, 0x1E, 0x81, 0x84, 0xD4, 0x11, 0xBC, 0xF1, 0x00, 0x80, 0xC7, 0x3C, 0x88, 0x81, 0x02,
            0x18, 0xF8, 0x41, 0x64, 0x62, 0x63, 0x44, 0xEB, 0x57, 0x0, 0x7D, 0xBA, 0x31, 0xDD, 0x24, 0x53, 0x02, 0x6D,
            0x79, 0x41, 0xF5, 0x2E, 0xA6, 0x54, 0x49, 0xA7, 0x75, 0x95, 0x84, 0xF6, 0x1B, 0x9C, 0xDD, 0x02, 0x6C, 0x76,
            0x7F, 0x60, 0x55, 0x74, 0xBE, 0x42, 0x93, 0x0B, 0xE4, 0xD7, 0x6D, 0xB2, 0x72, 0x0F, 0x04, 0x03, 0x03, 0x02,
            0xF6, 0xF0, 0xA3, 0x13, 0x4A, 0x26, 0xF0, 0x3E, 0xF2, 0xE0, 0xDE, 0xC5, 0x12, 0x34, 0x2F, 0x34, 0x02, 0x4E,
            0xBE, 0x79, 0x03, 0x06, 0xD7, 0x7D, 0x43, 0xB0, 0x37, 0xED, 0xB8, 0x2F, 0xB7, 0x72, 0xA4, 0x03, 0x03, 0x08,
        ];
        let depex = Depex::from(expression);

        assert!(depex.eval(&[var_arch, var_write_arch, tcg, pcd, device_path_utilities]));
        assert!(depex.eval(&[var_arch, var_write_arch, tree, pcd, device_path_utilities]));
        assert!(!depex.eval(&[var_arch, var_write_arch, pcd, device_path_utilities]));
        assert_eq!(
            depex.text(),
            "((1E5668E2-8481-11D4-BCF1-0080C73C8881 AND (6441F818-6362-EB44-5700-7DBA31DD2453 AND \
             (F541796D-A62E-4954-A775-9584F61B9CDD OR 607F766C-7455-42BE-930B-E4D76DB2720F))) AND \
             (13A3F0F6-264A-3EF0-F2E0-DEC512342F34 AND 0379BE4E-D706-437D-B037-EDB82FB772A4))"
        );
    }

    #[test]
    fn opcode_list_to_depex_should_work() {
        let a = Uuid::from_str("1e5668e2-8481-11d4-bcf1-0080c73c8881").unwrap();
        let b = Uuid::from_str("f541796d-a62e-4954-a775-9584f61b9cdd").unwrap();

        let expression: &[Opcode] = &[Opcode::Push(a), Opcode::Push(b), Opcode::Not, Opcode::And, Opcode::End];
        let depex = Depex::from(expression);

        assert!(depex.eval(&[guid_from_uuid(&a)]));
        assert!(!depex.eval(&[guid_from_uuid(&a), guid_from_uuid(&b)]));
    }

    #[test]
    fn guid_to_uuid_conversion_should_produce_correct_bytes() {
        let device_path_protocol_guid_bytes: &[u8] =
            &[0x4E, 0xBE, 0x79, 0x03, 0x06, 0xD7, 0x7D, 0x43, 0xB0, 0x37, 0xED, 0xB8, 0x2F, 0xB7, 0x72, 0xA4];

        let uuid = uuid_from_slice(Some(device_path_protocol_guid_bytes)).unwrap();
        assert_eq!(uuid, Uuid::from_str("0379be4e-d706-437d-b037-edb82fb772a4").unwrap());

        let guid = guid_from_uuid(&uuid);
        assert_eq!(guid.as_bytes(), device_path_protocol_guid_bytes);
    }
}
