// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

#![doc = include_str!("../README.md")]

pub mod calibration;
pub mod delay;
pub mod memtest;

use {
    glib::{error::ErrorDomain, Error, FileError, Quark},
    std::collections::BTreeMap,
};

/// The number of lines in the QDR data bus.
pub const TOTAL_BITS: usize = 36;

/// The number of data lines which round-trip through the memory window. The remaining four
/// lines can be stepped but not tested individually.
pub const OBSERVABLE_BITS: usize = 32;

/// The number of positions available to any delay line.
pub const DELAY_TAP_COUNT: u8 = 32;

/// The number of input-delay positions visited by the eye scan.
pub const EYE_SCAN_STEPS: usize = 32;

/// The bitmask selecting every line of the data bus.
pub const ALL_BITS: u64 = (1 << TOTAL_BITS) - 1;

/// Tap counts per line of the data bus, each in 0..=31.
pub type DelayVector = [u8; TOTAL_BITS];

/// Any error of QDR calibration.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum QdrCalError {
    /// The duplicated halves of the clock-tap readback disagree.
    HardwareInconsistent,
    /// A data line passed at every position of the input-delay sweep, thus its eye has no
    /// detectable edge.
    BitNeverFailed,
    /// The widest net-passing run of some data line is too narrow for a robust tap choice.
    NoRobustTap,
    /// The output-delay sweep was exhausted without a clean self-test.
    CalibrationFailed,
    /// The memory window returned fewer bytes than requested.
    ReadShort,
    Invalid(i32),
}

impl std::fmt::Display for QdrCalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            QdrCalError::HardwareInconsistent => "hardware-inconsistent",
            QdrCalError::BitNeverFailed => "bit-never-failed",
            QdrCalError::NoRobustTap => "no-robust-tap",
            QdrCalError::CalibrationFailed => "calibration-failed",
            QdrCalError::ReadShort => "read-short",
            QdrCalError::Invalid(_) => "invalid",
        };

        write!(f, "QdrCalError::{}", msg)
    }
}

impl ErrorDomain for QdrCalError {
    fn domain() -> Quark {
        Quark::from_str("casper-qdr-cal-error-quark")
    }

    fn code(self) -> i32 {
        match self {
            QdrCalError::HardwareInconsistent => 0,
            QdrCalError::BitNeverFailed => 1,
            QdrCalError::NoRobustTap => 2,
            QdrCalError::CalibrationFailed => 3,
            QdrCalError::ReadShort => 4,
            QdrCalError::Invalid(v) => v,
        }
    }

    fn from(code: i32) -> Option<Self> {
        let enumeration = match code {
            0 => QdrCalError::HardwareInconsistent,
            1 => QdrCalError::BitNeverFailed,
            2 => QdrCalError::NoRobustTap,
            3 => QdrCalError::CalibrationFailed,
            4 => QdrCalError::ReadShort,
            _ => QdrCalError::Invalid(code),
        };
        Some(enumeration)
    }
}

/// Word-addressed access to the control register and the memory window of a single QDR
/// controller, provided by FPGA session code.
///
/// Every operation is fully serialised against the hardware by the time it returns; no
/// further fencing is required. Control-register writes are blind, with no readback or
/// acknowledgement beyond transport-level completion.
pub trait QdrRegisterAccess {
    /// Blind-write one 32-bit word of the control register. Valid word offsets are 0..=8.
    fn ctrl_write(&mut self, word_offset: usize, value: u32) -> Result<(), Error>;

    /// Read one 32-bit word of the control register.
    fn ctrl_read(&mut self, word_offset: usize) -> Result<u32, Error>;

    /// Write to the head of the memory window, big-endian byte order.
    fn mem_write(&mut self, bytes: &[u8]) -> Result<(), Error>;

    /// Read from the head of the memory window. The result may be shorter than requested.
    fn mem_read(&mut self, count: usize) -> Result<Vec<u8>, Error>;
}

/// Byte address and size of a memory-mapped resource in the running design.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryMapEntry {
    /// The byte address of the resource.
    pub address: u32,
    /// The length of the resource in bytes.
    pub bytes: usize,
}

/// A single QDR controller instance in the running design.
///
/// The instance is plain metadata resolved from the design's memory map; it carries no
/// connection state. The two underlying resources are named by the logical identifier with
/// the `_ctrl` and `_memory` suffixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qdr {
    /// The unique device name.
    pub name: String,
    /// The logical identifier, used as prefix of the underlying resources.
    pub which_qdr: String,
    /// The byte address of the memory window.
    pub address: u32,
    /// The length of the memory window in bytes.
    pub length: usize,
    /// The byte address of the control register.
    pub ctrl_address: u32,
}

impl Qdr {
    pub fn new(name: &str, which_qdr: &str, address: u32, length: usize, ctrl_address: u32) -> Self {
        Qdr {
            name: name.to_string(),
            which_qdr: which_qdr.to_string(),
            address,
            length,
            ctrl_address,
        }
    }

    /// Resolve the memory window and control register of the named QDR from the memory map of
    /// the running design.
    pub fn from_device_info(
        name: &str,
        which_qdr: &str,
        memorymap: &BTreeMap<String, MemoryMapEntry>,
    ) -> Result<Self, Error> {
        let memory = memorymap
            .get(&format!("{}_memory", which_qdr))
            .ok_or_else(|| {
                let label = format!("Could not find address or length for Qdr {}", name);
                Error::new(FileError::Noent, &label)
            })?;
        let ctrl = memorymap.get(&format!("{}_ctrl", which_qdr)).ok_or_else(|| {
            let label = format!("Could not find ctrl reg address for Qdr {}", name);
            Error::new(FileError::Noent, &label)
        })?;
        Ok(Self::new(
            name,
            which_qdr,
            memory.address,
            memory.bytes,
            ctrl.address,
        ))
    }

    /// The name of the memory window resource.
    pub fn memory_name(&self) -> String {
        format!("{}_memory", self.which_qdr)
    }

    /// The name of the control register resource.
    pub fn ctrl_name(&self) -> String {
        format!("{}_ctrl", self.which_qdr)
    }
}
