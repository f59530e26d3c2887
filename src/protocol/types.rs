//! Shared data shapes
//!
//! Values carried by responses and notifications, used by both the server
//! (as handler inputs) and the client (as typed model updates).

use std::collections::BTreeMap;

/// Number of sound-chip registers reported by `infoym`
pub const YM_REGISTER_COUNT: usize = 16;

/// Which processor a command targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Processor {
    Cpu,
    Dsp,
}

/// Memory address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemSpace {
    Cpu,
    P,
    X,
    Y,
}

impl MemSpace {
    /// Parse a DSP space selector (`X`, `Y` or `P`)
    pub fn from_selector(c: u8) -> Option<Self> {
        match c {
            b'P' => Some(MemSpace::P),
            b'X' => Some(MemSpace::X),
            b'Y' => Some(MemSpace::Y),
            _ => None,
        }
    }

    /// Selector char on the wire; `None` for CPU memory
    pub fn selector(self) -> Option<u8> {
        match self {
            MemSpace::Cpu => None,
            MemSpace::P => Some(b'P'),
            MemSpace::X => Some(b'X'),
            MemSpace::Y => Some(b'Y'),
        }
    }
}

/// Reset flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Warm,
    Cold,
}

/// Payload of `!status`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetStatus {
    pub running: bool,
    pub pc: u32,
    pub dsp_pc: u32,
    pub fast_forward: bool,
}

/// Payload of `!config`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MachineConfig {
    pub machine_type: u32,
    /// 0 = 68000, 1 = 68010, 2 = 68020, ...
    pub cpu_level: u32,
    /// RAM size in bytes
    pub ram_size: u32,
    pub dsp_active: bool,
}

/// One accumulated profile entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSample {
    pub addr: u32,
    pub count: u32,
    pub cycles: u32,
}

/// Payload of `!profile`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSnapshot {
    pub enabled: bool,
    /// Ascending by address
    pub samples: Vec<ProfileSample>,
}

/// A breakpoint as reported by `bplist`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// 1-based position in the server's list
    pub id: u32,
    pub expression: String,
    pub condition_count: u32,
    pub hit_count: u32,
    pub once: bool,
    pub quiet: bool,
    pub trace: bool,
}

/// A CPU symbol as reported by `symlist`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u32,
    /// Symbol type char, e.g. `T` text, `D` data, `B` bss, `A` absolute
    pub kind: char,
}

/// A block of target memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    pub space: MemSpace,
    pub address: u32,
    /// Bytes; DSP words are stored as 3 big-endian bytes each
    pub data: Vec<u8>,
}

/// Register values keyed by name.
///
/// Names are whatever the server sends, so debugger variables ride along
/// with the real registers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registers {
    pub cpu: BTreeMap<String, u32>,
    pub dsp: BTreeMap<String, u32>,
}

impl Registers {
    pub fn get(&self, name: &str) -> Option<u32> {
        self.cpu.get(name).copied()
    }

    pub fn get_dsp(&self, name: &str) -> Option<u32> {
        self.dsp.get(name).copied()
    }
}

/// Sound-chip register snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct YmState {
    pub regs: [u8; YM_REGISTER_COUNT],
}

/// Exception trap mask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExceptionMask(pub u16);
