//! Emulator services consumed by the debug server
//!
//! The server never touches machine internals directly; every command
//! handler goes through this trait.

use std::io::Write;

use crate::protocol::{MachineConfig, MemSpace, Processor, ProfileSample, ResetKind, Symbol, YM_REGISTER_COUNT};

/// A breakpoint as known to the emulator's breakpoint engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointInfo {
    pub expression: String,
    pub condition_count: u32,
    pub hit_count: u32,
    pub once: bool,
    pub quiet: bool,
    pub trace: bool,
}

/// Result of running a free-form console line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleOutcome {
    /// Emulation stays paused
    Stay,
    /// The command resumed emulation
    Resume,
}

/// Narrow interface to the emulated machine.
///
/// Breakpoint indices are 1-based. Addresses wrap at 32 bits; reads from
/// unmapped memory return 0.
pub trait Emulator {
    // -------------------------------------------------------------------------
    // Processor state
    // -------------------------------------------------------------------------
    fn cpu_pc(&self) -> u32;

    fn dsp_pc(&self) -> u32;

    /// Integer registers in wire order, e.g. `D0..D7`, `A0..A7`, `PC`, `USP`, ...
    fn cpu_registers(&self) -> Vec<(&'static str, u32)>;

    /// DSP registers without prefix, `None` when no DSP is emulated
    fn dsp_registers(&self) -> Option<Vec<(&'static str, u32)>>;

    /// Named debugger variables reported alongside the registers
    fn variables(&self) -> Vec<(String, u32)>;

    /// Arm a single-instruction step for the next resume
    fn step(&mut self, processor: Processor);

    // -------------------------------------------------------------------------
    // Memory
    // -------------------------------------------------------------------------
    fn read_byte(&self, addr: u32) -> u8;

    fn write_byte(&mut self, addr: u32, value: u8);

    /// Read one 24-bit DSP word
    fn read_dsp_word(&self, space: MemSpace, addr: u32) -> u32;

    // -------------------------------------------------------------------------
    // Breakpoints and symbols
    // -------------------------------------------------------------------------
    fn breakpoint_count(&self) -> usize;

    fn breakpoint(&self, index: usize) -> Option<BreakpointInfo>;

    /// Parse and add a breakpoint expression; false when it is rejected
    fn add_breakpoint(&mut self, expression: &str, processor: Processor) -> bool;

    fn remove_breakpoint(&mut self, index: usize) -> bool;

    fn symbols(&self) -> Vec<Symbol>;

    /// Program the symbol table was loaded for
    fn symbol_path(&self) -> Option<String>;

    // -------------------------------------------------------------------------
    // Profiling
    // -------------------------------------------------------------------------
    fn profile_enabled(&self) -> bool;

    fn set_profile_enabled(&mut self, enabled: bool);

    /// Accumulated samples, ascending by address
    fn profile_samples(&self) -> Vec<ProfileSample>;

    // -------------------------------------------------------------------------
    // Machine control
    // -------------------------------------------------------------------------
    fn machine_config(&self) -> MachineConfig;

    /// false when the reset could not be performed
    fn reset(&mut self, kind: ResetKind) -> bool;

    fn fast_forward(&self) -> bool;

    fn set_fast_forward(&mut self, enabled: bool);

    fn exception_mask(&self) -> u32;

    fn set_exception_mask(&mut self, mask: u32);

    fn ym_registers(&self) -> [u8; YM_REGISTER_COUNT];

    /// Run a debugger console line, writing any output to `output`
    fn console_command(&mut self, line: &str, output: &mut dyn Write) -> ConsoleOutcome;

    /// Bring lazily-updated state up to date before it is inspected
    fn hardware_sync(&mut self) {}
}
