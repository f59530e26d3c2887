//! Simulated machine
//!
//! Small stand-in for a real emulator core: byte RAM, a 68k-style register
//! file, an optional DSP with X/Y/P word memories, a breakpoint store and a
//! minimal console. Instructions are not decoded; every instruction is two
//! bytes and four cycles, which is enough to drive PCs, breakpoints,
//! stepping and profiling through the debug server.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use crate::protocol::{
    MachineConfig, MemSpace, Processor, ProfileSample, ResetKind, Symbol, YM_REGISTER_COUNT,
};
use crate::server::{BreakpointInfo, ConsoleOutcome, Emulator};

/// Instructions executed per `run_frame`
pub const INSTRUCTIONS_PER_FRAME: u32 = 64;

/// Cycles charged per simulated instruction
const CYCLES_PER_INSTRUCTION: u32 = 4;

/// DSP address space size in words
const DSP_SPACE_WORDS: u32 = 0x10000;

const DSP_WORD_MASK: u32 = 0x00FF_FFFF;

const SR_SUPERVISOR_IPL7: u32 = 0x2700;

const DSP_REGISTER_NAMES: [&str; 42] = [
    "X0", "X1", "Y0", "Y1", "A0", "B0", "A2", "B2", "A1", "B1", //
    "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", //
    "N0", "N1", "N2", "N3", "N4", "N5", "N6", "N7", //
    "M0", "M1", "M2", "M3", "M4", "M5", "M6", "M7", //
    "SR", "OMR", "SP", "SSH", "SSL", "LA", "LC", "PC",
];

const DATA_REGISTER_NAMES: [&str; 8] = ["D0", "D1", "D2", "D3", "D4", "D5", "D6", "D7"];
const ADDRESS_REGISTER_NAMES: [&str; 8] = ["A0", "A1", "A2", "A3", "A4", "A5", "A6", "A7"];

/// Why `run_frame` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Ran the whole frame
    Completed,
    /// Stopped on breakpoint `index` (1-based, as listed before removal)
    Breakpoint(usize),
    /// A single step finished
    Stepped(Processor),
}

#[derive(Debug, Clone)]
struct SimBreakpoint {
    info: BreakpointInfo,
    processor: Processor,
    /// Only `pc = $<addr>` conditions are evaluated
    address: Option<u32>,
}

#[derive(Debug, Default)]
struct CpuRegisters {
    d: [u32; 8],
    a: [u32; 8],
    pc: u32,
    usp: u32,
    isp: u32,
    sr: u32,
    exception: u32,
    caar: u32,
    cacr: u32,
    dfc: u32,
    msp: u32,
    sfc: u32,
    vbr: u32,
}

#[derive(Debug)]
struct SimDsp {
    /// Same order as `DSP_REGISTER_NAMES`; the last entry is the PC
    regs: [u32; DSP_REGISTER_NAMES.len()],
    memory: HashMap<(MemSpace, u32), u32>,
}

impl SimDsp {
    fn new() -> Self {
        Self {
            regs: [0; DSP_REGISTER_NAMES.len()],
            memory: HashMap::new(),
        }
    }

    fn pc(&self) -> u32 {
        self.regs[DSP_REGISTER_NAMES.len() - 1]
    }

    fn set_pc(&mut self, pc: u32) {
        self.regs[DSP_REGISTER_NAMES.len() - 1] = pc % DSP_SPACE_WORDS;
    }
}

/// In-process machine implementing the emulator services
#[derive(Debug)]
pub struct SimMachine {
    ram: Vec<u8>,
    cpu: CpuRegisters,
    cpu_level: u32,
    machine_type: u32,
    reset_pc: u32,
    dsp: Option<SimDsp>,

    breakpoints: Vec<SimBreakpoint>,
    symbols: Vec<Symbol>,
    symbol_path: Option<String>,

    profile_enabled: bool,
    /// address → (count, cycles)
    profile: BTreeMap<u32, (u32, u32)>,

    ym: [u8; YM_REGISTER_COUNT],
    exception_mask: u32,
    fast_forward: bool,
    pending_step: Option<Processor>,
    frames: u32,
}

impl SimMachine {
    /// Machine with `ram_size` bytes of RAM and no DSP
    pub fn new(ram_size: usize) -> Self {
        let mut machine = Self {
            ram: vec![0; ram_size.max(1)],
            cpu: CpuRegisters::default(),
            cpu_level: 0,
            machine_type: 0,
            reset_pc: 0,
            dsp: None,
            breakpoints: Vec::new(),
            symbols: Vec::new(),
            symbol_path: None,
            profile_enabled: false,
            profile: BTreeMap::new(),
            ym: [0; YM_REGISTER_COUNT],
            exception_mask: 0,
            fast_forward: false,
            pending_step: None,
            frames: 0,
        };
        machine.reset(ResetKind::Cold);
        machine
    }

    pub fn with_dsp(mut self) -> Self {
        self.dsp = Some(SimDsp::new());
        self
    }

    pub fn with_cpu_level(mut self, level: u32) -> Self {
        self.cpu_level = level;
        self
    }

    pub fn with_machine_type(mut self, machine_type: u32) -> Self {
        self.machine_type = machine_type;
        self
    }

    /// PC loaded by a reset
    pub fn with_reset_pc(mut self, pc: u32) -> Self {
        self.reset_pc = pc;
        self.cpu.pc = pc;
        self
    }

    /// Replace the symbol table, as a program load would
    pub fn load_symbols(&mut self, path: impl Into<String>, symbols: Vec<Symbol>) {
        self.symbol_path = Some(path.into());
        self.symbols = symbols;
    }

    pub fn load_memory(&mut self, addr: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.write_byte(addr.wrapping_add(i as u32), *byte);
        }
    }

    pub fn write_dsp_word(&mut self, space: MemSpace, addr: u32, value: u32) {
        if let Some(dsp) = self.dsp.as_mut() {
            dsp.memory.insert((space, addr % DSP_SPACE_WORDS), value & DSP_WORD_MASK);
        }
    }

    pub fn set_ym_register(&mut self, index: usize, value: u8) {
        if let Some(reg) = self.ym.get_mut(index) {
            *reg = value;
        }
    }

    pub fn set_data_register(&mut self, index: usize, value: u32) {
        if let Some(reg) = self.cpu.d.get_mut(index) {
            *reg = value;
        }
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run one emulated frame
    pub fn run_frame(&mut self) -> FrameOutcome {
        self.frames = self.frames.wrapping_add(1);
        for _ in 0..INSTRUCTIONS_PER_FRAME {
            self.execute_one();
            if let Some(processor) = self.pending_step.take() {
                return FrameOutcome::Stepped(processor);
            }
            if let Some(index) = self.check_breakpoints() {
                return FrameOutcome::Breakpoint(index);
            }
        }
        FrameOutcome::Completed
    }

    fn execute_one(&mut self) {
        let pc = self.cpu.pc;
        if self.profile_enabled {
            let entry = self.profile.entry(pc).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += CYCLES_PER_INSTRUCTION;
        }
        self.cpu.pc = pc.wrapping_add(2) % self.ram.len() as u32;

        if let Some(dsp) = self.dsp.as_mut() {
            let next = dsp.pc() + 1;
            dsp.set_pc(next);
        }
    }

    fn check_breakpoints(&mut self) -> Option<usize> {
        let cpu_pc = self.cpu.pc;
        let dsp_pc = self.dsp.as_ref().map(SimDsp::pc);

        let position = self.breakpoints.iter().position(|bp| match bp.processor {
            Processor::Cpu => bp.address == Some(cpu_pc),
            Processor::Dsp => dsp_pc.is_some() && bp.address == dsp_pc,
        })?;

        let bp = &mut self.breakpoints[position];
        bp.info.hit_count += 1;
        if bp.info.once {
            self.breakpoints.remove(position);
        }
        Some(position + 1)
    }
}

/// Split `condition : option : option` and recognise `pc = $<hex>`
fn parse_breakpoint(expression: &str) -> Option<(BreakpointInfo, Option<u32>)> {
    let mut parts = expression.split(':');
    let condition = parts.next()?.trim();
    if condition.is_empty() || !condition.contains(|c| matches!(c, '=' | '<' | '>' | '!')) {
        return None;
    }

    let mut info = BreakpointInfo {
        expression: condition.to_string(),
        condition_count: 1,
        hit_count: 0,
        once: false,
        quiet: false,
        trace: false,
    };
    for option in parts {
        match option.trim() {
            "once" => info.once = true,
            "quiet" => info.quiet = true,
            "trace" => info.trace = true,
            "" => {}
            _ => return None,
        }
    }

    let compact: String = condition.chars().filter(|c| !c.is_whitespace()).collect();
    let address = compact
        .to_ascii_lowercase()
        .strip_prefix("pc=$")
        .and_then(|hex| u32::from_str_radix(hex, 16).ok());
    Some((info, address))
}

impl Emulator for SimMachine {
    fn cpu_pc(&self) -> u32 {
        self.cpu.pc
    }

    fn dsp_pc(&self) -> u32 {
        self.dsp.as_ref().map_or(0, SimDsp::pc)
    }

    fn cpu_registers(&self) -> Vec<(&'static str, u32)> {
        let mut regs: Vec<(&'static str, u32)> = DATA_REGISTER_NAMES
            .iter()
            .copied()
            .zip(self.cpu.d)
            .chain(ADDRESS_REGISTER_NAMES.iter().copied().zip(self.cpu.a))
            .collect();
        regs.extend([
            ("PC", self.cpu.pc),
            ("USP", self.cpu.usp),
            ("ISP", self.cpu.isp),
            ("SR", self.cpu.sr),
            ("EX", self.cpu.exception),
        ]);
        if self.cpu_level >= 2 {
            regs.extend([
                ("CAAR", self.cpu.caar),
                ("CACR", self.cpu.cacr),
                ("DFC", self.cpu.dfc),
                ("MSP", self.cpu.msp),
                ("SFC", self.cpu.sfc),
                ("VBR", self.cpu.vbr),
            ]);
        }
        regs
    }

    fn dsp_registers(&self) -> Option<Vec<(&'static str, u32)>> {
        self.dsp
            .as_ref()
            .map(|dsp| DSP_REGISTER_NAMES.iter().copied().zip(dsp.regs).collect())
    }

    fn variables(&self) -> Vec<(String, u32)> {
        vec![
            ("VBL".to_string(), self.frames),
            (
                "FrameCycles".to_string(),
                self.frames.wrapping_mul(INSTRUCTIONS_PER_FRAME * CYCLES_PER_INSTRUCTION),
            ),
        ]
    }

    fn step(&mut self, processor: Processor) {
        self.pending_step = Some(processor);
    }

    fn read_byte(&self, addr: u32) -> u8 {
        self.ram.get(addr as usize).copied().unwrap_or(0)
    }

    fn write_byte(&mut self, addr: u32, value: u8) {
        if let Some(byte) = self.ram.get_mut(addr as usize) {
            *byte = value;
        }
    }

    fn read_dsp_word(&self, space: MemSpace, addr: u32) -> u32 {
        self.dsp
            .as_ref()
            .and_then(|dsp| dsp.memory.get(&(space, addr % DSP_SPACE_WORDS)).copied())
            .unwrap_or(0)
    }

    fn breakpoint_count(&self) -> usize {
        self.breakpoints
            .iter()
            .filter(|bp| bp.processor == Processor::Cpu)
            .count()
    }

    fn breakpoint(&self, index: usize) -> Option<BreakpointInfo> {
        self.breakpoints
            .iter()
            .filter(|bp| bp.processor == Processor::Cpu)
            .nth(index.checked_sub(1)?)
            .map(|bp| bp.info.clone())
    }

    fn add_breakpoint(&mut self, expression: &str, processor: Processor) -> bool {
        if processor == Processor::Dsp && self.dsp.is_none() {
            return false;
        }
        match parse_breakpoint(expression) {
            Some((info, address)) => {
                self.breakpoints.push(SimBreakpoint {
                    info,
                    processor,
                    address,
                });
                true
            }
            None => false,
        }
    }

    fn remove_breakpoint(&mut self, index: usize) -> bool {
        let Some(target) = index.checked_sub(1) else {
            return false;
        };
        let position = self
            .breakpoints
            .iter()
            .enumerate()
            .filter(|(_, bp)| bp.processor == Processor::Cpu)
            .nth(target)
            .map(|(i, _)| i);
        match position {
            Some(i) => {
                self.breakpoints.remove(i);
                true
            }
            None => false,
        }
    }

    fn symbols(&self) -> Vec<Symbol> {
        self.symbols.clone()
    }

    fn symbol_path(&self) -> Option<String> {
        self.symbol_path.clone()
    }

    fn profile_enabled(&self) -> bool {
        self.profile_enabled
    }

    fn set_profile_enabled(&mut self, enabled: bool) {
        if enabled && !self.profile_enabled {
            self.profile.clear();
        }
        self.profile_enabled = enabled;
    }

    fn profile_samples(&self) -> Vec<ProfileSample> {
        self.profile
            .iter()
            .map(|(&addr, &(count, cycles))| ProfileSample {
                addr,
                count,
                cycles,
            })
            .collect()
    }

    fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            machine_type: self.machine_type,
            cpu_level: self.cpu_level,
            ram_size: self.ram.len() as u32,
            dsp_active: self.dsp.is_some(),
        }
    }

    fn reset(&mut self, kind: ResetKind) -> bool {
        if kind == ResetKind::Cold {
            self.ram.fill(0);
            self.cpu = CpuRegisters::default();
            self.ym = [0; YM_REGISTER_COUNT];
            if let Some(dsp) = self.dsp.as_mut() {
                *dsp = SimDsp::new();
            }
        }
        self.cpu.pc = self.reset_pc;
        self.cpu.sr = SR_SUPERVISOR_IPL7;
        self.pending_step = None;
        tracing::debug!("{:?} reset, pc={:x}", kind, self.cpu.pc);
        true
    }

    fn fast_forward(&self) -> bool {
        self.fast_forward
    }

    fn set_fast_forward(&mut self, enabled: bool) {
        self.fast_forward = enabled;
    }

    fn exception_mask(&self) -> u32 {
        self.exception_mask
    }

    fn set_exception_mask(&mut self, mask: u32) {
        self.exception_mask = mask;
    }

    fn ym_registers(&self) -> [u8; YM_REGISTER_COUNT] {
        self.ym
    }

    fn console_command(&mut self, line: &str, output: &mut dyn Write) -> ConsoleOutcome {
        let line = line.trim();
        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

        match command {
            "c" | "cont" => {
                let _ = writeln!(output, "Returning to emulation...");
                ConsoleOutcome::Resume
            }
            "echo" => {
                let _ = writeln!(output, "{}", rest.trim());
                ConsoleOutcome::Stay
            }
            "r" => {
                match self.console_set_register(rest.trim()) {
                    Some((name, value)) => {
                        let _ = writeln!(output, "{} = ${:x}", name, value);
                    }
                    None => {
                        let _ = writeln!(output, "Bad register assignment: {:?}", rest.trim());
                    }
                }
                ConsoleOutcome::Stay
            }
            _ => {
                let _ = writeln!(output, "Unknown command: {:?}", command);
                ConsoleOutcome::Stay
            }
        }
    }
}

impl SimMachine {
    /// `NAME=$hex` or `NAME=hex`
    fn console_set_register(&mut self, assignment: &str) -> Option<(String, u32)> {
        let (name, value) = assignment.split_once('=')?;
        let name = name.trim().to_ascii_uppercase();
        let value = value.trim();
        let value = u32::from_str_radix(value.strip_prefix('$').unwrap_or(value), 16).ok()?;

        let slot = match name.as_str() {
            "PC" => &mut self.cpu.pc,
            "SR" => &mut self.cpu.sr,
            "USP" => &mut self.cpu.usp,
            "ISP" => &mut self.cpu.isp,
            other => {
                let index = DATA_REGISTER_NAMES.iter().position(|&n| n == other);
                match index {
                    Some(i) => &mut self.cpu.d[i],
                    None => {
                        let i = ADDRESS_REGISTER_NAMES.iter().position(|&n| n == other)?;
                        &mut self.cpu.a[i]
                    }
                }
            }
        };
        *slot = value;
        Some((name, value))
    }
}
