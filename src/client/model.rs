//! Target model
//!
//! Sink for the typed updates the dispatcher produces. Every method has an
//! empty default so a consumer only implements what it displays.
//! `TargetState` is a ready-made implementation that keeps the latest
//! value of everything plus an ordered event log.

use std::collections::HashMap;

use super::command::{CommandId, MemorySlot};
use crate::protocol::{
    Breakpoint, ExceptionMask, MachineConfig, MemoryBlock, ProfileSnapshot, Registers, Symbol,
    TargetStatus, YmState,
};

pub trait TargetModel {
    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------
    fn set_connected(&mut self, _connected: bool) {}

    fn set_protocol_mismatch(&mut self, _remote: u32, _local: u32) {}

    // -------------------------------------------------------------------------
    // Notifications
    // -------------------------------------------------------------------------
    fn set_status(&mut self, _status: TargetStatus) {}

    fn set_config(&mut self, _config: MachineConfig) {}

    fn set_profile(&mut self, _snapshot: ProfileSnapshot) {}

    fn notify_symbol_program_changed(&mut self, _path: &str) {}

    // -------------------------------------------------------------------------
    // Responses
    // -------------------------------------------------------------------------
    fn set_registers(&mut self, _regs: Registers, _id: CommandId) {}

    fn set_memory(&mut self, _slot: MemorySlot, _block: MemoryBlock, _id: CommandId) {}

    fn set_breakpoints(&mut self, _breakpoints: Vec<Breakpoint>, _id: CommandId) {}

    fn set_symbols(&mut self, _symbols: Vec<Symbol>, _id: CommandId) {}

    fn set_exception_mask(&mut self, _mask: ExceptionMask) {}

    fn set_ym(&mut self, _state: YmState) {}

    fn set_profile_enabled(&mut self, _enabled: bool) {}

    /// A `memset` changed this range
    fn notify_memory_changed(&mut self, _address: u32, _size: u32) {}

    fn set_search_results(&mut self, _id: CommandId, _addresses: Vec<u32>) {}

    /// `code` is 0 on success, otherwise the server's `NG` code
    fn save_bin_complete(&mut self, _id: CommandId, _code: u32) {}

    /// A console command ran; anything may have changed
    fn console_command(&mut self) {}

    /// Any other command answered with `NG`
    fn command_failed(&mut self, _id: CommandId, _keyword: &str, _code: u32) {}

    /// Every command queued before this flush has been answered
    fn flush(&mut self, _id: CommandId) {}
}

/// One model update, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent {
    Connected(bool),
    ProtocolMismatch { remote: u32, local: u32 },
    Status(TargetStatus),
    Config(MachineConfig),
    Profile(ProfileSnapshot),
    SymbolProgramChanged(String),
    Registers(CommandId),
    Memory { slot: MemorySlot, id: CommandId },
    Breakpoints(CommandId),
    Symbols(CommandId),
    ExceptionMask(ExceptionMask),
    Ym(YmState),
    ProfileEnabled(bool),
    MemoryChanged { address: u32, size: u32 },
    SearchResults { id: CommandId, addresses: Vec<u32> },
    SaveBinComplete { id: CommandId, code: u32 },
    ConsoleCommand,
    CommandFailed { id: CommandId, keyword: String, code: u32 },
    Flush(CommandId),
}

/// Latest known target state
#[derive(Debug, Default)]
pub struct TargetState {
    pub connected: bool,
    pub mismatch: Option<(u32, u32)>,
    pub status: TargetStatus,
    pub config: MachineConfig,
    pub registers: Registers,
    pub memory: HashMap<MemorySlot, MemoryBlock>,
    pub breakpoints: Vec<Breakpoint>,
    pub symbols: Vec<Symbol>,
    pub symbol_program: Option<String>,
    pub exception_mask: ExceptionMask,
    pub ym: YmState,
    pub profile: ProfileSnapshot,
    pub events: Vec<TargetEvent>,
}

impl TargetState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand over the event log, leaving it empty
    pub fn take_events(&mut self) -> Vec<TargetEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_running(&self) -> bool {
        self.status.running
    }
}

impl TargetModel for TargetState {
    fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        self.events.push(TargetEvent::Connected(connected));
    }

    fn set_protocol_mismatch(&mut self, remote: u32, local: u32) {
        self.mismatch = Some((remote, local));
        self.events.push(TargetEvent::ProtocolMismatch { remote, local });
    }

    fn set_status(&mut self, status: TargetStatus) {
        self.status = status;
        self.events.push(TargetEvent::Status(status));
    }

    fn set_config(&mut self, config: MachineConfig) {
        self.config = config;
        self.events.push(TargetEvent::Config(config));
    }

    fn set_profile(&mut self, snapshot: ProfileSnapshot) {
        self.events.push(TargetEvent::Profile(snapshot.clone()));
        self.profile = snapshot;
    }

    fn notify_symbol_program_changed(&mut self, path: &str) {
        self.symbol_program = Some(path.to_string());
        self.events.push(TargetEvent::SymbolProgramChanged(path.to_string()));
    }

    fn set_registers(&mut self, regs: Registers, id: CommandId) {
        self.registers = regs;
        self.events.push(TargetEvent::Registers(id));
    }

    fn set_memory(&mut self, slot: MemorySlot, block: MemoryBlock, id: CommandId) {
        self.memory.insert(slot, block);
        self.events.push(TargetEvent::Memory { slot, id });
    }

    fn set_breakpoints(&mut self, breakpoints: Vec<Breakpoint>, id: CommandId) {
        self.breakpoints = breakpoints;
        self.events.push(TargetEvent::Breakpoints(id));
    }

    fn set_symbols(&mut self, symbols: Vec<Symbol>, id: CommandId) {
        self.symbols = symbols;
        self.events.push(TargetEvent::Symbols(id));
    }

    fn set_exception_mask(&mut self, mask: ExceptionMask) {
        self.exception_mask = mask;
        self.events.push(TargetEvent::ExceptionMask(mask));
    }

    fn set_ym(&mut self, state: YmState) {
        self.ym = state;
        self.events.push(TargetEvent::Ym(state));
    }

    fn set_profile_enabled(&mut self, enabled: bool) {
        self.profile.enabled = enabled;
        self.events.push(TargetEvent::ProfileEnabled(enabled));
    }

    fn notify_memory_changed(&mut self, address: u32, size: u32) {
        self.events.push(TargetEvent::MemoryChanged { address, size });
    }

    fn set_search_results(&mut self, id: CommandId, addresses: Vec<u32>) {
        self.events.push(TargetEvent::SearchResults { id, addresses });
    }

    fn save_bin_complete(&mut self, id: CommandId, code: u32) {
        self.events.push(TargetEvent::SaveBinComplete { id, code });
    }

    fn console_command(&mut self) {
        self.events.push(TargetEvent::ConsoleCommand);
    }

    fn command_failed(&mut self, id: CommandId, keyword: &str, code: u32) {
        self.events.push(TargetEvent::CommandFailed {
            id,
            keyword: keyword.to_string(),
            code,
        });
    }

    fn flush(&mut self, id: CommandId) {
        self.events.push(TargetEvent::Flush(id));
    }
}
