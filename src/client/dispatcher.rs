//! Command/response correlator
//!
//! Owns the client end of one connection. Commands are queued newest-first;
//! every response frame pairs with the oldest entry (the back of the queue).
//! Frames starting with `!` are notifications and bypass the queue.
//!
//! ```text
//!   send()        ──▶ push_front ──▶ [ newest ... oldest ] ──▶ pop_back ◀── response frame
//!   insert_flush()──▶ push_front      flush markers resolve as soon as they reach the back
//! ```
//!
//! Nothing is sent before the `!connected` handshake of the current
//! connection has been accepted, and nothing received before it is trusted.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::io;

use bytes::BytesMut;

use super::command::{CommandId, MemorySlot, RemoteCommand, FIRST_COMMAND_ID};
use super::model::TargetModel;
use super::parsers::{parse_response, Update};
use crate::protocol::{classify_frame, FrameKind, MemSpace, Notification, Processor, PROTOCOL_ID, TERMINATOR};

/// Byte-level link to the server
pub trait Transport {
    /// Write one complete frame, terminator included
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Tear the connection down
    fn disconnect(&mut self);
}

/// Options appended to a breakpoint expression
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakpointFlags {
    pub once: bool,
    pub trace: bool,
}

impl BreakpointFlags {
    pub const NONE: Self = Self {
        once: false,
        trace: false,
    };
    pub const ONCE: Self = Self {
        once: true,
        trace: false,
    };
}

pub struct Dispatcher<T: Transport, M: TargetModel> {
    transport: T,
    model: M,

    /// Front = newest, back = oldest unanswered
    queue: VecDeque<RemoteCommand>,
    /// Bytes of the frame being received
    frame: BytesMut,
    next_id: CommandId,

    port_connected: bool,
    /// Set from transport connect until a matching `!connected`
    awaiting_handshake: bool,
    /// Protocol id of a server rejected during this epoch
    mismatch: Option<u32>,
    /// Most recently answered command, with its response text
    last_answered: Option<RemoteCommand>,
}

impl<T: Transport, M: TargetModel> Dispatcher<T, M> {
    pub fn new(transport: T, model: M) -> Self {
        Self {
            transport,
            model,
            queue: VecDeque::new(),
            frame: BytesMut::with_capacity(1024),
            next_id: FIRST_COMMAND_ID,
            port_connected: false,
            awaiting_handshake: false,
            mismatch: None,
            last_answered: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_parts(self) -> (T, M) {
        (self.transport, self.model)
    }

    /// Connected and handshake accepted
    pub fn is_ready(&self) -> bool {
        self.port_connected && !self.awaiting_handshake
    }

    pub fn is_awaiting_handshake(&self) -> bool {
        self.awaiting_handshake
    }

    pub fn is_connected(&self) -> bool {
        self.port_connected
    }

    /// Server protocol id, when the last handshake was refused
    pub fn protocol_mismatch(&self) -> Option<u32> {
        self.mismatch
    }

    /// The last command matched to a response
    pub fn last_answered(&self) -> Option<&RemoteCommand> {
        self.last_answered.as_ref()
    }

    /// Unanswered commands and unresolved flushes
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    // =========================================================================
    // Transport Events
    // =========================================================================

    /// Transport-level connect: start a new epoch and wait for the handshake
    pub fn connected(&mut self) {
        self.awaiting_handshake = true;
        self.mismatch = None;
        // Anything queued belongs to a dead connection
        self.queue.clear();
        self.frame.clear();
        self.port_connected = true;
        tracing::info!("Host connected, awaiting handshake");
    }

    /// Transport-level disconnect. Queued commands are abandoned silently.
    pub fn disconnected(&mut self) {
        self.model.set_connected(false);
        self.queue.clear();
        self.last_answered = None;
        self.frame.clear();
        self.port_connected = false;
        tracing::info!("Host disconnected");
    }

    /// Feed received bytes; each NUL completes one frame
    pub fn receive(&mut self, data: &[u8]) {
        let mut rest = data;
        while let Some(end) = rest.iter().position(|&b| b == TERMINATOR) {
            self.frame.extend_from_slice(&rest[..end]);
            let frame = self.frame.split().freeze();
            self.handle_frame(&frame);
            rest = &rest[end + 1..];
        }
        self.frame.extend_from_slice(rest);
    }

    // =========================================================================
    // Frame Routing
    // =========================================================================

    fn handle_frame(&mut self, frame: &[u8]) {
        tracing::trace!("Frame: {:?}", String::from_utf8_lossy(frame));
        self.resolve_flushes();

        if classify_frame(frame) == FrameKind::Notification {
            self.handle_notification(frame);
            return;
        }

        if self.awaiting_handshake {
            tracing::debug!("Dropping stale response {:?}", String::from_utf8_lossy(frame));
            return;
        }

        match self.queue.pop_back() {
            Some(mut command) => {
                command.response = Some(String::from_utf8_lossy(frame).into_owned());
                self.handle_response(&command, frame);
                self.last_answered = Some(command);
                self.resolve_flushes();
            }
            None => tracing::warn!("Response with no pending command: {:?}", String::from_utf8_lossy(frame)),
        }
    }

    /// Resolve flush markers that have become the oldest entry
    fn resolve_flushes(&mut self) {
        while self.queue.back().is_some_and(RemoteCommand::is_flush) {
            if let Some(flush) = self.queue.pop_back() {
                self.model.flush(flush.id);
            }
        }
    }

    fn handle_notification(&mut self, frame: &[u8]) {
        let notification = match Notification::decode(frame) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Dropping notification: {}", e);
                return;
            }
        };

        if self.awaiting_handshake {
            if let Notification::Connected { protocol } = notification {
                self.accept_handshake(protocol);
            } else {
                tracing::debug!("Dropping {} received before handshake", notification.name());
            }
            return;
        }

        if !self.port_connected {
            return;
        }

        match notification {
            Notification::Connected { .. } => {
                tracing::debug!("Ignoring repeated handshake");
            }
            Notification::Status(status) => {
                self.model.set_status(status);
                // Views react to status by queueing requests; mark the batch
                self.insert_flush();
            }
            Notification::Config(config) => {
                self.model.set_config(config);
                self.insert_flush();
            }
            Notification::Profile(snapshot) => {
                self.model.set_profile(snapshot);
            }
            Notification::Symbols { path } => {
                tracing::info!("New program for symbol table: {:?}", path);
                self.model.notify_symbol_program_changed(&path);
            }
        }
    }

    fn accept_handshake(&mut self, protocol: u32) {
        if protocol != PROTOCOL_ID {
            tracing::warn!(
                "Connection refused: server protocol {:x}, expected {:x}",
                protocol,
                PROTOCOL_ID
            );
            self.mismatch = Some(protocol);
            self.transport.disconnect();
            self.disconnected();
            self.model.set_protocol_mismatch(protocol, PROTOCOL_ID);
            return;
        }
        self.awaiting_handshake = false;
        tracing::info!("Connection acknowledged by server");
        self.model.set_connected(true);
    }

    fn handle_response(&mut self, command: &RemoteCommand, frame: &[u8]) {
        let update = match parse_response(command.keyword(), frame) {
            Ok(update) => update,
            Err(e) => {
                tracing::debug!("Dropping response to {:?}: {}", command.text, e);
                return;
            }
        };

        let id = command.id;
        match update {
            Update::None => {}
            Update::Registers(regs) => self.model.set_registers(regs, id),
            Update::Memory(block) => self.model.set_memory(command.slot, block, id),
            Update::Breakpoints(bps) => self.model.set_breakpoints(bps, id),
            Update::Symbols(symbols) => self.model.set_symbols(symbols, id),
            Update::ExceptionMask(mask) => self.model.set_exception_mask(mask),
            Update::MemoryChanged { address, size } => self.model.notify_memory_changed(address, size),
            Update::Ym(state) => self.model.set_ym(state),
            Update::ProfileEnabled(enabled) => self.model.set_profile_enabled(enabled),
            Update::SearchResults(addresses) => self.model.set_search_results(id, addresses),
            Update::ConsoleCommand => self.model.console_command(),
            Update::SaveBinComplete(code) => self.model.save_bin_complete(id, code),
            Update::Failed(code) => {
                tracing::warn!("Command {:?} failed: NG {:X}", command.text, code);
                self.model.command_failed(id, command.keyword(), code);
            }
        }
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Queue a flush marker. It never goes on the wire.
    pub fn insert_flush(&mut self) -> Option<CommandId> {
        if !self.is_ready() {
            return None;
        }
        let id = self.allocate_id();
        self.queue.push_front(RemoteCommand::flush(id));
        self.resolve_flushes();
        Some(id)
    }

    /// Send `text` with no particular memory slot
    pub fn send(&mut self, text: &str) -> Option<CommandId> {
        self.send_to_slot(MemorySlot::None, text)
    }

    /// Send `text`, tagging the response with `slot`
    pub fn send_to_slot(&mut self, slot: MemorySlot, text: &str) -> Option<CommandId> {
        if !self.is_ready() {
            tracing::warn!("Dropping command {:?}: not connected", text);
            return None;
        }
        if text.as_bytes().contains(&TERMINATOR) {
            tracing::warn!("Dropping command {:?}: contains NUL", text);
            return None;
        }

        let id = self.allocate_id();
        self.queue.push_front(RemoteCommand::new(id, text, slot));

        let mut frame = Vec::with_capacity(text.len() + 1);
        frame.extend_from_slice(text.as_bytes());
        frame.push(TERMINATOR);
        if let Err(e) = self.transport.write_frame(&frame) {
            tracing::warn!("Write of {:?} failed: {}", text, e);
        }
        tracing::debug!("Command {}: {}", id, text);
        Some(id)
    }

    fn allocate_id(&mut self) -> CommandId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // =========================================================================
    // Command Helpers
    // =========================================================================

    /// CPU memory, `size` in bytes
    pub fn read_memory(&mut self, slot: MemorySlot, address: u32, size: u32) -> Option<CommandId> {
        self.send_to_slot(slot, &format!("mem {:x} {:x}", address, size))
    }

    /// Memory from any space; `size` counts locations (bytes for CPU,
    /// words for DSP)
    pub fn read_dsp_memory(
        &mut self,
        slot: MemorySlot,
        space: MemSpace,
        address: u32,
        size: u32,
    ) -> Option<CommandId> {
        match space.selector() {
            Some(selector) => self.send_to_slot(
                slot,
                &format!("dmem {} {:x} {:x}", selector as char, address, size),
            ),
            None => self.read_memory(slot, address, size),
        }
    }

    pub fn read_registers(&mut self) -> Option<CommandId> {
        self.send("regs")
    }

    pub fn read_ym(&mut self) -> Option<CommandId> {
        self.send("infoym")
    }

    pub fn read_breakpoints(&mut self) -> Option<CommandId> {
        self.send("bplist")
    }

    pub fn read_exception_mask(&mut self) -> Option<CommandId> {
        self.send("exmask")
    }

    pub fn read_symbols(&mut self) -> Option<CommandId> {
        self.send("symlist")
    }

    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Option<CommandId> {
        let mut text = format!("memset {:x} {:x} ", address, data.len());
        for byte in data {
            let _ = write!(text, "{:02x}", byte);
        }
        self.send(&text)
    }

    pub fn reset_warm(&mut self) -> Option<CommandId> {
        self.send("resetwarm")
    }

    pub fn reset_cold(&mut self) -> Option<CommandId> {
        self.send("resetcold")
    }

    pub fn break_target(&mut self) -> Option<CommandId> {
        self.send("break")
    }

    pub fn run(&mut self) -> Option<CommandId> {
        self.send("run")
    }

    pub fn step(&mut self, processor: Processor) -> Option<CommandId> {
        match processor {
            Processor::Cpu => self.send("step"),
            Processor::Dsp => self.send("dstep"),
        }
    }

    /// One-shot breakpoint at `pc`, then run
    pub fn run_to_pc(&mut self, processor: Processor, pc: u32) -> Option<CommandId> {
        self.send(&format!("{} pc = ${:x} : once", breakpoint_keyword(processor), pc))?;
        self.run()
    }

    /// Add a breakpoint and re-read the list; returns the `bplist` id
    pub fn set_breakpoint(
        &mut self,
        processor: Processor,
        expression: &str,
        flags: BreakpointFlags,
    ) -> Option<CommandId> {
        let mut text = format!("{} {}", breakpoint_keyword(processor), expression);
        if flags.once {
            text.push_str(": once");
        }
        if flags.trace {
            text.push_str(": trace");
        }
        self.send(&text)?;
        self.read_breakpoints()
    }

    /// Remove breakpoint `id` (1-based) and re-read the list
    pub fn delete_breakpoint(&mut self, id: u32) -> Option<CommandId> {
        self.send(&format!("bpdel {:x}", id))?;
        self.read_breakpoints()
    }

    /// Registers are set through the server's console
    pub fn set_register(&mut self, name: &str, value: u32) -> Option<CommandId> {
        self.send(&format!("console r {}=${:x}", name, value))
    }

    pub fn set_exception_mask(&mut self, mask: u32) -> Option<CommandId> {
        self.send(&format!("exmask {:x}", mask))
    }

    /// Redirect console output to `filename` on the server's filesystem
    pub fn set_logging_file(&mut self, filename: &str) -> Option<CommandId> {
        self.send(&format!("setstd {}", filename))
    }

    pub fn set_profile_enable(&mut self, enable: bool) -> Option<CommandId> {
        self.send(if enable { "profile 1" } else { "profile 0" })
    }

    pub fn set_fast_forward(&mut self, enable: bool) -> Option<CommandId> {
        self.send(if enable { "ffwd 1" } else { "ffwd 0" })
    }

    pub fn console_command(&mut self, line: &str) -> Option<CommandId> {
        self.send(&format!("console {}", line))
    }

    /// Search `[start, end)` for interleaved `<mask><value>` bytes
    pub fn mem_find(&mut self, masks_and_values: &[u8], start: u32, end: u32) -> Option<CommandId> {
        let mut text = format!("memfind {:x} {:x} ", start, end.wrapping_sub(start));
        for byte in masks_and_values {
            let _ = write!(text, "{:02x}", byte);
        }
        self.send(&text)
    }

    /// Dump memory to `filename` on the server's filesystem
    pub fn save_bin(&mut self, start: u32, size: u32, filename: &str) -> Option<CommandId> {
        self.send(&format!("savebin {:x} {:x} {}", start, size, filename))
    }

    /// Arbitrary command text, for tools and tests
    pub fn send_raw(&mut self, text: &str) -> Option<CommandId> {
        self.send(text)
    }
}

fn breakpoint_keyword(processor: Processor) -> &'static str {
    match processor {
        Processor::Cpu => "bp",
        Processor::Dsp => "dbp",
    }
}
