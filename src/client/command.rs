//! Queued commands
//!
//! One entry per command awaiting its response, plus local flush markers
//! that never go on the wire.

/// Id handed out per queued entry, strictly increasing per dispatcher
pub type CommandId = u64;

/// First id handed out by a new dispatcher
pub const FIRST_COMMAND_ID: CommandId = 100;

/// Logical destination of a memory read, so several views can request
/// memory independently
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MemorySlot {
    /// Not a memory read, or nobody in particular
    #[default]
    None,
    /// Memory around the stopped CPU PC
    MainPc,
    /// Memory around the stopped DSP PC
    MainDspPc,
    /// General disassembly view `n`
    Disasm(u8),
    /// General memory view `n`
    MemoryView(u8),
    GraphicsInspector,
    GraphicsInspectorPalette,
    /// Hardware register window `n`
    HardwareWindow(u8),
    /// Bottom 256 bytes holding the vectors
    BasePage,
}

/// A command waiting for its response, or a flush marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub id: CommandId,
    /// Command text as sent, without terminator
    pub text: String,
    pub slot: MemorySlot,
    /// Raw response text, filled in once the command is answered
    pub response: Option<String>,
    flush: bool,
}

impl RemoteCommand {
    pub fn new(id: CommandId, text: impl Into<String>, slot: MemorySlot) -> Self {
        Self {
            id,
            text: text.into(),
            slot,
            response: None,
            flush: false,
        }
    }

    pub fn flush(id: CommandId) -> Self {
        Self {
            id,
            text: "flush".to_string(),
            slot: MemorySlot::None,
            response: None,
            flush: true,
        }
    }

    pub fn is_flush(&self) -> bool {
        self.flush
    }

    /// First space-delimited token, which selects the response parser
    pub fn keyword(&self) -> &str {
        self.text.split(' ').next().unwrap_or("")
    }
}
