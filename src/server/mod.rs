//! Debug server embedded in the emulator
//!
//! Single-threaded: `ConnectionContext::update` is called once per emulated
//! frame, `ConnectionContext::break_loop` blocks while emulation is paused.

pub mod commands;
pub mod context;
pub mod emulator;
pub mod transport;

pub use commands::{ArgPolicy, CommandSpec, CommandTable, DispatchError, ErrorCode, Handler, HandlerResult};
pub use context::{ConnectionContext, HostEvents, LoopState};
pub use emulator::{BreakpointInfo, ConsoleOutcome, Emulator};
pub use transport::IoMode;
