//! # emurdb
//!
//! Remote debugging control channel for a full-system emulator:
//! - NUL-framed text protocol with a 0x01 field separator
//! - Debug server driven from the emulator's frame loop, with a blocking
//!   break loop while emulation is paused
//! - Client-side correlator matching responses to commands in FIFO order
//!   and routing out-of-band notifications
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐          ┌──────────────────────────────┐
//! │        Debugger UI           │   TCP    │          Emulator            │
//! │  ┌────────────────────────┐  │ loopback │  ┌────────────────────────┐  │
//! │  │  Dispatcher            │──┼──────────┼─▶│  ConnectionContext     │  │
//! │  │  (queue + correlation) │◀─┼──────────┼──│  (poll / break loop)   │  │
//! │  └───────────┬────────────┘  │          │  └───────────┬────────────┘  │
//! │              ▼               │          │              ▼               │
//! │  ┌────────────────────────┐  │          │  ┌────────────────────────┐  │
//! │  │  Parsers → TargetModel │  │          │  │ CommandTable → Emulator│  │
//! │  └────────────────────────┘  │          │  └────────────────────────┘  │
//! └──────────────────────────────┘          └──────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod server;
pub mod client;
pub mod sim;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{RdbError, Result};
pub use config::Config;
pub use protocol::PROTOCOL_ID;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of emurdb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
