//! Protocol Module
//!
//! Defines the wire protocol between the emulator and the debugger UI.
//!
//! ## Frame Format
//!
//! Every frame is ASCII text terminated by a single NUL byte. Fields inside
//! responses and notifications are delimited by the 0x01 separator (shown as
//! `␁` below), which lies outside the printable range used by field values.
//!
//! ```text
//! Command:       mem 1000 3␀
//! Response:      OK␁1000␁3␁<4 encoded chars>␀
//! Failure:       NG␁1␀
//! Notification:  !status␁1␁<pc>␁<dsppc>␁0␀
//! ```
//!
//! ## Session
//! - Each TCP connection starts with `!connected␁<protocol id>`
//! - Exactly one response per command, in the order the commands were sent
//! - Notifications may be interleaved anywhere; they start with `!`

mod buffer;
mod codec;
mod message;
mod types;

pub use buffer::{CommandBuffer, GROWTH_SLACK};
pub use codec::{
    decode_block, encode_block, encode_word, parse_hex32, parse_hex_byte, parse_hex_char,
    put_bool, put_char, put_hex, put_sep, put_str, put_term, FieldSplitter, ENCODED_GROUP_LEN,
};
pub use message::{classify_frame, FrameKind, Notification, ResponseStatus};
pub use types::{
    Breakpoint, ExceptionMask, MachineConfig, MemSpace, MemoryBlock, Processor, ProfileSample,
    ProfileSnapshot, Registers, ResetKind, Symbol, TargetStatus, YmState, YM_REGISTER_COUNT,
};

/// Field separator inside responses and notifications
pub const SEPARATOR: u8 = 0x01;

/// Frame terminator
pub const TERMINATOR: u8 = 0x00;

/// First byte of every notification frame
pub const NOTIFICATION_PREFIX: u8 = b'!';

/// Protocol id exchanged in the `!connected` handshake. Both sides must match exactly.
pub const PROTOCOL_ID: u32 = 0x1008;

/// Well-known loopback port of the debug server
pub const DEFAULT_PORT: u16 = 56001;
