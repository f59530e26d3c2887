//! Frame definitions
//!
//! Classifies complete frames and encodes/decodes the notification set.

use bytes::BufMut;

use super::codec::{parse_hex32, put_hex, put_sep, put_str, put_term, FieldSplitter};
use super::types::{MachineConfig, ProfileSample, ProfileSnapshot, TargetStatus};
use super::NOTIFICATION_PREFIX;
use crate::error::{RdbError, Result};

/// Leading token of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    Ng,
}

impl ResponseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseStatus::Ok => "OK",
            ResponseStatus::Ng => "NG",
        }
    }

    pub fn parse(token: &[u8]) -> Option<Self> {
        match token {
            b"OK" => Some(ResponseStatus::Ok),
            b"NG" => Some(ResponseStatus::Ng),
            _ => None,
        }
    }
}

/// What a complete frame (terminator stripped) is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Notification,
    Response,
}

/// Notifications are recognised by their leading `!` before any FIFO matching
pub fn classify_frame(frame: &[u8]) -> FrameKind {
    if frame.first() == Some(&NOTIFICATION_PREFIX) {
        FrameKind::Notification
    } else {
        FrameKind::Response
    }
}

/// Out-of-band server → client messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Handshake, first frame of every connection
    Connected { protocol: u32 },
    Status(TargetStatus),
    Config(MachineConfig),
    Profile(ProfileSnapshot),
    /// Symbol table program changed; empty when nothing is loaded
    Symbols { path: String },
}

impl Notification {
    pub const CONNECTED: &'static str = "!connected";
    pub const STATUS: &'static str = "!status";
    pub const CONFIG: &'static str = "!config";
    pub const PROFILE: &'static str = "!profile";
    pub const SYMBOLS: &'static str = "!symbols";

    pub fn name(&self) -> &'static str {
        match self {
            Notification::Connected { .. } => Self::CONNECTED,
            Notification::Status(_) => Self::STATUS,
            Notification::Config(_) => Self::CONFIG,
            Notification::Profile(_) => Self::PROFILE,
            Notification::Symbols { .. } => Self::SYMBOLS,
        }
    }

    /// Encode as one complete frame, terminator included
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        put_str(buf, self.name());
        match self {
            Notification::Connected { protocol } => {
                put_sep(buf);
                put_hex(buf, *protocol);
            }
            Notification::Status(status) => {
                put_sep(buf);
                put_hex(buf, status.running as u32);
                put_sep(buf);
                put_hex(buf, status.pc);
                put_sep(buf);
                put_hex(buf, status.dsp_pc);
                put_sep(buf);
                put_hex(buf, status.fast_forward as u32);
            }
            Notification::Config(config) => {
                put_sep(buf);
                put_hex(buf, config.machine_type);
                put_sep(buf);
                put_hex(buf, config.cpu_level);
                put_sep(buf);
                put_hex(buf, config.ram_size);
                put_sep(buf);
                put_hex(buf, config.dsp_active as u32);
            }
            Notification::Profile(snapshot) => {
                put_sep(buf);
                put_hex(buf, snapshot.enabled as u32);
                put_sep(buf);
                // Addresses go out as deltas from the previous entry, starting at 0
                let mut last_addr = 0u32;
                for sample in &snapshot.samples {
                    put_hex(buf, sample.addr.wrapping_sub(last_addr));
                    put_sep(buf);
                    put_hex(buf, sample.count);
                    put_sep(buf);
                    put_hex(buf, sample.cycles);
                    put_sep(buf);
                    last_addr = sample.addr;
                }
            }
            Notification::Symbols { path } => {
                put_sep(buf);
                put_str(buf, path);
            }
        }
        put_term(buf);
    }

    /// Decode a notification frame (terminator stripped)
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let mut fields = FieldSplitter::new(frame);
        let name = fields.next_field();

        match name {
            b"!connected" => Ok(Notification::Connected {
                protocol: fields.next_hex()?,
            }),
            b"!status" => Ok(Notification::Status(TargetStatus {
                running: fields.next_hex()? != 0,
                pc: fields.next_hex()?,
                dsp_pc: fields.next_hex()?,
                fast_forward: fields.next_hex()? != 0,
            })),
            b"!config" => Ok(Notification::Config(MachineConfig {
                machine_type: fields.next_hex()?,
                cpu_level: fields.next_hex()?,
                ram_size: fields.next_hex()?,
                dsp_active: fields.next_hex()? != 0,
            })),
            b"!profile" => {
                let enabled = fields.next_hex()? != 0;
                let mut samples = Vec::new();
                let mut last_addr = 0u32;
                loop {
                    let delta_field = fields.next_field();
                    if delta_field.is_empty() {
                        break;
                    }
                    let delta = parse_hex32(&String::from_utf8_lossy(delta_field))?;
                    let addr = last_addr.wrapping_add(delta);
                    samples.push(ProfileSample {
                        addr,
                        count: fields.next_hex()?,
                        cycles: fields.next_hex()?,
                    });
                    last_addr = addr;
                }
                Ok(Notification::Profile(ProfileSnapshot { enabled, samples }))
            }
            b"!symbols" => Ok(Notification::Symbols {
                path: fields.next_str(),
            }),
            _ => Err(RdbError::Protocol(format!(
                "Unknown notification: {}",
                String::from_utf8_lossy(name)
            ))),
        }
    }
}
