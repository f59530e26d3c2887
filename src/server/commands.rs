//! Command dispatch
//!
//! Maps a keyword to `{handler, argument policy}`. A handler either writes
//! an `OK ...` response itself or returns the `NG` code for the caller to
//! send. Every command gets exactly one terminated response.
//!
//! ## Adding a command
//! ```ignore
//! ctx.commands_mut().register(CommandSpec::split("ping", |ctx, _emu, _args| {
//!     ctx.send_str("OK");
//!     Ok(())
//! }));
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};

use thiserror::Error;

use super::context::ConnectionContext;
use super::emulator::{ConsoleOutcome, Emulator};
use crate::protocol::{encode_block, encode_word, parse_hex32, parse_hex_byte, MemSpace, Processor, ResetKind};

/// Raw bytes per `mem` chunk (2048 encoding groups)
const MEM_CHUNK_BYTES: usize = 2048 * 3;

/// Code sent with `NG` when the command itself could not be dispatched
pub const DISPATCH_FAILURE: u32 = 0xFFFF_FFFF;

// =============================================================================
// Error Codes
// =============================================================================

/// `NG` code returned by a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    /// Missing or malformed argument, or the operation was refused
    pub const BAD_ARGUMENTS: Self = Self(1);
    /// `memfind` pattern is not whole mask/value pairs
    pub const ODD_PATTERN: Self = Self(2);
    /// `savebin` did not get exactly three arguments
    pub const ARGUMENT_COUNT: Self = Self(2);
    /// `savebin` could not create or write its file
    pub const FILE_ERROR: Self = Self(3);
}

pub type HandlerResult = std::result::Result<(), ErrorCode>;

/// Handler signature shared by built-in and registered commands
pub type Handler = fn(&mut ConnectionContext, &mut dyn Emulator, &[&str]) -> HandlerResult;

/// Why a command line produced an `NG`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("Too many arguments: {0}")]
    TooManyArguments(usize),

    #[error("Handler failed with code {}", .0 .0)]
    Failed(ErrorCode),
}

impl DispatchError {
    /// Code sent on the wire
    pub fn code(&self) -> u32 {
        match self {
            DispatchError::UnknownCommand(_) | DispatchError::TooManyArguments(_) => DISPATCH_FAILURE,
            DispatchError::Failed(code) => code.0,
        }
    }
}

// =============================================================================
// Command Table
// =============================================================================

/// How the text after the keyword reaches the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPolicy {
    /// Split on spaces/tabs, bounded by `Config::max_arguments`
    Split,
    /// Passed as one string, for payloads that contain spaces
    Whole,
}

#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub keyword: &'static str,
    pub handler: Handler,
    pub args: ArgPolicy,
}

impl CommandSpec {
    pub fn split(keyword: &'static str, handler: Handler) -> Self {
        Self {
            keyword,
            handler,
            args: ArgPolicy::Split,
        }
    }

    pub fn whole(keyword: &'static str, handler: Handler) -> Self {
        Self {
            keyword,
            handler,
            args: ArgPolicy::Whole,
        }
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("keyword", &self.keyword)
            .field("args", &self.args)
            .finish()
    }
}

/// Keyword → command registry
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    entries: HashMap<&'static str, CommandSpec>,
}

impl CommandTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the full built-in command set
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        for spec in [
            CommandSpec::split("status", cmd_status),
            CommandSpec::split("break", cmd_break),
            CommandSpec::split("step", cmd_step),
            CommandSpec::split("dstep", cmd_dstep),
            CommandSpec::split("run", cmd_run),
            CommandSpec::split("regs", cmd_regs),
            CommandSpec::split("mem", cmd_mem),
            CommandSpec::split("memset", cmd_memset),
            CommandSpec::whole("bp", cmd_bp),
            CommandSpec::whole("dbp", cmd_dbp),
            CommandSpec::split("bplist", cmd_bplist),
            CommandSpec::split("bpdel", cmd_bpdel),
            CommandSpec::split("symlist", cmd_symlist),
            CommandSpec::split("exmask", cmd_exmask),
            CommandSpec::whole("console", cmd_console),
            CommandSpec::split("setstd", cmd_setstd),
            CommandSpec::whole("infoym", cmd_infoym),
            CommandSpec::split("profile", cmd_profile),
            CommandSpec::split("resetwarm", cmd_resetwarm),
            CommandSpec::split("resetcold", cmd_resetcold),
            CommandSpec::split("ffwd", cmd_ffwd),
            CommandSpec::split("memfind", cmd_memfind),
            CommandSpec::split("savebin", cmd_savebin),
            CommandSpec::split("dmem", cmd_dmem),
        ] {
            table.register(spec);
        }
        table
    }

    /// Add or replace a command, returning the one it replaced
    pub fn register(&mut self, spec: CommandSpec) -> Option<CommandSpec> {
        self.entries.insert(spec.keyword, spec)
    }

    pub fn lookup(&self, keyword: &str) -> Option<CommandSpec> {
        self.entries.get(keyword).copied()
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.entries.contains_key(keyword)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_delimiter(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Parse one command line and run its handler
pub fn dispatch(
    ctx: &mut ConnectionContext,
    emu: &mut dyn Emulator,
    line: &str,
) -> std::result::Result<(), DispatchError> {
    let trimmed = line.trim_start_matches(is_delimiter);
    let keyword_end = trimmed.find(is_delimiter).unwrap_or(trimmed.len());
    let (keyword, rest) = trimmed.split_at(keyword_end);

    let spec = ctx
        .commands()
        .lookup(keyword)
        .ok_or_else(|| DispatchError::UnknownCommand(keyword.to_string()))?;

    let args: Vec<&str> = match spec.args {
        ArgPolicy::Split => {
            let args: Vec<&str> = rest.split(is_delimiter).filter(|s| !s.is_empty()).collect();
            if args.len() > ctx.config().max_arguments {
                return Err(DispatchError::TooManyArguments(args.len()));
            }
            args
        }
        ArgPolicy::Whole => {
            // Drop exactly the one delimiter after the keyword
            let mut chars = rest.chars();
            chars.next();
            let payload = chars.as_str();
            if payload.is_empty() {
                Vec::new()
            } else {
                vec![payload]
            }
        }
    };

    tracing::debug!("Dispatch {} ({} args)", keyword, args.len());
    (spec.handler)(ctx, emu, &args).map_err(DispatchError::Failed)
}

// =============================================================================
// Argument Helpers
// =============================================================================

fn hex_arg(args: &[&str], index: usize) -> std::result::Result<u32, ErrorCode> {
    let text = args.get(index).ok_or(ErrorCode::BAD_ARGUMENTS)?;
    parse_hex32(text).map_err(|_| ErrorCode::BAD_ARGUMENTS)
}

/// Decimal on/off value as used by `profile` and `ffwd`
fn decimal_arg(args: &[&str], index: usize) -> std::result::Result<i32, ErrorCode> {
    let text = args.get(index).ok_or(ErrorCode::BAD_ARGUMENTS)?;
    text.parse::<i32>().map_err(|_| ErrorCode::BAD_ARGUMENTS)
}

/// Decode a hex byte string. Any non-hex character or a dangling nibble
/// rejects the whole argument.
fn hex_bytes(text: &str) -> std::result::Result<Vec<u8>, ErrorCode> {
    let raw = text.as_bytes();
    if raw.len() % 2 != 0 {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }
    raw.chunks_exact(2)
        .map(|pair| parse_hex_byte(pair[0], pair[1]).ok_or(ErrorCode::BAD_ARGUMENTS))
        .collect()
}

// =============================================================================
// Execution Control
// =============================================================================

/// `status` → `OK␁<running>␁<pc>`
fn cmd_status(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, _args: &[&str]) -> HandlerResult {
    ctx.send_str("OK");
    ctx.send_sep();
    ctx.send_hex(ctx.is_running() as u32);
    ctx.send_sep();
    ctx.send_hex(emu.cpu_pc());
    Ok(())
}

/// Only accepted while running; the frame loop picks the request up
fn cmd_break(ctx: &mut ConnectionContext, _emu: &mut dyn Emulator, _args: &[&str]) -> HandlerResult {
    if !ctx.is_running() {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }
    ctx.request_break();
    ctx.send_str("OK");
    Ok(())
}

fn cmd_step(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, _args: &[&str]) -> HandlerResult {
    emu.step(Processor::Cpu);
    ctx.send_str("OK");
    ctx.request_resume();
    Ok(())
}

fn cmd_dstep(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, _args: &[&str]) -> HandlerResult {
    emu.step(Processor::Dsp);
    ctx.send_str("OK");
    ctx.request_resume();
    Ok(())
}

fn cmd_run(ctx: &mut ConnectionContext, _emu: &mut dyn Emulator, _args: &[&str]) -> HandlerResult {
    ctx.send_str("OK");
    ctx.request_resume();
    Ok(())
}

fn cmd_resetwarm(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, _args: &[&str]) -> HandlerResult {
    reset(ctx, emu, ResetKind::Warm)
}

fn cmd_resetcold(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, _args: &[&str]) -> HandlerResult {
    reset(ctx, emu, ResetKind::Cold)
}

fn reset(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, kind: ResetKind) -> HandlerResult {
    if !emu.reset(kind) {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }
    ctx.send_str("OK");
    Ok(())
}

/// `ffwd <0|1>`: the status notification goes out before the `OK`
fn cmd_ffwd(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    if args.len() != 1 {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }
    let enable = decimal_arg(args, 0)?;
    emu.set_fast_forward(enable != 0);

    ctx.notify_status(emu);

    ctx.send_str("OK");
    ctx.send_sep();
    ctx.send_hex(enable as u32);
    Ok(())
}

fn cmd_profile(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    if args.len() != 1 {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }
    let enable = decimal_arg(args, 0)?;
    emu.set_profile_enabled(enable != 0);

    ctx.send_str("OK");
    ctx.send_sep();
    ctx.send_hex(enable as u32);
    Ok(())
}

// =============================================================================
// Registers
// =============================================================================

/// `regs` → `OK` followed by `␁name␁value` pairs.
///
/// Data/address registers, then DSP registers as `D_<name>` when a DSP is
/// present, then the remaining CPU registers, then debugger variables.
fn cmd_regs(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, _args: &[&str]) -> HandlerResult {
    let cpu = emu.cpu_registers();
    let (general, special) = cpu.split_at(cpu.len().min(16));

    ctx.send_str("OK");
    for (name, value) in general {
        ctx.send_key_value(name, *value);
    }
    if let Some(dsp) = emu.dsp_registers() {
        for (name, value) in dsp {
            ctx.send_key_value(&format!("D_{}", name), value);
        }
    }
    for (name, value) in special {
        ctx.send_key_value(name, *value);
    }
    for (name, value) in emu.variables() {
        ctx.send_key_value(&name, value);
    }
    Ok(())
}

/// `exmask [mask]` → `OK␁<mask>`, always echoing the current value
fn cmd_exmask(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    if args.len() == 1 {
        let mask = hex_arg(args, 0)?;
        emu.set_exception_mask(mask);
    }
    ctx.send_str("OK");
    ctx.send_sep();
    ctx.send_hex(emu.exception_mask());
    Ok(())
}

fn cmd_infoym(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, _args: &[&str]) -> HandlerResult {
    ctx.send_str("OK");
    for reg in emu.ym_registers() {
        ctx.send_sep();
        ctx.send_hex(reg as u32);
    }
    Ok(())
}

// =============================================================================
// Memory
// =============================================================================

/// `mem <addr> <size>` → `OK␁<addr>␁<size>␁` + block-encoded bytes
fn cmd_mem(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    if args.len() < 2 {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }
    let addr = hex_arg(args, 0)?;
    let size = hex_arg(args, 1)?;

    ctx.send_str("OK");
    ctx.send_sep();
    ctx.send_hex(addr);
    ctx.send_sep();
    ctx.send_hex(size);
    ctx.send_sep();

    let total = size as usize;
    let mut chunk = Vec::with_capacity(MEM_CHUNK_BYTES.min(total));
    let mut encoded = Vec::with_capacity(MEM_CHUNK_BYTES / 3 * 4);
    let mut offset = 0usize;
    while offset < total {
        let len = MEM_CHUNK_BYTES.min(total - offset);
        chunk.clear();
        chunk.extend((0..len).map(|i| emu.read_byte(addr.wrapping_add((offset + i) as u32))));

        encoded.clear();
        encode_block(&mut encoded, &chunk);
        ctx.send_raw(&encoded);
        offset += len;
    }
    Ok(())
}

/// `memset <addr> <size> <hexbytes>` → `OK␁<addr>␁<size>`.
/// The whole payload is decoded before the first byte is written.
fn cmd_memset(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    if args.len() < 3 {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }
    let addr = hex_arg(args, 0)?;
    let size = hex_arg(args, 1)?;

    let bytes = hex_bytes(args[2])?;
    if bytes.len() < size as usize {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }

    for (i, byte) in bytes.iter().take(size as usize).enumerate() {
        emu.write_byte(addr.wrapping_add(i as u32), *byte);
    }

    ctx.send_str("OK");
    ctx.send_sep();
    ctx.send_hex(addr);
    ctx.send_sep();
    ctx.send_hex(size);
    Ok(())
}

/// `memfind <addr> <size> <pattern>` → `OK` plus `␁<addr>` of the first match.
///
/// The pattern is `<mask><value>` byte pairs; memory byte `m` matches when
/// `m & mask == value`. Malformed hex is `NG 1`, an odd byte count `NG 2`. Every start where the full pattern fits inside
/// `[addr, addr + size)` is tried.
fn cmd_memfind(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    if args.len() < 3 {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }
    let start = hex_arg(args, 0)?;
    let size = hex_arg(args, 1)?;

    let pattern = hex_bytes(args[2])?;
    if pattern.len() % 2 != 0 {
        return Err(ErrorCode::ODD_PATTERN);
    }
    let pairs: Vec<(u8, u8)> = pattern.chunks_exact(2).map(|p| (p[0], p[1])).collect();

    ctx.send_str("OK");

    let len = pairs.len() as u64;
    if (size as u64) < len {
        return Ok(());
    }
    let starts = size as u64 - len + 1;
    let found = (0..starts).map(|i| start.wrapping_add(i as u32)).find(|&addr| {
        pairs
            .iter()
            .enumerate()
            .all(|(i, &(mask, value))| emu.read_byte(addr.wrapping_add(i as u32)) & mask == value)
    });

    if let Some(addr) = found {
        ctx.send_sep();
        ctx.send_hex(addr);
    }
    Ok(())
}

/// `savebin <addr> <size> <file>` writes raw memory on the server's filesystem
fn cmd_savebin(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    if args.len() != 3 {
        return Err(ErrorCode::ARGUMENT_COUNT);
    }
    let addr = hex_arg(args, 0)?;
    let size = hex_arg(args, 1)?;
    let path = args[2];

    let file = File::create(path).map_err(|e| {
        tracing::warn!("savebin: cannot create {}: {}", path, e);
        ErrorCode::FILE_ERROR
    })?;
    let mut out = BufWriter::new(file);
    for i in 0..size {
        out.write_all(&[emu.read_byte(addr.wrapping_add(i))])
            .map_err(|_| ErrorCode::FILE_ERROR)?;
    }
    out.flush().map_err(|e| {
        tracing::warn!("savebin: write to {} failed: {}", path, e);
        ErrorCode::FILE_ERROR
    })?;

    ctx.send_str("OK");
    Ok(())
}

/// `dmem <X|Y|P> <addr> <count>` → `OK␁<space>␁<addr>␁<count>␁` + 4 chars per word
fn cmd_dmem(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    if args.len() < 3 {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }
    let selector = args[0].as_bytes().first().copied().ok_or(ErrorCode::BAD_ARGUMENTS)?;
    let space = MemSpace::from_selector(selector).ok_or(ErrorCode::BAD_ARGUMENTS)?;
    let addr = hex_arg(args, 1)? & 0xFFFF;
    let count = hex_arg(args, 2)?;

    ctx.send_str("OK");
    ctx.send_sep();
    ctx.send_char(selector);
    ctx.send_sep();
    ctx.send_hex(addr);
    ctx.send_sep();
    ctx.send_hex(count);
    ctx.send_sep();

    let mut word = Vec::with_capacity(4);
    for i in 0..count {
        word.clear();
        encode_word(&mut word, emu.read_dsp_word(space, addr.wrapping_add(i) & 0xFFFF));
        ctx.send_raw(&word);
    }
    Ok(())
}

// =============================================================================
// Breakpoints and Symbols
// =============================================================================

fn cmd_bp(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    add_breakpoint(ctx, emu, args, Processor::Cpu)
}

fn cmd_dbp(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    add_breakpoint(ctx, emu, args, Processor::Dsp)
}

fn add_breakpoint(
    ctx: &mut ConnectionContext,
    emu: &mut dyn Emulator,
    args: &[&str],
    processor: Processor,
) -> HandlerResult {
    let expression = args.first().ok_or(ErrorCode::BAD_ARGUMENTS)?;
    if !emu.add_breakpoint(expression, processor) {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }
    ctx.send_str("OK");
    Ok(())
}

/// `bplist` → `OK␁<count>␁` then `expr␁ccount␁hits␁once␁quiet␁trace␁` each
fn cmd_bplist(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, _args: &[&str]) -> HandlerResult {
    let count = emu.breakpoint_count();
    ctx.send_str("OK");
    ctx.send_sep();
    ctx.send_hex(count as u32);
    ctx.send_sep();

    // Indices are 1-based
    for index in 1..=count {
        let Some(bp) = emu.breakpoint(index) else {
            break;
        };
        ctx.send_str(&bp.expression);
        ctx.send_sep();
        ctx.send_hex(bp.condition_count);
        ctx.send_sep();
        ctx.send_hex(bp.hit_count);
        ctx.send_sep();
        ctx.send_bool(bp.once);
        ctx.send_sep();
        ctx.send_bool(bp.quiet);
        ctx.send_sep();
        ctx.send_bool(bp.trace);
        ctx.send_sep();
    }
    Ok(())
}

fn cmd_bpdel(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    let index = hex_arg(args, 0)?;
    if !emu.remove_breakpoint(index as usize) {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }
    ctx.send_str("OK");
    Ok(())
}

/// `symlist` → `OK␁<count>␁` then `name␁addr␁type␁` each
fn cmd_symlist(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, _args: &[&str]) -> HandlerResult {
    let symbols = emu.symbols();
    ctx.send_str("OK");
    ctx.send_sep();
    ctx.send_hex(symbols.len() as u32);
    ctx.send_sep();

    let mut kind = [0u8; 4];
    for symbol in &symbols {
        ctx.send_str(&symbol.name);
        ctx.send_sep();
        ctx.send_hex(symbol.address);
        ctx.send_sep();
        ctx.send_str(symbol.kind.encode_utf8(&mut kind));
        ctx.send_sep();
    }
    Ok(())
}

// =============================================================================
// Console
// =============================================================================

/// `console <line>`: runs a debugger console line, then reports status
/// before the `OK` in case the line resumed emulation
fn cmd_console(ctx: &mut ConnectionContext, emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    if let Some(line) = args.first() {
        if ctx.run_console(emu, line) == ConsoleOutcome::Resume {
            ctx.request_resume();
        }
        ctx.notify_status(emu);
    }
    ctx.send_str("OK");
    Ok(())
}

/// `setstd <file>`: later `console` output goes to this file
fn cmd_setstd(ctx: &mut ConnectionContext, _emu: &mut dyn Emulator, args: &[&str]) -> HandlerResult {
    if args.len() != 1 {
        return Err(ErrorCode::BAD_ARGUMENTS);
    }
    let file = File::create(args[0]).map_err(|e| {
        tracing::warn!("setstd: cannot create {}: {}", args[0], e);
        ErrorCode::BAD_ARGUMENTS
    })?;
    ctx.set_console_output(file);
    ctx.send_str("OK");
    Ok(())
}
