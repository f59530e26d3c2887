//! Response parsers
//!
//! Turns a response frame into a typed `Update`, selected by the keyword of
//! the command it answers. A parse error drops that one response; the queue
//! entry has already been popped so correlation is unaffected.

use crate::error::{RdbError, Result};
use crate::protocol::{
    decode_block, Breakpoint, ExceptionMask, FieldSplitter, MemSpace, MemoryBlock, Registers,
    ResponseStatus, Symbol, YmState, ENCODED_GROUP_LEN, YM_REGISTER_COUNT,
};

/// Prefix marking DSP registers in a `regs` response
const DSP_REGISTER_PREFIX: &str = "D_";

/// Symbol type skipped when building the symbol list
const ABSOLUTE_SYMBOL: char = 'A';

/// What a response means for the target model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// `OK` with nothing to apply
    None,
    Registers(Registers),
    Memory(MemoryBlock),
    Breakpoints(Vec<Breakpoint>),
    Symbols(Vec<Symbol>),
    ExceptionMask(ExceptionMask),
    MemoryChanged { address: u32, size: u32 },
    Ym(YmState),
    ProfileEnabled(bool),
    SearchResults(Vec<u32>),
    ConsoleCommand,
    /// 0 on success, otherwise the `NG` code
    SaveBinComplete(u32),
    /// `NG` for any other command
    Failed(u32),
}

/// Decode `frame` (terminator stripped) as the answer to `keyword`
pub fn parse_response(keyword: &str, frame: &[u8]) -> Result<Update> {
    let mut fields = FieldSplitter::new(frame);
    let status = fields.next_field();

    match ResponseStatus::parse(status) {
        Some(ResponseStatus::Ok) => {}
        Some(ResponseStatus::Ng) => {
            let code = fields.next_hex()?;
            return Ok(match keyword {
                "savebin" => Update::SaveBinComplete(code),
                _ => Update::Failed(code),
            });
        }
        None => {
            return Err(RdbError::MalformedFrame(format!(
                "bad response status {:?}",
                String::from_utf8_lossy(status)
            )))
        }
    }

    match keyword {
        "regs" => parse_registers(&mut fields).map(Update::Registers),
        "mem" => parse_memory(&mut fields).map(Update::Memory),
        "dmem" => parse_dsp_memory(&mut fields).map(Update::Memory),
        "bplist" => parse_breakpoints(&mut fields).map(Update::Breakpoints),
        "symlist" => parse_symbols(&mut fields).map(Update::Symbols),
        "exmask" => Ok(Update::ExceptionMask(ExceptionMask(fields.next_hex()? as u16))),
        "memset" => Ok(Update::MemoryChanged {
            address: fields.next_hex()?,
            size: fields.next_hex()?,
        }),
        "infoym" => parse_ym(&mut fields).map(Update::Ym),
        "profile" => Ok(Update::ProfileEnabled(fields.next_hex()? != 0)),
        "memfind" => Ok(Update::SearchResults(parse_search_results(&mut fields))),
        "console" => Ok(Update::ConsoleCommand),
        "savebin" => Ok(Update::SaveBinComplete(0)),
        _ => Ok(Update::None),
    }
}

/// `name␁value` pairs until an empty field. Unknown names are kept, since
/// debugger variables arrive the same way.
pub fn parse_registers(fields: &mut FieldSplitter<'_>) -> Result<Registers> {
    let mut regs = Registers::default();
    loop {
        let name = fields.next_str();
        if name.is_empty() {
            break;
        }
        let value = fields.next_hex()?;
        match name.strip_prefix(DSP_REGISTER_PREFIX) {
            Some(dsp_name) => {
                regs.dsp.insert(dsp_name.to_string(), value);
            }
            None => {
                regs.cpu.insert(name, value);
            }
        }
    }
    Ok(regs)
}

/// `addr␁size␁<block data>`
pub fn parse_memory(fields: &mut FieldSplitter<'_>) -> Result<MemoryBlock> {
    let address = fields.next_hex()?;
    let size = fields.next_hex()?;
    let data = decode_block(fields.rest(), size as usize)?;
    Ok(MemoryBlock {
        space: MemSpace::Cpu,
        address,
        data,
    })
}

/// `space␁addr␁words␁<4 chars per word>`; each word becomes 3 bytes
pub fn parse_dsp_memory(fields: &mut FieldSplitter<'_>) -> Result<MemoryBlock> {
    let selector = fields.next_field();
    let space = selector
        .first()
        .copied()
        .and_then(MemSpace::from_selector)
        .ok_or_else(|| {
            RdbError::MalformedFrame(format!(
                "bad memory space {:?}",
                String::from_utf8_lossy(selector)
            ))
        })?;
    let address = fields.next_hex()?;
    let words = fields.next_hex()? as usize;

    let data = fields.rest();
    if data.len() < words * ENCODED_GROUP_LEN {
        return Err(RdbError::MalformedFrame(format!(
            "dmem data too short for {} words",
            words
        )));
    }
    Ok(MemoryBlock {
        space,
        address,
        data: decode_block(data, words * 3)?,
    })
}

/// `count␁` then `expr␁ccount␁hits␁once␁quiet␁trace␁` each; ids are 1-based
pub fn parse_breakpoints(fields: &mut FieldSplitter<'_>) -> Result<Vec<Breakpoint>> {
    let count = fields.next_hex()?;
    let mut breakpoints = Vec::with_capacity(count.min(1024) as usize);
    for i in 0..count {
        let expression = fields.next_str();
        breakpoints.push(Breakpoint {
            id: i + 1,
            expression,
            condition_count: fields.next_hex()?,
            hit_count: fields.next_hex()?,
            once: fields.next_hex()? != 0,
            quiet: fields.next_hex()? != 0,
            trace: fields.next_hex()? != 0,
        });
    }
    Ok(breakpoints)
}

/// `count␁` then `name␁addr␁type␁` each, absolute symbols dropped
pub fn parse_symbols(fields: &mut FieldSplitter<'_>) -> Result<Vec<Symbol>> {
    let count = fields.next_hex()?;
    let mut symbols = Vec::new();
    for _ in 0..count {
        let name = fields.next_str();
        let address = fields.next_hex()?;
        let kind = fields
            .next_str()
            .chars()
            .next()
            .ok_or_else(|| RdbError::MalformedFrame(format!("symbol {} has no type", name)))?;
        if kind == ABSOLUTE_SYMBOL {
            continue;
        }
        symbols.push(Symbol {
            name,
            address,
            kind,
        });
    }
    Ok(symbols)
}

pub fn parse_ym(fields: &mut FieldSplitter<'_>) -> Result<YmState> {
    let mut state = YmState::default();
    for reg in state.regs.iter_mut().take(YM_REGISTER_COUNT) {
        *reg = fields.next_hex()? as u8;
    }
    Ok(state)
}

/// Zero or more addresses; stops at the first empty or invalid field
pub fn parse_search_results(fields: &mut FieldSplitter<'_>) -> Vec<u32> {
    let mut addresses = Vec::new();
    while !fields.is_exhausted() {
        match fields.next_hex() {
            Ok(addr) => addresses.push(addr),
            Err(_) => break,
        }
    }
    addresses
}
