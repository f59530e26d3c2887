//! Tests for client response parsers
//!
//! These tests verify:
//! - NG responses, with savebin reported separately
//! - Register responses split into CPU and DSP sets
//! - Symbol and search result decoding

use emurdb::client::{parse_response, Update};

// =============================================================================
// Status Tests
// =============================================================================

#[test]
fn test_ng_response() {
    assert_eq!(parse_response("bpdel", b"NG\x011").unwrap(), Update::Failed(1));
    assert_eq!(
        parse_response("savebin", b"NG\x013").unwrap(),
        Update::SaveBinComplete(3)
    );
}

#[test]
fn test_bad_status_is_error() {
    assert!(parse_response("status", b"MAYBE").is_err());
}

// =============================================================================
// Payload Tests
// =============================================================================

#[test]
fn test_registers_split_by_prefix() {
    let update = parse_response("regs", b"OK\x01D0\x0112\x01D_X0\x01FF\x01PC\x01E00000").unwrap();
    let Update::Registers(regs) = update else {
        panic!("expected registers, got {:?}", update);
    };
    assert_eq!(regs.get("D0"), Some(0x12));
    assert_eq!(regs.get("PC"), Some(0xE00000));
    assert_eq!(regs.get_dsp("X0"), Some(0xFF));
    assert_eq!(regs.get("D_X0"), None);
}

#[test]
fn test_symbols_skip_absolute() {
    let update =
        parse_response("symlist", b"OK\x012\x01start\x01100\x01T\x01CONST\x0142\x01A\x01").unwrap();
    let Update::Symbols(symbols) = update else {
        panic!("expected symbols");
    };
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].name, "start");
    assert_eq!(symbols[0].address, 0x100);
    assert_eq!(symbols[0].kind, 'T');
}

#[test]
fn test_memfind_results() {
    assert_eq!(
        parse_response("memfind", b"OK").unwrap(),
        Update::SearchResults(Vec::new())
    );
    assert_eq!(
        parse_response("memfind", b"OK\x011004").unwrap(),
        Update::SearchResults(vec![0x1004])
    );
}
