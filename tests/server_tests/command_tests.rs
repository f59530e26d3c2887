//! Tests for server commands over a real loopback connection
//!
//! Each test pauses a simulated machine, talks to it with raw frames and
//! resumes it with `run` to get the machine back for inspection.

mod common;

use std::fs;

use bytes::BytesMut;
use common::{text, Finished, TestClient, TestServer};
use emurdb::protocol::{decode_block, encode_block, MemSpace, Symbol, SEPARATOR};
use emurdb::server::{ArgPolicy, CommandTable, DispatchError, Emulator, ErrorCode};
use emurdb::sim::SimMachine;
use tempfile::TempDir;

fn resume(server: TestServer, client: &mut TestClient) -> Finished {
    assert_eq!(client.command("run"), b"OK");
    server.join()
}

fn block(data: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_block(&mut buf, data);
    buf.to_vec()
}

// =============================================================================
// Dispatch Tests
// =============================================================================

#[test]
fn test_builtin_table_policies() {
    let table = CommandTable::with_builtins();
    assert_eq!(table.len(), 24);
    for keyword in ["bp", "dbp", "console", "infoym"] {
        assert_eq!(table.lookup(keyword).map(|s| s.args), Some(ArgPolicy::Whole));
    }
    assert_eq!(table.lookup("mem").map(|s| s.args), Some(ArgPolicy::Split));
    assert!(table.lookup("nope").is_none());
}

#[test]
fn test_dispatch_error_codes() {
    assert_eq!(DispatchError::UnknownCommand("x".into()).code(), 0xFFFF_FFFF);
    assert_eq!(DispatchError::TooManyArguments(70).code(), 0xFFFF_FFFF);
    assert_eq!(DispatchError::Failed(ErrorCode::FILE_ERROR).code(), 3);
}

#[test]
fn test_status_while_paused() {
    let server = TestServer::paused(SimMachine::new(0x1000).with_reset_pc(0x100));
    let mut client = TestClient::connect(server.addr);

    assert_eq!(text(&client.command("status")), "OK\x010\x01100");
    resume(server, &mut client);
}

#[test]
fn test_unknown_command() {
    let server = TestServer::paused(SimMachine::new(0x1000));
    let mut client = TestClient::connect(server.addr);

    assert_eq!(client.command("frobnicate 1 2"), b"NG\x01FFFFFFFF");
    assert_eq!(client.command(""), b"NG\x01FFFFFFFF");
    resume(server, &mut client);
}

#[test]
fn test_too_many_arguments() {
    let server = TestServer::paused(SimMachine::new(0x1000));
    let mut client = TestClient::connect(server.addr);

    let args = vec!["1"; 64].join(" ");
    assert_eq!(client.command(&format!("mem {}", args)), b"NG\x01FFFFFFFF");
    resume(server, &mut client);
}

#[test]
fn test_batched_commands_answered_in_order() {
    let server = TestServer::paused(SimMachine::new(0x1000));
    let mut client = TestClient::connect(server.addr);

    client.send("exmask 2c\0bogus\0exmask");
    assert_eq!(client.read_response(), b"OK\x012C");
    assert_eq!(client.read_response(), b"NG\x01FFFFFFFF");
    assert_eq!(client.read_response(), b"OK\x012C");

    let finished = resume(server, &mut client);
    assert_eq!(finished.sim.exception_mask(), 0x2C);
}

#[test]
fn test_commands_split_at_any_point() {
    let server = TestServer::paused(SimMachine::new(0x1000));
    let mut client = TestClient::connect(server.addr);

    let mut expected_mask = 0;
    for (round, chunk) in [1usize, 2, 3, 5, 7, 64].into_iter().enumerate() {
        let values: Vec<u32> = (1..=8).map(|i| (round as u32) * 0x10 + i).collect();
        let mut stream = Vec::new();
        for value in &values {
            stream.extend_from_slice(format!("exmask {:x}", value).as_bytes());
            stream.push(0);
        }
        client.send_split(&stream, chunk);

        for value in &values {
            assert_eq!(
                text(&client.read_response()),
                format!("OK\x01{:X}", value),
                "chunk size {}",
                chunk
            );
        }
        expected_mask = *values.last().unwrap();
    }

    let finished = resume(server, &mut client);
    assert_eq!(finished.sim.exception_mask(), expected_mask);
}

// =============================================================================
// Memory Tests
// =============================================================================

#[test]
fn test_mem_returns_block_encoded_bytes() {
    let mut sim = SimMachine::new(0x1000);
    sim.load_memory(0x100, &[0x4E, 0x75, 0x00, 0xFF]);
    let server = TestServer::paused(sim);
    let mut client = TestClient::connect(server.addr);

    let mut expected = b"OK\x01100\x014\x01".to_vec();
    expected.extend(block(&[0x4E, 0x75, 0x00, 0xFF]));
    assert_eq!(client.command("mem 100 4"), expected);

    // Past the end of RAM reads as zero
    let mut expected = b"OK\x01FFE\x014\x01".to_vec();
    expected.extend(block(&[0, 0, 0, 0]));
    assert_eq!(client.command("mem ffe 4"), expected);

    resume(server, &mut client);
}

#[test]
fn test_mem_large_read_spans_flushes() {
    let mut sim = SimMachine::new(0x4000);
    let data: Vec<u8> = (0..0x3000u32).map(|i| (i * 7) as u8).collect();
    sim.load_memory(0, &data);
    let server = TestServer::paused(sim);
    let mut client = TestClient::connect(server.addr);

    let mut expected = b"OK\x010\x013000\x01".to_vec();
    expected.extend(block(&data));
    assert_eq!(client.command("mem 0 3000"), expected);
    resume(server, &mut client);
}

#[test]
fn test_mem_bad_arguments() {
    let server = TestServer::paused(SimMachine::new(0x1000));
    let mut client = TestClient::connect(server.addr);

    assert_eq!(client.command("mem"), b"NG\x011");
    assert_eq!(client.command("mem zz 4"), b"NG\x011");
    assert_eq!(client.command("mem 100 123456789"), b"NG\x011");
    resume(server, &mut client);
}

#[test]
fn test_memset_writes_memory() {
    let server = TestServer::paused(SimMachine::new(0x1000));
    let mut client = TestClient::connect(server.addr);

    assert_eq!(client.command("memset 200 3 deadBE"), b"OK\x01200\x013");

    let finished = resume(server, &mut client);
    let sim = finished.sim;
    assert_eq!(sim.read_byte(0x200), 0xDE);
    assert_eq!(sim.read_byte(0x201), 0xAD);
    assert_eq!(sim.read_byte(0x202), 0xBE);
}

#[test]
fn test_memset_then_mem_round_trip() {
    let server = TestServer::paused(SimMachine::new(0x4000));
    let mut client = TestClient::connect(server.addr);

    for (addr, len) in [(0x100u32, 1usize), (0x203, 2), (0x400, 3), (0x7FF, 4), (0x1001, 31), (0x2000, 0x200)] {
        let data: Vec<u8> = (0..len).map(|i| (i as u32 * 13 + addr) as u8).collect();
        let payload: String = data.iter().map(|b| format!("{:02x}", b)).collect();

        assert_eq!(
            text(&client.command(&format!("memset {:x} {:x} {}", addr, len, payload))),
            format!("OK\x01{:X}\x01{:X}", addr, len)
        );

        let response = client.command(&format!("mem {:x} {:x}", addr, len));
        let fields: Vec<&[u8]> = response.splitn(4, |&b| b == SEPARATOR).collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0], b"OK");
        assert_eq!(text(fields[1]), format!("{:X}", addr));
        assert_eq!(text(fields[2]), format!("{:X}", len));
        assert_eq!(decode_block(fields[3], len).unwrap(), data, "at {:X}", addr);
    }
    resume(server, &mut client);
}

#[test]
fn test_memset_rejects_bad_payload_without_writing() {
    let server = TestServer::paused(SimMachine::new(0x1000));
    let mut client = TestClient::connect(server.addr);

    // Third pair is not hex
    assert_eq!(client.command("memset 200 3 1122zz"), b"NG\x011");
    // Fewer bytes than the size claims
    assert_eq!(client.command("memset 200 4 112233"), b"NG\x011");

    let finished = resume(server, &mut client);
    assert_eq!(finished.sim.read_byte(0x200), 0);
    assert_eq!(finished.sim.read_byte(0x201), 0);
}

#[test]
fn test_memfind() {
    let mut sim = SimMachine::new(0x1000);
    sim.load_memory(0x400, &[0x4E, 0x75]);
    sim.load_memory(0x7FE, &[0x4E, 0x71]);
    let server = TestServer::paused(sim);
    let mut client = TestClient::connect(server.addr);

    assert_eq!(client.command("memfind 0 1000 ff4eff75"), b"OK\x01400");
    // Masked low nibble matches both 4E75 and 4E71
    assert_eq!(client.command("memfind 500 900 ff4ef070"), b"OK\x017FE");
    // Pattern ending exactly at the window end still matches
    assert_eq!(client.command("memfind 400 2 ff4eff75"), b"OK\x01400");
    assert_eq!(client.command("memfind 401 2 ff4eff75"), b"OK");
    assert_eq!(client.command("memfind 0 1000 ff4eff"), b"NG\x012");
    // Malformed hex is rejected outright, never searched for as a prefix
    assert_eq!(client.command("memfind 0 1000 ff4ezz75"), b"NG\x011");
    assert_eq!(client.command("memfind 0 1000 ff4eff7"), b"NG\x011");
    resume(server, &mut client);
}

#[test]
fn test_savebin_writes_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dump.bin");

    let mut sim = SimMachine::new(0x1000);
    sim.load_memory(0x10, b"HELLO");
    let server = TestServer::paused(sim);
    let mut client = TestClient::connect(server.addr);

    assert_eq!(client.command(&format!("savebin 10 5 {}", path.display())), b"OK");
    assert_eq!(client.command("savebin 10 5"), b"NG\x012");

    let missing = temp.path().join("no/such/dir/dump.bin");
    assert_eq!(client.command(&format!("savebin 10 5 {}", missing.display())), b"NG\x013");

    resume(server, &mut client);
    assert_eq!(fs::read(&path).unwrap(), b"HELLO");
}

#[test]
fn test_dmem_reads_dsp_words() {
    let mut sim = SimMachine::new(0x1000).with_dsp();
    sim.write_dsp_word(MemSpace::X, 0x10, 0x123456);
    sim.write_dsp_word(MemSpace::X, 0x11, 0xABCDEF);
    let server = TestServer::paused(sim);
    let mut client = TestClient::connect(server.addr);

    let mut expected = b"OK\x01X\x0110\x012\x01".to_vec();
    expected.extend(block(&[0x12, 0x34, 0x56, 0xAB, 0xCD, 0xEF]));
    assert_eq!(client.command("dmem X 10 2"), expected);

    // Address is masked to the 16-bit DSP space
    let mut expected = b"OK\x01X\x0110\x011\x01".to_vec();
    expected.extend(block(&[0x12, 0x34, 0x56]));
    assert_eq!(client.command("dmem X 10010 1"), expected);

    assert_eq!(client.command("dmem Q 10 1"), b"NG\x011");
    resume(server, &mut client);
}

// =============================================================================
// Register Tests
// =============================================================================

#[test]
fn test_regs_order() {
    let mut sim = SimMachine::new(0x1000).with_reset_pc(0x80);
    sim.set_data_register(0, 0x1234);
    let server = TestServer::paused(sim);
    let mut client = TestClient::connect(server.addr);

    let response = text(&client.command("regs"));
    let fields: Vec<&str> = response.split('\x01').collect();
    assert_eq!(&fields[..3], &["OK", "D0", "1234"]);
    assert_eq!(fields[31], "A7");
    assert_eq!(&fields[33..35], &["PC", "80"]);
    assert!(response.contains("\x01SR\x012700"));
    assert!(response.contains("\x01VBL\x01"));
    assert!(!response.contains("D_"));
    resume(server, &mut client);
}

#[test]
fn test_regs_with_dsp() {
    let server = TestServer::paused(SimMachine::new(0x1000).with_dsp().with_cpu_level(3));
    let mut client = TestClient::connect(server.addr);

    let response = text(&client.command("regs"));
    let dsp_at = response.find("\x01D_X0\x01").unwrap();
    let pc_at = response.find("\x01PC\x01").unwrap();
    let a7_at = response.find("\x01A7\x01").unwrap();
    assert!(a7_at < dsp_at && dsp_at < pc_at);
    assert!(response.contains("\x01D_PC\x01"));
    assert!(response.contains("\x01VBR\x01"));
    resume(server, &mut client);
}

#[test]
fn test_console_sets_register() {
    let server = TestServer::paused(SimMachine::new(0x1000));
    let mut client = TestClient::connect(server.addr);

    client.send("console r pc=$400");
    let status = client.read_frame();
    assert_eq!(text(&status), "!status\x010\x01400\x010\x010");
    assert_eq!(client.read_frame(), b"OK");

    let finished = resume(server, &mut client);
    assert_eq!(finished.sim.cpu_pc(), 0x400);
}

#[test]
fn test_setstd_redirects_console_output() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("console.log");
    let server = TestServer::paused(SimMachine::new(0x1000));
    let mut client = TestClient::connect(server.addr);

    assert_eq!(client.command(&format!("setstd {}", path.display())), b"OK");
    assert_eq!(client.command("console echo hello there"), b"OK");
    resume(server, &mut client);

    assert_eq!(fs::read_to_string(&path).unwrap(), "hello there\n");
}

#[test]
fn test_infoym_and_exmask() {
    let mut sim = SimMachine::new(0x1000);
    sim.set_ym_register(0, 0x12);
    sim.set_ym_register(7, 0x3F);
    let server = TestServer::paused(sim);
    let mut client = TestClient::connect(server.addr);

    let response = text(&client.command("infoym"));
    let fields: Vec<&str> = response.split('\x01').collect();
    assert_eq!(fields.len(), 17);
    assert_eq!(fields[1], "12");
    assert_eq!(fields[8], "3F");

    assert_eq!(client.command("exmask"), b"OK\x010");
    assert_eq!(client.command("exmask ff"), b"OK\x01FF");
    assert_eq!(client.command("exmask nope"), b"NG\x011");
    resume(server, &mut client);
}

// =============================================================================
// Breakpoint and Symbol Tests
// =============================================================================

#[test]
fn test_breakpoint_lifecycle() {
    let server = TestServer::paused(SimMachine::new(0x1000));
    let mut client = TestClient::connect(server.addr);

    assert_eq!(client.command("bp pc = $100"), b"OK");
    assert_eq!(client.command("bp pc = $200 : once"), b"OK");
    assert_eq!(client.command("bp"), b"NG\x011");
    assert_eq!(client.command("bp not an expression"), b"NG\x011");

    assert_eq!(
        text(&client.command("bplist")),
        "OK\x012\x01pc = $100\x011\x010\x010\x010\x010\x01pc = $200\x011\x010\x011\x010\x010\x01"
    );

    assert_eq!(client.command("bpdel 1"), b"OK");
    assert_eq!(client.command("bpdel 5"), b"NG\x011");
    assert_eq!(
        text(&client.command("bplist")),
        "OK\x011\x01pc = $200\x011\x010\x011\x010\x010\x01"
    );

    let finished = resume(server, &mut client);
    assert_eq!(finished.sim.breakpoint_count(), 1);
}

#[test]
fn test_dbp_requires_dsp() {
    let server = TestServer::paused(SimMachine::new(0x1000));
    let mut client = TestClient::connect(server.addr);

    assert_eq!(client.command("dbp pc = $10"), b"NG\x011");
    resume(server, &mut client);
}

#[test]
fn test_symlist() {
    let mut sim = SimMachine::new(0x1000);
    sim.load_symbols(
        "GAME.PRG",
        vec![
            Symbol { name: "start".into(), address: 0x100, kind: 'T' },
            Symbol { name: "buffer".into(), address: 0x800, kind: 'B' },
        ],
    );
    let server = TestServer::paused(sim);

    let mut client = TestClient::connect_raw(server.addr);
    assert_eq!(client.read_frame(), b"!connected\x011008");
    client.read_frame();
    client.read_frame();
    assert_eq!(client.read_frame(), b"!symbols\x01GAME.PRG");

    assert_eq!(
        text(&client.command("symlist")),
        "OK\x012\x01start\x01100\x01T\x01buffer\x01800\x01B\x01"
    );
    resume(server, &mut client);
}

// =============================================================================
// Machine Control Tests
// =============================================================================

#[test]
fn test_profile_and_ffwd() {
    let server = TestServer::paused(SimMachine::new(0x1000));
    let mut client = TestClient::connect(server.addr);

    assert_eq!(client.command("profile 1"), b"OK\x011");
    assert_eq!(client.command("profile x"), b"NG\x011");
    assert_eq!(client.command("profile"), b"NG\x011");

    // ffwd reports status before its OK
    client.send("ffwd 1");
    assert_eq!(text(&client.read_frame()), "!status\x010\x010\x010\x011");
    assert_eq!(client.read_frame(), b"OK\x011");

    let finished = resume(server, &mut client);
    assert!(finished.sim.profile_enabled());
    assert!(finished.sim.fast_forward());
}

#[test]
fn test_reset_cold_clears_memory() {
    let mut sim = SimMachine::new(0x1000).with_reset_pc(0x40);
    sim.load_memory(0x10, &[1, 2, 3]);
    let server = TestServer::paused(sim);
    let mut client = TestClient::connect(server.addr);

    assert_eq!(client.command("console r pc=$500"), b"OK");
    assert_eq!(client.command("resetwarm"), b"OK");
    assert_eq!(text(&client.command("status")), "OK\x010\x0140");
    assert_eq!(client.command("resetcold"), b"OK");

    let finished = resume(server, &mut client);
    assert_eq!(finished.sim.read_byte(0x10), 0);
}
