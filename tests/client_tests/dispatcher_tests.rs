//! Tests for the client Dispatcher
//!
//! These tests verify:
//! - Handshake gating and protocol mismatch
//! - FIFO correlation of responses to commands
//! - Notifications bypassing the queue, and flush markers
//! - Command helper wire formats

use std::io;

use bytes::BytesMut;
use emurdb::client::{
    BreakpointFlags, Dispatcher, MemorySlot, RemoteCommand, TargetEvent, TargetState, Transport,
    FIRST_COMMAND_ID,
};
use emurdb::protocol::{encode_block, MemSpace, Processor, PROTOCOL_ID};

// =============================================================================
// Helper Functions
// =============================================================================

#[derive(Debug, Default)]
struct MockTransport {
    frames: Vec<Vec<u8>>,
    disconnects: usize,
}

impl Transport for MockTransport {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.frames.push(frame.to_vec());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
    }
}

impl MockTransport {
    fn sent(&self) -> Vec<String> {
        self.frames
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }
}

type TestDispatcher = Dispatcher<MockTransport, TargetState>;

fn handshake_frame(protocol: u32) -> Vec<u8> {
    format!("!connected\x01{:X}\0", protocol).into_bytes()
}

/// Connected dispatcher with the handshake accepted and events cleared
fn ready_dispatcher() -> TestDispatcher {
    let mut dispatcher = Dispatcher::new(MockTransport::default(), TargetState::new());
    dispatcher.connected();
    dispatcher.receive(&handshake_frame(PROTOCOL_ID));
    assert!(dispatcher.is_ready());
    dispatcher.model_mut().take_events();
    dispatcher
}

fn events(dispatcher: &mut TestDispatcher) -> Vec<TargetEvent> {
    dispatcher.model_mut().take_events()
}

// =============================================================================
// Handshake Tests
// =============================================================================

#[test]
fn test_nothing_sent_before_handshake() {
    let mut dispatcher = Dispatcher::new(MockTransport::default(), TargetState::new());
    assert_eq!(dispatcher.send("regs"), None);

    dispatcher.connected();
    assert!(dispatcher.is_awaiting_handshake());
    assert_eq!(dispatcher.send("regs"), None);
    assert_eq!(dispatcher.insert_flush(), None);
    assert!(dispatcher.transport().frames.is_empty());
}

#[test]
fn test_handshake_accepted() {
    let mut dispatcher = Dispatcher::new(MockTransport::default(), TargetState::new());
    dispatcher.connected();
    dispatcher.receive(&handshake_frame(PROTOCOL_ID));

    assert!(dispatcher.is_ready());
    assert_eq!(events(&mut dispatcher), vec![TargetEvent::Connected(true)]);
    assert_eq!(dispatcher.send("regs"), Some(FIRST_COMMAND_ID));
    assert_eq!(dispatcher.transport().sent(), vec!["regs\0"]);
}

#[test]
fn test_frames_before_handshake_are_dropped() {
    let mut dispatcher = Dispatcher::new(MockTransport::default(), TargetState::new());
    dispatcher.connected();
    dispatcher.receive(b"OK\0!status\x010\x0110\x010\x010\0");
    assert!(events(&mut dispatcher).is_empty());

    dispatcher.receive(&handshake_frame(PROTOCOL_ID));
    assert!(dispatcher.is_ready());
}

#[test]
fn test_protocol_mismatch() {
    let mut dispatcher = Dispatcher::new(MockTransport::default(), TargetState::new());
    dispatcher.connected();
    dispatcher.receive(&handshake_frame(0x1007));

    assert_eq!(dispatcher.transport().disconnects, 1);
    assert!(!dispatcher.is_connected());
    assert!(!dispatcher.is_ready());
    assert!(dispatcher.is_awaiting_handshake());
    assert_eq!(dispatcher.protocol_mismatch(), Some(0x1007));
    assert_eq!(
        events(&mut dispatcher),
        vec![
            TargetEvent::Connected(false),
            TargetEvent::ProtocolMismatch {
                remote: 0x1007,
                local: PROTOCOL_ID
            },
        ]
    );
    assert_eq!(dispatcher.send("regs"), None);
}

#[test]
fn test_reconnect_needs_new_handshake() {
    let mut dispatcher = ready_dispatcher();
    dispatcher.send("regs");
    dispatcher.disconnected();
    assert_eq!(dispatcher.pending(), 0);

    dispatcher.connected();
    assert!(!dispatcher.is_ready());
    // Response from the old epoch is not matched against anything
    dispatcher.receive(b"OK\0");
    dispatcher.receive(&handshake_frame(PROTOCOL_ID));
    assert!(dispatcher.is_ready());
    assert_eq!(dispatcher.pending(), 0);
}

// =============================================================================
// Correlation Tests
// =============================================================================

#[test]
fn test_responses_match_in_send_order() {
    let mut dispatcher = ready_dispatcher();
    let regs_id = dispatcher.read_registers().unwrap();
    let mem_id = dispatcher.read_memory(MemorySlot::MemoryView(1), 0x10, 3).unwrap();
    assert_eq!(mem_id, regs_id + 1);
    assert_eq!(dispatcher.pending(), 2);

    let mut data = BytesMut::new();
    data.extend_from_slice(b"OK\x01D0\x0112\x01PC\x01E00030\x01\0");
    data.extend_from_slice(b"OK\x0110\x013\x01");
    encode_block(&mut data, &[0xDE, 0xAD, 0xBE]);
    data.extend_from_slice(b"\0");
    dispatcher.receive(&data);

    assert_eq!(dispatcher.pending(), 0);
    assert_eq!(
        events(&mut dispatcher),
        vec![
            TargetEvent::Registers(regs_id),
            TargetEvent::Memory {
                slot: MemorySlot::MemoryView(1),
                id: mem_id
            },
        ]
    );

    let model = dispatcher.model();
    assert_eq!(model.registers.get("PC"), Some(0xE00030));
    let block = &model.memory[&MemorySlot::MemoryView(1)];
    assert_eq!(block.address, 0x10);
    assert_eq!(block.data, vec![0xDE, 0xAD, 0xBE]);
}

#[test]
fn test_frame_split_across_reads() {
    let mut dispatcher = ready_dispatcher();
    let id = dispatcher.read_exception_mask().unwrap();

    dispatcher.receive(b"O");
    dispatcher.receive(b"K\x01");
    assert_eq!(dispatcher.pending(), 1);
    dispatcher.receive(b"2C\0");

    assert_eq!(dispatcher.pending(), 0);
    assert_eq!(dispatcher.model().exception_mask.0, 0x2C);
    assert!(events(&mut dispatcher).contains(&TargetEvent::ExceptionMask(
        emurdb::protocol::ExceptionMask(0x2C)
    )));
    assert!(id >= FIRST_COMMAND_ID);
}

#[test]
fn test_ng_reports_failure() {
    let mut dispatcher = ready_dispatcher();
    let bp_id = dispatcher.send("bpdel 9").unwrap();
    let save_id = dispatcher.save_bin(0, 0x10, "/nonexistent/out.bin").unwrap();
    dispatcher.receive(b"NG\x011\0NG\x013\0");

    assert_eq!(
        events(&mut dispatcher),
        vec![
            TargetEvent::CommandFailed {
                id: bp_id,
                keyword: "bpdel".to_string(),
                code: 1
            },
            TargetEvent::SaveBinComplete { id: save_id, code: 3 },
        ]
    );
}

#[test]
fn test_answered_command_keeps_response_text() {
    let mut dispatcher = ready_dispatcher();
    assert!(dispatcher.last_answered().is_none());

    let id = dispatcher.read_exception_mask().unwrap();
    dispatcher.send("bpdel 4");
    dispatcher.receive(b"OK\x012C\0");

    let answered = dispatcher.last_answered().unwrap();
    assert_eq!(answered.id, id);
    assert_eq!(answered.text, "exmask");
    assert_eq!(answered.response.as_deref(), Some("OK\x012C"));

    dispatcher.receive(b"NG\x011\0");
    let answered = dispatcher.last_answered().unwrap();
    assert_eq!(answered.keyword(), "bpdel");
    assert_eq!(answered.response.as_deref(), Some("NG\x011"));

    dispatcher.disconnected();
    assert!(dispatcher.last_answered().is_none());
}

#[test]
fn test_unexpected_response_is_ignored() {
    let mut dispatcher = ready_dispatcher();
    dispatcher.receive(b"OK\0");
    assert!(events(&mut dispatcher).is_empty());
    assert_eq!(dispatcher.pending(), 0);
}

// =============================================================================
// Notification and Flush Tests
// =============================================================================

#[test]
fn test_notification_does_not_consume_queue() {
    let mut dispatcher = ready_dispatcher();
    let regs_id = dispatcher.read_registers().unwrap();

    dispatcher.receive(b"!status\x010\x01E00030\x010\x010\0");
    // regs plus the flush inserted for the status change
    assert_eq!(dispatcher.pending(), 2);

    dispatcher.receive(b"OK\x01D0\x011\x01\0");
    assert_eq!(dispatcher.pending(), 0);

    let events = events(&mut dispatcher);
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], TargetEvent::Status(status) if !status.running && status.pc == 0xE00030));
    assert_eq!(events[1], TargetEvent::Registers(regs_id));
    assert_eq!(events[2], TargetEvent::Flush(regs_id + 1));
}

#[test]
fn test_flush_on_empty_queue_resolves_immediately() {
    let mut dispatcher = ready_dispatcher();
    let id = dispatcher.insert_flush().unwrap();
    assert_eq!(dispatcher.pending(), 0);
    assert_eq!(events(&mut dispatcher), vec![TargetEvent::Flush(id)]);
    assert!(dispatcher.transport().frames.is_empty());
}

#[test]
fn test_symbols_notification() {
    let mut dispatcher = ready_dispatcher();
    dispatcher.receive(b"!symbols\x01C:\\GAME.PRG\0");
    assert_eq!(
        events(&mut dispatcher),
        vec![TargetEvent::SymbolProgramChanged("C:\\GAME.PRG".to_string())]
    );
}

#[test]
fn test_disconnect_abandons_queue() {
    let mut dispatcher = ready_dispatcher();
    dispatcher.read_registers();
    dispatcher.read_breakpoints();
    dispatcher.disconnected();

    assert_eq!(dispatcher.pending(), 0);
    assert_eq!(events(&mut dispatcher), vec![TargetEvent::Connected(false)]);
}

// =============================================================================
// Command Helper Tests
// =============================================================================

#[test]
fn test_helper_wire_formats() {
    let mut dispatcher = ready_dispatcher();
    dispatcher.write_memory(0x1000, &[0xAB, 0x01]);
    dispatcher.read_dsp_memory(MemorySlot::MemoryView(0), MemSpace::X, 0x100, 4);
    dispatcher.step(Processor::Dsp);
    dispatcher.set_register("D0", 0x1F);
    dispatcher.mem_find(&[0xFF, 0x4E, 0xFF, 0x75], 0x1000, 0x2000);
    dispatcher.set_profile_enable(true);

    assert_eq!(
        dispatcher.transport().sent(),
        vec![
            "memset 1000 2 ab01\0",
            "dmem X 100 4\0",
            "dstep\0",
            "console r D0=$1f\0",
            "memfind 1000 1000 ff4eff75\0",
            "profile 1\0",
        ]
    );
}

#[test]
fn test_set_breakpoint_rereads_list() {
    let mut dispatcher = ready_dispatcher();
    let list_id = dispatcher
        .set_breakpoint(Processor::Cpu, "pc = $e00030", BreakpointFlags::ONCE)
        .unwrap();

    assert_eq!(
        dispatcher.transport().sent(),
        vec!["bp pc = $e00030: once\0", "bplist\0"]
    );
    assert_eq!(list_id, FIRST_COMMAND_ID + 1);

    dispatcher.receive(b"OK\0OK\x011\x01pc = $e00030\x011\x010\x011\x010\x010\x01\0");
    let breakpoints = &dispatcher.model().breakpoints;
    assert_eq!(breakpoints.len(), 1);
    assert_eq!(breakpoints[0].id, 1);
    assert!(breakpoints[0].once);
}

#[test]
fn test_run_to_pc_sends_once_breakpoint_then_run() {
    let mut dispatcher = ready_dispatcher();
    dispatcher.run_to_pc(Processor::Cpu, 0x1234);
    assert_eq!(
        dispatcher.transport().sent(),
        vec!["bp pc = $1234 : once\0", "run\0"]
    );
}

#[test]
fn test_command_with_nul_is_rejected() {
    let mut dispatcher = ready_dispatcher();
    assert_eq!(dispatcher.send("regs\0run"), None);
    assert!(dispatcher.transport().frames.is_empty());
}

// =============================================================================
// Queued Command Tests
// =============================================================================

#[test]
fn test_queued_command_keyword() {
    let cmd = RemoteCommand::new(100, "mem 1000 20", MemorySlot::MainPc);
    assert_eq!(cmd.keyword(), "mem");
    assert!(!cmd.is_flush());
    assert!(cmd.response.is_none());

    let flush = RemoteCommand::flush(101);
    assert!(flush.is_flush());
    assert_eq!(flush.slot, MemorySlot::None);
}
