//! Connection context
//!
//! Owns the listening socket, the accepted debugger, both buffers and the
//! pause/resume flags. The emulator drives it from two places:
//!
//! ```text
//!   frame loop ──▶ update()          polling, once per emulated frame
//!        │
//!        └──────▶ break_loop()       blocking, while emulation is paused
//!                    │  ▲
//!                    ▼  │ resume / quit / listener gone
//!                 service peer ⇄ host.pump()
//! ```

use std::fs::File;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};

use bytes::BytesMut;

use super::commands::{dispatch, CommandTable};
use super::emulator::{ConsoleOutcome, Emulator};
use super::transport::{IoMode, Listener, Peer, RecvOutcome};
use crate::config::Config;
use crate::error::Result;
use crate::protocol::{
    self, CommandBuffer, Notification, ProfileSnapshot, TargetStatus, PROTOCOL_ID,
};

/// Bytes pulled from the socket per read
const RECV_CHUNK_SIZE: usize = 4096;

/// Where the server currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Running, no debugger attached
    Idle,
    /// Running, debugger attached and polled once per frame
    Connected,
    /// Emulation paused; the break loop is the only I/O driver
    InBreakLoop,
}

/// Host application hooks used while the break loop blocks
pub trait HostEvents {
    /// Service the host's own event queue so its window stays responsive
    fn pump(&mut self);

    /// Global quit flag
    fn quit_requested(&self) -> bool;

    /// Short user-facing status text (e.g. a status bar)
    fn status_message(&mut self, _text: &str) {}
}

/// What servicing the peer produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Data,
    Idle,
    Lost,
}

/// Server-side connection state, passed to every command handler
pub struct ConnectionContext {
    config: Config,
    listener: Option<Listener>,
    peer: Option<Peer>,
    state: LoopState,

    /// Incoming bytes not yet framed into commands
    input: CommandBuffer,
    recv_buf: Vec<u8>,
    /// Outgoing bytes batched until flush
    output: BytesMut,

    break_requested: bool,
    resume_requested: bool,

    /// Target of `console` output, set by `setstd`
    console_file: Option<File>,

    commands: CommandTable,
}

impl ConnectionContext {
    /// Bind the listening socket and register the built-in commands
    pub fn bind(config: Config) -> Result<Self> {
        let listener = Listener::bind(&config.listen_addr)?;
        tracing::info!(
            "Remote debug listening on {}, protocol {:x}",
            listener.local_addr()?,
            PROTOCOL_ID
        );
        Ok(Self::with_listener(config, Some(listener)))
    }

    fn with_listener(config: Config, listener: Option<Listener>) -> Self {
        let input = CommandBuffer::with_capacity(config.input_buffer_size);
        let output = BytesMut::with_capacity(config.send_buffer_size);
        Self {
            config,
            listener,
            peer: None,
            state: LoopState::Idle,
            input,
            recv_buf: vec![0u8; RECV_CHUNK_SIZE],
            output,
            break_requested: false,
            resume_requested: false,
            console_file: None,
            commands: CommandTable::with_builtins(),
        }
    }

    /// Close both sockets. The context stays usable as a no-op.
    pub fn shutdown(&mut self) {
        tracing::info!("Stopping remote debug");
        self.drop_peer("server shutdown");
        self.listener = None;
        self.input.clear();
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    /// False only while paused with no resume pending
    pub fn is_running(&self) -> bool {
        self.state != LoopState::InBreakLoop || self.resume_requested
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Register extra commands
    pub fn commands_mut(&mut self) -> &mut CommandTable {
        &mut self.commands
    }

    // =========================================================================
    // Pause / Resume Requests
    // =========================================================================

    /// Ask the frame loop to pause at the next opportunity
    pub fn request_break(&mut self) {
        self.break_requested = true;
    }

    /// Leave the break loop once the current command batch is answered
    pub fn request_resume(&mut self) {
        self.resume_requested = true;
    }

    /// Consume a pending break request; the caller then enters `break_loop`
    pub fn check_remote_break(&mut self) -> bool {
        std::mem::take(&mut self.break_requested)
    }

    // =========================================================================
    // Running: Per-Frame Polling
    // =========================================================================

    /// Per-frame update while emulation runs.
    ///
    /// Accepts a debugger if none is attached, otherwise reads and executes
    /// whatever complete commands have arrived. Does nothing while the break
    /// loop is active.
    pub fn update(&mut self, emu: &mut dyn Emulator) -> LoopState {
        if self.state == LoopState::InBreakLoop {
            return self.state;
        }
        let Some(listener) = self.listener.as_ref() else {
            return self.state;
        };

        if self.peer.is_some() {
            self.service_peer(emu);
        } else {
            match listener.try_accept() {
                Ok(Some((stream, addr))) => self.on_accept(stream, addr, IoMode::Polling, emu),
                Ok(None) => {}
                Err(e) => tracing::warn!("Accept failed: {}", e),
            }
        }
        self.state
    }

    // =========================================================================
    // Paused: Break Loop
    // =========================================================================

    /// Serve the debugger until a command resumes emulation.
    ///
    /// Also exits when the listener is gone or the host asks to quit.
    /// Status and config are re-sent on entry and exit so the debugger's
    /// view of paused/running follows the transition.
    pub fn break_loop(&mut self, emu: &mut dyn Emulator, host: &mut dyn HostEvents) {
        if self.state == LoopState::InBreakLoop {
            tracing::warn!("Break loop already active");
            return;
        }
        self.state = LoopState::InBreakLoop;
        self.resume_requested = false;

        if self.peer.is_some() {
            self.notify_config(emu);
            self.notify_status(emu);
            self.notify_profile(emu);
            self.flush();
        }

        emu.hardware_sync();
        self.report_status(host);

        let timeout = self.config.poll_timeout();
        let interval = self.config.accept_poll_interval();
        self.set_peer_mode(IoMode::BlockingWithTimeout(timeout));

        while !self.resume_requested {
            if host.quit_requested() {
                break;
            }
            let Some(listener) = self.listener.as_ref() else {
                break;
            };

            if self.peer.is_none() {
                match listener.accept_within(timeout, interval) {
                    Ok(Some((stream, addr))) => {
                        self.on_accept(stream, addr, IoMode::BlockingWithTimeout(timeout), emu);
                        self.report_status(host);
                    }
                    Ok(None) => host.pump(),
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        host.pump();
                    }
                }
            } else {
                match self.service_peer(emu) {
                    Activity::Data => {}
                    Activity::Idle => host.pump(),
                    Activity::Lost => self.report_status(host),
                }
            }
        }

        self.resume_requested = false;
        self.break_requested = false;
        self.state = if self.peer.is_some() {
            LoopState::Connected
        } else {
            LoopState::Idle
        };

        if self.peer.is_some() {
            self.notify_config(emu);
            self.notify_status(emu);
            self.flush();
            self.set_peer_mode(IoMode::Polling);
        }
    }

    fn report_status(&mut self, host: &mut dyn HostEvents) {
        let text = if self.peer.is_some() {
            "debugger connected -- debugging"
        } else {
            "break -- waiting for debugger"
        };
        tracing::info!("{}", text);
        host.status_message(text);
    }

    // =========================================================================
    // Connection Handling
    // =========================================================================

    fn on_accept(&mut self, stream: TcpStream, addr: SocketAddr, mode: IoMode, emu: &dyn Emulator) {
        let peer = match Peer::new(stream, addr, mode) {
            Ok(peer) => peer,
            Err(e) => {
                tracing::warn!("Could not set up connection from {}: {}", addr, e);
                return;
            }
        };
        tracing::info!("Remote debug connection accepted from {}", addr);

        self.peer = Some(peer);
        self.input.clear();
        self.output.clear();
        if self.state == LoopState::Idle {
            self.state = LoopState::Connected;
        }

        // Handshake first, so the client can drop anything from an older epoch
        self.send_notification(&Notification::Connected {
            protocol: PROTOCOL_ID,
        });
        self.flush();

        // Initial report so a fresh client is in sync without asking
        self.notify_config(emu);
        self.notify_status(emu);
        self.notify_symbols(emu);
        self.flush();
    }

    fn drop_peer(&mut self, reason: &str) {
        if let Some(peer) = self.peer.take() {
            tracing::info!("Remote debug connection {} closed: {}", peer.addr(), reason);
        }
        self.input.clear();
        self.output.clear();
        if self.state == LoopState::Connected {
            self.state = LoopState::Idle;
        }
    }

    fn set_peer_mode(&mut self, mode: IoMode) {
        if let Some(peer) = self.peer.as_mut() {
            if let Err(e) = peer.set_mode(mode) {
                tracing::warn!("Could not switch socket to {:?}: {}", mode, e);
                self.drop_peer("socket mode switch failed");
            }
        }
    }

    /// One read from the peer, executing any complete commands
    fn service_peer(&mut self, emu: &mut dyn Emulator) -> Activity {
        let Some(peer) = self.peer.as_mut() else {
            return Activity::Lost;
        };

        match peer.recv(&mut self.recv_buf) {
            RecvOutcome::Data(n) => {
                self.input.add(&self.recv_buf[..n]);
                self.process_input(emu);
                Activity::Data
            }
            RecvOutcome::Idle => Activity::Idle,
            RecvOutcome::Closed => {
                self.drop_peer("orderly close");
                Activity::Lost
            }
            RecvOutcome::Failed(e) => {
                self.drop_peer(&e.to_string());
                Activity::Lost
            }
        }
    }

    /// Execute every complete command in the input buffer, in arrival order.
    ///
    /// Each command yields exactly one terminated response; the batch is
    /// flushed once at the end.
    fn process_input(&mut self, emu: &mut dyn Emulator) {
        let mut handled = 0usize;

        while let Some(end) = self.input.find_terminator() {
            let line = String::from_utf8_lossy(&self.input.as_slice()[..end]).into_owned();
            self.input.remove_start(end + 1);
            tracing::trace!("Command: {:?}", line);

            if let Err(err) = dispatch(self, emu, &line) {
                tracing::debug!("Command {:?} failed: {}", line, err);
                self.send_str("NG");
                self.send_sep();
                self.send_hex(err.code());
            }
            self.send_term();
            handled += 1;

            if self.peer.is_none() {
                break;
            }
        }

        if handled > 0 {
            self.flush();
        }
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    pub fn send_notification(&mut self, notification: &Notification) {
        notification.encode(&mut self.output);
        self.flush_if_full();
    }

    /// `!status`: paused flag, CPU PC, DSP PC, fast-forward
    pub fn notify_status(&mut self, emu: &dyn Emulator) {
        let status = TargetStatus {
            running: self.is_running(),
            pc: emu.cpu_pc(),
            dsp_pc: emu.dsp_pc(),
            fast_forward: emu.fast_forward(),
        };
        self.send_notification(&Notification::Status(status));
    }

    /// `!config`: machine type, CPU level, RAM size, DSP present
    pub fn notify_config(&mut self, emu: &dyn Emulator) {
        self.send_notification(&Notification::Config(emu.machine_config()));
    }

    /// `!profile`: samples with a non-zero count
    pub fn notify_profile(&mut self, emu: &dyn Emulator) {
        let snapshot = ProfileSnapshot {
            enabled: emu.profile_enabled(),
            samples: emu
                .profile_samples()
                .into_iter()
                .filter(|s| s.count != 0)
                .collect(),
        };
        self.send_notification(&Notification::Profile(snapshot));
    }

    fn notify_symbols(&mut self, emu: &dyn Emulator) {
        let path = emu.symbol_path().unwrap_or_default();
        self.send_notification(&Notification::Symbols { path });
    }

    /// Called by the emulator when a program load/unload changed the symbols.
    /// Safe to call with no debugger attached.
    pub fn notify_symbols_changed(&mut self, emu: &dyn Emulator) {
        if self.peer.is_none() {
            return;
        }
        self.notify_symbols(emu);
        self.flush();
    }

    // =========================================================================
    // Output
    // =========================================================================

    pub fn send_str(&mut self, text: &str) {
        protocol::put_str(&mut self.output, text);
        self.flush_if_full();
    }

    pub fn send_hex(&mut self, value: u32) {
        protocol::put_hex(&mut self.output, value);
        self.flush_if_full();
    }

    pub fn send_char(&mut self, c: u8) {
        protocol::put_char(&mut self.output, c);
        self.flush_if_full();
    }

    pub fn send_bool(&mut self, value: bool) {
        protocol::put_bool(&mut self.output, value);
        self.flush_if_full();
    }

    pub fn send_sep(&mut self) {
        protocol::put_sep(&mut self.output);
        self.flush_if_full();
    }

    pub fn send_term(&mut self) {
        protocol::put_term(&mut self.output);
        self.flush_if_full();
    }

    /// `␁key␁value`
    pub fn send_key_value(&mut self, key: &str, value: u32) {
        self.send_sep();
        self.send_str(key);
        self.send_sep();
        self.send_hex(value);
    }

    /// Already-encoded bytes, e.g. block data
    pub fn send_raw(&mut self, data: &[u8]) {
        self.output.extend_from_slice(data);
        self.flush_if_full();
    }

    fn flush_if_full(&mut self) {
        if self.output.len() >= self.config.send_buffer_size {
            self.flush();
        }
    }

    /// Write out everything batched so far
    pub fn flush(&mut self) {
        if self.output.is_empty() {
            return;
        }
        let result = match self.peer.as_mut() {
            Some(peer) => peer.send_all(&self.output),
            None => Ok(()),
        };
        self.output.clear();

        if let Err(e) = result {
            tracing::warn!("Send failed: {}", e);
            self.drop_peer("send failed");
        }
    }

    // =========================================================================
    // Console Redirection
    // =========================================================================

    /// Send later `console` output to `file`
    pub fn set_console_output(&mut self, file: File) {
        self.console_file = Some(file);
    }

    /// Run a console line with output pointed at the `setstd` file, if any.
    ///
    /// The redirection only lives for this call.
    pub fn run_console(&mut self, emu: &mut dyn Emulator, line: &str) -> ConsoleOutcome {
        match self.console_file.as_mut() {
            Some(file) => {
                let outcome = emu.console_command(line, file);
                if let Err(e) = file.flush() {
                    tracing::warn!("Console output flush failed: {}", e);
                }
                outcome
            }
            None => {
                let stdout = io::stdout();
                let mut out = stdout.lock();
                let outcome = emu.console_command(line, &mut out);
                if let Err(e) = out.flush() {
                    tracing::warn!("Console output flush failed: {}", e);
                }
                outcome
            }
        }
    }
}
