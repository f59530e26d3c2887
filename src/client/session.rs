//! TCP session
//!
//! Drives a `Dispatcher` over a real socket. A reader thread forwards
//! received bytes over a channel; all dispatcher work happens on the thread
//! that calls `pump`, so the dispatcher itself stays single-threaded.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use super::dispatcher::{Dispatcher, Transport};
use super::model::TargetModel;
use crate::config::Config;
use crate::error::{RdbError, Result};
use crate::protocol::PROTOCOL_ID;

const READ_CHUNK_SIZE: usize = 4096;

/// What the reader thread saw
#[derive(Debug)]
pub enum LinkEvent {
    Data(Vec<u8>),
    /// Orderly close (`None`) or read error
    Closed(Option<io::Error>),
}

// =============================================================================
// Transport
// =============================================================================

/// Write half of the client socket
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

impl Transport for TcpTransport {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.write_all(frame),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn spawn_reader(mut stream: TcpStream, events: Sender<LinkEvent>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("emurdb-reader".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let event = match stream.read(&mut buf) {
                    Ok(0) => LinkEvent::Closed(None),
                    Ok(n) => LinkEvent::Data(buf[..n].to_vec()),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => LinkEvent::Closed(Some(e)),
                };
                let closed = matches!(event, LinkEvent::Closed(_));
                if events.send(event).is_err() || closed {
                    break;
                }
            }
        })
}

// =============================================================================
// Session
// =============================================================================

/// A connected dispatcher plus its reader thread
pub struct Session<M: TargetModel> {
    dispatcher: Dispatcher<TcpTransport, M>,
    events: Receiver<LinkEvent>,
    reader: Option<JoinHandle<()>>,
}

impl<M: TargetModel> Session<M> {
    /// Connect to `config.server_addr`. The handshake is still pending on
    /// return; see `wait_ready`.
    pub fn connect(config: &Config, model: M) -> Result<Self> {
        let addr = config
            .server_addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| RdbError::Config(format!("cannot resolve {}", config.server_addr)))?;

        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout())?;
        stream.set_nodelay(true)?;
        tracing::info!("Connected to {}", addr);

        let (tx, rx) = channel::unbounded();
        let reader = spawn_reader(stream.try_clone()?, tx)?;

        let mut dispatcher = Dispatcher::new(TcpTransport::new(stream), model);
        dispatcher.connected();

        Ok(Self {
            dispatcher,
            events: rx,
            reader: Some(reader),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher<TcpTransport, M> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<TcpTransport, M> {
        &mut self.dispatcher
    }

    pub fn model(&self) -> &M {
        self.dispatcher.model()
    }

    pub fn model_mut(&mut self) -> &mut M {
        self.dispatcher.model_mut()
    }

    /// Wait up to `timeout` for link activity and feed everything queued
    /// to the dispatcher. Returns false once the link is gone.
    pub fn pump(&mut self, timeout: Duration) -> bool {
        match self.events.recv_timeout(timeout) {
            Ok(event) => self.apply(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if self.dispatcher.is_connected() {
                    self.dispatcher.disconnected();
                }
            }
        }
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
        }
        self.dispatcher.is_connected()
    }

    fn apply(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Data(bytes) => self.dispatcher.receive(&bytes),
            LinkEvent::Closed(reason) => {
                if let Some(e) = reason {
                    tracing::warn!("Connection lost: {}", e);
                }
                if self.dispatcher.is_connected() {
                    self.dispatcher.disconnected();
                }
            }
        }
    }

    /// Pump until the handshake is accepted
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        self.pump_until(timeout, |d| d.is_ready());
        if let Some(remote) = self.dispatcher.protocol_mismatch() {
            return Err(RdbError::ProtocolMismatch {
                remote,
                local: PROTOCOL_ID,
            });
        }
        if self.dispatcher.is_ready() {
            Ok(())
        } else {
            Err(RdbError::NotConnected)
        }
    }

    /// Pump until every queued command has been answered
    pub fn wait_idle(&mut self, timeout: Duration) -> Result<()> {
        self.pump_until(timeout, |d| d.pending() == 0);
        if self.dispatcher.pending() == 0 {
            Ok(())
        } else if !self.dispatcher.is_connected() {
            Err(RdbError::NotConnected)
        } else {
            Err(RdbError::Protocol(format!(
                "{} commands still unanswered",
                self.dispatcher.pending()
            )))
        }
    }

    fn pump_until<F>(&mut self, timeout: Duration, done: F)
    where
        F: Fn(&Dispatcher<TcpTransport, M>) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while !done(&self.dispatcher) {
            let now = Instant::now();
            if now >= deadline || !self.dispatcher.is_connected() {
                break;
            }
            self.pump(deadline - now);
        }
    }

    /// Close the socket and join the reader thread
    pub fn close(&mut self) {
        self.dispatcher.transport_mut().disconnect();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        if self.dispatcher.is_connected() {
            self.dispatcher.disconnected();
        }
    }
}

impl<M: TargetModel> Drop for Session<M> {
    fn drop(&mut self) {
        self.close();
    }
}
