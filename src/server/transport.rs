//! Server transport
//!
//! Listening socket plus the accepted debugger connection, with an explicit
//! I/O mode instead of toggling blocking flags as a side effect.
//!
//! ## Modes
//! - `Polling`: non-blocking, used once per frame while emulation runs
//! - `BlockingWithTimeout`: reads sleep up to the timeout, used while paused

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{RdbError, Result};

/// Pending connections the kernel may queue; one debugger at a time
pub const LISTEN_BACKLOG: i32 = 1;

/// How reads on the accepted connection behave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    Polling,
    BlockingWithTimeout(Duration),
}

/// Outcome of one receive attempt
#[derive(Debug)]
pub enum RecvOutcome {
    /// Bytes were read into the caller's buffer
    Data(usize),
    /// Nothing to read right now (would block or timed out)
    Idle,
    /// Orderly close by the peer
    Closed,
    /// Hard error, the connection is unusable
    Failed(io::Error),
}

// =============================================================================
// Listener
// =============================================================================

/// Loopback-only, non-blocking listening socket
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind and start listening with a backlog of `LISTEN_BACKLOG`.
    ///
    /// Address reuse is set before binding, so a restarted emulator can
    /// rebind while an old connection is still in TIME_WAIT.
    pub fn bind(addr: &str) -> Result<Self> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| RdbError::Config(format!("cannot resolve listen address {:?}", addr)))?;
        if !addr.ip().is_loopback() {
            return Err(RdbError::Config(format!(
                "debug server must listen on loopback, got {}",
                addr
            )));
        }

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            inner: socket.into(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Single non-blocking accept attempt
    pub fn try_accept(&self) -> Result<Option<(TcpStream, SocketAddr)>> {
        match self.inner.accept() {
            Ok(pair) => Ok(Some(pair)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Accept attempts spread over at most `timeout`
    pub fn accept_within(
        &self,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Option<(TcpStream, SocketAddr)>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pair) = self.try_accept()? {
                return Ok(Some(pair));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(interval.min(deadline - now));
        }
    }
}

// =============================================================================
// Peer
// =============================================================================

/// The accepted debugger connection
pub struct Peer {
    stream: TcpStream,
    addr: SocketAddr,
    mode: IoMode,
}

impl Peer {
    pub fn new(stream: TcpStream, addr: SocketAddr, mode: IoMode) -> Result<Self> {
        // Small frames, low latency
        stream.set_nodelay(true)?;
        let mut peer = Self {
            stream,
            addr,
            mode,
        };
        peer.apply_mode()?;
        Ok(peer)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn mode(&self) -> IoMode {
        self.mode
    }

    /// Switch between polling and blocking-with-timeout reads
    pub fn set_mode(&mut self, mode: IoMode) -> Result<()> {
        if self.mode != mode {
            self.mode = mode;
            self.apply_mode()?;
        }
        Ok(())
    }

    fn apply_mode(&mut self) -> Result<()> {
        match self.mode {
            IoMode::Polling => {
                self.stream.set_nonblocking(true)?;
            }
            IoMode::BlockingWithTimeout(timeout) => {
                self.stream.set_nonblocking(false)?;
                self.stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
            }
        }
        Ok(())
    }

    /// One read attempt according to the current mode
    pub fn recv(&mut self, buf: &mut [u8]) -> RecvOutcome {
        match self.stream.read(buf) {
            Ok(0) => RecvOutcome::Closed,
            Ok(n) => RecvOutcome::Data(n),
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                RecvOutcome::Idle
            }
            Err(e) => RecvOutcome::Failed(e),
        }
    }

    /// Write all of `data`, riding out a full socket buffer in polling mode
    pub fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < data.len() {
            match self.stream.write(&data[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(1));
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
