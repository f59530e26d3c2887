//! Configuration for emurdb
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use crate::protocol::DEFAULT_PORT;

/// Main configuration shared by the debug server and client
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Server Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address. Only loopback addresses are accepted.
    pub listen_addr: String,

    /// Bound on each blocking wait inside the break loop (milliseconds)
    pub poll_timeout_ms: u64,

    /// Sleep between accept attempts while waiting for a debugger (milliseconds)
    pub accept_poll_interval_ms: u64,

    /// Outgoing bytes are batched up to this size before a write
    pub send_buffer_size: usize,

    /// Initial capacity of the incoming command buffer
    pub input_buffer_size: usize,

    /// Maximum number of arguments after the command keyword
    pub max_arguments: usize,

    // -------------------------------------------------------------------------
    // Client Configuration
    // -------------------------------------------------------------------------
    /// Address the client connects to
    pub server_addr: String,

    /// Connect timeout (milliseconds)
    pub connect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            poll_timeout_ms: 500,
            accept_poll_interval_ms: 20,
            send_buffer_size: 512,
            input_buffer_size: 512,
            max_arguments: 63,
            server_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            connect_timeout_ms: 2000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the break-loop poll timeout (in milliseconds)
    pub fn poll_timeout_ms(mut self, ms: u64) -> Self {
        self.config.poll_timeout_ms = ms;
        self
    }

    /// Set the accept retry interval (in milliseconds)
    pub fn accept_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.accept_poll_interval_ms = ms;
        self
    }

    /// Set the outgoing batch size (in bytes)
    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.config.send_buffer_size = size;
        self
    }

    /// Set the initial command buffer capacity (in bytes)
    pub fn input_buffer_size(mut self, size: usize) -> Self {
        self.config.input_buffer_size = size;
        self
    }

    /// Set the argument cap for split commands
    pub fn max_arguments(mut self, count: usize) -> Self {
        self.config.max_arguments = count;
        self
    }

    /// Set the address the client connects to
    pub fn server_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server_addr = addr.into();
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
