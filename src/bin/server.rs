//! emurdb Server Binary
//!
//! Runs a simulated machine with the remote debug server attached.
//! Type `break` on stdin to pause emulation, `quit` to exit.

use std::io::BufRead;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam::channel::{self, Receiver, TryRecvError};
use emurdb::protocol::DEFAULT_PORT;
use emurdb::server::{ConnectionContext, Emulator, HostEvents};
use emurdb::sim::{FrameOutcome, SimMachine};
use emurdb::Config;
use tracing_subscriber::{fmt, EnvFilter};

/// emurdb Server
#[derive(Parser, Debug)]
#[command(name = "emurdb-server")]
#[command(about = "Simulated machine with a remote debug server")]
#[command(version)]
struct Args {
    /// Listen address (host:port); only loopback is accepted
    #[arg(short, long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    listen: String,

    /// RAM size in KB
    #[arg(short, long, default_value = "4096")]
    ram_kb: usize,

    /// Emulate a DSP
    #[arg(long)]
    dsp: bool,

    /// CPU level (0 = 68000, 2 = 68020, 3 = 68030, ...)
    #[arg(long, default_value = "0")]
    cpu_level: u32,

    /// Frame length in milliseconds
    #[arg(short, long, default_value = "20")]
    frame_ms: u64,

    /// Start paused, waiting for a debugger
    #[arg(short, long)]
    r#break: bool,
}

/// Host side of the frame loop: lines typed on stdin
struct ConsoleHost {
    lines: Receiver<String>,
    quit: bool,
    break_pending: bool,
}

impl ConsoleHost {
    fn spawn() -> Self {
        let (tx, rx) = channel::unbounded();
        let spawned = thread::Builder::new()
            .name("emurdb-stdin".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("No stdin control: {}", e);
        }
        Self {
            lines: rx,
            quit: false,
            break_pending: false,
        }
    }

    fn take_break(&mut self) -> bool {
        std::mem::take(&mut self.break_pending)
    }
}

impl HostEvents for ConsoleHost {
    fn pump(&mut self) {
        loop {
            match self.lines.try_recv() {
                Ok(line) => match line.trim() {
                    "quit" | "q" => self.quit = true,
                    "break" | "b" => self.break_pending = true,
                    "" => {}
                    other => tracing::warn!("Unknown host command {:?}", other),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn quit_requested(&self) -> bool {
        self.quit
    }

    fn status_message(&mut self, text: &str) {
        println!("[emurdb] {}", text);
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,emurdb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("emurdb Server v{}", emurdb::VERSION);
    tracing::info!("RAM: {} KB, DSP: {}", args.ram_kb, args.dsp);

    let config = Config::builder().listen_addr(&args.listen).build();

    let mut ctx = match ConnectionContext::bind(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!("Failed to start remote debug: {}", e);
            std::process::exit(1);
        }
    };

    let mut sim = SimMachine::new(args.ram_kb * 1024).with_cpu_level(args.cpu_level);
    if args.dsp {
        sim = sim.with_dsp();
    }

    let mut host = ConsoleHost::spawn();
    let frame = Duration::from_millis(args.frame_ms);

    if args.r#break {
        ctx.break_loop(&mut sim, &mut host);
    }

    while !host.quit_requested() {
        let started = Instant::now();

        host.pump();
        ctx.update(&mut sim);

        if ctx.check_remote_break() || host.take_break() {
            ctx.break_loop(&mut sim, &mut host);
            continue;
        }

        match sim.run_frame() {
            FrameOutcome::Completed => {}
            FrameOutcome::Breakpoint(index) => {
                tracing::info!("Breakpoint {} hit at pc={:x}", index, sim.cpu_pc());
                ctx.break_loop(&mut sim, &mut host);
            }
            FrameOutcome::Stepped(processor) => {
                tracing::debug!("{:?} step complete", processor);
                ctx.break_loop(&mut sim, &mut host);
            }
        }

        if !sim.fast_forward() {
            if let Some(rest) = frame.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
    }

    ctx.shutdown();
    tracing::info!("Server stopped");
}
