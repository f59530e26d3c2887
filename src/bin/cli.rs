//! emurdb CLI Client
//!
//! One-shot debugger commands against a running emurdb server.

use std::time::Duration;

use clap::{Parser, Subcommand};
use emurdb::client::{BreakpointFlags, MemorySlot, Session, TargetEvent, TargetState};
use emurdb::protocol::{parse_hex32, Processor, DEFAULT_PORT};
use emurdb::{Config, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// emurdb CLI
#[derive(Parser, Debug)]
#[command(name = "emurdb-cli")]
#[command(about = "CLI for the emurdb remote debug server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Seconds to wait for answers
    #[arg(short, long, default_value = "5")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show run state, PCs and machine config
    Status,

    /// Dump CPU and DSP registers
    Regs,

    /// Read CPU memory
    Mem {
        /// Start address (hex)
        #[arg(value_parser = hex_arg)]
        address: u32,

        /// Byte count (hex)
        #[arg(value_parser = hex_arg, default_value = "40")]
        size: u32,
    },

    /// Pause emulation
    Break,

    /// Resume emulation
    Run,

    /// Single-step one instruction
    Step {
        /// Step the DSP instead of the CPU
        #[arg(long)]
        dsp: bool,
    },

    /// Add a breakpoint, e.g. `pc = $e00030`
    Bp {
        expression: String,

        /// Remove after the first hit
        #[arg(long)]
        once: bool,
    },

    /// List breakpoints
    Bplist,

    /// List symbols
    Symlist,

    /// Send a raw command line
    Raw { text: String },
}

fn hex_arg(text: &str) -> std::result::Result<u32, String> {
    parse_hex32(text.trim_start_matches('$')).map_err(|e| e.to_string())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let timeout = Duration::from_secs(args.timeout);
    let config = Config::builder().server_addr(&args.server).build();

    let mut session = Session::connect(&config, TargetState::new())?;
    session.wait_ready(timeout)?;

    let dispatcher = session.dispatcher_mut();
    match &args.command {
        Commands::Status => dispatcher.send("status"),
        Commands::Regs => dispatcher.read_registers(),
        Commands::Mem { address, size } => dispatcher.read_memory(MemorySlot::MemoryView(0), *address, *size),
        Commands::Break => dispatcher.break_target(),
        Commands::Run => dispatcher.run(),
        Commands::Step { dsp } => dispatcher.step(if *dsp { Processor::Dsp } else { Processor::Cpu }),
        Commands::Bp { expression, once } => {
            let flags = if *once {
                BreakpointFlags::ONCE
            } else {
                BreakpointFlags::NONE
            };
            dispatcher.set_breakpoint(Processor::Cpu, expression, flags)
        }
        Commands::Bplist => dispatcher.read_breakpoints(),
        Commands::Symlist => dispatcher.read_symbols(),
        Commands::Raw { text } => dispatcher.send_raw(text),
    };
    session.wait_idle(timeout)?;

    print_result(&args.command, session.model_mut());
    session.close();
    Ok(())
}

fn print_result(command: &Commands, state: &mut TargetState) {
    let mut failed = false;
    for event in state.take_events() {
        if let TargetEvent::CommandFailed { keyword, code, .. } = event {
            println!("{} failed: NG {:X}", keyword, code);
            failed = true;
        }
    }
    if failed {
        return;
    }

    match command {
        Commands::Status => {
            let status = state.status;
            let config = state.config;
            println!(
                "{} pc=${:x} dsp_pc=${:x} ffwd={}",
                if status.running { "running" } else { "stopped" },
                status.pc,
                status.dsp_pc,
                status.fast_forward
            );
            println!(
                "machine={} cpu_level={} ram={} KB dsp={}",
                config.machine_type,
                config.cpu_level,
                config.ram_size / 1024,
                config.dsp_active
            );
        }
        Commands::Regs => {
            for (name, value) in &state.registers.cpu {
                println!("{:>12} = ${:08x}", name, value);
            }
            for (name, value) in &state.registers.dsp {
                println!("{:>12} = ${:06x}  (dsp)", name, value);
            }
        }
        Commands::Mem { .. } => {
            if let Some(block) = state.memory.get(&MemorySlot::MemoryView(0)) {
                for (row, chunk) in block.data.chunks(16).enumerate() {
                    let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
                    println!("{:08x}: {}", block.address as usize + row * 16, hex.join(" "));
                }
            }
        }
        Commands::Bp { .. } | Commands::Bplist => {
            for bp in &state.breakpoints {
                println!(
                    "{:>3}: {}  hits={}{}{}",
                    bp.id,
                    bp.expression,
                    bp.hit_count,
                    if bp.once { " once" } else { "" },
                    if bp.trace { " trace" } else { "" }
                );
            }
        }
        Commands::Symlist => {
            for symbol in &state.symbols {
                println!("{:08x} {} {}", symbol.address, symbol.kind, symbol.name);
            }
        }
        Commands::Break | Commands::Run | Commands::Step { .. } | Commands::Raw { .. } => {
            println!("OK");
        }
    }
}
