//! The UnrealScript debugger adapter.
//!
//! Speaks DAP with an editor over stdio (the normal, editor-spawned mode) or
//! a TCP port (development), and connects to the debugger interface loaded
//! into the game.

use std::fs::OpenOptions;
use std::net::{SocketAddr, TcpListener};

use anyhow::Context;
use clap::Parser;
use env_logger::Target;
use log::{info, warn};

use unreal_debugger::adapter::DapApplication;
use unreal_debugger::interface::DEFAULT_PORT;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// DAP over TCP on this port instead of stdio (0 = stdio).
    #[clap(long = "debug_port", default_value_t = 0)]
    debug_port: u16,

    /// Port the debugger interface listens on inside the game.
    #[clap(long, default_value_t = DEFAULT_PORT)]
    interface_port: u16,

    /// Optional log file for adapter diagnostics; stderr otherwise.
    #[clap(long)]
    log_file: Option<std::path::PathBuf>,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(path) = &args.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    let logger = builder.build();
    let filter = logger.filter();
    unreal_debugger::log::LOGGER.install(logger, filter);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    if args.debug_port == 0 {
        // Editor-spawned mode: stdout is the DAP channel, keep it clean.
        info!(target: "dap", "adapter starting on stdio");
        let app = DapApplication::new(std::io::stdin(), std::io::stdout(), args.interface_port);
        return app.run();
    }

    let addr: SocketAddr = ([127, 0, 0, 1], args.debug_port).into();
    let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
    info!(target: "dap", "adapter listening on {addr}");

    // One client at a time; each connection is its own debug session.
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "dap", "accept failed: {err:#}");
                continue;
            }
        };
        info!(target: "dap", "DAP client connected: {peer}");

        stream.set_nodelay(true).context("set_nodelay")?;
        let input = stream.try_clone().context("clone DAP stream")?;

        let app = DapApplication::new(input, stream, args.interface_port);
        if let Err(err) = app.run() {
            warn!(target: "dap", "session ended with error: {err:#}");
        }

        // The session took the logger over; point it back at stderr/file.
        init_logging(&args)?;
    }
}
