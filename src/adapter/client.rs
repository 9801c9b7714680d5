//! The adapter's connection to the interface service: one socket, one event
//! pump thread, one send-queue drain thread.

use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::Context as _;
use bytes::BytesMut;
use log::{error, info};

use crate::protocol::framing::{Transmitter, read_frame};
use crate::protocol::{Command, Event};

use super::debugger::{AtomicState, Debugger, DebuggerState};
use super::events::{self, BreakHook};
use super::signals::Signals;

/// Everything shared between the event pump and the DAP handlers.
pub struct DebugCtx {
    pub debugger: Mutex<Debugger>,
    pub state: AtomicState,
    pub signals: Signals,
    pub tx: Transmitter,
    /// Set once the interface said goodbye (or the transport died). Waits
    /// that were in flight get their signals fired so the handlers can bail.
    pub terminated: AtomicBool,
}

impl DebugCtx {
    fn new() -> Arc<DebugCtx> {
        let ctx = DebugCtx {
            debugger: Mutex::new(Debugger::new()),
            state: AtomicState::default(),
            signals: Signals::default(),
            tx: Transmitter::new(),
            terminated: AtomicBool::new(false),
        };
        // The debuggee is running until the first break; queries arriving
        // before then park on `breakpoint_hit`.
        ctx.state.store(DebuggerState::Busy);
        Arc::new(ctx)
    }

    pub fn send_command(&self, cmd: &Command) {
        self.tx.send(cmd.serialize());
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// End of session: no event will ever arrive again, so every parked
    /// handler gets woken and must check [`DebugCtx::is_terminated`].
    pub fn poison(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.signals.breakpoint_hit.fire();
        self.signals.line_received.fire();
        self.signals.watches_received.fire();
        self.signals.user_watches_received.fire();
        self.signals.breakpoint_added.fire();
    }
}

/// A live connection to the interface service.
pub struct Connection {
    pub ctx: Arc<DebugCtx>,
    stream: TcpStream,
    pump: Option<JoinHandle<()>>,
    drain: Option<JoinHandle<()>>,
}

impl Connection {
    /// Connect to the interface and start the reactor threads. `hook`
    /// receives the DAP-visible side effects (stopped/output/terminated).
    pub fn establish(port: u16, hook: Arc<dyn BreakHook>) -> anyhow::Result<Connection> {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .with_context(|| format!("connect to debugger interface on port {port}"))?;
        stream.set_nodelay(true).context("set_nodelay")?;
        info!(target: "adapter", "connected to debugger interface on port {port}");

        let ctx = DebugCtx::new();

        let drain = {
            let ctx = ctx.clone();
            let hook = hook.clone();
            let stream = stream.try_clone().context("clone stream for writer")?;
            std::thread::spawn(move || {
                if let Err(e) = ctx.tx.drain_loop(stream) {
                    error!(target: "adapter", "command send failed: {e}");
                    transport_lost(&ctx, &*hook);
                }
            })
        };

        let pump = {
            let ctx = ctx.clone();
            let stream = stream.try_clone().context("clone stream for reader")?;
            std::thread::spawn(move || event_pump(ctx, hook, stream))
        };

        Ok(Connection {
            ctx,
            stream,
            pump: Some(pump),
            drain: Some(drain),
        })
    }

    /// Close the socket and collect the reactor threads. The drain is
    /// collected before the socket goes down so a just-queued command (the
    /// `stopdebugging` of a disconnect) still reaches the interface.
    pub fn shutdown(mut self) {
        self.ctx.poison();
        self.ctx.tx.close();
        if let Some(drain) = self.drain.take() {
            let _ = drain.join();
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

fn transport_lost(ctx: &DebugCtx, hook: &dyn BreakHook) {
    if ctx.is_terminated() {
        return;
    }
    ctx.poison();
    ctx.tx.close();
    hook.on_terminated();
}

/// Reactor read path: one frame, one parsed event, one dispatch, in order.
fn event_pump(ctx: Arc<DebugCtx>, hook: Arc<dyn BreakHook>, mut stream: TcpStream) {
    let mut scratch = BytesMut::new();
    loop {
        let payload = match read_frame(&mut stream, &mut scratch) {
            Ok(p) => p,
            // Expected when the session was torn down under the reader.
            Err(_) if ctx.is_terminated() => return,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!(target: "adapter", "debugger interface closed the connection");
                transport_lost(&ctx, &*hook);
                return;
            }
            Err(e) => {
                error!(target: "adapter", "event read failed: {e}");
                transport_lost(&ctx, &*hook);
                return;
            }
        };

        let ev = match Event::parse(&payload) {
            Ok(ev) => ev,
            Err(e) => {
                error!(target: "adapter", "malformed event: {e}");
                transport_lost(&ctx, &*hook);
                return;
            }
        };

        if !events::dispatch_event(&ctx, &*hook, ev) {
            return;
        }
    }
}
