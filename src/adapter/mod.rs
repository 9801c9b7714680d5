//! The debugger client: a DAP session on one side, the interface socket on
//! the other.
//!
//! Requests are serviced on the DAP loop thread and may park on the signals
//! in [`signals`] until the event pump (see [`client`]) has seen the host
//! event they need. The orchestration rules live in the handler bodies here;
//! the state they read is owned by [`debugger::Debugger`].

pub mod client;
pub mod commands;
pub mod debugger;
pub mod events;
pub mod hook;
pub mod logger;
pub mod server;
pub mod signals;
pub mod sources;
pub mod varref;

use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use dap::events::Event;
use dap::requests::{Command, Request};
use dap::responses::{
    ContinueResponse, EvaluateResponse, ResponseBody, ScopesResponse, SetBreakpointsResponse,
    SetExceptionBreakpointsResponse, StackTraceResponse, ThreadsResponse, VariablesResponse,
};
use dap::types::{
    Breakpoint, Capabilities, ExceptionBreakpointsFilter, Scope, ScopePresentationhint, Source,
    StackFrame, Thread, Variable,
};
use itertools::Itertools;
use log::warn;
use serde::Deserialize;
use serde_json::Value;

use crate::protocol::WatchKind;

use client::{Connection, DebugCtx};
use debugger::DebuggerState;
use hook::DapHook;
use logger::DapLogger;
use server::DapServer;
use sources::SourceRoots;
use varref::VariableReference;

/// The host exposes exactly one script thread; DAP wants an id for it.
pub const UNREAL_THREAD_ID: i64 = 1;

/// Exception filter id for the host's one "exception": accessing `None`.
const BREAK_ON_NONE_FILTER: &str = "breakOnNone";

/// `launch`/`attach` arguments beyond the standard set.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct SessionArgs {
    #[serde(default)]
    source_roots: Vec<String>,
    /// Override for the interface port, mostly for tests and unusual setups.
    port: Option<u16>,
}

impl SessionArgs {
    fn parse(additional_data: Option<&Value>) -> anyhow::Result<SessionArgs> {
        match additional_data {
            Some(data) => Ok(serde_json::from_value(data.clone())?),
            None => Ok(SessionArgs::default()),
        }
    }
}

struct Session {
    conn: Option<Connection>,
    sources: Arc<SourceRoots>,
}

impl Session {
    fn ctx(&self) -> Arc<DebugCtx> {
        self.conn
            .as_ref()
            .expect("connection lives as long as the session")
            .ctx
            .clone()
    }
}

pub struct DapApplication<R: Read, W: Write + Send + 'static> {
    server: DapServer<R, W>,
    session: Option<Session>,
    interface_port: u16,
}

impl<R: Read, W: Write + Send + 'static> DapApplication<R, W> {
    pub fn new(input: R, output: W, interface_port: u16) -> DapApplication<R, W> {
        DapApplication {
            server: DapServer::new(input, output),
            session: None,
            interface_port,
        }
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        let logger = DapLogger::new(self.server.output());
        let filter = logger.filter();
        crate::log::LOGGER.install(logger, filter);

        loop {
            let req = match self.server.poll_request() {
                Ok(Some(req)) => req,
                Ok(None) => {
                    warn!(target: "dap", "unexpected end of input stream");
                    break;
                }
                Err(e) => {
                    log::error!(target: "dap", "{e}");
                    continue;
                }
            };

            match self.handle_request(req) {
                Ok(true) => { /* next request */ }
                Ok(false) => break,
                Err(e) => {
                    log::error!(target: "dap", "{e}");
                }
            }
        }

        if let Some(mut session) = self.session.take()
            && let Some(conn) = session.conn.take()
        {
            conn.shutdown();
        }

        Ok(())
    }

    fn handle_request(&mut self, req: Request) -> anyhow::Result<bool> {
        macro_rules! session_or_fail {
            () => {{
                let Some(session) = &self.session else {
                    self.server.respond_error(req.seq, "No running session")?;
                    anyhow::bail!("No running session");
                };
                session
            }};
        }

        match &req.command {
            Command::Initialize(_args) => {
                self.server.respond_success(
                    req.seq,
                    ResponseBody::Initialize(Capabilities {
                        supports_configuration_done_request: Some(true),
                        supports_delayed_stack_trace_loading: Some(true),
                        supports_value_formatting_options: Some(true),
                        exception_breakpoint_filters: Some(vec![ExceptionBreakpointsFilter {
                            filter: BREAK_ON_NONE_FILTER.to_string(),
                            label: "Break on access of None".to_string(),
                            description: None,
                            default: Some(false),
                            supports_condition: None,
                            condition_description: None,
                        }]),
                        ..Default::default()
                    }),
                )?;

                self.server.send_event(Event::Initialized)?;
            }
            Command::Launch(args) => {
                self.start_session(req.seq, args.additional_data.as_ref(), ResponseBody::Launch)?;
            }
            Command::Attach(args) => {
                self.start_session(req.seq, args.additional_data.as_ref(), ResponseBody::Attach)?;
            }
            Command::ConfigurationDone => {
                self.server
                    .respond_success(req.seq, ResponseBody::ConfigurationDone)?;
            }
            Command::Threads => {
                let _ = session_or_fail!();
                self.server.respond_success(
                    req.seq,
                    ResponseBody::Threads(ThreadsResponse {
                        threads: vec![Thread {
                            id: UNREAL_THREAD_ID,
                            name: "UnrealScript".to_string(),
                        }],
                    }),
                )?;
            }
            Command::SetBreakpoints(args) => {
                let session = session_or_fail!();
                let ctx = session.ctx();

                if args.source.source_reference.is_some_and(|r| r != 0) {
                    self.server
                        .respond_error(req.seq, "Source references are not supported")?;
                    return Ok(true);
                }
                let Some(path) = args.source.path.as_deref() else {
                    self.server
                        .respond_error(req.seq, "Breakpoint source has no path")?;
                    return Ok(true);
                };

                let class_name = match SourceRoots::source_to_class(path) {
                    Ok(name) => name,
                    Err(e) => {
                        self.server.respond_error(req.seq, format!("{e:#}"))?;
                        return Ok(true);
                    }
                };

                let lines = args
                    .breakpoints
                    .iter()
                    .flatten()
                    .map(|bp| bp.line)
                    .collect_vec();

                let breakpoints = set_class_breakpoints(&ctx, &class_name, &lines)?;

                self.server.respond_success(
                    req.seq,
                    ResponseBody::SetBreakpoints(SetBreakpointsResponse {
                        breakpoints: breakpoints
                            .into_iter()
                            .map(|(line, verified)| Breakpoint {
                                verified,
                                line: Some(line),
                                source: Some(args.source.clone()),
                                ..Default::default()
                            })
                            .collect_vec(),
                    }),
                )?;
            }
            Command::SetExceptionBreakpoints(args) => {
                let session = session_or_fail!();
                let ctx = session.ctx();

                ctx.break_on_none(
                    args.filters
                        .iter()
                        .any(|f| f.as_str() == BREAK_ON_NONE_FILTER),
                );

                self.server.respond_success(
                    req.seq,
                    ResponseBody::SetExceptionBreakpoints(SetExceptionBreakpointsResponse {
                        breakpoints: None,
                    }),
                )?;
            }
            Command::StackTrace(args) => {
                let session = session_or_fail!();
                let ctx = session.ctx();
                let sources = session.sources.clone();

                if args.thread_id != UNREAL_THREAD_ID {
                    self.server
                        .respond_error(req.seq, format!("Unknown thread id: {}", args.thread_id))?;
                    return Ok(true);
                }

                wait_until_stopped(&ctx)?;

                let start = args.start_frame.unwrap_or(0).max(0) as usize;
                let levels = args.levels.unwrap_or(0);

                let stack_depth = ctx.debugger.lock().unwrap().callstack().len();
                let end = if levels > 0 {
                    (start + levels as usize).min(stack_depth)
                } else {
                    stack_depth
                };

                fetch_missing_frame_lines(&ctx, start, end)?;

                let dbg = ctx.debugger.lock().unwrap();
                let stack_frames = dbg.callstack()[start.min(stack_depth)..end]
                    .iter()
                    .enumerate()
                    .map(|(offset, frame)| {
                        let path = sources
                            .class_to_source(&frame.class_name)
                            .map(|p| p.to_string_lossy().into_owned());
                        StackFrame {
                            id: (start + offset) as i64,
                            name: frame.function_name.clone(),
                            source: Some(Source {
                                name: Some(frame.class_name.clone()),
                                path,
                                ..Default::default()
                            }),
                            line: frame.line_number,
                            column: 0,
                            ..Default::default()
                        }
                    })
                    .collect_vec();

                self.server.respond_success(
                    req.seq,
                    ResponseBody::StackTrace(StackTraceResponse {
                        total_frames: Some(stack_depth as i64),
                        stack_frames,
                    }),
                )?;
            }
            Command::Scopes(args) => {
                let session = session_or_fail!();
                let ctx = session.ctx();

                wait_until_stopped(&ctx)?;

                let frame_index = args.frame_id.max(0) as usize;
                let scopes = match build_scopes(&ctx, frame_index) {
                    Ok(scopes) => scopes,
                    Err(e) => {
                        self.server.respond_error(req.seq, format!("{e:#}"))?;
                        return Ok(true);
                    }
                };

                self.server
                    .respond_success(req.seq, ResponseBody::Scopes(ScopesResponse { scopes }))?;
            }
            Command::Variables(args) => {
                let session = session_or_fail!();
                let ctx = session.ctx();

                wait_until_stopped(&ctx)?;

                if args.start.unwrap_or(0) != 0 || args.count.unwrap_or(0) != 0 {
                    // A real implementation would page; the host gives us the
                    // whole list at once anyway.
                    self.server
                        .respond_error(req.seq, "Chunked variable requests are not supported")?;
                    return Ok(true);
                }

                let var_ref = match VariableReference::decode(args.variables_reference) {
                    Ok(vr) => vr,
                    Err(e) => {
                        self.server.respond_error(req.seq, e.to_string())?;
                        return Ok(true);
                    }
                };

                ensure_frame_watches(&ctx, var_ref.frame)?;

                let variables = match read_children(&ctx, var_ref) {
                    Ok(vars) => vars,
                    Err(e) => {
                        self.server.respond_error(req.seq, format!("{e:#}"))?;
                        return Ok(true);
                    }
                };

                self.server.respond_success(
                    req.seq,
                    ResponseBody::Variables(VariablesResponse { variables }),
                )?;
            }
            Command::Evaluate(args) => {
                let session = session_or_fail!();
                let ctx = session.ctx();

                wait_until_stopped(&ctx)?;

                let frame_index = args.frame_id.unwrap_or(0).max(0) as usize;
                match evaluate_user_watch(&ctx, frame_index, &args.expression)? {
                    Some(response) => {
                        self.server
                            .respond_success(req.seq, ResponseBody::Evaluate(response))?;
                    }
                    None => {
                        self.server.respond_error(
                            req.seq,
                            format!("Cannot evaluate '{}'", args.expression),
                        )?;
                    }
                }
            }
            Command::Pause(_) => {
                let session = session_or_fail!();
                let ctx = session.ctx();
                resume(&ctx, |ctx| ctx.break_cmd());
                self.server.respond_success(req.seq, ResponseBody::Pause)?;
            }
            Command::Continue(_) => {
                let session = session_or_fail!();
                let ctx = session.ctx();
                resume(&ctx, |ctx| ctx.go());
                self.server.respond_success(
                    req.seq,
                    ResponseBody::Continue(ContinueResponse {
                        ..Default::default()
                    }),
                )?;
            }
            Command::Next(_) => {
                let session = session_or_fail!();
                let ctx = session.ctx();
                resume(&ctx, |ctx| ctx.step_over());
                self.server.respond_success(req.seq, ResponseBody::Next)?;
            }
            Command::StepIn(_) => {
                let session = session_or_fail!();
                let ctx = session.ctx();
                resume(&ctx, |ctx| ctx.step_into());
                self.server.respond_success(req.seq, ResponseBody::StepIn)?;
            }
            Command::StepOut(_) => {
                let session = session_or_fail!();
                let ctx = session.ctx();
                resume(&ctx, |ctx| ctx.step_out_of());
                self.server
                    .respond_success(req.seq, ResponseBody::StepOut)?;
            }
            Command::Disconnect(_) => {
                if let Some(mut session) = self.session.take() {
                    let ctx = session.ctx();
                    if !ctx.is_terminated() {
                        ctx.stop_debugging();
                    }
                    if let Some(conn) = session.conn.take() {
                        conn.shutdown();
                    }
                } else {
                    warn!(target: "dap", "disconnect without an active session");
                }
                self.server
                    .respond_success(req.seq, ResponseBody::Disconnect)?;
                return Ok(false);
            }
            other => {
                warn!(target: "dap", "unsupported command: {other:?}");
                self.server.respond_cancel(req.seq)?;
            }
        }

        Ok(true)
    }

    fn start_session(
        &mut self,
        seq: i64,
        additional_data: Option<&Value>,
        ok_body: ResponseBody,
    ) -> anyhow::Result<()> {
        let args = match SessionArgs::parse(additional_data) {
            Ok(args) => args,
            Err(e) => {
                self.server
                    .respond_error(seq, format!("Bad launch arguments: {e:#}"))?;
                return Ok(());
            }
        };

        let sources = match SourceRoots::new(args.source_roots) {
            Ok(sources) => Arc::new(sources),
            Err(e) => {
                self.server.respond_error(seq, format!("{e:#}"))?;
                return Ok(());
            }
        };

        let port = args.port.unwrap_or(self.interface_port);
        let hook = Arc::new(DapHook::new(self.server.output()));
        let conn = match Connection::establish(port, hook) {
            Ok(conn) => conn,
            Err(e) => {
                self.server.respond_error(seq, format!("{e:#}"))?;
                return Ok(());
            }
        };

        self.session = Some(Session {
            conn: Some(conn),
            sources,
        });

        log::info!(target: "dap", "debug session established");
        self.server.respond_success(seq, ok_body)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Orchestration. These run on the DAP loop thread and park on signals until
// the event pump delivers the host's answer. None of them may hold the
// debugger lock across a wait.
// ---------------------------------------------------------------------------

/// Query handlers may run while the host is still emitting the break
/// sequence; wait for it to complete first.
pub fn wait_until_stopped(ctx: &DebugCtx) -> anyhow::Result<()> {
    if ctx.state.load() == DebuggerState::Busy {
        ctx.signals.breakpoint_hit.wait();
    }
    if ctx.is_terminated() {
        bail!("debug session terminated");
    }
    Ok(())
}

/// Resume execution: reset the cursor and per-break state, mark the model
/// busy and fire off the command. Returns immediately; the next break will
/// raise `breakpoint_hit` again.
pub fn resume(ctx: &DebugCtx, send: impl FnOnce(&DebugCtx)) {
    ctx.debugger.lock().unwrap().prepare_resume();
    ctx.state.store(DebuggerState::Busy);
    ctx.signals.breakpoint_hit.reset();
    send(ctx);
}

/// Replace the breakpoints recorded for a class with `lines`. Every add waits
/// for the host's echo, which doubles as acceptance. Returns
/// `(line, verified)` pairs in request order.
pub fn set_class_breakpoints(
    ctx: &DebugCtx,
    class_name: &str,
    lines: &[i64],
) -> anyhow::Result<Vec<(i64, bool)>> {
    let previous = ctx.debugger.lock().unwrap().breakpoint_lines(class_name);
    for line in previous {
        ctx.remove_breakpoint(class_name, line as i32);
    }

    let mut results = Vec::with_capacity(lines.len());
    for &line in lines {
        ctx.state.store(DebuggerState::WaitingForAddBreakpoint);
        ctx.signals.breakpoint_added.reset();
        ctx.add_breakpoint(class_name, line as i32);
        ctx.signals.breakpoint_added.wait();
        ctx.state.store(DebuggerState::Normal);

        if ctx.is_terminated() {
            bail!("debug session terminated");
        }

        let verified = ctx
            .debugger
            .lock()
            .unwrap()
            .breakpoint_lines(class_name)
            .contains(&line);
        results.push((line, verified));
    }

    Ok(results)
}

/// Fill in line numbers for frames in `[start, end)` that still have none.
///
/// The host does not include line info in its stack trace; the only way to
/// learn a frame's line is to make it current and watch for the resulting
/// `EditorGotoLine`. Watch traffic is muted for the walk, the original frame
/// restored afterwards.
pub fn fetch_missing_frame_lines(ctx: &DebugCtx, start: usize, end: usize) -> anyhow::Result<()> {
    let missing = {
        let dbg = ctx.debugger.lock().unwrap();
        (start..end.min(dbg.callstack().len()))
            // A frame without a class never got described by the host;
            // changing to it would buy nothing.
            .filter(|&i| {
                dbg.callstack()[i].line_number == 0 && !dbg.callstack()[i].class_name.is_empty()
            })
            .collect_vec()
    };
    if missing.is_empty() {
        return Ok(());
    }

    let original = ctx.debugger.lock().unwrap().current_frame_index();
    ctx.toggle_watch_info(false);

    for index in missing {
        ctx.state.store(DebuggerState::WaitingForFrameLine);
        ctx.signals.line_received.reset();
        ctx.debugger.lock().unwrap().set_current_frame_index(index);
        ctx.change_stack(index as i32);
        ctx.signals.line_received.wait();

        if ctx.is_terminated() {
            bail!("debug session terminated");
        }
    }

    ctx.state.store(DebuggerState::Normal);
    ctx.debugger.lock().unwrap().set_current_frame_index(original);
    ctx.change_stack(original as i32);
    ctx.toggle_watch_info(true);

    Ok(())
}

/// Make sure `frame` has its watches. If not, change to it with watch traffic
/// enabled, wait for the batches, then slip back silently.
pub fn ensure_frame_watches(ctx: &DebugCtx, frame: usize) -> anyhow::Result<()> {
    {
        let dbg = ctx.debugger.lock().unwrap();
        match dbg.frame(frame) {
            Some(f) if !f.fetched_watches => {}
            Some(_) => return Ok(()),
            None => bail!("no frame {frame} in the current call stack"),
        }
    }

    let original = ctx.debugger.lock().unwrap().current_frame_index();

    ctx.state.store(DebuggerState::WaitingForFrameWatches);
    ctx.signals.watches_received.reset();
    ctx.debugger.lock().unwrap().set_current_frame_index(frame);
    ctx.change_stack(frame as i32);
    ctx.signals.watches_received.wait();

    if ctx.is_terminated() {
        bail!("debug session terminated");
    }

    ctx.state.store(DebuggerState::Normal);

    // Restore without the watch flood: we already have what we came for.
    ctx.toggle_watch_info(false);
    ctx.debugger.lock().unwrap().set_current_frame_index(original);
    ctx.change_stack(original as i32);
    ctx.toggle_watch_info(true);

    Ok(())
}

pub fn build_scopes(ctx: &DebugCtx, frame_index: usize) -> anyhow::Result<Vec<Scope>> {
    let dbg = ctx.debugger.lock().unwrap();
    let frame = dbg
        .frame(frame_index)
        .ok_or_else(|| anyhow!("no frame {frame_index} in the current call stack"))?;

    let scope = |name: &str, hint: Option<ScopePresentationhint>, kind: WatchKind| {
        let reference = VariableReference::new(kind, frame_index, 0).encode()?;
        Ok::<_, varref::RefError>(Scope {
            name: name.to_string(),
            presentation_hint: hint,
            variables_reference: reference,
            named_variables: frame
                .fetched_watches
                .then(|| frame.watches(kind).root_child_count() as i64),
            expensive: false,
            ..Default::default()
        })
    };

    Ok(vec![
        scope("Locals", Some(ScopePresentationhint::Locals), WatchKind::Local)?,
        scope("Globals", None, WatchKind::Global)?,
    ])
}

/// Children of the referenced watch node, each carrying a fresh reference iff
/// it has children of its own.
pub fn read_children(ctx: &DebugCtx, var_ref: VariableReference) -> anyhow::Result<Vec<Variable>> {
    let dbg = ctx.debugger.lock().unwrap();
    let frame = dbg
        .frame(var_ref.frame)
        .ok_or_else(|| anyhow!("no frame {} in the current call stack", var_ref.frame))?;

    let list = frame.watches(var_ref.kind);
    let node = list
        .node(var_ref.variable)
        .ok_or_else(|| anyhow!("unknown variables reference"))?;

    let mut variables = Vec::with_capacity(node.children.len());
    for &child_index in &node.children {
        let Some(child) = list.node(child_index) else {
            continue;
        };
        let reference = if child.children.is_empty() {
            0
        } else {
            VariableReference::new(var_ref.kind, var_ref.frame, child_index).encode()?
        };
        variables.push(Variable {
            name: child.name.clone(),
            value: child.value.clone(),
            type_field: Some(child.ty.clone()),
            variables_reference: reference,
            named_variables: (!child.children.is_empty())
                .then_some(child.children.len() as i64),
            ..Default::default()
        });
    }

    Ok(variables)
}

/// Evaluate by way of the host's user-watch list: look the expression up
/// under the frame's user root, adding it first if the host has not sent it
/// yet.
pub fn evaluate_user_watch(
    ctx: &DebugCtx,
    frame_index: usize,
    expression: &str,
) -> anyhow::Result<Option<EvaluateResponse>> {
    let lookup = |ctx: &DebugCtx| -> anyhow::Result<Option<EvaluateResponse>> {
        let dbg = ctx.debugger.lock().unwrap();
        let Some(frame) = dbg.frame(frame_index) else {
            bail!("no frame {frame_index} in the current call stack");
        };
        let list = frame.watches(WatchKind::User);
        let Some(index) = list.find_top_level(expression) else {
            return Ok(None);
        };
        let node = list.node(index).expect("index came from the same list");

        let reference = if node.children.is_empty() {
            0
        } else {
            VariableReference::new(WatchKind::User, frame_index, index).encode()?
        };
        Ok(Some(EvaluateResponse {
            result: node.value.clone(),
            type_field: Some(node.ty.clone()),
            variables_reference: reference,
            ..Default::default()
        }))
    };

    if let Some(found) = lookup(ctx)? {
        return Ok(Some(found));
    }

    // Not known yet: ask the host to watch it and wait for the batch.
    ctx.state.store(DebuggerState::WaitingForUserWatches);
    ctx.signals.user_watches_received.reset();
    ctx.debugger
        .lock()
        .unwrap()
        .set_current_frame_index(frame_index);
    ctx.add_watch(expression);
    ctx.signals.user_watches_received.wait();
    ctx.state.store(DebuggerState::Normal);

    if ctx.is_terminated() {
        bail!("debug session terminated");
    }

    lookup(ctx)
}
