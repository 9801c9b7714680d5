//! End-to-end tests: the real interface service on one side of a localhost
//! socket, the real adapter client on the other, and a scripted "host" that
//! answers callback strings the way the game does.
//!
//! The interface service lives in process globals (that is its production
//! shape), so every test here is serialised.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use serial_test::serial;

use unreal_debugger::adapter::client::{Connection, DebugCtx};
use unreal_debugger::adapter::debugger::DebuggerState;
use unreal_debugger::adapter::events::BreakHook;
use unreal_debugger::adapter::varref::VariableReference;
use unreal_debugger::adapter::{
    build_scopes, ensure_frame_watches, evaluate_user_watch, fetch_missing_frame_lines,
    read_children, resume, set_class_breakpoints,
};
use unreal_debugger::interface::{self, PORT_ENV_VAR, ServiceState, api};
use unreal_debugger::protocol::WatchKind;

// ---------------------------------------------------------------------------
// Scripted host
// ---------------------------------------------------------------------------

/// Commands the interface delivered to the "host" callback, in order.
static SINK: Mutex<Vec<String>> = Mutex::new(Vec::new());
/// Per-frame data the scripted host reports on `changestack`.
static FRAME_TABLE: Mutex<Option<HashMap<i32, (String, i32, String)>>> = Mutex::new(None);

fn cstr(s: &str) -> CString {
    CString::new(s).expect("no interior NUL in test strings")
}

fn host_load_class(name: &str) {
    let c = cstr(name);
    api::EditorLoadClass(c.as_ptr());
}

fn host_goto_line(line: i32) {
    api::EditorGotoLine(line, 1);
}

fn host_add_watch(kind: i32, parent: i32, name: &str, value: &str) -> i32 {
    let n = cstr(name);
    let v = cstr(value);
    api::AddAWatch(kind, parent, n.as_ptr(), v.as_ptr())
}

fn host_set_object(name: &str) {
    let c = cstr(name);
    api::SetCurrentObjectName(c.as_ptr());
}

fn host_stack_add(entry: &str) {
    let c = cstr(entry);
    api::CallStackAdd(c.as_ptr());
}

fn host_log(text: &str) {
    let c = cstr(text);
    api::AddLineToLog(c.as_ptr());
}

/// The host callback: record the command, then echo what the game would.
/// Runs on the interface's reader thread, re-entering the entry points the
/// way the real engine does.
extern "C" fn host_callback(raw: *const c_char) {
    let cmd = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
    SINK.lock().unwrap().push(cmd.clone());

    let mut parts = cmd.split(' ');
    match parts.next() {
        Some("addbreakpoint") => {
            let class = cstr(&parts.next().unwrap().to_uppercase());
            let line: i32 = parts.next().unwrap().parse().unwrap();
            api::AddBreakpoint(class.as_ptr(), line);
        }
        Some("removebreakpoint") => {
            let class = cstr(&parts.next().unwrap().to_uppercase());
            let line: i32 = parts.next().unwrap().parse().unwrap();
            api::RemoveBreakpoint(class.as_ptr(), line);
        }
        Some("changestack") => {
            let id: i32 = parts.next().unwrap().parse().unwrap();
            let frame = FRAME_TABLE
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|t| t.get(&id).cloned());
            if let Some((class, line, object)) = frame {
                host_load_class(&class);
                host_goto_line(line);
                // The real host always re-sends the frame's watches; the
                // interface mutes them when the client asked it to.
                api::LockList(0);
                host_add_watch(0, -1, "autoval ( Int, 0x0 )", &line.to_string());
                api::UnlockList(0);
                host_set_object(&object);
            }
        }
        Some("addwatch") => {
            let expr: String = parts.collect::<Vec<_>>().join(" ");
            api::LockList(2);
            host_add_watch(2, -1, &format!("{expr} ( Int, 0x0 )"), "5");
            api::UnlockList(2);
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Client-side recording hook
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingHook {
    stopped: AtomicBool,
    terminated: AtomicBool,
    output: Mutex<Vec<String>>,
}

impl BreakHook for RecordingHook {
    fn on_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn on_output(&self, text: &str) {
        self.output.lock().unwrap().push(text.to_string());
    }

    fn on_terminated(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn sink_contains(needle: &str) -> bool {
    SINK.lock().unwrap().iter().any(|s| s == needle)
}

/// Commands are handled in order; once `marker` shows up in the sink,
/// everything sent before it has been processed by the interface.
fn fence(ctx: &DebugCtx, marker: &str) {
    ctx.add_watch(marker);
    let expected = format!("addwatch {marker}");
    wait_until(&expected, || sink_contains(&expected));
}

/// Start a fresh interface service on `port` and connect the real client to
/// it. The very first connected `ShowDllForm` of the process is the host's
/// spurious startup form; consume it once so every test sees clean breaks.
fn start_bridge(port: u16) -> (Connection, Arc<RecordingHook>) {
    static CONSUME_STARTUP_FORM: Once = Once::new();

    SINK.lock().unwrap().clear();
    *FRAME_TABLE.lock().unwrap() = None;

    unsafe { std::env::set_var(PORT_ENV_VAR, port.to_string()) };
    interface::set_state(ServiceState::Stopped);
    api::SetCallback(host_callback as *mut c_void);

    // Any gated entry point boots the service.
    api::BuildHierarchy();
    assert_eq!(interface::state(), ServiceState::Disconnected);

    let hook = Arc::new(RecordingHook::default());
    let conn = Connection::establish(port, hook.clone()).expect("connect to interface");
    wait_until("interface to see the client", || {
        interface::state() == ServiceState::Connected
    });

    CONSUME_STARTUP_FORM.call_once(|| api::ShowDllForm());

    (conn, hook)
}

fn set_frame_table(entries: &[(i32, &str, i32, &str)]) {
    let table = entries
        .iter()
        .map(|&(id, class, line, object)| (id, (class.to_string(), line, object.to_string())))
        .collect();
    *FRAME_TABLE.lock().unwrap() = Some(table);
}

/// Drive the scripted host through a two-frame break: `P.A:foo` at line 42
/// on top of `P.B:bar`, with `locals` as the innermost frame's local batch.
fn host_break_two_frames(ctx: &DebugCtx, hook: &RecordingHook, locals: &[(i32, &str, &str)]) {
    resume(ctx, |c| c.go());
    wait_until("go to reach the host", || sink_contains("go"));

    host_load_class("P.A");
    host_goto_line(42);
    api::LockList(0);
    for &(parent, name, value) in locals {
        host_add_watch(0, parent, name, value);
    }
    api::UnlockList(0);
    api::LockList(1);
    api::UnlockList(1);
    api::CallStackClear();
    host_stack_add("Function P.B:bar");
    host_stack_add("Function P.A:foo");
    host_set_object("A_0");
    api::ShowDllForm();

    ctx.signals.breakpoint_hit.wait();
    assert!(hook.stopped.load(Ordering::SeqCst));
    assert_eq!(ctx.state.load(), DebuggerState::Normal);
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
#[serial]
fn test_breakpoint_set_and_replace() {
    let (conn, _hook) = start_bridge(10911);
    let ctx = conn.ctx.clone();

    let result = set_class_breakpoints(&ctx, "P.A", &[10, 20]).unwrap();
    assert_eq!(result, vec![(10, true), (20, true)]);
    assert!(sink_contains("addbreakpoint P.A 10"));
    assert!(sink_contains("addbreakpoint P.A 20"));
    assert_eq!(
        ctx.debugger.lock().unwrap().breakpoint_lines("p.a"),
        vec![10, 20]
    );

    // A second request for the same class replaces the recorded set.
    let result = set_class_breakpoints(&ctx, "P.A", &[30]).unwrap();
    assert_eq!(result, vec![(30, true)]);
    assert!(sink_contains("removebreakpoint P.A 10"));
    assert!(sink_contains("removebreakpoint P.A 20"));
    wait_until("remove echoes to clear the index", || {
        ctx.debugger.lock().unwrap().breakpoint_lines("P.A") == vec![30]
    });

    conn.shutdown();
}

#[test]
#[serial]
fn test_break_and_stack_trace_walk() {
    let (conn, hook) = start_bridge(10912);
    let ctx = conn.ctx.clone();
    set_frame_table(&[(0, "P.A", 42, "A_0"), (1, "P.B", 7, "B_0")]);

    host_break_two_frames(&ctx, &hook, &[(-1, "x ( Int, 0x4 )", "7")]);

    {
        let dbg = ctx.debugger.lock().unwrap();
        let stack = dbg.callstack();
        assert_eq!(stack.len(), 2);
        assert_eq!(
            (stack[0].class_name.as_str(), stack[0].function_name.as_str()),
            ("P.A", "foo")
        );
        assert_eq!(stack[0].line_number, 42);
        assert_eq!(stack[1].line_number, 0, "outer line unknown until walked");
    }

    fetch_missing_frame_lines(&ctx, 0, 2).unwrap();

    {
        let dbg = ctx.debugger.lock().unwrap();
        let stack = dbg.callstack();
        assert_eq!(stack[1].line_number, 7);
        // The walk ran with watch info muted: the frame-1 echo's watch batch
        // never reached us.
        assert!(stack[1].local_watches.is_empty());
        assert!(!stack[1].fetched_watches);
        assert_eq!(dbg.current_frame_index(), 0, "cursor restored");
    }

    // The walk changed to frame 1 and back; the watch toggle is internal to
    // the bridge and never reaches the host.
    let sink = SINK.lock().unwrap();
    let cs: Vec<_> = sink.iter().filter(|s| s.starts_with("changestack")).collect();
    assert_eq!(cs, ["changestack 1", "changestack 0"]);
    assert!(sink.iter().all(|s| !s.contains("watchinfo")));
    drop(sink);

    conn.shutdown();
}

#[test]
#[serial]
fn test_variables_paging_by_children() {
    let (conn, hook) = start_bridge(10913);
    let ctx = conn.ctx.clone();
    set_frame_table(&[(0, "P.A", 42, "A_0"), (1, "P.B", 7, "B_0")]);

    host_break_two_frames(
        &ctx,
        &hook,
        &[
            (-1, "v ( TPoint, 0x10 )", "{...}"),
            (1, "x ( Int, 0x14 )", "1"),
            (1, "y ( Int, 0x18 )", "2"),
        ],
    );

    // Scopes for the innermost frame: watches are already in.
    let scopes = build_scopes(&ctx, 0).unwrap();
    assert_eq!(scopes.len(), 2);
    assert_eq!(scopes[0].name, "Locals");
    let locals_ref = VariableReference::new(WatchKind::Local, 0, 0)
        .encode()
        .unwrap();
    assert_eq!(scopes[0].variables_reference, locals_ref);
    assert_eq!(scopes[0].named_variables, Some(1));

    // Top level: just `v`, expandable.
    let top = read_children(&ctx, VariableReference::decode(locals_ref).unwrap()).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].name, "v");
    assert_eq!(top[0].type_field.as_deref(), Some("TPoint"));
    let v_ref = VariableReference::new(WatchKind::Local, 0, 1).encode().unwrap();
    assert_eq!(top[0].variables_reference, v_ref);

    // Children of `v`: two leaves.
    let leaves = read_children(&ctx, VariableReference::decode(v_ref).unwrap()).unwrap();
    assert_eq!(
        leaves.iter().map(|v| v.name.as_str()).collect::<Vec<_>>(),
        ["x", "y"]
    );
    assert!(leaves.iter().all(|v| v.variables_reference == 0));

    // Scopes on the outer frame know nothing yet; fetching fills them in.
    let outer_scopes = build_scopes(&ctx, 1).unwrap();
    assert_eq!(outer_scopes[0].named_variables, None);

    ensure_frame_watches(&ctx, 1).unwrap();
    {
        let dbg = ctx.debugger.lock().unwrap();
        assert!(dbg.callstack()[1].fetched_watches);
        assert_eq!(
            dbg.callstack()[1].local_watches.find_top_level("autoval"),
            Some(1)
        );
    }

    conn.shutdown();
}

#[test]
#[serial]
fn test_evaluate_user_watch() {
    let (conn, hook) = start_bridge(10914);
    let ctx = conn.ctx.clone();
    set_frame_table(&[(0, "P.A", 42, "A_0")]);

    host_break_two_frames(&ctx, &hook, &[]);

    let response = evaluate_user_watch(&ctx, 0, "this.count").unwrap().unwrap();
    assert_eq!(response.result, "5");
    assert_eq!(response.type_field.as_deref(), Some("Int"));
    assert_eq!(response.variables_reference, 0);
    assert!(sink_contains("addwatch this.count"));

    // Second evaluate hits the cached user watch, no further host round trip.
    let count_before = SINK.lock().unwrap().len();
    let response = evaluate_user_watch(&ctx, 0, "this.count").unwrap().unwrap();
    assert_eq!(response.result, "5");
    assert_eq!(SINK.lock().unwrap().len(), count_before);

    conn.shutdown();
}

#[test]
#[serial]
fn test_silent_detach() {
    let (conn, hook) = start_bridge(10915);
    let ctx = conn.ctx.clone();

    host_log("Log: something ordinary");
    host_log(api::DETACH_SENTINEL);

    wait_until("client to observe termination", || {
        hook.terminated.load(Ordering::SeqCst)
    });
    assert_eq!(interface::state(), ServiceState::Shutdown);
    assert!(ctx.is_terminated());

    // Both log lines made it out before the goodbye.
    let output = hook.output.lock().unwrap().clone();
    assert_eq!(
        output,
        vec![
            "Log: something ordinary".to_string(),
            api::DETACH_SENTINEL.to_string()
        ]
    );

    // The service is gone; further host activity produces nothing.
    api::BuildHierarchy();
    assert_eq!(interface::state(), ServiceState::Shutdown);

    conn.shutdown();
}

#[test]
#[serial]
fn test_watch_info_suppression() {
    let (conn, _hook) = start_bridge(10916);
    let ctx = conn.ctx.clone();

    ctx.toggle_watch_info(false);
    fence(&ctx, "sync-off");

    // Muted: a full host batch emits nothing, but index assignment keeps its
    // contract.
    api::LockList(0);
    assert_eq!(host_add_watch(0, -1, "a ( Int, 0x0 )", "1"), 1);
    assert_eq!(host_add_watch(0, -1, "b ( Int, 0x4 )", "2"), 2);
    api::UnlockList(0);

    api::ClearAWatch(0);
    api::LockList(0);
    assert_eq!(
        host_add_watch(0, -1, "c ( Int, 0x8 )", "3"),
        1,
        "indices restart at 1 after ClearAWatch"
    );
    api::UnlockList(0);

    ctx.toggle_watch_info(true);
    fence(&ctx, "sync-on");

    // Audible again: this batch lands in the model.
    ctx.state.store(DebuggerState::WaitingForFrameWatches);
    ctx.signals.watches_received.reset();
    api::LockList(0);
    assert_eq!(host_add_watch(0, -1, "real ( Int, 0xc )", "9"), 2);
    api::UnlockList(0);
    ctx.signals.watches_received.wait();

    let dbg = ctx.debugger.lock().unwrap();
    let locals = &dbg.current_frame_ref().local_watches;
    assert!(locals.find_top_level("a").is_none(), "muted batch never arrived");
    assert!(locals.find_top_level("c").is_none());
    assert_eq!(locals.find_top_level("real"), Some(2));
    drop(dbg);

    conn.shutdown();
}
