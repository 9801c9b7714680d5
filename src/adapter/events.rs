//! Dispatch of wire events into the debugger-state model.
//!
//! Runs on the event pump thread, so mutations here never race each other.
//! DAP-visible consequences (stopped/output/terminated events) go through
//! [`BreakHook`] so this module stays independent of the DAP transport.

use log::{debug, warn};

use crate::protocol::{Event, Watch, WatchKind};

use super::client::DebugCtx;
use super::debugger::DebuggerState;

/// Side effects of host events that must surface in the DAP session.
pub trait BreakHook: Send + Sync {
    /// Execution stopped and the state model is ready to query.
    fn on_stopped(&self);
    /// A log line from the host.
    fn on_output(&self, text: &str);
    /// The interface is gone; the session is over.
    fn on_terminated(&self);
}

/// Apply one event. Returns `false` when the pump should stop.
pub fn dispatch_event(ctx: &DebugCtx, hook: &dyn BreakHook, ev: Event) -> bool {
    debug!(target: "adapter", "event: {ev:?}");

    match ev {
        Event::ShowDllForm => show_dll_form(ctx, hook),
        Event::BuildHierarchy | Event::ClearHierarchy => {}
        Event::AddClassToHierarchy { class_name } => {
            debug!(target: "adapter", "class hierarchy: {class_name}");
        }
        Event::LockList { .. } => {
            ctx.debugger.lock().unwrap().watch_lock_depth += 1;
        }
        Event::UnlockList { kind, watches } => unlock_list(ctx, kind, watches),
        Event::ClearAWatch { kind } => {
            let mut dbg = ctx.debugger.lock().unwrap();
            dbg.current_frame_mut().watches_mut(kind).clear();
        }
        Event::AddBreakpoint { class_name, line } => {
            ctx.debugger
                .lock()
                .unwrap()
                .record_breakpoint(&class_name, line as i64);
            if ctx.state.load() == DebuggerState::WaitingForAddBreakpoint {
                ctx.signals.breakpoint_added.fire();
            }
        }
        Event::RemoveBreakpoint { class_name, line } => {
            ctx.debugger
                .lock()
                .unwrap()
                .forget_breakpoint(&class_name, line as i64);
        }
        Event::EditorLoadClass { class_name } => {
            ctx.debugger.lock().unwrap().current_frame_mut().class_name = class_name;
        }
        Event::EditorGotoLine { line, .. } => {
            ctx.debugger.lock().unwrap().current_frame_mut().line_number = line as i64;
        }
        Event::AddLineToLog { text } => hook.on_output(&text),
        Event::CallStackClear => ctx.debugger.lock().unwrap().clear_callstack(),
        Event::CallStackAdd { entry } => ctx.debugger.lock().unwrap().add_callstack(&entry),
        Event::SetCurrentObjectName { object_name } => {
            ctx.debugger.lock().unwrap().current_object_name = object_name;
            // During a watch-suppressed frame change this is the last event
            // the host sends; the line number has arrived by now.
            if ctx.state.load() == DebuggerState::WaitingForFrameLine {
                ctx.signals.line_received.fire();
            }
        }
        Event::Terminated => {
            ctx.poison();
            hook.on_terminated();
            return false;
        }
    }
    true
}

/// The break sequence is complete: fix up the call stack, wake whoever waits
/// for the break and report it upward.
fn show_dll_form(ctx: &DebugCtx, hook: &dyn BreakHook) {
    ctx.debugger.lock().unwrap().finalize_callstack();
    ctx.state.store(DebuggerState::Normal);
    ctx.signals.breakpoint_hit.fire();
    hook.on_stopped();
}

fn unlock_list(ctx: &DebugCtx, kind: WatchKind, watches: Vec<Watch>) {
    let mut dbg = ctx.debugger.lock().unwrap();

    {
        let list = dbg.current_frame_mut().watches_mut(kind);
        for w in &watches {
            if w.assigned < 1 {
                warn!(target: "adapter", "watch with bad assigned index {}", w.assigned);
                continue;
            }
            list.insert(w.assigned as usize, w.parent, &w.name, &w.value);
        }
    }

    dbg.watch_lock_depth -= 1;
    if dbg.watch_lock_depth > 0 {
        return;
    }
    dbg.watch_lock_depth = 0;

    match ctx.state.load() {
        DebuggerState::WaitingForFrameWatches => {
            dbg.current_frame_mut().fetched_watches = true;
            drop(dbg);
            ctx.signals.watches_received.fire();
        }
        DebuggerState::WaitingForUserWatches => {
            drop(dbg);
            ctx.signals.user_watches_received.fire();
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::adapter::client::DebugCtx;
    use crate::adapter::debugger::{AtomicState, Debugger};
    use crate::adapter::signals::Signals;
    use crate::protocol::framing::Transmitter;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingHook {
        stopped: AtomicUsize,
        terminated: AtomicBool,
        output: Mutex<Vec<String>>,
    }

    impl BreakHook for RecordingHook {
        fn on_stopped(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_output(&self, text: &str) {
            self.output.lock().unwrap().push(text.to_string());
        }

        fn on_terminated(&self) {
            self.terminated.store(true, Ordering::SeqCst);
        }
    }

    fn test_ctx() -> Arc<DebugCtx> {
        Arc::new(DebugCtx {
            debugger: Mutex::new(Debugger::new()),
            state: AtomicState::default(),
            signals: Signals::default(),
            tx: Transmitter::new(),
            terminated: AtomicBool::new(false),
        })
    }

    fn feed(ctx: &DebugCtx, hook: &RecordingHook, events: impl IntoIterator<Item = Event>) {
        for ev in events {
            dispatch_event(ctx, hook, ev);
        }
    }

    /// The full break sequence from the host, in its documented order.
    #[test]
    fn test_break_sequence() {
        let ctx = test_ctx();
        let hook = RecordingHook::default();
        ctx.state.store(DebuggerState::Busy);

        feed(
            &ctx,
            &hook,
            [
                Event::EditorLoadClass {
                    class_name: "P.A".to_string(),
                },
                Event::EditorGotoLine {
                    line: 42,
                    highlight: true,
                },
                Event::LockList {
                    kind: WatchKind::Local,
                },
                Event::UnlockList {
                    kind: WatchKind::Local,
                    watches: vec![Watch {
                        parent: -1,
                        assigned: 1,
                        name: "x ( Int, 0xbeef )".to_string(),
                        value: "7".to_string(),
                    }],
                },
                Event::CallStackClear,
                Event::CallStackAdd {
                    entry: "Function P.B:bar".to_string(),
                },
                Event::CallStackAdd {
                    entry: "Function P.A:foo".to_string(),
                },
                Event::SetCurrentObjectName {
                    object_name: "A_0".to_string(),
                },
                Event::ShowDllForm,
            ],
        );

        assert_eq!(hook.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.state.load(), DebuggerState::Normal);

        let dbg = ctx.debugger.lock().unwrap();
        let stack = dbg.callstack();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack[0].function_name, "foo");
        assert_eq!(stack[0].line_number, 42);
        assert_eq!(stack[0].local_watches.find_top_level("x"), Some(1));
        assert_eq!(stack[1].function_name, "bar");
        assert_eq!(stack[1].line_number, 0);
        assert_eq!(dbg.current_object_name, "A_0");
        drop(dbg);

        // And the handler-side rendezvous fired.
        ctx.signals.breakpoint_hit.wait();
    }

    #[test]
    fn test_watch_fetch_fires_watches_received() {
        let ctx = test_ctx();
        let hook = RecordingHook::default();
        ctx.state.store(DebuggerState::WaitingForFrameWatches);

        feed(
            &ctx,
            &hook,
            [
                Event::LockList {
                    kind: WatchKind::Local,
                },
                Event::UnlockList {
                    kind: WatchKind::Local,
                    watches: vec![],
                },
            ],
        );

        ctx.signals.watches_received.wait();
        assert!(ctx.debugger.lock().unwrap().current_frame_ref().fetched_watches);
    }

    #[test]
    fn test_nested_locks_fire_once_at_depth_zero() {
        let ctx = test_ctx();
        let hook = RecordingHook::default();
        ctx.state.store(DebuggerState::WaitingForFrameWatches);

        feed(
            &ctx,
            &hook,
            [
                Event::LockList {
                    kind: WatchKind::Local,
                },
                Event::LockList {
                    kind: WatchKind::Global,
                },
                Event::UnlockList {
                    kind: WatchKind::Global,
                    watches: vec![],
                },
            ],
        );
        // Depth is still 1; the frame is not yet complete.
        assert!(!ctx.debugger.lock().unwrap().current_frame_ref().fetched_watches);

        feed(
            &ctx,
            &hook,
            [Event::UnlockList {
                kind: WatchKind::Local,
                watches: vec![],
            }],
        );
        ctx.signals.watches_received.wait();
    }

    #[test]
    fn test_breakpoint_echo_updates_index_and_fires() {
        let ctx = test_ctx();
        let hook = RecordingHook::default();
        ctx.state.store(DebuggerState::WaitingForAddBreakpoint);

        feed(
            &ctx,
            &hook,
            [Event::AddBreakpoint {
                class_name: "P.A".to_string(),
                line: 10,
            }],
        );

        ctx.signals.breakpoint_added.wait();
        assert_eq!(ctx.debugger.lock().unwrap().breakpoint_lines("P.A"), vec![10]);

        feed(
            &ctx,
            &hook,
            [Event::RemoveBreakpoint {
                class_name: "P.A".to_string(),
                line: 10,
            }],
        );
        assert!(ctx.debugger.lock().unwrap().breakpoint_lines("P.A").is_empty());
    }

    #[test]
    fn test_log_lines_and_termination() {
        let ctx = test_ctx();
        let hook = RecordingHook::default();

        assert!(dispatch_event(
            &ctx,
            &hook,
            Event::AddLineToLog {
                text: "Log: hello".to_string(),
            },
        ));
        assert!(!dispatch_event(&ctx, &hook, Event::Terminated));

        assert_eq!(hook.output.lock().unwrap().as_slice(), ["Log: hello"]);
        assert!(hook.terminated.load(Ordering::SeqCst));
        assert!(ctx.is_terminated());
    }

    #[test]
    fn test_object_name_fires_line_received_during_walk() {
        let ctx = test_ctx();
        let hook = RecordingHook::default();
        ctx.state.store(DebuggerState::WaitingForFrameLine);

        // Host answers a changestack with class/line/object-name.
        feed(
            &ctx,
            &hook,
            [
                Event::EditorLoadClass {
                    class_name: "P.B".to_string(),
                },
                Event::EditorGotoLine {
                    line: 7,
                    highlight: false,
                },
                Event::SetCurrentObjectName {
                    object_name: "B_0".to_string(),
                },
            ],
        );

        ctx.signals.line_received.wait();
        assert_eq!(ctx.debugger.lock().unwrap().current_frame_ref().line_number, 7);
    }
}
