//! The debugger service proper: one TCP peer, host entry points in, host
//! callback strings out.
//!
//! Host entry points run on threads the host owns; the reader worker owns the
//! socket receive path and dispatches each command to the host callback
//! before reading the next frame. Outgoing events ride the send queue and are
//! written by a single drain thread.

use std::io;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::BytesMut;
use log::{debug, error, info, warn};

use crate::protocol::framing::{Transmitter, read_frame};
use crate::protocol::{Command, Event, Watch, WatchKind};

use super::{ServiceState, api, set_state, stop_unless_shutdown};

/// Watch traffic between a `LockList`/`UnlockList` pair is batched into a
/// single event per list. Index assignment is synchronous (the host needs the
/// return value of `AddAWatch` immediately); the event send is not.
struct WatchRelay {
    /// Next index to assign, per kind. Reset to 1 by `ClearAWatch`.
    indices: [i32; 3],
    /// Batch under construction, per kind, between lock and unlock.
    pending: [Option<Vec<Watch>>; 3],
    /// When false the client asked us to mute watch traffic; indices keep
    /// advancing so the host's parent links stay consistent.
    send_watch_info: bool,
}

impl Default for WatchRelay {
    fn default() -> Self {
        WatchRelay {
            indices: [1; 3],
            pending: [None, None, None],
            send_watch_info: true,
        }
    }
}

pub struct DebuggerService {
    listener: TcpListener,
    peer: Mutex<Option<TcpStream>>,
    tx: Transmitter,
    watch: Mutex<WatchRelay>,
    drain: Mutex<Option<JoinHandle<()>>>,
    stopping: AtomicBool,
}

impl DebuggerService {
    pub fn bind(port: u16) -> io::Result<Arc<Self>> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        Ok(Arc::new(DebuggerService {
            listener,
            peer: Mutex::new(None),
            tx: Transmitter::new(),
            watch: Mutex::new(WatchRelay::default()),
            drain: Mutex::new(None),
            stopping: AtomicBool::new(false),
        }))
    }

    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        std::thread::spawn(move || service.run())
    }

    /// Reader worker: accept exactly one peer, then pump command frames until
    /// the connection dies or a shutdown is requested.
    fn run(self: Arc<Self>) {
        let stream = match self.listener.accept() {
            Ok((stream, addr)) => {
                info!(target: "interface", "debugger client connected from {addr}");
                stream
            }
            Err(e) => {
                if !self.stopping.load(Ordering::SeqCst) {
                    error!(target: "interface", "accept failed: {e}");
                    stop_unless_shutdown();
                }
                return;
            }
        };

        if self.stopping.load(Ordering::SeqCst) {
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            warn!(target: "interface", "set_nodelay: {e}");
        }

        let (write_half, shutdown_handle) = match (stream.try_clone(), stream.try_clone()) {
            (Ok(w), Ok(s)) => (w, s),
            (Err(e), _) | (_, Err(e)) => {
                error!(target: "interface", "clone peer stream: {e}");
                stop_unless_shutdown();
                return;
            }
        };
        *self.peer.lock().unwrap() = Some(shutdown_handle);

        // Single drain thread owns the write path for this connection. It
        // must exist before anyone can observe the connected state.
        let drain = std::thread::spawn({
            let service = Arc::clone(&self);
            move || {
                if let Err(e) = service.tx.drain_loop(write_half) {
                    error!(target: "interface", "event send failed: {e}");
                    service.transport_error();
                }
            }
        });
        *self.drain.lock().unwrap() = Some(drain);

        set_state(ServiceState::Connected);

        self.read_loop(stream);
    }

    fn read_loop(self: &Arc<Self>, mut stream: TcpStream) {
        let mut scratch = BytesMut::new();
        loop {
            match super::state() {
                ServiceState::Connected => {}
                _ => break,
            }

            let payload = match read_frame(&mut stream, &mut scratch) {
                Ok(p) => p,
                Err(e) => {
                    if !self.stopping.load(Ordering::SeqCst) {
                        error!(target: "interface", "command read failed: {e}");
                        self.transport_error();
                    }
                    break;
                }
            };

            match Command::parse(&payload) {
                Ok(cmd) => self.execute(cmd),
                Err(e) => {
                    // A bad frame means the stream is out of sync; nothing
                    // after it can be trusted.
                    error!(target: "interface", "malformed command: {e}");
                    self.transport_error();
                    break;
                }
            }
        }
    }

    /// Fatal connection error: stop the I/O, mark the service for restart
    /// (unless a shutdown is already in flight).
    fn transport_error(&self) {
        stop_unless_shutdown();
        self.stopping.store(true, Ordering::SeqCst);
        self.tx.close();
        if let Some(peer) = &*self.peer.lock().unwrap() {
            let _ = peer.shutdown(Shutdown::Both);
        }
    }

    /// Stop all I/O and collect the drain thread. Called from the lifecycle
    /// gate during teardown; may run on the reader worker itself.
    pub fn interrupt(&self) {
        self.stopping.store(true, Ordering::SeqCst);

        // Let the drain flush anything still queued (e.g. the final
        // `terminated` event), then collect it.
        self.tx.close();
        let drain = self.drain.lock().unwrap().take();
        if let Some(drain) = drain {
            let _ = drain.join();
        }

        // Unblock the reader.
        if let Some(peer) = self.peer.lock().unwrap().take() {
            let _ = peer.shutdown(Shutdown::Both);
        }

        // Unblock an accept that never got a peer.
        if let Ok(addr) = self.listener.local_addr() {
            let _ = TcpStream::connect(addr);
        }
    }

    // -----------------------------------------------------------------------
    // Events: host entry points, serialised onto the wire.
    // -----------------------------------------------------------------------

    fn send_event(&self, ev: Event) {
        debug!(target: "interface", "sending event {:?}", ev.tag());
        self.tx.send(ev.serialize());
    }

    pub fn show_dll_form(&self) {
        self.send_event(Event::ShowDllForm);
    }

    pub fn build_hierarchy(&self) {
        self.send_event(Event::BuildHierarchy);
    }

    pub fn clear_hierarchy(&self) {
        self.send_event(Event::ClearHierarchy);
    }

    pub fn add_class_to_hierarchy(&self, class_name: String) {
        self.send_event(Event::AddClassToHierarchy { class_name });
    }

    pub fn clear_a_watch(&self, kind: WatchKind) {
        let mut watch = self.watch.lock().unwrap();
        watch.indices[kind as usize] = 1;

        if !watch.send_watch_info {
            return;
        }

        if let Some(pending) = watch.pending[kind as usize].as_mut() {
            pending.clear();
        }
        drop(watch);

        self.send_event(Event::ClearAWatch { kind });
    }

    /// The one entry point with a return value: the index assigned here is
    /// what the host will pass back as `parent` for this watch's children.
    /// Assignment must happen even while watch traffic is muted.
    pub fn add_a_watch(&self, kind: WatchKind, parent: i32, name: String, value: String) -> i32 {
        let mut watch = self.watch.lock().unwrap();
        let assigned = watch.indices[kind as usize];
        watch.indices[kind as usize] += 1;

        if watch.send_watch_info {
            watch.pending[kind as usize]
                .get_or_insert_with(Vec::new)
                .push(Watch {
                    parent,
                    assigned,
                    name,
                    value,
                });
        }

        assigned
    }

    pub fn lock_list(&self, kind: WatchKind) {
        let mut watch = self.watch.lock().unwrap();
        if !watch.send_watch_info {
            return;
        }
        watch.pending[kind as usize] = Some(Vec::new());
        drop(watch);

        self.send_event(Event::LockList { kind });
    }

    pub fn unlock_list(&self, kind: WatchKind) {
        let mut watch = self.watch.lock().unwrap();
        if !watch.send_watch_info {
            return;
        }
        let watches = watch.pending[kind as usize].take().unwrap_or_default();
        drop(watch);

        self.send_event(Event::UnlockList { kind, watches });
    }

    pub fn add_breakpoint(&self, class_name: String, line: i32) {
        self.send_event(Event::AddBreakpoint { class_name, line });
    }

    pub fn remove_breakpoint(&self, class_name: String, line: i32) {
        self.send_event(Event::RemoveBreakpoint { class_name, line });
    }

    pub fn editor_load_class(&self, class_name: String) {
        self.send_event(Event::EditorLoadClass { class_name });
    }

    pub fn editor_goto_line(&self, line: i32, highlight: bool) {
        self.send_event(Event::EditorGotoLine { line, highlight });
    }

    pub fn add_line_to_log(&self, text: String) {
        self.send_event(Event::AddLineToLog { text });
    }

    pub fn call_stack_clear(&self) {
        self.send_event(Event::CallStackClear);
    }

    pub fn call_stack_add(&self, entry: String) {
        self.send_event(Event::CallStackAdd { entry });
    }

    pub fn set_current_object_name(&self, object_name: String) {
        self.send_event(Event::SetCurrentObjectName { object_name });
    }

    /// Shutdown requested by the host (detach sentinel): tell the client and
    /// flip the state so the gate tears us down.
    pub fn shutdown(&self) {
        self.send_event(Event::Terminated);
        set_state(ServiceState::Shutdown);
    }

    // -----------------------------------------------------------------------
    // Commands: read from the wire, re-encoded as host callback strings.
    // Runs on the reader worker; the dispatch completes before the next read.
    // -----------------------------------------------------------------------

    fn execute(&self, cmd: Command) {
        debug!(target: "interface", "executing command {:?}", cmd.tag());
        match cmd {
            Command::ToggleWatchInfo { send_watch_info } => {
                let mut watch = self.watch.lock().unwrap();
                watch.send_watch_info = send_watch_info;
                if !send_watch_info {
                    // Drop anything buffered; the client asked for silence.
                    watch.pending = [None, None, None];
                }
            }
            Command::StopDebugging => {
                set_state(ServiceState::Shutdown);
                api::invoke_callback("stopdebugging");
            }
            other => match other.host_string() {
                Some(s) => api::invoke_callback(&s),
                None => warn!(target: "interface", "command {:?} has no host form", other.tag()),
            },
        }
    }
}
