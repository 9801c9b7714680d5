//! The in-host half of the bridge.
//!
//! The host loads this library and drives it exclusively through the C entry
//! points in [`api`]; those all funnel through [`check_service`] before
//! touching the [`service::DebuggerService`] instance. Service lifecycle is
//! tracked by a process-global atomic state: the host owns the calling
//! threads and gives us no init/shutdown hooks beyond the entry points
//! themselves, so every entry point doubles as a lifecycle checkpoint.

pub mod api;
pub mod service;

use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;

use log::{error, info};
use once_cell::sync::Lazy;

use service::DebuggerService;
use std::sync::Arc;

/// Default TCP port the service listens on, overridable through the
/// `UNREAL_DEBUGGER_PORT` environment variable.
pub const DEFAULT_PORT: u16 = 10077;
pub const PORT_ENV_VAR: &str = "UNREAL_DEBUGGER_PORT";

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    /// Not running, or torn down after an error. Any entry point will try to
    /// clean up the previous instance and start a new one.
    Stopped = 0,
    /// Listening, no peer yet.
    Disconnected = 1,
    /// A debugger client is attached; entry points emit events.
    Connected = 2,
    /// The client or the host asked us to stop. No restart.
    Shutdown = 3,
}

static STATE: AtomicU8 = AtomicU8::new(ServiceState::Stopped as u8);

pub fn state() -> ServiceState {
    match STATE.load(Ordering::SeqCst) {
        0 => ServiceState::Stopped,
        1 => ServiceState::Disconnected,
        2 => ServiceState::Connected,
        _ => ServiceState::Shutdown,
    }
}

pub fn set_state(new: ServiceState) {
    STATE.store(new as u8, Ordering::SeqCst);
}

/// Move to `Stopped` unless a shutdown was already requested; the transport
/// error paths use this so an error racing a shutdown never resurrects the
/// service.
pub fn stop_unless_shutdown() {
    let _ = STATE.compare_exchange(
        ServiceState::Connected as u8,
        ServiceState::Stopped as u8,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
    let _ = STATE.compare_exchange(
        ServiceState::Disconnected as u8,
        ServiceState::Stopped as u8,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
}

struct Anchors {
    service: Mutex<Option<Arc<DebuggerService>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

static ANCHORS: Lazy<Anchors> = Lazy::new(|| Anchors {
    service: Mutex::new(None),
    worker: Mutex::new(None),
});

pub(crate) fn current_service() -> Option<Arc<DebuggerService>> {
    ANCHORS.service.lock().unwrap().clone()
}

/// The gate every host entry point passes through.
///
/// Observes the service state; on `Stopped` tears the old instance down and
/// starts a fresh one, on `Shutdown` tears down for good. Returns whether
/// events may be emitted right now (i.e. a client is attached).
pub fn check_service() -> bool {
    match state() {
        ServiceState::Connected => true,
        ServiceState::Disconnected => false,
        ServiceState::Stopped => {
            teardown();
            start_service();
            false
        }
        ServiceState::Shutdown => {
            teardown();
            false
        }
    }
}

fn start_service() {
    let port = std::env::var(PORT_ENV_VAR)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    match DebuggerService::bind(port) {
        Ok(service) => {
            info!(target: "interface", "debugger service listening on port {port}");
            let worker = service.spawn_worker();
            *ANCHORS.service.lock().unwrap() = Some(service);
            *ANCHORS.worker.lock().unwrap() = Some(worker);
            set_state(ServiceState::Disconnected);
        }
        Err(e) => {
            // Stay in `Stopped`; the next entry point retries.
            error!(target: "interface", "failed to bind debugger service on port {port}: {e}");
        }
    }
}

/// Destroy the current service instance and collect its worker thread. When
/// called on the worker itself (the host callback can re-enter the entry
/// points from the dispatch path) the thread is detached instead of joined.
fn teardown() {
    let service = ANCHORS.service.lock().unwrap().take();
    if let Some(service) = service {
        service.interrupt();
    }

    let worker = ANCHORS.worker.lock().unwrap().take();
    if let Some(worker) = worker {
        if worker.thread().id() == std::thread::current().id() {
            // Re-entered from the I/O worker; it unwinds on its own.
            drop(worker);
        } else if let Err(e) = worker.join() {
            error!(target: "interface", "service worker panicked: {e:?}");
        }
    }
}
