//! Exported C entry points implementing the host's Debugger Interface ABI.
//!
//! The host resolves these symbols from the loaded library and calls them on
//! its own threads. Apart from `AddAWatch` every entry returns nothing; the
//! only channel back into the host is the string callback registered through
//! `SetCallback`.

#![allow(non_snake_case)]

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once};

use log::warn;

use crate::protocol::WatchKind;

use super::{check_service, current_service};

/// The callback the host hands us at startup: takes one command string,
/// returns nothing.
pub type UnrealCallback = unsafe extern "C" fn(*const c_char);

static CALLBACK: Mutex<Option<UnrealCallback>> = Mutex::new(None);

/// The host gives no explicit detach notification. The one and only entry we
/// get when the debugger is toggled off is this exact log line.
pub const DETACH_SENTINEL: &str = "Log: Detaching UnrealScript Debugger (currently detached)";

/// Re-encode a command as the legacy string and hand it to the host. Runs on
/// the service's reader thread, inline with command dispatch.
pub(crate) fn invoke_callback(command: &str) {
    let cb = *CALLBACK.lock().unwrap();
    let Some(cb) = cb else {
        warn!(target: "interface", "host callback not set, dropping '{command}'");
        return;
    };
    let Ok(cstr) = CString::new(command) else {
        warn!(target: "interface", "command contains NUL, dropping");
        return;
    };
    unsafe { cb(cstr.as_ptr()) };
}

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let logger = env_logger::Builder::from_default_env().build();
        let filter = logger.filter();
        crate::log::LOGGER.install(logger, filter);
    });
}

/// Owned copy of a host-provided C string; null becomes empty.
unsafe fn host_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

fn watch_kind(raw: c_int) -> Option<WatchKind> {
    match WatchKind::from_wire(raw) {
        Ok(kind) => Some(kind),
        Err(e) => {
            warn!(target: "interface", "host passed bad watch kind: {e}");
            None
        }
    }
}

/// Called by the host when the debugger starts, before any other entry.
#[unsafe(no_mangle)]
pub extern "C" fn SetCallback(callback: *mut c_void) {
    init_logging();
    let cb = (!callback.is_null())
        .then(|| unsafe { std::mem::transmute::<*mut c_void, UnrealCallback>(callback) });
    *CALLBACK.lock().unwrap() = cb;
}

/// Invoked once right after startup (not a real break) and then on every
/// break. The first call is swallowed; see the service docs.
#[unsafe(no_mangle)]
pub extern "C" fn ShowDllForm() {
    static SEEN_STARTUP_FORM: AtomicBool = AtomicBool::new(false);

    if check_service()
        && SEEN_STARTUP_FORM.swap(true, Ordering::SeqCst)
        && let Some(service) = current_service()
    {
        service.show_dll_form();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn BuildHierarchy() {
    if check_service()
        && let Some(service) = current_service()
    {
        service.build_hierarchy();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn ClearHierarchy() {
    if check_service()
        && let Some(service) = current_service()
    {
        service.clear_hierarchy();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn AddClassToHierarchy(class_name: *const c_char) {
    if check_service()
        && let Some(service) = current_service()
    {
        service.add_class_to_hierarchy(unsafe { host_str(class_name) });
    }
}

/// Legacy spelling; the host calls `ClearAWatch` these days but older builds
/// used this export for the same operation.
#[unsafe(no_mangle)]
pub extern "C" fn ClearWatch(kind: c_int) {
    ClearAWatch(kind);
}

#[unsafe(no_mangle)]
pub extern "C" fn ClearAWatch(kind: c_int) {
    if check_service()
        && let Some(kind) = watch_kind(kind)
        && let Some(service) = current_service()
    {
        service.clear_a_watch(kind);
    }
}

/// The only entry point with a return value: the index we assign becomes the
/// `parent` the host passes for this watch's children.
#[unsafe(no_mangle)]
pub extern "C" fn AddAWatch(
    kind: c_int,
    parent: c_int,
    name: *const c_char,
    value: *const c_char,
) -> c_int {
    if check_service()
        && let Some(kind) = watch_kind(kind)
        && let Some(service) = current_service()
    {
        return service.add_a_watch(kind, parent, unsafe { host_str(name) }, unsafe {
            host_str(value)
        });
    }
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn LockList(kind: c_int) {
    if check_service()
        && let Some(kind) = watch_kind(kind)
        && let Some(service) = current_service()
    {
        service.lock_list(kind);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn UnlockList(kind: c_int) {
    if check_service()
        && let Some(kind) = watch_kind(kind)
        && let Some(service) = current_service()
    {
        service.unlock_list(kind);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn AddBreakpoint(class_name: *const c_char, line_number: c_int) {
    if check_service()
        && let Some(service) = current_service()
    {
        service.add_breakpoint(unsafe { host_str(class_name) }, line_number);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn RemoveBreakpoint(class_name: *const c_char, line_number: c_int) {
    if check_service()
        && let Some(service) = current_service()
    {
        service.remove_breakpoint(unsafe { host_str(class_name) }, line_number);
    }
}

/// Class name for the frame the host is about to describe. Precedes
/// `ShowDllForm` on a break.
#[unsafe(no_mangle)]
pub extern "C" fn EditorLoadClass(class_name: *const c_char) {
    if check_service()
        && let Some(service) = current_service()
    {
        service.editor_load_class(unsafe { host_str(class_name) });
    }
}

/// Line number for the class from `EditorLoadClass`.
#[unsafe(no_mangle)]
pub extern "C" fn EditorGotoLine(line_number: c_int, highlight: c_int) {
    if check_service()
        && let Some(service) = current_service()
    {
        service.editor_goto_line(line_number, highlight != 0);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn AddLineToLog(text: *const c_char) {
    if !check_service() {
        return;
    }
    let Some(service) = current_service() else {
        return;
    };

    let text = unsafe { host_str(text) };
    service.add_line_to_log(text.clone());

    // The detach sentinel is the only shutdown notification the host gives
    // us. Note this is not reached when the client requested the stop: the
    // `stopdebugging` command already moved the state to shutdown, and
    // check_service above returns false.
    if text == DETACH_SENTINEL {
        service.shutdown();
        // The host will not call us again; run the gate ourselves to tear
        // the service down.
        check_service();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn CallStackClear() {
    if check_service()
        && let Some(service) = current_service()
    {
        service.call_stack_clear();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn CallStackAdd(entry: *const c_char) {
    if check_service()
        && let Some(service) = current_service()
    {
        service.call_stack_add(unsafe { host_str(entry) });
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SetCurrentObjectName(object_name: *const c_char) {
    if check_service()
        && let Some(service) = current_service()
    {
        service.set_current_object_name(unsafe { host_str(object_name) });
    }
}

/// Documented as unused by the host.
#[unsafe(no_mangle)]
pub extern "C" fn DebugWindowState(_state: c_int) {}
