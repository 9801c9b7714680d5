//! One-shot latches parking DAP handler threads until an expected host event
//! arrives.
//!
//! Contract: single producer (the event pump), single consumer (the handler
//! that armed the wait). The consumer `reset`s before sending the command
//! that will eventually `fire`; firing before the wait begins must not
//! deadlock, so the latch keeps its state until reset.

use std::sync::{Condvar, Mutex};

#[derive(Default)]
pub struct Signal {
    fired: Mutex<bool>,
    cv: Condvar,
}

impl Signal {
    /// Block until fired. Returns immediately if the fire already happened.
    pub fn wait(&self) {
        let mut fired = self.fired.lock().unwrap();
        while !*fired {
            fired = self.cv.wait(fired).unwrap();
        }
    }

    pub fn fire(&self) {
        *self.fired.lock().unwrap() = true;
        self.cv.notify_all();
    }

    pub fn reset(&self) {
        *self.fired.lock().unwrap() = false;
    }
}

/// The rendezvous points between DAP handlers and the event pump.
#[derive(Default)]
pub struct Signals {
    /// Break sequence finished (fired on `ShowDllForm` after call-stack
    /// finalisation).
    pub breakpoint_hit: Signal,
    /// A watch-suppressed frame change completed; the frame's line number is
    /// populated.
    pub line_received: Signal,
    /// Watches for the frame under the cursor arrived.
    pub watches_received: Signal,
    /// A user-watch batch arrived.
    pub user_watches_received: Signal,
    /// The host acknowledged an `addbreakpoint`.
    pub breakpoint_added: Signal,
}
