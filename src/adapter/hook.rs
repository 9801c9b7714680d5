//! DAP-side implementation of [`BreakHook`]: host happenings become DAP
//! events on the shared server output. Runs on the event pump thread.

use std::io::Write;
use std::sync::{Arc, Mutex};

use dap::events::{Event, OutputEventBody, StoppedEventBody};
use dap::server::ServerOutput;
use dap::types::{OutputEventCategory, StoppedEventReason};

use super::events::BreakHook;
use super::UNREAL_THREAD_ID;

pub struct DapHook<W: Write> {
    output: Arc<Mutex<ServerOutput<W>>>,
}

impl<W: Write> DapHook<W> {
    pub fn new(output: Arc<Mutex<ServerOutput<W>>>) -> DapHook<W> {
        DapHook { output }
    }
}

impl<W: Write + Send> BreakHook for DapHook<W> {
    fn on_stopped(&self) {
        let mut output = self.output.lock().unwrap();

        let _ = output.send_event(Event::Stopped(StoppedEventBody {
            reason: StoppedEventReason::Breakpoint,
            description: None,
            thread_id: Some(UNREAL_THREAD_ID),
            preserve_focus_hint: None,
            text: None,
            all_threads_stopped: Some(true),
            hit_breakpoint_ids: None,
        }));
    }

    fn on_output(&self, text: &str) {
        let mut output = self.output.lock().unwrap();

        let _ = output.send_event(Event::Output(OutputEventBody {
            category: Some(OutputEventCategory::Console),
            output: format!("{text}\n"),
            ..Default::default()
        }));
    }

    fn on_terminated(&self) {
        let mut output = self.output.lock().unwrap();

        let _ = output.send_event(Event::Terminated(None));
    }
}
