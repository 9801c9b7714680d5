//! Typed command senders. Thin wrappers over the send queue so handlers read
//! like the protocol they speak.

use crate::protocol::Command;

use super::client::DebugCtx;

impl DebugCtx {
    pub fn add_breakpoint(&self, class_name: &str, line: i32) {
        self.send_command(&Command::AddBreakpoint {
            class_name: class_name.to_string(),
            line,
        });
    }

    pub fn remove_breakpoint(&self, class_name: &str, line: i32) {
        self.send_command(&Command::RemoveBreakpoint {
            class_name: class_name.to_string(),
            line,
        });
    }

    pub fn add_watch(&self, var_name: &str) {
        self.send_command(&Command::AddWatch {
            var_name: var_name.to_string(),
        });
    }

    pub fn remove_watch(&self, var_name: &str) {
        self.send_command(&Command::RemoveWatch {
            var_name: var_name.to_string(),
        });
    }

    pub fn clear_watch(&self) {
        self.send_command(&Command::ClearWatch);
    }

    pub fn change_stack(&self, stack_id: i32) {
        self.send_command(&Command::ChangeStack { stack_id });
    }

    pub fn set_data_watch(&self, var_name: &str) {
        self.send_command(&Command::SetDataWatch {
            var_name: var_name.to_string(),
        });
    }

    pub fn break_on_none(&self, value: bool) {
        self.send_command(&Command::BreakOnNone(value));
    }

    pub fn break_cmd(&self) {
        self.send_command(&Command::Break);
    }

    pub fn stop_debugging(&self) {
        self.send_command(&Command::StopDebugging);
    }

    pub fn go(&self) {
        self.send_command(&Command::Go);
    }

    pub fn step_into(&self) {
        self.send_command(&Command::StepInto);
    }

    pub fn step_over(&self) {
        self.send_command(&Command::StepOver);
    }

    pub fn step_out_of(&self) {
        self.send_command(&Command::StepOutOf);
    }

    pub fn toggle_watch_info(&self, send_watch_info: bool) {
        self.send_command(&Command::ToggleWatchInfo { send_watch_info });
    }
}
