//! Commands sent from the debugger client to the interface service.
//!
//! These mirror the commands understood by the host's debugger callback: the
//! service re-encodes each one as the plain-text string the callback expects
//! (see [`Command::host_string`]). They are structured on the wire anyway so
//! the service can validate what it received instead of trusting a raw string
//! from the network.

use bytes::{BufMut, BytesMut};

use super::{
    Error, Message, expect_consumed, get_bool, get_i32, get_string, get_u8, put_bool, put_i32,
    put_string, string_len,
};

mod tag {
    pub const ADD_BREAKPOINT: u8 = 0;
    pub const REMOVE_BREAKPOINT: u8 = 1;
    pub const ADD_WATCH: u8 = 2;
    pub const REMOVE_WATCH: u8 = 3;
    pub const CLEAR_WATCH: u8 = 4;
    pub const CHANGE_STACK: u8 = 5;
    pub const SET_DATA_WATCH: u8 = 6;
    pub const BREAK_ON_NONE: u8 = 7;
    pub const BREAK: u8 = 8;
    pub const STOP_DEBUGGING: u8 = 9;
    pub const GO: u8 = 10;
    pub const STEP_INTO: u8 = 11;
    pub const STEP_OVER: u8 = 12;
    pub const STEP_OUT_OF: u8 = 13;
    pub const TOGGLE_WATCH_INFO: u8 = 14;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    AddBreakpoint { class_name: String, line: i32 },
    RemoveBreakpoint { class_name: String, line: i32 },
    AddWatch { var_name: String },
    RemoveWatch { var_name: String },
    ClearWatch,
    ChangeStack { stack_id: i32 },
    SetDataWatch { var_name: String },
    BreakOnNone(bool),
    Break,
    StopDebugging,
    Go,
    StepInto,
    StepOver,
    StepOutOf,
    /// Pseudo command: not a real host command. Tells the interface service
    /// to stop (or resume) relaying watch traffic while the client walks the
    /// stack for line numbers.
    ToggleWatchInfo { send_watch_info: bool },
}

impl Command {
    pub fn tag(&self) -> u8 {
        match self {
            Command::AddBreakpoint { .. } => tag::ADD_BREAKPOINT,
            Command::RemoveBreakpoint { .. } => tag::REMOVE_BREAKPOINT,
            Command::AddWatch { .. } => tag::ADD_WATCH,
            Command::RemoveWatch { .. } => tag::REMOVE_WATCH,
            Command::ClearWatch => tag::CLEAR_WATCH,
            Command::ChangeStack { .. } => tag::CHANGE_STACK,
            Command::SetDataWatch { .. } => tag::SET_DATA_WATCH,
            Command::BreakOnNone(_) => tag::BREAK_ON_NONE,
            Command::Break => tag::BREAK,
            Command::StopDebugging => tag::STOP_DEBUGGING,
            Command::Go => tag::GO,
            Command::StepInto => tag::STEP_INTO,
            Command::StepOver => tag::STEP_OVER,
            Command::StepOutOf => tag::STEP_OUT_OF,
            Command::ToggleWatchInfo { .. } => tag::TOGGLE_WATCH_INFO,
        }
    }

    /// Serialised payload length, declared before writing a single byte so
    /// the cursor check below means something.
    fn declared_len(&self) -> usize {
        1 + match self {
            Command::AddBreakpoint { class_name, .. }
            | Command::RemoveBreakpoint { class_name, .. } => string_len(class_name) + 4,
            Command::AddWatch { var_name }
            | Command::RemoveWatch { var_name }
            | Command::SetDataWatch { var_name } => string_len(var_name),
            Command::ChangeStack { .. } => 4,
            Command::BreakOnNone(_) | Command::ToggleWatchInfo { .. } => 1,
            Command::ClearWatch
            | Command::Break
            | Command::StopDebugging
            | Command::Go
            | Command::StepInto
            | Command::StepOver
            | Command::StepOutOf => 0,
        }
    }

    pub fn serialize(&self) -> Message {
        let len = self.declared_len();
        let mut buf = BytesMut::with_capacity(len);
        buf.put_u8(self.tag());

        match self {
            Command::AddBreakpoint { class_name, line }
            | Command::RemoveBreakpoint { class_name, line } => {
                put_string(&mut buf, class_name);
                put_i32(&mut buf, *line);
            }
            Command::AddWatch { var_name }
            | Command::RemoveWatch { var_name }
            | Command::SetDataWatch { var_name } => put_string(&mut buf, var_name),
            Command::ChangeStack { stack_id } => put_i32(&mut buf, *stack_id),
            Command::BreakOnNone(v) => put_bool(&mut buf, *v),
            Command::ToggleWatchInfo { send_watch_info } => put_bool(&mut buf, *send_watch_info),
            Command::ClearWatch
            | Command::Break
            | Command::StopDebugging
            | Command::Go
            | Command::StepInto
            | Command::StepOver
            | Command::StepOutOf => {}
        }

        debug_assert_eq!(buf.len(), len);
        Message::from_payload(buf.freeze())
    }

    pub fn parse(payload: &[u8]) -> Result<Command, Error> {
        let mut buf = payload;
        if buf.is_empty() {
            return Err(Error::EmptyPayload);
        }

        let tag = get_u8(&mut buf, "command tag")?;
        let cmd = match tag {
            tag::ADD_BREAKPOINT => Command::AddBreakpoint {
                class_name: get_string(&mut buf, "class name")?,
                line: get_i32(&mut buf, "line number")?,
            },
            tag::REMOVE_BREAKPOINT => Command::RemoveBreakpoint {
                class_name: get_string(&mut buf, "class name")?,
                line: get_i32(&mut buf, "line number")?,
            },
            tag::ADD_WATCH => Command::AddWatch {
                var_name: get_string(&mut buf, "var name")?,
            },
            tag::REMOVE_WATCH => Command::RemoveWatch {
                var_name: get_string(&mut buf, "var name")?,
            },
            tag::CLEAR_WATCH => Command::ClearWatch,
            tag::CHANGE_STACK => Command::ChangeStack {
                stack_id: get_i32(&mut buf, "stack id")?,
            },
            tag::SET_DATA_WATCH => Command::SetDataWatch {
                var_name: get_string(&mut buf, "var name")?,
            },
            tag::BREAK_ON_NONE => Command::BreakOnNone(get_bool(&mut buf, "flag")?),
            tag::BREAK => Command::Break,
            tag::STOP_DEBUGGING => Command::StopDebugging,
            tag::GO => Command::Go,
            tag::STEP_INTO => Command::StepInto,
            tag::STEP_OVER => Command::StepOver,
            tag::STEP_OUT_OF => Command::StepOutOf,
            tag::TOGGLE_WATCH_INFO => Command::ToggleWatchInfo {
                send_watch_info: get_bool(&mut buf, "flag")?,
            },
            other => return Err(Error::UnknownCommandTag(other)),
        };

        expect_consumed(buf)?;
        Ok(cmd)
    }

    /// The legacy textual form the host callback expects. `None` for the
    /// watch-info pseudo command, which the service handles itself.
    pub fn host_string(&self) -> Option<String> {
        let s = match self {
            Command::AddBreakpoint { class_name, line } => {
                format!("addbreakpoint {class_name} {line}")
            }
            Command::RemoveBreakpoint { class_name, line } => {
                format!("removebreakpoint {class_name} {line}")
            }
            Command::AddWatch { var_name } => format!("addwatch {var_name}"),
            Command::RemoveWatch { var_name } => format!("removewatch {var_name}"),
            Command::ClearWatch => "clearwatch".to_string(),
            Command::ChangeStack { stack_id } => format!("changestack {stack_id}"),
            Command::SetDataWatch { var_name } => format!("setdatawatch {var_name}"),
            Command::BreakOnNone(true) => "breakonnone 1".to_string(),
            Command::BreakOnNone(false) => "breakonnone 0".to_string(),
            Command::Break => "break".to_string(),
            Command::StopDebugging => "stopdebugging".to_string(),
            Command::Go => "go".to_string(),
            Command::StepInto => "stepinto".to_string(),
            Command::StepOver => "stepover".to_string(),
            Command::StepOutOf => "stepoutof".to_string(),
            Command::ToggleWatchInfo { .. } => return None,
        };
        Some(s)
    }
}
