//! Events sent from the interface service to the debugger client.
//!
//! Each event corresponds to one entry point of the host's debugger
//! interface, except [`Event::UnlockList`] (which carries the watch batch
//! buffered between a lock/unlock pair) and [`Event::Terminated`] (synthesised
//! by the service when the host detaches).

use bytes::{BufMut, BytesMut};

use super::{
    Error, Message, WatchKind, expect_consumed, get_bool, get_i32, get_string, get_u8, put_bool,
    put_i32, put_string, string_len,
};

mod tag {
    pub const SHOW_DLL_FORM: u8 = 0;
    pub const BUILD_HIERARCHY: u8 = 1;
    pub const CLEAR_HIERARCHY: u8 = 2;
    pub const ADD_CLASS_TO_HIERARCHY: u8 = 3;
    pub const LOCK_LIST: u8 = 4;
    pub const UNLOCK_LIST: u8 = 5;
    pub const CLEAR_A_WATCH: u8 = 6;
    pub const ADD_BREAKPOINT: u8 = 7;
    pub const REMOVE_BREAKPOINT: u8 = 8;
    pub const EDITOR_LOAD_CLASS: u8 = 9;
    pub const EDITOR_GOTO_LINE: u8 = 10;
    pub const ADD_LINE_TO_LOG: u8 = 11;
    pub const CALL_STACK_CLEAR: u8 = 12;
    pub const CALL_STACK_ADD: u8 = 13;
    pub const SET_CURRENT_OBJECT_NAME: u8 = 14;
    pub const TERMINATED: u8 = 15;
}

/// One watch entry as the host reported it. `parent` is the index the host
/// passed back from an earlier `AddAWatch` return value (−1 for top level),
/// `assigned` is the index the service assigned to this entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Watch {
    pub parent: i32,
    pub assigned: i32,
    pub name: String,
    pub value: String,
}

impl Watch {
    fn wire_len(&self) -> usize {
        4 + 4 + string_len(&self.name) + string_len(&self.value)
    }

    fn put(&self, buf: &mut BytesMut) {
        put_i32(buf, self.parent);
        put_i32(buf, self.assigned);
        put_string(buf, &self.name);
        put_string(buf, &self.value);
    }

    fn get(buf: &mut &[u8]) -> Result<Watch, Error> {
        Ok(Watch {
            parent: get_i32(buf, "watch parent")?,
            assigned: get_i32(buf, "watch index")?,
            name: get_string(buf, "watch name")?,
            value: get_string(buf, "watch value")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    ShowDllForm,
    BuildHierarchy,
    ClearHierarchy,
    AddClassToHierarchy { class_name: String },
    LockList { kind: WatchKind },
    UnlockList { kind: WatchKind, watches: Vec<Watch> },
    ClearAWatch { kind: WatchKind },
    AddBreakpoint { class_name: String, line: i32 },
    RemoveBreakpoint { class_name: String, line: i32 },
    EditorLoadClass { class_name: String },
    EditorGotoLine { line: i32, highlight: bool },
    AddLineToLog { text: String },
    CallStackClear,
    CallStackAdd { entry: String },
    SetCurrentObjectName { object_name: String },
    Terminated,
}

impl Event {
    pub fn tag(&self) -> u8 {
        match self {
            Event::ShowDllForm => tag::SHOW_DLL_FORM,
            Event::BuildHierarchy => tag::BUILD_HIERARCHY,
            Event::ClearHierarchy => tag::CLEAR_HIERARCHY,
            Event::AddClassToHierarchy { .. } => tag::ADD_CLASS_TO_HIERARCHY,
            Event::LockList { .. } => tag::LOCK_LIST,
            Event::UnlockList { .. } => tag::UNLOCK_LIST,
            Event::ClearAWatch { .. } => tag::CLEAR_A_WATCH,
            Event::AddBreakpoint { .. } => tag::ADD_BREAKPOINT,
            Event::RemoveBreakpoint { .. } => tag::REMOVE_BREAKPOINT,
            Event::EditorLoadClass { .. } => tag::EDITOR_LOAD_CLASS,
            Event::EditorGotoLine { .. } => tag::EDITOR_GOTO_LINE,
            Event::AddLineToLog { .. } => tag::ADD_LINE_TO_LOG,
            Event::CallStackClear => tag::CALL_STACK_CLEAR,
            Event::CallStackAdd { .. } => tag::CALL_STACK_ADD,
            Event::SetCurrentObjectName { .. } => tag::SET_CURRENT_OBJECT_NAME,
            Event::Terminated => tag::TERMINATED,
        }
    }

    fn declared_len(&self) -> usize {
        1 + match self {
            Event::AddClassToHierarchy { class_name }
            | Event::EditorLoadClass { class_name } => string_len(class_name),
            Event::LockList { .. } | Event::ClearAWatch { .. } => 4,
            Event::UnlockList { watches, .. } => {
                4 + 4 + watches.iter().map(Watch::wire_len).sum::<usize>()
            }
            Event::AddBreakpoint { class_name, .. }
            | Event::RemoveBreakpoint { class_name, .. } => string_len(class_name) + 4,
            Event::EditorGotoLine { .. } => 4 + 1,
            Event::AddLineToLog { text } => string_len(text),
            Event::CallStackAdd { entry } => string_len(entry),
            Event::SetCurrentObjectName { object_name } => string_len(object_name),
            Event::ShowDllForm
            | Event::BuildHierarchy
            | Event::ClearHierarchy
            | Event::CallStackClear
            | Event::Terminated => 0,
        }
    }

    pub fn serialize(&self) -> Message {
        let len = self.declared_len();
        let mut buf = BytesMut::with_capacity(len);
        buf.put_u8(self.tag());

        match self {
            Event::AddClassToHierarchy { class_name } | Event::EditorLoadClass { class_name } => {
                put_string(&mut buf, class_name)
            }
            Event::LockList { kind } | Event::ClearAWatch { kind } => {
                put_i32(&mut buf, kind.as_wire())
            }
            Event::UnlockList { kind, watches } => {
                put_i32(&mut buf, kind.as_wire());
                put_i32(&mut buf, watches.len() as i32);
                for w in watches {
                    w.put(&mut buf);
                }
            }
            Event::AddBreakpoint { class_name, line }
            | Event::RemoveBreakpoint { class_name, line } => {
                put_string(&mut buf, class_name);
                put_i32(&mut buf, *line);
            }
            Event::EditorGotoLine { line, highlight } => {
                put_i32(&mut buf, *line);
                put_bool(&mut buf, *highlight);
            }
            Event::AddLineToLog { text } => put_string(&mut buf, text),
            Event::CallStackAdd { entry } => put_string(&mut buf, entry),
            Event::SetCurrentObjectName { object_name } => put_string(&mut buf, object_name),
            Event::ShowDllForm
            | Event::BuildHierarchy
            | Event::ClearHierarchy
            | Event::CallStackClear
            | Event::Terminated => {}
        }

        debug_assert_eq!(buf.len(), len);
        Message::from_payload(buf.freeze())
    }

    pub fn parse(payload: &[u8]) -> Result<Event, Error> {
        let mut buf = payload;
        if buf.is_empty() {
            return Err(Error::EmptyPayload);
        }

        let tag = get_u8(&mut buf, "event tag")?;
        let ev = match tag {
            tag::SHOW_DLL_FORM => Event::ShowDllForm,
            tag::BUILD_HIERARCHY => Event::BuildHierarchy,
            tag::CLEAR_HIERARCHY => Event::ClearHierarchy,
            tag::ADD_CLASS_TO_HIERARCHY => Event::AddClassToHierarchy {
                class_name: get_string(&mut buf, "class name")?,
            },
            tag::LOCK_LIST => Event::LockList {
                kind: WatchKind::from_wire(get_i32(&mut buf, "watch kind")?)?,
            },
            tag::UNLOCK_LIST => {
                let kind = WatchKind::from_wire(get_i32(&mut buf, "watch kind")?)?;
                let count = get_i32(&mut buf, "watch count")?;
                let mut watches = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    watches.push(Watch::get(&mut buf)?);
                }
                Event::UnlockList { kind, watches }
            }
            tag::CLEAR_A_WATCH => Event::ClearAWatch {
                kind: WatchKind::from_wire(get_i32(&mut buf, "watch kind")?)?,
            },
            tag::ADD_BREAKPOINT => Event::AddBreakpoint {
                class_name: get_string(&mut buf, "class name")?,
                line: get_i32(&mut buf, "line number")?,
            },
            tag::REMOVE_BREAKPOINT => Event::RemoveBreakpoint {
                class_name: get_string(&mut buf, "class name")?,
                line: get_i32(&mut buf, "line number")?,
            },
            tag::EDITOR_LOAD_CLASS => Event::EditorLoadClass {
                class_name: get_string(&mut buf, "class name")?,
            },
            tag::EDITOR_GOTO_LINE => Event::EditorGotoLine {
                line: get_i32(&mut buf, "line number")?,
                highlight: get_bool(&mut buf, "highlight")?,
            },
            tag::ADD_LINE_TO_LOG => Event::AddLineToLog {
                text: get_string(&mut buf, "log text")?,
            },
            tag::CALL_STACK_CLEAR => Event::CallStackClear,
            tag::CALL_STACK_ADD => Event::CallStackAdd {
                entry: get_string(&mut buf, "stack entry")?,
            },
            tag::SET_CURRENT_OBJECT_NAME => Event::SetCurrentObjectName {
                object_name: get_string(&mut buf, "object name")?,
            },
            tag::TERMINATED => Event::Terminated,
            other => return Err(Error::UnknownEventTag(other)),
        };

        expect_consumed(buf)?;
        Ok(ev)
    }
}
