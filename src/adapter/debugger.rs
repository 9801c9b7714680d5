//! The debugger-state model: everything the adapter knows about the halted
//! host.
//!
//! Mutated only by the event pump between a resume and the next break;
//! DAP handlers read it after observing `breakpoint_hit` (see the signals
//! module). Cross-thread coordination goes through [`AtomicState`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};

use log::warn;

use crate::protocol::WatchKind;

/// What the adapter is currently waiting on, if anything. Shared between DAP
/// handler threads and the event pump.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebuggerState {
    Normal = 0,
    /// Running, or mid break sequence; the state model is not queryable.
    Busy = 1,
    /// A watch-suppressed `changestack` is in flight for a line number.
    WaitingForFrameLine = 2,
    /// A `changestack` is in flight to fetch a frame's watches.
    WaitingForFrameWatches = 3,
    /// An `addwatch` is in flight for an evaluate request.
    WaitingForUserWatches = 4,
    /// An `addbreakpoint` is in flight.
    WaitingForAddBreakpoint = 5,
}

#[derive(Default)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    pub fn load(&self) -> DebuggerState {
        match self.0.load(Ordering::SeqCst) {
            0 => DebuggerState::Normal,
            1 => DebuggerState::Busy,
            2 => DebuggerState::WaitingForFrameLine,
            3 => DebuggerState::WaitingForFrameWatches,
            4 => DebuggerState::WaitingForUserWatches,
            _ => DebuggerState::WaitingForAddBreakpoint,
        }
    }

    pub fn store(&self, s: DebuggerState) {
        self.0.store(s as u8, Ordering::SeqCst);
    }
}

/// One node in a frame's watch arena. Children reference the same arena by
/// index; no owning pointers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchNode {
    pub name: String,
    pub ty: String,
    pub value: String,
    pub parent: i32,
    pub children: Vec<usize>,
}

impl WatchNode {
    fn placeholder(name: &str) -> WatchNode {
        WatchNode {
            name: name.to_string(),
            ty: "N/A".to_string(),
            value: "N/A".to_string(),
            parent: -1,
            children: Vec::new(),
        }
    }
}

/// Host watch names come as `"Name ( Type, Address )"`. The address is of no
/// use to us and is discarded. Unparseable names get fallback markers so the
/// session keeps going.
pub fn split_watch_name(full_name: &str) -> (String, String) {
    if let Some(paren) = full_name.find('(') {
        let name = full_name[..paren].trim_end();
        if !name.is_empty()
            && let Some(comma) = full_name[paren..].find(',')
        {
            let ty = full_name[paren + 1..paren + comma].trim();
            return (name.to_string(), ty.to_string());
        }
    }
    warn!(target: "adapter", "failed to parse watch name: {full_name}");
    ("<unknown name>".to_string(), "<unknown type>".to_string())
}

/// Watch arena for one (frame, kind). Index 0 is a synthetic root whose
/// children are the top-level watches; the host's parent index −1 maps to it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchList(Vec<WatchNode>);

impl WatchList {
    fn ensure_root(&mut self) {
        if self.0.is_empty() {
            self.0.push(WatchNode::placeholder("ROOT"));
        }
    }

    /// Insert a watch at the index the interface service assigned to it and
    /// link it into its parent's children list.
    pub fn insert(&mut self, index: usize, parent: i32, full_name: &str, value: &str) {
        self.ensure_root();

        if self.0.len() <= index {
            self.0.resize(index + 1, WatchNode::placeholder("<unknown>"));
        }

        let (name, ty) = split_watch_name(full_name);
        self.0[index] = WatchNode {
            name,
            ty,
            value: value.to_string(),
            parent,
            children: Vec::new(),
        };

        let parent_index = if parent >= 1 { parent as usize } else { 0 };
        if parent_index < self.0.len() {
            self.0[parent_index].children.push(index);
        } else {
            warn!(target: "adapter", "watch {index} references unseen parent {parent}");
        }
    }

    pub fn node(&self, index: usize) -> Option<&WatchNode> {
        self.0.get(index)
    }

    pub fn root(&self) -> Option<&WatchNode> {
        self.0.first()
    }

    /// Number of top-level watches.
    pub fn root_child_count(&self) -> usize {
        self.root().map(|r| r.children.len()).unwrap_or(0)
    }

    /// Look a top-level watch up by its display name.
    pub fn find_top_level(&self, name: &str) -> Option<usize> {
        let root = self.root()?;
        root.children
            .iter()
            .copied()
            .find(|&idx| self.0.get(idx).is_some_and(|w| w.name == name))
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct StackFrame {
    /// Qualified `Package.Class` name.
    pub class_name: String,
    pub function_name: String,
    /// 0 until the host told us (either in the break sequence for the
    /// innermost frame, or via a `changestack` walk for the rest).
    pub line_number: i64,
    pub local_watches: WatchList,
    pub global_watches: WatchList,
    pub user_watches: WatchList,
    pub fetched_watches: bool,
}

impl StackFrame {
    pub fn watches(&self, kind: WatchKind) -> &WatchList {
        match kind {
            WatchKind::Local => &self.local_watches,
            WatchKind::Global => &self.global_watches,
            WatchKind::User => &self.user_watches,
        }
    }

    pub fn watches_mut(&mut self, kind: WatchKind) -> &mut WatchList {
        match kind {
            WatchKind::Local => &mut self.local_watches,
            WatchKind::Global => &mut self.global_watches,
            WatchKind::User => &mut self.user_watches,
        }
    }
}

pub struct Debugger {
    /// Index 0 is the innermost frame once the break sequence has been
    /// finalised. Never empty: early break events need a frame to land in
    /// before the host has sent the stack.
    callstack: Vec<StackFrame>,
    /// Which frame the host currently considers "current"; incoming
    /// class/line/watch events apply to it.
    current_frame: usize,
    /// Upper-cased class name -> breakpoint lines the host confirmed. The
    /// host echoes breakpoint events in upper case, hence the key casing.
    breakpoints: HashMap<String, Vec<i64>>,
    /// Depth of nested `lock_list`s; watch batches are complete when it
    /// returns to zero.
    pub watch_lock_depth: i32,
    /// Name of the object the host reported with the last break.
    pub current_object_name: String,
}

impl Default for Debugger {
    fn default() -> Self {
        Debugger::new()
    }
}

impl Debugger {
    pub fn new() -> Debugger {
        Debugger {
            callstack: vec![StackFrame::default()],
            current_frame: 0,
            breakpoints: HashMap::new(),
            watch_lock_depth: 0,
            current_object_name: String::new(),
        }
    }

    pub fn callstack(&self) -> &[StackFrame] {
        &self.callstack
    }

    pub fn frame(&self, index: usize) -> Option<&StackFrame> {
        self.callstack.get(index)
    }

    pub fn frame_mut(&mut self, index: usize) -> Option<&mut StackFrame> {
        self.callstack.get_mut(index)
    }

    pub fn current_frame_index(&self) -> usize {
        self.current_frame
    }

    pub fn set_current_frame_index(&mut self, index: usize) {
        self.current_frame = index;
    }

    /// The frame host events currently apply to. The cursor can briefly point
    /// past the stack while a new one streams in; fall back to the last entry
    /// rather than panic.
    pub fn current_frame_mut(&mut self) -> &mut StackFrame {
        let idx = self.current_frame.min(self.callstack.len() - 1);
        &mut self.callstack[idx]
    }

    pub fn current_frame_ref(&self) -> &StackFrame {
        let idx = self.current_frame.min(self.callstack.len() - 1);
        &self.callstack[idx]
    }

    /// `CallStackClear` from the host. The stack is never fully emptied: the
    /// first element keeps the class/line/watches the break sequence has
    /// already delivered for the innermost frame.
    pub fn clear_callstack(&mut self) {
        self.callstack.truncate(1);
    }

    /// `CallStackAdd`: entries arrive outermost first as
    /// `"Kind Class:Function"`. Only `Function` kinds are expected.
    pub fn add_callstack(&mut self, entry: &str) {
        let mut name = entry;
        if let Some((kind, rest)) = entry.split_once(' ') {
            if kind != "Function" {
                warn!(target: "adapter", "unknown call stack kind in '{entry}'");
            }
            name = rest;
        }

        let frame = match name.split_once(':') {
            Some((class, function)) => StackFrame {
                class_name: class.to_string(),
                function_name: function.to_string(),
                ..StackFrame::default()
            },
            None => {
                warn!(target: "adapter", "no function name in call stack entry '{entry}'");
                StackFrame {
                    class_name: name.to_string(),
                    ..StackFrame::default()
                }
            }
        };
        self.callstack.push(frame);
    }

    /// Run on `ShowDllForm`, once the host has sent the whole break sequence.
    ///
    /// At this point the first element carries the innermost frame's line and
    /// watches (delivered before the call stack) and the last element carries
    /// its class/function from the stack trace. Merge the two, put the stack
    /// innermost-first, and drop the duplicate.
    pub fn finalize_callstack(&mut self) {
        if self.callstack.len() > 1 {
            let early = std::mem::take(&mut self.callstack[0]);
            let last = self.callstack.len() - 1;
            let innermost = &mut self.callstack[last];
            innermost.line_number = early.line_number;
            innermost.local_watches = early.local_watches;
            innermost.global_watches = early.global_watches;
            innermost.user_watches = early.user_watches;

            self.callstack.reverse();
            self.callstack.pop();
        }

        self.current_frame = 0;
        self.callstack[0].fetched_watches = true;
    }

    /// Reset the per-break transient state ahead of a resume.
    pub fn prepare_resume(&mut self) {
        self.current_frame = 0;
        for frame in &mut self.callstack {
            frame.user_watches.clear();
        }
    }

    // -- breakpoint index ---------------------------------------------------

    pub fn record_breakpoint(&mut self, class_name: &str, line: i64) {
        let lines = self.breakpoints.entry(class_name.to_uppercase()).or_default();
        if !lines.contains(&line) {
            lines.push(line);
        }
    }

    pub fn forget_breakpoint(&mut self, class_name: &str, line: i64) {
        let key = class_name.to_uppercase();
        if let Some(lines) = self.breakpoints.get_mut(&key) {
            lines.retain(|&l| l != line);
            if lines.is_empty() {
                self.breakpoints.remove(&key);
            }
        }
    }

    pub fn breakpoint_lines(&self, class_name: &str) -> Vec<i64> {
        self.breakpoints
            .get(&class_name.to_uppercase())
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_watch_name_parsing() {
        assert_eq!(
            split_watch_name("Location ( Vector, 0x7fa2 )"),
            ("Location".to_string(), "Vector".to_string())
        );
        assert_eq!(
            split_watch_name("garbage"),
            ("<unknown name>".to_string(), "<unknown type>".to_string())
        );
    }

    #[test]
    fn test_watch_tree_links_children() {
        let mut list = WatchList::default();
        list.insert(1, -1, "a ( Int, 0x0 )", "1");
        list.insert(2, 1, "b ( Int, 0x4 )", "2");
        list.insert(3, 1, "c ( Int, 0x8 )", "3");

        assert_eq!(list.root().unwrap().children, vec![1]);
        assert_eq!(list.node(1).unwrap().children, vec![2, 3]);
        assert_eq!(list.node(2).unwrap().children, Vec::<usize>::new());
        assert_eq!(list.find_top_level("a"), Some(1));
        assert_eq!(list.find_top_level("b"), None, "b is not top level");
    }

    #[test]
    fn test_callstack_finalisation() {
        let mut dbg = Debugger::new();

        // Host break sequence: innermost class/line/watches arrive first,
        // into the permanent element zero.
        dbg.current_frame_mut().class_name = "P.A".to_string();
        dbg.current_frame_mut().line_number = 42;
        dbg.current_frame_mut()
            .local_watches
            .insert(1, -1, "x ( Int, 0x0 )", "7");

        // Then the stack, outermost first.
        dbg.clear_callstack();
        dbg.add_callstack("Function P.B:bar");
        dbg.add_callstack("Function P.A:foo");

        dbg.finalize_callstack();

        let stack = dbg.callstack();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack[0].class_name, "P.A");
        assert_eq!(stack[0].function_name, "foo");
        assert_eq!(stack[0].line_number, 42);
        assert_eq!(stack[0].local_watches.find_top_level("x"), Some(1));
        assert!(stack[0].fetched_watches);

        assert_eq!(stack[1].class_name, "P.B");
        assert_eq!(stack[1].function_name, "bar");
        assert_eq!(stack[1].line_number, 0);
        assert!(stack[1].local_watches.is_empty());
        assert!(!stack[1].fetched_watches);
    }

    #[test]
    fn test_single_frame_finalisation() {
        let mut dbg = Debugger::new();
        dbg.current_frame_mut().class_name = "P.A".to_string();
        dbg.current_frame_mut().line_number = 10;

        dbg.clear_callstack();
        dbg.finalize_callstack();

        assert_eq!(dbg.callstack().len(), 1);
        assert_eq!(dbg.callstack()[0].line_number, 10);
        assert!(dbg.callstack()[0].fetched_watches);
    }

    #[test]
    fn test_breakpoint_index_is_case_folded() {
        let mut dbg = Debugger::new();
        dbg.record_breakpoint("P.A", 10);
        dbg.record_breakpoint("p.a", 20);

        assert_eq!(dbg.breakpoint_lines("P.A"), vec![10, 20]);
        assert_eq!(dbg.breakpoint_lines("p.A"), vec![10, 20]);

        dbg.forget_breakpoint("P.a", 10);
        assert_eq!(dbg.breakpoint_lines("P.A"), vec![20]);
        dbg.forget_breakpoint("P.A", 20);
        assert!(dbg.breakpoint_lines("P.A").is_empty());
    }

    #[test]
    fn test_prepare_resume_clears_user_watches_only() {
        let mut dbg = Debugger::new();
        dbg.current_frame_mut()
            .local_watches
            .insert(1, -1, "x ( Int, 0x0 )", "7");
        dbg.current_frame_mut()
            .user_watches
            .insert(1, -1, "w ( Int, 0x0 )", "9");
        dbg.set_current_frame_index(0);

        dbg.prepare_resume();
        assert!(dbg.callstack()[0].user_watches.is_empty());
        assert!(!dbg.callstack()[0].local_watches.is_empty());
        assert_eq!(dbg.current_frame_index(), 0);
    }
}
