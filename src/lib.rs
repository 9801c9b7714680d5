//! Out-of-process debugger bridge for UnrealScript.
//!
//! The host game loads this crate as its Debugger Interface DLL; the exported
//! entry points ([`interface::api`]) forward every host callback over a TCP
//! socket as a compact binary event stream. A standalone `adapter` binary
//! ([`adapter`]) connects to that socket, speaks the Debug Adapter Protocol
//! with the editor, and answers DAP requests by sending commands back to the
//! host through the same socket.

pub mod adapter;
pub mod interface;
pub mod log;
pub mod protocol;
