//! Wire protocol between the in-host interface service and the debugger
//! client: a tagged union of fixed message kinds with little-endian,
//! length-prefixed framing.
//!
//! The codec itself is pure: serialising produces an owned payload buffer,
//! parsing consumes exactly the declared number of bytes. All I/O lives in
//! [`framing`].

pub mod commands;
pub mod events;
pub mod framing;
pub mod queue;

pub use commands::Command;
pub use events::{Event, Watch};

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A serialised message payload: the tag byte plus kind-specific fields.
/// The u32 length prefix is applied by the framing layer. `Bytes` keeps
/// clones cheap, which lets the send queue hand out its front element
/// without copying the body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message(Bytes);

impl Message {
    pub fn from_payload(payload: Bytes) -> Self {
        Message(payload)
    }

    pub fn payload(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown command tag {0:#04x}")]
    UnknownCommandTag(u8),
    #[error("unknown event tag {0:#04x}")]
    UnknownEventTag(u8),
    #[error("unknown watch kind {0}")]
    UnknownWatchKind(i32),
    #[error("truncated payload while reading {0}")]
    Truncated(&'static str),
    #[error("{0} trailing bytes after message payload")]
    TrailingBytes(usize),
    #[error("empty message payload")]
    EmptyPayload,
}

/// The three watch lists the host maintains. Each locks, unlocks and clears
/// independently of the others.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Local = 0,
    Global = 1,
    User = 2,
}

impl WatchKind {
    pub const ALL: [WatchKind; 3] = [WatchKind::Local, WatchKind::Global, WatchKind::User];

    pub fn from_wire(raw: i32) -> Result<Self, Error> {
        match raw {
            0 => Ok(WatchKind::Local),
            1 => Ok(WatchKind::Global),
            2 => Ok(WatchKind::User),
            other => Err(Error::UnknownWatchKind(other)),
        }
    }

    pub fn as_wire(self) -> i32 {
        self as i32
    }
}

// ---------------------------------------------------------------------------
// Field codecs. Cursor-style readers over a byte slice; every read is bounds
// checked so a malformed frame surfaces as `Error::Truncated` instead of a
// panic.
// ---------------------------------------------------------------------------

pub(crate) fn get_u8(buf: &mut &[u8], what: &'static str) -> Result<u8, Error> {
    if buf.remaining() < 1 {
        return Err(Error::Truncated(what));
    }
    Ok(buf.get_u8())
}

pub(crate) fn get_bool(buf: &mut &[u8], what: &'static str) -> Result<bool, Error> {
    Ok(get_u8(buf, what)? != 0)
}

pub(crate) fn get_i32(buf: &mut &[u8], what: &'static str) -> Result<i32, Error> {
    if buf.remaining() < 4 {
        return Err(Error::Truncated(what));
    }
    Ok(buf.get_i32_le())
}

/// Strings travel as a u32 length plus raw bytes, no terminator. The host is
/// not guaranteed to produce UTF-8 (ANSI code pages exist), so decode lossily
/// and pass through whatever survives.
pub(crate) fn get_string(buf: &mut &[u8], what: &'static str) -> Result<String, Error> {
    let len = get_i32(buf, what)? as usize;
    if buf.remaining() < len {
        return Err(Error::Truncated(what));
    }
    let s = String::from_utf8_lossy(&buf[..len]).into_owned();
    buf.advance(len);
    Ok(s)
}

pub(crate) fn put_bool(buf: &mut BytesMut, v: bool) {
    buf.put_u8(v as u8);
}

pub(crate) fn put_i32(buf: &mut BytesMut, v: i32) {
    buf.put_i32_le(v);
}

pub(crate) fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32_le(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

/// Serialised size of a string field.
pub(crate) fn string_len(s: &str) -> usize {
    4 + s.len()
}

/// Every parse must consume the payload exactly; a leftover means the sender
/// and receiver disagree about the message layout.
pub(crate) fn expect_consumed(buf: &[u8]) -> Result<(), Error> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(Error::TrailingBytes(buf.len()))
    }
}
