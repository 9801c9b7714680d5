//! Blocking frame I/O and the queue-drain transmitter.
//!
//! A frame on the wire is a little-endian u32 byte length followed by that
//! many payload bytes. Reads go through a persistent scratch buffer owned by
//! the single reader; writes are driven by the [`SendQueue`] empty-transition
//! contract from one drain thread per connection.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex};

use bytes::{Bytes, BytesMut};
use log::debug;

use super::Message;
use super::queue::SendQueue;

/// Upper bound for a single frame. Nothing the host produces comes anywhere
/// close; a length above this means the stream is desynchronised.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Read one length-prefixed frame. `scratch` is the reader's persistent
/// message slot; the returned payload is detached from it without copying.
pub fn read_frame(stream: &mut impl Read, scratch: &mut BytesMut) -> io::Result<Bytes> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit"),
        ));
    }

    scratch.resize(len, 0);
    stream.read_exact(scratch)?;
    Ok(scratch.split().freeze())
}

/// Write one frame: 4 bytes of length, then the payload.
pub fn write_frame(stream: &mut impl Write, msg: &Message) -> io::Result<()> {
    stream.write_all(&(msg.len() as u32).to_le_bytes())?;
    stream.write_all(msg.payload())?;
    Ok(())
}

#[derive(Default)]
struct DrainState {
    /// Count of pending drain schedules (0 or 1 by the queue contract).
    scheduled: usize,
    closed: bool,
}

/// Shared transmitter: any thread may [`Transmitter::send`]; a single drain
/// thread runs [`Transmitter::drain_loop`] until close or I/O error.
#[derive(Clone)]
pub struct Transmitter {
    queue: Arc<SendQueue>,
    wake: Arc<(Mutex<DrainState>, Condvar)>,
}

impl Default for Transmitter {
    fn default() -> Self {
        Transmitter::new()
    }
}

impl Transmitter {
    pub fn new() -> Self {
        Transmitter {
            queue: Arc::new(SendQueue::new()),
            wake: Arc::new((Mutex::new(DrainState::default()), Condvar::new())),
        }
    }

    /// Enqueue a message. If the queue was empty this schedules the drain.
    pub fn send(&self, msg: Message) {
        if self.queue.push(msg) {
            let (state, cv) = &*self.wake;
            state.lock().unwrap().scheduled += 1;
            cv.notify_one();
        }
    }

    /// Ask the drain loop to exit. Messages still queued at that point are
    /// flushed best effort first, so a `terminated` event enqueued just
    /// before shutdown reaches the peer.
    pub fn close(&self) {
        let (state, cv) = &*self.wake;
        state.lock().unwrap().closed = true;
        cv.notify_one();
    }

    /// Drain scheduled batches onto the stream. Returns `Ok(())` on a clean
    /// close and the I/O error otherwise; either way the connection is over.
    pub fn drain_loop(&self, mut stream: TcpStream) -> io::Result<()> {
        loop {
            {
                let (state, cv) = &*self.wake;
                let mut st = state.lock().unwrap();
                while st.scheduled == 0 && !st.closed {
                    st = cv.wait(st).unwrap();
                }
                if st.closed {
                    drop(st);
                    while let Some(msg) = self.queue.top() {
                        if write_frame(&mut stream, &msg).is_err() {
                            break;
                        }
                        if self.queue.pop() {
                            break;
                        }
                    }
                    debug!(target: "wire", "transmitter closed, drain exiting");
                    return Ok(());
                }
                st.scheduled -= 1;
            }

            // One scheduled drain covers everything up to the pop that
            // empties the queue.
            loop {
                let Some(msg) = self.queue.top() else {
                    break;
                };
                write_frame(&mut stream, &msg)?;
                if self.queue.pop() {
                    break;
                }
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
