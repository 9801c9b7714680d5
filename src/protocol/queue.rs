//! Multi-producer, single-consumer queue of serialised messages.
//!
//! The queue is the only synchronisation between the threads that produce
//! messages and the single drain that writes them to the socket. Scheduling
//! rides on the empty transitions: the producer that flips the queue from
//! empty to non-empty (`push` returned `true`) must schedule a drain, and a
//! drain keeps going until its `pop` empties the queue (`pop` returned
//! `true`). At any instant there is exactly one drain per non-empty queue and
//! none otherwise.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::Message;

#[derive(Default)]
pub struct SendQueue {
    inner: Mutex<VecDeque<Message>>,
}

impl SendQueue {
    pub fn new() -> Self {
        SendQueue::default()
    }

    /// Append a message. Returns `true` iff the queue was empty before the
    /// push; the caller is then responsible for scheduling the drain.
    pub fn push(&self, msg: Message) -> bool {
        let mut q = self.inner.lock().unwrap();
        let was_empty = q.is_empty();
        q.push_back(msg);
        was_empty
    }

    /// Remove the front message. Returns `true` iff the queue is empty after
    /// the pop; on `false` the caller keeps draining.
    pub fn pop(&self) -> bool {
        let mut q = self.inner.lock().unwrap();
        q.pop_front();
        q.is_empty()
    }

    /// Peek the front message. `Message` clones are cheap (`Bytes`), so the
    /// drain gets an owned handle while the element stays queued until the
    /// matching `pop`; a producer racing in meanwhile still observes the
    /// queue as non-empty and will not schedule a second drain.
    pub fn top(&self) -> Option<Message> {
        self.inner.lock().unwrap().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn msg(b: u8) -> Message {
        Message::from_payload(Bytes::copy_from_slice(&[b]))
    }

    #[test]
    fn test_empty_transitions() {
        let q = SendQueue::new();

        assert!(q.push(msg(1)), "push into empty queue schedules the drain");
        assert!(!q.push(msg(2)), "push into non-empty queue does not");

        assert_eq!(q.top().unwrap().payload(), &[1]);
        assert!(!q.pop(), "queue still holds one message");
        assert_eq!(q.top().unwrap().payload(), &[2]);
        assert!(q.pop(), "pop that empties reports it");
        assert!(q.top().is_none());
    }

    #[test]
    fn test_fifo_order() {
        let q = SendQueue::new();
        for b in 0..10u8 {
            q.push(msg(b));
        }
        for b in 0..10u8 {
            assert_eq!(q.top().unwrap().payload(), &[b]);
            q.pop();
        }
    }

    /// Concurrent producers plus a consumer driven purely by the
    /// empty-transition contract must drain every message exactly once with
    /// one logical drain active at a time.
    #[test]
    fn test_contract_under_concurrent_producers() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let q = Arc::new(SendQueue::new());
        let drained = Arc::new(AtomicUsize::new(0));
        let schedules = Arc::new(AtomicUsize::new(0));

        let consumer = {
            let q = q.clone();
            let drained = drained.clone();
            let schedules = schedules.clone();
            thread::spawn(move || {
                let mut seen_schedules = 0;
                loop {
                    // Wait for a producer to signal an empty->non-empty flip.
                    while schedules.load(Ordering::Acquire) == seen_schedules {
                        if drained.load(Ordering::Acquire) == PRODUCERS * PER_PRODUCER {
                            return;
                        }
                        thread::yield_now();
                    }
                    seen_schedules += 1;

                    // One drain per schedule: run until the pop that empties.
                    loop {
                        assert!(q.top().is_some(), "scheduled drain found empty queue");
                        drained.fetch_add(1, Ordering::Release);
                        if q.pop() {
                            break;
                        }
                    }
                }
            })
        };

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = q.clone();
                let schedules = schedules.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        if q.push(msg((p * PER_PRODUCER + i) as u8)) {
                            schedules.fetch_add(1, Ordering::Release);
                        }
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        consumer.join().unwrap();

        assert_eq!(drained.load(Ordering::Acquire), PRODUCERS * PER_PRODUCER);
        assert!(q.is_empty());
    }
}
