/*! A bounded, thread-safe FIFO of completed heaps.

A `Mutex<VecDeque<T>>` plus `Condvar`, woken on every push and pop: a
producer worker thread blocks when the ring is full, a consumer blocks when
it's empty, and closing the ring wakes everyone blocked on it so they can
observe the close instead of waiting forever.
*/
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::error::Result;
use crate::heap::Heap;

struct State {
    queue: VecDeque<Heap>,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    cv: Condvar,
    capacity: usize,
    /// When set, a push against a full ring drops the oldest queued heap
    /// instead of blocking for the consumer to drain one.
    lossy: bool,
}

/// A bounded queue of completed heaps shared between the stream's worker
/// threads and its consumer.
pub struct Ring {
    inner: Inner,
}

impl Ring {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_lossy(capacity, false)
    }

    /// A ring that, once full, drops the oldest queued heap on every push
    /// rather than blocking the producer.
    #[must_use]
    pub fn with_lossy(capacity: usize, lossy: bool) -> Self {
        Self {
            inner: Inner {
                state: Mutex::new(State {
                    queue: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                cv: Condvar::new(),
                capacity,
                lossy,
            },
        }
    }

    /// Push a completed heap.
    ///
    /// In blocking mode (the default), blocks while the ring is full;
    /// returns `Ok(false)` without pushing if the ring was closed while
    /// waiting for room, so a producer can stop promptly instead of
    /// blocking against a consumer that will never come back. In lossy
    /// mode, a full ring drops its oldest queued heap to make room rather
    /// than blocking, logging the drop.
    pub fn push(&self, heap: Heap) -> Result<bool> {
        let mut state = self.inner.state.lock()?;
        loop {
            if state.closed {
                return Ok(false);
            }
            if state.queue.len() < self.inner.capacity {
                state.queue.push_back(heap);
                self.inner.cv.notify_all();
                return Ok(true);
            }
            if self.inner.lossy {
                let dropped = state.queue.pop_front();
                if let Some(dropped) = dropped {
                    log::warn!(
                        "ring full, dropping oldest queued heap {}",
                        dropped.heap_cnt()
                    );
                }
                state.queue.push_back(heap);
                self.inner.cv.notify_all();
                return Ok(true);
            }
            state = self.inner.cv.wait(state)?;
        }
    }

    /// Pop the oldest completed heap, blocking while the ring is empty and
    /// open. Returns `None` once the ring is closed and drained.
    pub fn pop(&self) -> Result<Option<Heap>> {
        let mut state = self.inner.state.lock()?;
        loop {
            if let Some(heap) = state.queue.pop_front() {
                self.inner.cv.notify_all();
                return Ok(Some(heap));
            }
            if state.closed {
                return Ok(None);
            }
            state = self.inner.cv.wait(state)?;
        }
    }

    /// Mark the ring closed: no further pushes will succeed, and any thread
    /// blocked in `push` or `pop` wakes up. Heaps already queued are still
    /// drained by `pop`.
    pub fn close(&self) -> Result<()> {
        self.inner.state.lock()?.closed = true;
        self.inner.cv.notify_all();
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    /// Number of heaps currently queued.
    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.state.lock()?.queue.len())
    }
}
