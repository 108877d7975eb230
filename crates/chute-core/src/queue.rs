//! Bounded handoff queue between the producer pipeline and the sender.
//!
//! The queue is a FIFO with a hard capacity bound and a close signal:
//! - `push` waits while the queue is full and open, and reports whether the
//!   item was accepted (`false` once the queue has been closed).
//! - `pop` waits while the queue is empty and open, and returns `None` only
//!   when the queue is closed *and* fully drained.
//! - `close` is idempotent and wakes every waiter on both sides.
//!
//! Items pushed before `close` are preserved and still drain through `pop`.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::{Error, Result};

/// A bounded FIFO queue with a close signal and two-sided wakeups.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    not_full: Notify,
    not_empty: Notify,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> BoundedQueue<T> {
    /// Create a queue with the given capacity.
    ///
    /// A zero capacity is rejected: it would make every `push` wait forever.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity);
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            not_full: Notify::new(),
            not_empty: Notify::new(),
        })
    }

    /// Push an item, waiting while the queue is full.
    ///
    /// Returns `true` if the item was accepted, `false` if the queue was
    /// closed (the item is dropped in that case).
    pub async fn push(&self, item: T) -> bool {
        let mut item = Some(item);
        loop {
            // Arm the wakeup before checking state so a notify between the
            // unlock and the await is not lost.
            let notified = self.not_full.notified();
            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if inner.closed {
                    return false;
                }
                if inner.items.len() < self.capacity {
                    inner.items.push_back(item.take().expect("item consumed twice"));
                    drop(inner);
                    self.not_empty.notify_one();
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Pop the oldest item, waiting while the queue is empty and open.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue. Idempotent; wakes all waiting pushers and poppers.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
    }

    /// Current number of queued items.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").items.len()
    }

    /// True when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The capacity the queue was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("queue lock poisoned").closed
    }
}
