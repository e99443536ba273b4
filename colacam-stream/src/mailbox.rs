//! Single-slot hand-off between a producer and one worker.
//!
//! A newer value replaces an unconsumed one, so a slow worker always sees
//! the latest value and never a backlog.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct Slot<T> {
    value: Option<T>,
    closed: bool,
}

/// Latest-wins single-slot mailbox.
pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Stores `value`, replacing any unconsumed one.
    ///
    /// Returns `true` if a value was overwritten. Values put after `close`
    /// are dropped.
    pub fn put(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        if slot.closed {
            return false;
        }
        let replaced = slot.value.replace(value).is_some();
        drop(slot);
        self.ready.notify_one();
        replaced
    }

    /// Takes the value without waiting.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().value.take()
    }

    /// Waits up to `timeout` for a value.
    ///
    /// Returns `None` on timeout, or once the mailbox is closed and empty.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return Some(value);
            }
            if slot.closed {
                return None;
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.value.take();
            }
        }
    }

    /// Closes the mailbox and wakes all waiters.
    pub fn close(&self) {
        self.slot.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }
}
