//! Purpose: One-shot completion signal shared between a producer thread and waiters.
//! Exports: `Completion`, `WaitOutcome`.
//! Role: Replaces polling for "load finished" and "persistence finished" events.
//! Invariants: The first `complete` wins; later calls are ignored.
//! Invariants: Waiters never miss a completion that happened before they waited.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WaitOutcome<T> {
    Completed(T),
    TimedOut,
}

#[derive(Debug)]
pub struct Completion<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Completion<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish `value`. Returns false if the signal was already completed.
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.ready.notify_all();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.lock().is_some()
    }
}

impl<T: Clone> Completion<T> {
    pub fn peek(&self) -> Option<T> {
        self.lock().clone()
    }

    pub fn wait(&self) -> T {
        let mut slot = self.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> WaitOutcome<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return WaitOutcome::Completed(value.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (next, _) = self
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot = next;
        }
    }
}
