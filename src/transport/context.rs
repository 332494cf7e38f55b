//! Cancellation token shared between the transport's command API and its two
//! worker threads.
//!
//! Every disruptive command bumps a single monotonic counter. Each worker
//! thread compares the context it started with against the current value to
//! decide whether its in-flight work has been superseded, and can block on a
//! condition variable to be woken promptly rather than polling.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub struct ContextClock {
    inner: Arc<Inner>,
}

struct Inner {
    current: Mutex<u64>,
    changed: Condvar,
}

impl ContextClock {
    pub fn new() -> Self {
        ContextClock {
            inner: Arc::new(Inner {
                current: Mutex::new(0),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn current(&self) -> u64 {
        *self.inner.current.lock().unwrap()
    }

    pub fn is_current(&self, context: u64) -> bool {
        self.current() == context
    }

    /// Advance the context and return the new value. Wakes both worker
    /// threads unconditionally; each checks `is_current` itself before
    /// acting on the wakeup.
    pub fn bump(&self) -> u64 {
        let mut guard = self.inner.current.lock().unwrap();
        *guard += 1;
        let value = *guard;
        drop(guard);
        self.inner.changed.notify_all();
        value
    }

    /// Block until the context differs from `since`, or `timeout` elapses.
    /// Returns the current value either way.
    pub fn wait_for_change(&self, since: u64, timeout: Duration) -> u64 {
        let guard = self.inner.current.lock().unwrap();
        if *guard != since {
            return *guard;
        }
        let (guard, _) = self
            .inner
            .changed
            .wait_timeout_while(guard, timeout, |v| *v == since)
            .unwrap();
        *guard
    }
}

impl Default for ContextClock {
    fn default() -> Self {
        ContextClock::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn bump_wakes_a_waiting_thread_promptly() {
        let ctx = ContextClock::new();
        let waiter = ctx.clone();
        let handle = thread::spawn(move || waiter.wait_for_change(0, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        ctx.bump();
        let seen = handle.join().unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn wait_times_out_when_nothing_changes() {
        let ctx = ContextClock::new();
        let seen = ctx.wait_for_change(0, Duration::from_millis(20));
        assert_eq!(seen, 0);
    }
}
