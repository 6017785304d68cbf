// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Process-wide one-shot timer service.
//!
//! One background thread sleeps until the earliest armed deadline and runs
//! the callback on its own context. Handles are cancellable; a cancelled
//! timer never fires.

use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type TimerCallback = Box<dyn FnOnce() + Send>;

struct TimerEntry {
    id: u64,
    deadline: Instant,
    callback: TimerCallback,
}

struct TimerState {
    entries: Vec<TimerEntry>,
    next_id: u64,
    stopped: bool,
}

struct TimerInner {
    state: Mutex<TimerState>,
    cv: Condvar,
}

/// Handle to one armed timer. Dropping the handle does NOT cancel the
/// timer; call [`TimerHandle::cancel`].
pub struct TimerHandle {
    id: u64,
    inner: Weak<TimerInner>,
}

impl TimerHandle {
    /// Cancel the timer. Idempotent; a timer that already fired or was
    /// already cancelled is left alone.
    pub fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut state = inner.state.lock();
            let before = state.entries.len();
            let id = self.id;
            state.entries.retain(|e| e.id != id);
            if state.entries.len() != before {
                inner.cv.notify_one();
            }
        }
    }
}

/// Background timer thread shared by all components.
///
/// # Graceful shutdown
/// `shutdown()` signals the thread and joins it; armed timers that have
/// not fired are discarded.
pub struct TimerService {
    inner: Arc<TimerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    /// Spawn the timer thread.
    pub fn start() -> io::Result<Arc<Self>> {
        let inner = Arc::new(TimerInner {
            state: Mutex::new(TimerState {
                entries: Vec::new(),
                next_id: 1,
                stopped: false,
            }),
            cv: Condvar::new(),
        });

        let inner_clone = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("fs-timer".to_string())
            .spawn(move || {
                Self::run_loop(&inner_clone);
            })?;

        Ok(Arc::new(TimerService {
            inner,
            handle: Mutex::new(Some(handle)),
        }))
    }

    fn run_loop(inner: &TimerInner) {
        let mut state = inner.state.lock();
        loop {
            if state.stopped {
                break;
            }

            // Earliest deadline, if any.
            let due = state
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.deadline)
                .map(|(idx, e)| (idx, e.deadline));

            match due {
                None => {
                    inner.cv.wait(&mut state);
                }
                Some((idx, deadline)) => {
                    let now = Instant::now();
                    if deadline <= now {
                        let entry = state.entries.swap_remove(idx);
                        // Run the callback without holding the lock so it
                        // may arm or cancel timers itself.
                        drop(state);
                        (entry.callback)();
                        state = inner.state.lock();
                    } else {
                        inner.cv.wait_for(&mut state, deadline - now);
                    }
                }
            }
        }
    }

    /// Arm a one-shot timer firing after `after`.
    pub fn arm(&self, after: Duration, callback: impl FnOnce() + Send + 'static) -> TimerHandle {
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.entries.push(TimerEntry {
            id,
            deadline: Instant::now() + after,
            callback: Box::new(callback),
        });
        self.inner.cv.notify_one();
        TimerHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Stop the timer thread and discard pending timers. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            state.entries.clear();
            self.inner.cv.notify_one();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
