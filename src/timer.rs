// The MIT License (MIT)

// Copyright (c) 2024 Cosched Developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Timer facade: a binary-heap min-heap of deadlines driving posted tasks.
//!
//! Mirrors the "slab of tasks" idiom the example pack uses for its
//! coroutine tables: task bodies live in a [`slab::Slab`], and a
//! [`BinaryHeap`] of `(deadline, slab key)` pairs gives `delay()`/`next()`
//! cheap access to the earliest deadline without scanning the slab.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use slab::Slab;

pub(crate) type Callback = Box<dyn FnOnce(bool) + Send>;

struct Slot {
    cancel: Arc<AtomicBool>,
    callback: Callback,
}

/// A handle to a task posted with [`Timer::post`].
///
/// Dropping a `TimerTask` does not cancel it — the scheduler cancels
/// lazily, by flipping the shared sentinel and letting the timer notice it
/// at fire time, exactly as the design specifies.
#[derive(Clone)]
pub struct TimerTask {
    cancel: Arc<AtomicBool>,
}

impl TimerTask {
    /// Mark this task cancelled. Idempotent; safe to call after the task has
    /// already fired.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// A single-threaded min-heap timer wheel.
///
/// Not `Send`/`Sync`-required: like the rest of the scheduler, it is only
/// ever touched from the one thread driving `runloop`.
#[derive(Default)]
pub struct Timer {
    heap: BinaryHeap<Reverse<(Instant, usize)>>,
    slots: Slab<Slot>,
}

impl Timer {
    pub fn new() -> Timer {
        Timer {
            heap: BinaryHeap::new(),
            slots: Slab::new(),
        }
    }

    /// Post `callback` to run after `timeout_ms` milliseconds, unless
    /// cancelled first. `callback` receives `true` if the task was
    /// cancelled (via the returned handle, or because [`Timer::kill`] tore
    /// down the timer) and `false` on a normal fire.
    pub fn post<F>(&mut self, timeout_ms: u64, callback: F) -> TimerTask
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let cancel = Arc::new(AtomicBool::new(false));
        let slot = Slot {
            cancel: cancel.clone(),
            callback: Box::new(callback),
        };
        let key = self.slots.insert(slot);
        self.heap.push(Reverse((deadline, key)));
        TimerTask { cancel }
    }

    /// Time until the earliest pending deadline, or `None` if no task is
    /// pending. A deadline already in the past yields `Duration::ZERO`
    /// rather than underflowing.
    pub fn delay(&self) -> Option<Duration> {
        self.heap
            .peek()
            .map(|Reverse((deadline, _))| deadline.saturating_duration_since(Instant::now()))
    }

    /// Pop every task whose deadline has passed, returning each one's
    /// cancellation flag and callback for the caller to invoke.
    ///
    /// Deliberately does not invoke the callbacks itself: the scheduler
    /// calls this while holding its own table lock, and a callback that
    /// reaches back into the scheduler (the usual case — it resumes a
    /// task) must run with that lock released first.
    pub fn next(&mut self) -> Vec<(bool, Callback)> {
        let now = Instant::now();
        let mut fired = Vec::new();
        while let Some(&Reverse((deadline, key))) = self.heap.peek() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            if self.slots.contains(key) {
                let slot = self.slots.remove(key);
                let cancelled = slot.cancel.load(Ordering::SeqCst);
                fired.push((cancelled, slot.callback));
            }
        }
        fired
    }

    /// Tear down every remaining task as cancelled, discarding the heap
    /// and slab. As with [`Timer::next`], callbacks are returned rather
    /// than invoked.
    pub fn kill(&mut self) -> Vec<Callback> {
        self.heap.clear();
        self.slots
            .drain()
            .map(|slot| {
                slot.cancel.store(true, Ordering::SeqCst);
                slot.callback
            })
            .collect()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
