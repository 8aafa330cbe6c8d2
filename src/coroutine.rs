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

//! The coroutine primitive.
//!
//! The host language has no first-class stackful coroutines reachable
//! without nightly-only crates, so each task is backed by a dedicated OS
//! thread paired with a strict rendezvous hand-off (a pair of zero-capacity
//! `mpsc` channels). Only one side of the hand-off is ever runnable at a
//! time: the scheduler thread blocks on `recv` for exactly as long as the
//! task thread is executing user code, and vice versa. This preserves the
//! "exactly one coroutine runs at a time" contract without requiring a real
//! green-thread / fiber implementation.
//!
//! This module is private to the crate: it is not a general-purpose
//! green-thread library, only the substrate [`crate::scheduler::Scheduler`]
//! needs.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Globally unique identity of a spawned task, used as the scheduler's task
/// table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoroutineId(u64);

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
impl CoroutineId {
    /// Construct an arbitrary id for use in unit tests that need a
    /// `CoroutineId` without spawning a whole `RawCoroutine`.
    pub(crate) fn test_id(raw: u64) -> CoroutineId {
        CoroutineId(raw)
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> CoroutineId {
    CoroutineId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Lifecycle state of a coroutine, as observed from the scheduler side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Suspended,
    Dead,
}

fn status_from_raw(raw: u8) -> Status {
    match raw {
        0 => Status::Running,
        1 => Status::Suspended,
        _ => Status::Dead,
    }
}

/// What a resumed task reported back before control returned to the
/// scheduler.
pub enum Outcome {
    /// The task called `yield_now` and is parked waiting for the next resume.
    Yielded(i32),
    /// The task's body returned; `Ok` on a clean return, `Err` if it panicked.
    Finished(thread::Result<()>),
}

enum TaskEvent {
    Yielded(i32),
    Finished(thread::Result<()>),
}

thread_local! {
    static CURRENT: std::cell::RefCell<Option<(CoroutineId, Receiver<i32>, SyncSender<TaskEvent>)>> =
        std::cell::RefCell::new(None);
}

/// A spawned coroutine's thread-side handle.
///
/// Never resumes the underlying thread on construction (see
/// [`create`](RawCoroutine::create)); the caller decides when the first
/// `resume` happens.
pub struct RawCoroutine {
    id: CoroutineId,
    status: Arc<AtomicU8>,
    to_task: SyncSender<i32>,
    from_task: Receiver<TaskEvent>,
    join: Option<JoinHandle<()>>,
}

impl fmt::Debug for RawCoroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCoroutine")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

impl RawCoroutine {
    /// Spawn the backing OS thread. The thread blocks immediately and does
    /// not run `body` until the first [`resume`](RawCoroutine::resume).
    pub fn create<F>(stack_size: usize, body: F) -> RawCoroutine
    where
        F: FnOnce() + Send + 'static,
    {
        let id = next_id();
        let (to_task, task_resume_rx) = sync_channel::<i32>(0);
        let (task_yield_tx, from_task) = sync_channel::<TaskEvent>(0);
        let status = Arc::new(AtomicU8::new(Status::Suspended as u8));
        let thread_status = status.clone();

        let join = thread::Builder::new()
            .name(format!("cosched-task-{}", id))
            .stack_size(stack_size)
            .spawn(move || {
                // Park until the scheduler performs the first resume.
                if task_resume_rx.recv().is_err() {
                    return;
                }
                thread_status.store(Status::Running as u8, Ordering::SeqCst);
                CURRENT.with(|c| {
                    *c.borrow_mut() = Some((id, task_resume_rx, task_yield_tx.clone()));
                });

                let result = panic::catch_unwind(AssertUnwindSafe(body));

                thread_status.store(Status::Dead as u8, Ordering::SeqCst);
                // The receiver may already be gone if the scheduler dropped
                // us during teardown; that is not this thread's problem.
                let _ = task_yield_tx.send(TaskEvent::Finished(result));
            })
            .expect("failed to spawn coroutine thread");

        RawCoroutine {
            id,
            status,
            to_task,
            from_task,
            join: Some(join),
        }
    }

    #[inline]
    pub fn id(&self) -> CoroutineId {
        self.id
    }

    #[inline]
    pub fn status(&self) -> Status {
        status_from_raw(self.status.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.status() == Status::Running
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.status() == Status::Suspended
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.status() == Status::Dead
    }

    /// Resume a suspended task with `value`, blocking until it yields again
    /// or finishes.
    ///
    /// Panics if the task is not currently suspended: that is a contract
    /// violation by the caller (only the scheduler should ever call this,
    /// and only on a handle it just removed from its suspended set).
    pub fn resume(&mut self, value: i32) -> Outcome {
        assert!(
            self.is_suspended(),
            "resume() called on a coroutine that is not suspended"
        );

        self.status.store(Status::Running as u8, Ordering::SeqCst);
        if self.to_task.send(value).is_err() {
            // Task thread died without a panic being caught, e.g. aborted.
            self.status.store(Status::Dead as u8, Ordering::SeqCst);
            return Outcome::Finished(Err(Box::new("coroutine thread terminated unexpectedly")));
        }

        match self.from_task.recv() {
            Ok(TaskEvent::Yielded(v)) => {
                self.status.store(Status::Suspended as u8, Ordering::SeqCst);
                Outcome::Yielded(v)
            }
            Ok(TaskEvent::Finished(result)) => {
                self.status.store(Status::Dead as u8, Ordering::SeqCst);
                Outcome::Finished(result)
            }
            Err(_) => {
                self.status.store(Status::Dead as u8, Ordering::SeqCst);
                Outcome::Finished(Err(Box::new("coroutine thread terminated unexpectedly")))
            }
        }
    }

    /// Block until the backing thread has actually exited. Only meaningful
    /// once [`is_dead`](RawCoroutine::is_dead) is true.
    pub fn join(&mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RawCoroutine {
    fn drop(&mut self) {
        // A coroutine that is still suspended when dropped leaks its parked
        // OS thread: the scheduler's stop()+runloop teardown protocol is
        // expected to drive every task to Dead before the task table entry
        // is dropped. We still try to reclaim an already-finished thread's
        // resources.
        if self.is_dead() {
            self.join();
        }
    }
}

/// Yield the currently running coroutine with `value`, returning whatever
/// value the next `resume` delivers.
///
/// Panics if called from outside a coroutine thread (i.e. not from within a
/// closure passed to [`RawCoroutine::create`]) — this is the low-level
/// primitive; [`crate::scheduler::Scheduler::co_suspend`] is the safe public
/// surface that checks this instead of panicking.
pub fn yield_now(value: i32) -> i32 {
    CURRENT.with(|c| {
        let borrow = c.borrow();
        let (_, resume_rx, yield_tx) = borrow
            .as_ref()
            .expect("yield_now() called outside of a coroutine thread");
        yield_tx
            .send(TaskEvent::Yielded(value))
            .expect("scheduler dropped the coroutine while it was suspended");
        resume_rx
            .recv()
            .expect("scheduler dropped the coroutine while it was suspended")
    })
}

/// The id of the coroutine currently executing on this OS thread, if any.
pub fn current_id() -> Option<CoroutineId> {
    CURRENT.with(|c| c.borrow().as_ref().map(|(id, _, _)| *id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_drives_body_to_completion() {
        let mut co = RawCoroutine::create(64 * 1024, || {});
        assert!(co.is_suspended());
        match co.resume(0) {
            Outcome::Finished(Ok(())) => {}
            _ => panic!("expected clean finish"),
        }
        assert!(co.is_dead());
    }

    #[test]
    fn yield_now_round_trips_values() {
        let mut co = RawCoroutine::create(64 * 1024, || {
            let v = yield_now(1);
            assert_eq!(v, 2);
            let v = yield_now(3);
            assert_eq!(v, 4);
        });

        match co.resume(0) {
            Outcome::Yielded(1) => {}
            _ => panic!("expected Yielded(1)"),
        }
        match co.resume(2) {
            Outcome::Yielded(3) => {}
            _ => panic!("expected Yielded(3)"),
        }
        match co.resume(4) {
            Outcome::Finished(Ok(())) => {}
            _ => panic!("expected clean finish"),
        }
    }

    #[test]
    fn panic_is_reported_as_finished_err() {
        let mut co = RawCoroutine::create(64 * 1024, || {
            panic!("boom");
        });
        match co.resume(0) {
            Outcome::Finished(Err(_)) => {}
            _ => panic!("expected a panicking finish"),
        }
        assert!(co.is_dead());
    }

    #[test]
    fn current_id_is_set_inside_body() {
        let mut co = RawCoroutine::create(64 * 1024, || {
            assert!(current_id().is_some());
        });
        let id = co.id();
        match co.resume(0) {
            Outcome::Finished(Ok(())) => {}
            _ => panic!("expected clean finish"),
        }
        assert!(id.0 > 0);
    }
}
