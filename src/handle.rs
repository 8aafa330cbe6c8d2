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

//! The coroutine handle: a stable identity object the scheduler attaches
//! its own bookkeeping to.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::coroutine::{CoroutineId, RawCoroutine, Status};
use crate::timer::TimerTask;

/// A handle to a task tracked by the [`Scheduler`](crate::scheduler::Scheduler).
///
/// Constructing a handle never resumes the underlying coroutine. Handles are
/// compared by the identity of the coroutine they wrap; two handles over the
/// same underlying thread never coexist because [`RawCoroutine::create`]
/// always mints a fresh [`CoroutineId`].
///
/// The backing thread is wrapped in its own `Arc<Mutex<_>>` rather than
/// owned outright so the scheduler can hand out a reference to it and drop
/// its own table lock *before* blocking on `resume()` — otherwise a task
/// calling back into the scheduler from inside its body would deadlock
/// against the very lock guarding the table it is listed in. Only the
/// scheduler thread ever locks it, and only for the duration of one
/// `resume()` call, so this is never contended.
pub struct CoroutineHandle {
    name: Option<String>,
    id: CoroutineId,
    thread: Arc<Mutex<RawCoroutine>>,
    /// Pending timer task used to wake this task on timeout; `None` unless a
    /// suspending call registered one. Cleared on resume.
    pub(crate) timer_task: Option<TimerTask>,
}

impl CoroutineHandle {
    pub(crate) fn new(name: Option<String>, thread: RawCoroutine) -> Self {
        CoroutineHandle {
            name,
            id: thread.id(),
            thread: Arc::new(Mutex::new(thread)),
            timer_task: None,
        }
    }

    /// The task's human-readable label, if it was spawned with one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn id(&self) -> CoroutineId {
        self.id
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.thread.lock().expect("coroutine mutex poisoned").status()
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

    /// A cloneable reference to the backing thread, used by the scheduler
    /// to call `resume()` without holding its own table lock.
    pub(crate) fn thread_handle(&self) -> Arc<Mutex<RawCoroutine>> {
        self.thread.clone()
    }

    /// Cancel any pending timeout attached to this handle. Idempotent.
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(task) = self.timer_task.take() {
            task.cancel();
        }
    }
}

impl fmt::Debug for CoroutineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoroutineHandle")
            .field("id", &self.id())
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl PartialEq for CoroutineHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for CoroutineHandle {}
