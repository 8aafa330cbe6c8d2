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

//! Tunable defaults for a [`Scheduler`](crate::scheduler::Scheduler).
//!
//! The build tool's own option subsystem is out of scope for this crate, but
//! every magic number `Scheduler` relies on (the idle-tick fallback, the
//! stack size given to each task's backing OS thread) still needs a single,
//! documented, overridable home rather than being scattered through the
//! implementation.

/// Milliseconds the run loop waits in `poller.wait` when the timer is idle.
pub const DEFAULT_IDLE_TICK_MS: u64 = 1000;

/// Stack size given to the OS thread backing each spawned task, unless
/// overridden.
const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Initial capacity hint for the poller's per-object table.
const DEFAULT_POLLER_CAPACITY: usize = 64;

/// Builder-style configuration for a [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub(crate) idle_tick_ms: u64,
    pub(crate) stack_size: usize,
    pub(crate) poller_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            idle_tick_ms: DEFAULT_IDLE_TICK_MS,
            stack_size: DEFAULT_STACK_SIZE,
            poller_capacity: DEFAULT_POLLER_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long `runloop` will block in `poller.wait` when no timer is
    /// pending. Default is 1000ms.
    pub fn idle_tick_ms(mut self, ms: u64) -> Self {
        self.idle_tick_ms = ms;
        self
    }

    /// Set the stack size of the OS thread backing each spawned task.
    /// Default is 256KiB.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Set the initial capacity hint for the per-object poller table.
    /// Default is 64.
    pub fn poller_capacity(mut self, capacity: usize) -> Self {
        self.poller_capacity = capacity;
        self
    }
}
