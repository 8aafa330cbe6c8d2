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

//! A single-threaded cooperative coroutine scheduler with non-blocking I/O
//! support.
//!
//! Every task runs to a yield point before the next one gets to run — there
//! is no pre-emption, and exactly one task's user code executes at any
//! instant. Tasks wait on pollable objects (sockets, pipes) through one
//! shared OS-level event poller and on timeouts through one shared timer
//! wheel, instead of each blocking its own OS thread; [`Scheduler::runloop`]
//! is the thread that actually blocks.
//!
//! ```no_run
//! use cosched::{Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::production(SchedulerConfig::new()).unwrap();
//! let handle = scheduler.clone();
//! scheduler.co_start(move |s| {
//!     s.sleep(10).unwrap();
//!     println!("done sleeping");
//! }).unwrap();
//! handle.runloop().unwrap();
//! ```

mod config;
mod coroutine;
mod error;
mod event;
mod handle;
mod pollable;
mod poller;
mod poller_entry;
mod scheduler;
mod timer;

pub use config::SchedulerConfig;
pub use coroutine::{CoroutineId, Status};
pub use error::{Error, Result};
pub use event::{EventSet, ObjectKind};
pub use handle::CoroutineHandle;
pub use pollable::PollableObject;
pub use poller::{FakePoller, MioPoller, Poller, ReadyEvent};
pub use scheduler::Scheduler;
