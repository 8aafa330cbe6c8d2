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

//! Error types surfaced by the scheduler.

use std::fmt;
use std::io;

/// Errors returned by scheduler operations.
///
/// Every contract violation and every collaborator failure described in the
/// design gets its own variant so callers can `match` on cause instead of
/// parsing a message string.
#[derive(Debug)]
pub enum Error {
    /// A scheduler operation that requires a running coroutine was called
    /// from outside one.
    NotInCoroutine,
    /// The scheduler has not been started (or has already stopped) and the
    /// requested operation requires a running `runloop`.
    NotStarted,
    /// `poller_wait` was called with an object kind that cannot be polled
    /// (only `Sock` and `Pipe` are supported).
    InvalidObjectKind,
    /// The poller facade (`insert`/`modify`/`remove`/`wait`) failed.
    Poller(io::Error),
    /// A sticky `ERROR` event was cached on the object and is surfaced to
    /// the next waiter.
    EventsError,
    /// The task was forcibly resumed with the stop sentinel because
    /// `Scheduler::stop()` was called while it was suspended.
    Stopped,
    /// The coroutine body panicked or otherwise aborted during `co_resume`.
    CoroutinePanicked(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotInCoroutine => write!(f, "called outside of a managed coroutine"),
            Error::NotStarted => write!(f, "scheduler is not started"),
            Error::InvalidObjectKind => write!(f, "object kind does not support polling"),
            Error::Poller(err) => write!(f, "poller error: {}", err),
            Error::EventsError => write!(f, "events error"),
            Error::Stopped => write!(f, "scheduler stopped while task was suspended"),
            Error::CoroutinePanicked(msg) => write!(f, "coroutine panicked: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Poller(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Poller(err)
    }
}

/// Shorthand for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
