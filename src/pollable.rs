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

//! The contract a pollable object must satisfy to be waited on.
//!
//! The higher-level socket/pipe/process wrappers that would normally
//! implement this are out of scope for this crate (see the crate-level
//! docs); this trait is the entire surface the scheduler needs from them.

use mio::Token;

use crate::event::ObjectKind;

/// An OS resource the scheduler can wait on via [`crate::scheduler::Scheduler::poller_wait`].
pub trait PollableObject {
    /// What kind of resource this is. Only `Sock` and `Pipe` are
    /// pollable; passing a `Proc` to `poller_wait` is a contract
    /// violation (`Error::InvalidObjectKind`).
    fn otype(&self) -> ObjectKind;

    /// A stable key identifying this object to the poller for the
    /// object's lifetime — typically derived from its raw file
    /// descriptor.
    fn token(&self) -> Token;
}
