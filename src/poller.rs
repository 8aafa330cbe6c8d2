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

//! Poller facade: the scheduler's contract with the OS-level event source,
//! plus a production `mio` backend and a deterministic in-memory fake used
//! by the test suite.

use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;

use crate::event::{EventSet, ObjectKind};

/// One ready notification returned by [`Poller::wait`].
///
/// The original design routes each ready object through a per-registration
/// callback so non-poller event sources (signals, timers folded into the
/// same loop) can share the dispatch path; this crate only ever drives one
/// source — the poller itself — so that tagged-callback indirection
/// collapses to the scheduler unconditionally calling its own
/// `dispatch_poller_event` for every `ReadyEvent`, with no dynamic dispatch
/// needed.
pub struct ReadyEvent {
    pub token: Token,
    pub events: EventSet,
}

/// The scheduler's contract with an event source.
///
/// Implemented by [`MioPoller`] for production use and [`FakePoller`] for
/// deterministic unit tests; the scheduler is generic over this trait so
/// neither backend needs real file descriptors to exercise the dispatch
/// logic.
pub trait Poller {
    /// Whether `object_kind`/`event_kind` combination is supported. Used
    /// once at `runloop` start to probe edge-trigger-clear semantics.
    fn support(&self, object_kind: ObjectKind, event_kind: EventSet) -> bool;

    /// Register a brand-new token of interest.
    fn insert(&mut self, token: Token, events: EventSet) -> io::Result<()>;

    /// Change the registered interest for an already-inserted token.
    fn modify(&mut self, token: Token, events: EventSet) -> io::Result<()>;

    /// Remove a token's registration entirely.
    fn remove(&mut self, token: Token) -> io::Result<()>;

    /// Block for up to `timeout`, returning every object that became
    /// ready. `timeout = None` blocks indefinitely.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<ReadyEvent>>;

    /// Interrupt an in-progress (or future) call to `wait` from another
    /// thread.
    fn spank(&self) -> io::Result<()>;
}

const WAKER_TOKEN: Token = Token(usize::MAX);

/// Production poller backed by `mio::Poll`.
///
/// Registration tokens are the caller's own `Token`s (typically a pollable
/// object's raw file descriptor wrapped as a `usize`); `MioPoller` does not
/// allocate them itself.
pub struct MioPoller {
    poll: Poll,
    waker: Waker,
    events: Events,
}

impl MioPoller {
    pub fn new(capacity: usize) -> io::Result<MioPoller> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        Ok(MioPoller {
            poll,
            waker,
            events: Events::with_capacity(capacity),
        })
    }

    fn interest_of(events: EventSet) -> Option<Interest> {
        let mut interest: Option<Interest> = None;
        if events.contains(EventSet::RECV) {
            interest = Some(match interest {
                Some(i) => i.add(Interest::READABLE),
                None => Interest::READABLE,
            });
        }
        if events.contains(EventSet::SEND) {
            interest = Some(match interest {
                Some(i) => i.add(Interest::WRITABLE),
                None => Interest::WRITABLE,
            });
        }
        interest
    }
}

impl Poller for MioPoller {
    fn support(&self, object_kind: ObjectKind, event_kind: EventSet) -> bool {
        object_kind == ObjectKind::Sock && event_kind.contains(EventSet::CLEAR)
    }

    fn insert(&mut self, token: Token, events: EventSet) -> io::Result<()> {
        let interest = Self::interest_of(events).unwrap_or(Interest::READABLE);
        // SAFETY-free: mio registration needs a `Source`, but tokens here
        // name already-open raw descriptors owned by the caller, not a
        // Rust value we hold. `register_raw_fd` is supplied by an
        // `RawFdSource` newtype that implements `Source` over the bare fd.
        let mut source = RawFdSource(token.0 as i32);
        self.poll.registry().register(&mut source, token, interest)
    }

    fn modify(&mut self, token: Token, events: EventSet) -> io::Result<()> {
        let interest = Self::interest_of(events).unwrap_or(Interest::READABLE);
        let mut source = RawFdSource(token.0 as i32);
        self.poll.registry().reregister(&mut source, token, interest)
    }

    fn remove(&mut self, token: Token) -> io::Result<()> {
        let mut source = RawFdSource(token.0 as i32);
        self.poll.registry().deregister(&mut source)
    }

    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<ReadyEvent>> {
        self.poll.poll(&mut self.events, timeout)?;
        let mut ready = Vec::with_capacity(self.events.iter().count());
        for event in self.events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            let mut set = EventSet::none();
            if event.is_readable() {
                set |= EventSet::RECV;
            }
            if event.is_writable() {
                set |= EventSet::SEND;
            }
            if event.is_read_closed() || event.is_write_closed() {
                set |= EventSet::EOF;
            }
            if event.is_error() {
                set |= EventSet::ERROR;
            }
            ready.push(ReadyEvent {
                token: event.token(),
                events: set,
            });
        }
        Ok(ready)
    }

    fn spank(&self) -> io::Result<()> {
        self.waker.wake()
    }
}

/// Adapts a bare raw file descriptor to `mio::event::Source` so `MioPoller`
/// can register tokens the caller already owns, without taking ownership
/// of the descriptor itself.
struct RawFdSource(i32);

#[cfg(unix)]
impl Source for RawFdSource {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        mio::unix::SourceFd(&self.0).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        mio::unix::SourceFd(&self.0).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        mio::unix::SourceFd(&self.0).deregister(registry)
    }
}

/// In-memory poller used by tests: `wait` never touches the OS, it just
/// drains events previously queued with [`FakePoller::push_ready`].
#[derive(Default)]
pub struct FakePoller {
    registered: Slab<EventSet>,
    pending: Vec<ReadyEvent>,
    edge_clear: bool,
    modify_calls: usize,
}

impl FakePoller {
    pub fn new() -> FakePoller {
        FakePoller {
            registered: Slab::new(),
            pending: Vec::new(),
            edge_clear: true,
            modify_calls: 0,
        }
    }

    /// Queue a ready notification that the next `wait` call will return.
    pub fn push_ready(&mut self, token: Token, events: EventSet) {
        self.pending.push(ReadyEvent { token, events });
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.registered.contains(token.0)
    }

    /// How many times `modify` has been called — tests use this to assert
    /// a cache hit skipped re-registration entirely.
    pub fn modify_calls(&self) -> usize {
        self.modify_calls
    }
}

impl Poller for FakePoller {
    fn support(&self, object_kind: ObjectKind, event_kind: EventSet) -> bool {
        self.edge_clear && object_kind == ObjectKind::Sock && event_kind.contains(EventSet::CLEAR)
    }

    fn insert(&mut self, token: Token, events: EventSet) -> io::Result<()> {
        while self.registered.len() <= token.0 {
            self.registered.insert(EventSet::none());
        }
        self.registered[token.0] = events;
        Ok(())
    }

    fn modify(&mut self, token: Token, events: EventSet) -> io::Result<()> {
        if !self.registered.contains(token.0) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "token not registered"));
        }
        self.modify_calls += 1;
        self.registered[token.0] = events;
        Ok(())
    }

    fn remove(&mut self, token: Token) -> io::Result<()> {
        if self.registered.contains(token.0) {
            self.registered.remove(token.0);
        }
        Ok(())
    }

    fn wait(&mut self, _timeout: Option<Duration>) -> io::Result<Vec<ReadyEvent>> {
        Ok(std::mem::take(&mut self.pending))
    }

    fn spank(&self) -> io::Result<()> {
        Ok(())
    }
}
