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

//! Strongly-typed event and object kinds.
//!
//! Event kinds are modeled as a small hand-rolled bitset, the way `mio`
//! itself represents `Interest`/`Ready` internally, rather than exposing raw
//! integers anywhere in the public API.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

macro_rules! bit {
    ($n:expr) => {
        1u8 << $n
    };
}

/// A set of pollable event kinds.
///
/// `RECV`/`SEND` are interest-and-readiness bits; `EOF`/`ERROR` are
/// readiness-only (the poller never takes them as input); `CLEAR` is a
/// registration-only request to enable edge-trigger-clear mode.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct EventSet(u8);

impl EventSet {
    /// Receive / readable readiness.
    pub const RECV: EventSet = EventSet(bit!(0));
    /// Send / writable readiness.
    pub const SEND: EventSet = EventSet(bit!(1));
    /// End-of-file, sticky once observed.
    pub const EOF: EventSet = EventSet(bit!(2));
    /// Error readiness.
    pub const ERROR: EventSet = EventSet(bit!(3));
    /// Request edge-trigger-clear registration semantics.
    pub const CLEAR: EventSet = EventSet(bit!(4));
    /// The empty set.
    pub const NONE: EventSet = EventSet(0);

    /// An empty event set.
    #[inline]
    pub const fn none() -> EventSet {
        EventSet::NONE
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: EventSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if `self` and `other` share any bit.
    #[inline]
    pub const fn intersects(self, other: EventSet) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn union(self, other: EventSet) -> EventSet {
        EventSet(self.0 | other.0)
    }

    #[inline]
    pub const fn intersection(self, other: EventSet) -> EventSet {
        EventSet(self.0 & other.0)
    }

    /// `self` with every bit of `other` cleared.
    #[inline]
    pub const fn remove(self, other: EventSet) -> EventSet {
        EventSet(self.0 & !other.0)
    }

    #[inline]
    pub(crate) const fn from_raw(bits: u8) -> EventSet {
        EventSet(bits)
    }

    #[inline]
    pub(crate) const fn raw(self) -> u8 {
        self.0
    }
}

impl BitOr for EventSet {
    type Output = EventSet;

    #[inline]
    fn bitor(self, rhs: EventSet) -> EventSet {
        self.union(rhs)
    }
}

impl BitOrAssign for EventSet {
    #[inline]
    fn bitor_assign(&mut self, rhs: EventSet) {
        *self = self.union(rhs);
    }
}

impl fmt::Debug for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        write!(f, "EventSet(")?;
        for (bit, name) in [
            (EventSet::RECV, "RECV"),
            (EventSet::SEND, "SEND"),
            (EventSet::EOF, "EOF"),
            (EventSet::ERROR, "ERROR"),
            (EventSet::CLEAR, "CLEAR"),
        ] {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        write!(f, ")")
    }
}

/// The kind of OS resource a pollable object wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Sock,
    Pipe,
    Proc,
}

impl ObjectKind {
    /// Whether `poller_wait` accepts objects of this kind.
    #[inline]
    pub fn is_pollable(self) -> bool {
        matches!(self, ObjectKind::Sock | ObjectKind::Pipe)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Sock => "sock",
            ObjectKind::Pipe => "pipe",
            ObjectKind::Proc => "proc",
        };
        f.write_str(s)
    }
}
