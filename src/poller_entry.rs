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

//! Per-pollable-object bookkeeping.

use mio::Token;

use crate::coroutine::CoroutineId;
use crate::event::EventSet;

/// The scheduler's bookkeeping for one pollable object (socket or pipe).
///
/// Owned by [`crate::scheduler::Scheduler`] in its `poller_data` table,
/// keyed by the object's `mio::Token`.
#[derive(Debug, Default)]
pub struct PollerEntry {
    /// Task waiting for receive readiness, if any.
    pub co_recv: Option<CoroutineId>,
    /// Task waiting for send readiness, if any.
    pub co_send: Option<CoroutineId>,
    /// Event kinds currently registered with the poller for this object.
    pub events_wait: EventSet,
    /// Readiness observed but not yet consumed by a waiter — the
    /// edge-triggered cache, plus a sticky EOF carry.
    pub events_save: EventSet,
}

impl PollerEntry {
    pub fn new() -> PollerEntry {
        PollerEntry::default()
    }

    /// True once neither waiter is registered and nothing is cached or
    /// requested — the entry is dead weight and must be dropped (data
    /// model invariant 2).
    pub fn is_empty(&self) -> bool {
        self.co_recv.is_none()
            && self.co_send.is_none()
            && self.events_wait.is_none()
            && self.events_save.is_none()
    }
}

/// Just documents that `PollerEntry` keys are `mio::Token`s; kept as a type
/// alias so call sites read `PollerKey` instead of the more generic `Token`.
pub type PollerKey = Token;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_empty() {
        let entry = PollerEntry::new();
        assert!(entry.is_empty());
    }

    #[test]
    fn entry_with_a_waiter_is_not_empty() {
        let mut entry = PollerEntry::new();
        entry.co_recv = Some(CoroutineId::test_id(1));
        assert!(!entry.is_empty());
    }
}
