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

//! The scheduler: task table, ready queue, suspended set, per-object poller
//! bookkeeping, and the main run loop.
//!
//! A [`Scheduler`] is a cheap, `Clone`-able handle onto shared state
//! (`Arc<Mutex<Inner<P>>>`). Every task body receives its own clone so it
//! can call back into `poller_wait`/`sleep`/`co_suspend` from its own OS
//! thread. The mutex exists purely to satisfy `Send`: the coroutine
//! primitive's strict hand-off (§4.9) guarantees only one of {the scheduler
//! thread, one task thread} is ever doing anything at a time, so the lock
//! is never contended in practice — see `DESIGN.md` for the fuller
//! argument, including the one case (an external thread calling `stop()`
//! while `runloop` is blocked in `poller.wait`) where this buys slightly
//! weaker interruption latency than a from-scratch lock-free design would.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use linked_hash_map::LinkedHashMap;
use log::{debug, trace, warn};
use mio::Token;

use crate::config::SchedulerConfig;
use crate::coroutine::{CoroutineId, RawCoroutine};
use crate::error::{Error, Result};
use crate::event::{EventSet, ObjectKind};
use crate::handle::CoroutineHandle;
use crate::pollable::PollableObject;
use crate::poller::{MioPoller, Poller, ReadyEvent};
use crate::poller_entry::PollerEntry;
use crate::timer::Timer;

const POISON: &str = "scheduler mutex poisoned by a panicking task thread";

struct Inner<P> {
    tasks: LinkedHashMap<CoroutineId, CoroutineHandle>,
    ready: Vec<(CoroutineId, i32)>,
    suspended: LinkedHashMap<CoroutineId, ()>,
    poller_data: LinkedHashMap<Token, PollerEntry>,
    started: bool,
    supports_edge_clear: bool,
    timer: Timer,
    poller: P,
    config: SchedulerConfig,
    /// First fatal error observed while resuming a task from a fired timer
    /// callback. `resume_timeout` has no return path back to `runloop` (the
    /// timer only calls it as a `FnOnce(bool)`), so it stashes the error
    /// here instead of swallowing it; `runloop` checks and clears this after
    /// every `timer.next()` batch.
    timer_fatal: Option<Error>,
}

/// Multiplexes many cooperative tasks over one poller and one timer wheel.
///
/// Cloning a `Scheduler` is cheap and shares the same underlying state —
/// this is how a task's body gets a handle to call back into
/// `poller_wait`/`sleep`/`co_suspend`.
pub struct Scheduler<P: Poller> {
    inner: Arc<Mutex<Inner<P>>>,
}

impl<P: Poller> Clone for Scheduler<P> {
    fn clone(&self) -> Self {
        Scheduler {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Poller> Scheduler<P> {
    /// Build a scheduler over an already-constructed poller.
    pub fn new(poller: P, config: SchedulerConfig) -> Scheduler<P> {
        Scheduler {
            inner: Arc::new(Mutex::new(Inner {
                tasks: LinkedHashMap::new(),
                ready: Vec::new(),
                suspended: LinkedHashMap::new(),
                poller_data: LinkedHashMap::new(),
                started: false,
                supports_edge_clear: false,
                timer: Timer::new(),
                poller,
                config,
                timer_fatal: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<P>> {
        self.inner.lock().expect(POISON)
    }

    // ---- task lifecycle (§4.2) -----------------------------------------

    /// Spawn an unnamed task. If the scheduler is already running the task
    /// is resumed immediately — and a failure of that immediate resume
    /// (e.g. the task panics before its first suspension) propagates here
    /// — otherwise it is queued for the next [`Scheduler::runloop`], in
    /// which case this always succeeds.
    pub fn co_start<F>(&self, body: F) -> Result<CoroutineId>
    where
        F: FnOnce(Scheduler<P>) + Send + 'static,
    {
        self.spawn(None, body)
    }

    /// Like [`Scheduler::co_start`] but attaches a human-readable label,
    /// useful for logging and debugging.
    pub fn co_start_named<F>(&self, name: impl Into<String>, body: F) -> Result<CoroutineId>
    where
        F: FnOnce(Scheduler<P>) + Send + 'static,
    {
        self.spawn(Some(name.into()), body)
    }

    fn spawn<F>(&self, name: Option<String>, body: F) -> Result<CoroutineId>
    where
        F: FnOnce(Scheduler<P>) + Send + 'static,
    {
        let scheduler = self.clone();
        let stack_size = self.lock().config.stack_size;
        let thread = RawCoroutine::create(stack_size, move || body(scheduler));
        let id = thread.id();
        trace!("co_start: spawned {}", id);

        let mut inner = self.lock();
        inner.tasks.insert(id, CoroutineHandle::new(name, thread));
        let started = inner.started;
        drop(inner);

        if started {
            self.resume_now(id, 0)?;
        } else {
            self.lock().ready.push((id, 0));
        }
        Ok(id)
    }

    /// Resume `id` with `value`; the value becomes the return of whatever
    /// suspend call is parking it. Panics if `id` is not suspended —
    /// callers must only resume handles they know are parked (the run
    /// loop, the timer, and the poller dispatcher all satisfy this by
    /// construction).
    pub fn co_resume(&self, id: CoroutineId, value: i32) -> Result<()> {
        self.resume_now(id, value)
    }

    /// Yield the current coroutine with `value`, returning whatever value
    /// the matching [`Scheduler::co_resume`] delivers. Must be called from
    /// inside a task spawned by this scheduler.
    pub fn co_suspend(&self, value: i32) -> Result<i32> {
        if crate::coroutine::current_id().is_none() {
            return Err(Error::NotInCoroutine);
        }
        Ok(crate::coroutine::yield_now(value))
    }

    /// The id of the task currently executing, or `None` outside any
    /// managed coroutine.
    pub fn co_running(&self) -> Option<CoroutineId> {
        crate::coroutine::current_id()
    }

    /// A snapshot of every live task, in spawn order.
    pub fn co_tasks(&self) -> Vec<CoroutineId> {
        self.lock().tasks.keys().copied().collect()
    }

    /// Number of live tasks.
    pub fn co_count(&self) -> usize {
        self.lock().tasks.len()
    }

    /// The status of `id`, or `None` if it has already terminated (or was
    /// never spawned by this scheduler).
    pub fn co_status(&self, id: CoroutineId) -> Option<crate::coroutine::Status> {
        self.lock().tasks.get(&id).map(|handle| handle.status())
    }

    /// The human-readable label `id` was spawned with, if any. `None` both
    /// for unnamed tasks and for tasks that have already terminated.
    pub fn co_name(&self, id: CoroutineId) -> Option<String> {
        self.lock()
            .tasks
            .get(&id)
            .and_then(|handle| handle.name().map(str::to_owned))
    }

    /// Run `f` with direct access to the underlying poller.
    ///
    /// Bypasses `poller_wait`'s bookkeeping entirely — intended for tests
    /// that need to seed a `FakePoller` with pending events before
    /// `runloop`, not for production call sites.
    pub fn with_poller<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        let mut inner = self.lock();
        f(&mut inner.poller)
    }

    /// Resume `id` with `value`, updating the task table and suspended set
    /// based on the outcome. Does not hold the scheduler lock for the
    /// (potentially long-running, user-code-executing) duration of the
    /// resume itself.
    fn resume_now(&self, id: CoroutineId, value: i32) -> Result<()> {
        let thread = {
            let mut inner = self.lock();
            match inner.tasks.get_mut(&id) {
                Some(handle) => {
                    handle.cancel_timer();
                    handle.thread_handle()
                }
                None => return Ok(()),
            }
        };

        let outcome = thread.lock().expect(POISON).resume(value);

        let mut inner = self.lock();
        match outcome {
            crate::coroutine::Outcome::Yielded(_) => {
                inner.suspended.insert(id, ());
                Ok(())
            }
            crate::coroutine::Outcome::Finished(Ok(())) => {
                trace!("{} finished", id);
                inner.tasks.remove(&id);
                inner.suspended.remove(&id);
                Ok(())
            }
            crate::coroutine::Outcome::Finished(Err(panic)) => {
                let msg = panic_message(&panic);
                warn!("{} panicked: {}", id, msg);
                inner.tasks.remove(&id);
                inner.suspended.remove(&id);
                Err(Error::CoroutinePanicked(msg))
            }
        }
    }

    /// Resume `id` because a timer it was waiting on fired for real (not
    /// cancelled). The timer calls this as a `FnOnce(bool)` with no return
    /// path, so a failure is stashed in `timer_fatal` for `runloop` to pick
    /// up after the current batch of timer fires, rather than swallowed.
    fn resume_timeout(&self, id: CoroutineId) {
        if let Err(e) = self.resume_now(id, 0) {
            warn!("timeout resume of {} failed: {}", id, e);
            let mut inner = self.lock();
            if inner.timer_fatal.is_none() {
                inner.timer_fatal = Some(e);
            }
        }
    }

    /// Resume `id` with the outcome of a poller dispatch: `-1` if `events`
    /// carries `ERROR` or the scheduler is no longer started, the event
    /// bitset otherwise. Mirrors `_poller_resume_co`.
    fn resume_dispatch(&self, id: CoroutineId, events: EventSet) -> Result<()> {
        let started = self.lock().started;
        let value = if events.contains(EventSet::ERROR) || !started {
            -1
        } else {
            events.raw() as i32
        };
        self.resume_now(id, value)
    }

    // ---- suspension on I/O (§4.3, §4.4) ---------------------------------

    /// Suspend the current task until `events` (some subset of `RECV`,
    /// `SEND`) becomes ready on `obj`, or until `timeout_ms` elapses.
    ///
    /// `timeout_ms == 0` means "wait forever" (no timer is posted), per
    /// the literal algorithm this is grounded on; it is not a "poll and
    /// return immediately" request. Returns `0` on timeout, the ready
    /// subset of `events` on success, or `Error::EventsError` /
    /// `Error::Stopped` on failure.
    pub fn poller_wait<O: PollableObject>(
        &self,
        obj: &O,
        events: EventSet,
        timeout_ms: u64,
    ) -> Result<EventSet> {
        let id = crate::coroutine::current_id().ok_or(Error::NotInCoroutine)?;
        if !obj.otype().is_pollable() {
            return Err(Error::InvalidObjectKind);
        }

        {
            let mut inner = self.lock();
            if !inner.started {
                return Err(Error::NotStarted);
            }

            let token = obj.token();
            let existed = inner.poller_data.contains_key(&token);
            if !existed {
                inner.poller_data.insert(token, PollerEntry::new());
            }

            // Cache shortcut: serve from `events_save` without touching
            // the poller or suspending at all.
            {
                let entry = inner.poller_data.get_mut(&token).unwrap();
                if !entry.events_wait.is_none() && entry.events_save.intersects(events) {
                    if entry.events_save.contains(EventSet::ERROR) {
                        entry.events_save = EventSet::none();
                        return Err(Error::EventsError);
                    }
                    let got = entry.events_save.intersection(events);
                    entry.events_save = entry.events_save.remove(got);
                    return Ok(got);
                }
            }

            // Registration reconciliation.
            let supports_clear = inner.supports_edge_clear;
            let (new_wait, adds_new_bits) = {
                let entry = inner.poller_data.get(&token).unwrap();
                let mut new_wait = entry.events_wait;
                if entry.co_recv.is_none() {
                    new_wait = new_wait.remove(EventSet::RECV);
                }
                if entry.co_send.is_none() {
                    new_wait = new_wait.remove(EventSet::SEND);
                }
                new_wait = new_wait.union(events);
                if obj.otype() == ObjectKind::Sock && supports_clear {
                    new_wait = new_wait.union(EventSet::CLEAR);
                }
                let adds = new_wait.raw() & !entry.events_wait.raw() != 0;
                (new_wait, adds)
            };

            if !existed {
                inner.poller.insert(token, new_wait)?;
            } else if adds_new_bits {
                inner.poller.modify(token, new_wait)?;
            }

            let timer_task = if timeout_ms > 0 {
                let scheduler = self.clone();
                Some(inner.timer.post(timeout_ms, move |cancelled| {
                    if !cancelled {
                        scheduler.resume_timeout(id);
                    }
                }))
            } else {
                None
            };

            let entry = inner.poller_data.get_mut(&token).unwrap();
            if events.contains(EventSet::RECV) {
                entry.co_recv = Some(id);
            }
            if events.contains(EventSet::SEND) {
                entry.co_send = Some(id);
            }
            entry.events_wait = new_wait;
            entry.events_save = EventSet::none();

            if let Some(task) = timer_task {
                if let Some(handle) = inner.tasks.get_mut(&id) {
                    handle.timer_task = Some(task);
                }
            }
        }

        let value = crate::coroutine::yield_now(0);
        if value < 0 {
            Err(Error::Stopped)
        } else {
            Ok(EventSet::from_raw(value as u8))
        }
    }

    /// Forget `obj`'s registration. Safe to call on an object with no
    /// bookkeeping at all, and safe to call twice in a row.
    pub fn poller_cancel<O: PollableObject>(&self, obj: &O) -> Result<()> {
        let token = obj.token();
        let mut inner = self.lock();
        if let Some(entry) = inner.poller_data.get(&token) {
            if !entry.events_wait.is_none() {
                inner.poller.remove(token)?;
            }
        }
        inner.poller_data.remove(&token);
        Ok(())
    }

    // ---- sleeping (§4.5) -------------------------------------------------

    /// Suspend the current task for `ms` milliseconds. `ms == 0` returns
    /// immediately.
    pub fn sleep(&self, ms: u64) -> Result<()> {
        let id = crate::coroutine::current_id().ok_or(Error::NotInCoroutine)?;
        if ms == 0 {
            return Ok(());
        }

        {
            let mut inner = self.lock();
            if !inner.started {
                return Err(Error::NotStarted);
            }
            let scheduler = self.clone();
            let task = inner.timer.post(ms, move |cancelled| {
                if !cancelled {
                    scheduler.resume_timeout(id);
                }
            });
            if let Some(handle) = inner.tasks.get_mut(&id) {
                handle.timer_task = Some(task);
            }
        }

        let value = crate::coroutine::yield_now(0);
        if value < 0 {
            Err(Error::Stopped)
        } else {
            Ok(())
        }
    }

    // ---- poller dispatch (§4.6) -------------------------------------------

    /// Invoked from the run loop for each object the poller reports ready.
    fn dispatch_poller_event(&self, token: Token, raw_events: EventSet) -> Result<()> {
        let mut events = raw_events;

        let (co_recv, co_send) = {
            let mut inner = self.lock();
            let entry = match inner.poller_data.get_mut(&token) {
                Some(entry) => entry,
                None => return Ok(()),
            };

            if events.contains(EventSet::EOF) {
                events = events.remove(EventSet::EOF);
                entry.events_save |= entry.events_wait;
            }

            let co_recv = if events.contains(EventSet::RECV) {
                entry.co_recv
            } else {
                None
            };
            let co_send = if events.contains(EventSet::SEND) {
                entry.co_send
            } else {
                None
            };
            (co_recv, co_send)
        };

        if co_recv.is_some() && co_recv == co_send {
            let id = co_recv.unwrap();
            self.clear_waiters(token, true, true);
            self.resume_dispatch(id, events)?;
            events = EventSet::none();
        } else {
            if let Some(id) = co_recv {
                self.clear_waiters(token, true, false);
                self.resume_dispatch(id, events.remove(EventSet::SEND))?;
                events = events.remove(EventSet::RECV);
            }
            if let Some(id) = co_send {
                self.clear_waiters(token, false, true);
                self.resume_dispatch(id, events.remove(EventSet::RECV))?;
                events = events.remove(EventSet::SEND);
            }
        }

        let mut inner = self.lock();
        if let Some(entry) = inner.poller_data.get_mut(&token) {
            entry.events_save |= events.intersection(EventSet::RECV.union(EventSet::SEND));
        }
        Ok(())
    }

    fn clear_waiters(&self, token: Token, clear_recv: bool, clear_send: bool) {
        let mut inner = self.lock();
        if let Some(entry) = inner.poller_data.get_mut(&token) {
            if clear_recv {
                entry.co_recv = None;
            }
            if clear_send {
                entry.co_send = None;
            }
        }
    }

    // ---- the run loop (§4.7, §4.8) ---------------------------------------

    /// Drain the ready queue, then service poller and timer events until
    /// no tasks remain, `stop()` is called, or the poller reports a fatal
    /// error.
    pub fn runloop(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            inner.started = true;
            inner.supports_edge_clear = inner.poller.support(ObjectKind::Sock, EventSet::CLEAR);
        }
        debug!("runloop: started");

        let ready = {
            let mut inner = self.lock();
            std::mem::take(&mut inner.ready)
        };
        for (id, value) in ready {
            if let Err(e) = self.resume_now(id, value) {
                return self.teardown(Some(e));
            }
        }

        let mut loop_err = None;
        loop {
            let keep_going = {
                let inner = self.lock();
                inner.started && !inner.tasks.is_empty()
            };
            if !keep_going {
                break;
            }

            let timeout = {
                let inner = self.lock();
                Some(
                    inner
                        .timer
                        .delay()
                        .unwrap_or_else(|| Duration::from_millis(inner.config.idle_tick_ms)),
                )
            };

            let events: Vec<ReadyEvent> = {
                let mut inner = self.lock();
                match inner.poller.wait(timeout) {
                    Ok(events) => events,
                    Err(e) => {
                        loop_err = Some(Error::from(e));
                        break;
                    }
                }
            };

            let mut dispatch_failed = false;
            for ReadyEvent { token, events } in events {
                if let Err(e) = self.dispatch_poller_event(token, events) {
                    loop_err = Some(e);
                    dispatch_failed = true;
                    break;
                }
            }
            if dispatch_failed {
                break;
            }

            let fired = {
                let mut inner = self.lock();
                inner.timer.next()
            };
            for (cancelled, callback) in fired {
                callback(cancelled);
            }

            let timer_fatal = self.lock().timer_fatal.take();
            if let Some(e) = timer_fatal {
                loop_err = Some(e);
                break;
            }
        }

        self.teardown(loop_err)
    }

    /// Stop the run loop. Idempotent; safe to call from within a managed
    /// coroutine. Safe from an unrelated OS thread only to the extent
    /// `poller.spank()` is — see the module docs.
    pub fn stop(&self) {
        let mut inner = self.lock();
        inner.started = false;
        if let Err(e) = inner.poller.spank() {
            warn!("poller.spank failed: {}", e);
        }
    }

    fn teardown(&self, loop_err: Option<Error>) -> Result<()> {
        {
            let mut inner = self.lock();
            inner.started = false;
        }

        let suspended_ids: Vec<CoroutineId> = {
            let inner = self.lock();
            inner.suspended.keys().copied().collect()
        };
        let mut teardown_err = None;
        for id in suspended_ids {
            if let Err(e) = self.resume_now(id, -1) {
                if teardown_err.is_none() {
                    teardown_err = Some(e);
                }
            }
        }

        let fired = {
            let mut inner = self.lock();
            inner.timer.kill()
        };
        for callback in fired {
            callback(true);
        }

        debug!("runloop: stopped");
        match loop_err {
            Some(e) => Err(e),
            None => match teardown_err {
                Some(e) => Err(e),
                None => Ok(()),
            },
        }
    }
}

impl Scheduler<MioPoller> {
    /// Convenience constructor wiring the production `mio`-backed poller.
    pub fn production(config: SchedulerConfig) -> std::io::Result<Scheduler<MioPoller>> {
        let poller = MioPoller::new(config.poller_capacity)?;
        Ok(Scheduler::new(poller, config))
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "coroutine panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::FakePoller;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSock(Token);

    impl PollableObject for FakeSock {
        fn otype(&self) -> ObjectKind {
            ObjectKind::Sock
        }
        fn token(&self) -> Token {
            self.0
        }
    }

    fn test_scheduler() -> Scheduler<FakePoller> {
        Scheduler::new(FakePoller::new(), SchedulerConfig::new().stack_size(64 * 1024))
    }

    #[test]
    fn co_count_tracks_live_tasks() {
        let sched = test_scheduler();
        assert_eq!(sched.co_count(), 0);
        sched.co_start(|_s| {}).unwrap();
        assert_eq!(sched.co_count(), 1);
        sched.runloop().unwrap();
        assert_eq!(sched.co_count(), 0);
    }

    #[test]
    fn immediate_readiness_cache_hit() {
        // Task A waits on RECV only; the poller reports RECV|SEND, so the
        // unconsumed SEND bit lands in `events_save`. A then spawns task B
        // (guaranteeing B starts strictly after A's dispatch, in the same
        // tick) which waits on SEND for the same object and must be
        // satisfied straight from the cache, with no further poller call.
        let sched = test_scheduler();
        let token = Token(1);
        let b_result = Arc::new(Mutex::new(None));

        let b_result1 = b_result.clone();
        let sched_for_a = sched.clone();
        sched.co_start(move |s| {
            let got = s.poller_wait(&FakeSock(token), EventSet::RECV, 0).unwrap();
            assert_eq!(got, EventSet::RECV);

            let modify_calls_before = s.lock().poller.modify_calls();
            let b = b_result1.clone();
            let sched_for_b = sched_for_a.clone();
            sched_for_a.co_start(move |s2| {
                let got = s2.poller_wait(&FakeSock(token), EventSet::SEND, 0).unwrap();
                *b.lock().unwrap() = Some(got);
                let _ = &sched_for_b;
            }).unwrap();
            // B ran synchronously inside this co_start call (the scheduler
            // was already started), so its cache-hit already happened.
            assert_eq!(s.lock().poller.modify_calls(), modify_calls_before);
        }).unwrap();

        {
            let mut inner = sched.lock();
            inner.poller.insert(token, EventSet::RECV).unwrap();
            inner.poller.push_ready(token, EventSet::RECV | EventSet::SEND);
        }

        sched.runloop().unwrap();
        assert_eq!(*b_result.lock().unwrap(), Some(EventSet::SEND));
    }

    #[test]
    fn merged_recv_send_resumes_once() {
        let sched = test_scheduler();
        let seen = Arc::new(Mutex::new(None));
        let token = Token(2);

        let seen1 = seen.clone();
        sched.co_start(move |s| {
            let got = s
                .poller_wait(&FakeSock(token), EventSet::RECV | EventSet::SEND, 0)
                .unwrap();
            *seen1.lock().unwrap() = Some(got);
        }).unwrap();

        {
            let mut inner = sched.lock();
            inner
                .poller
                .insert(token, EventSet::RECV | EventSet::SEND)
                .unwrap();
            inner.poller.push_ready(token, EventSet::RECV | EventSet::SEND);
        }

        sched.runloop().unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(EventSet::RECV | EventSet::SEND));
    }

    #[test]
    fn split_recv_send_resumes_each_waiter_once() {
        let sched = test_scheduler();
        let recv_seen = Arc::new(Mutex::new(None));
        let send_seen = Arc::new(Mutex::new(None));
        let token = Token(3);

        let r = recv_seen.clone();
        sched.co_start(move |s| {
            let got = s.poller_wait(&FakeSock(token), EventSet::RECV, 0).unwrap();
            *r.lock().unwrap() = Some(got);
        }).unwrap();
        let w = send_seen.clone();
        sched.co_start(move |s| {
            let got = s.poller_wait(&FakeSock(token), EventSet::SEND, 0).unwrap();
            *w.lock().unwrap() = Some(got);
        }).unwrap();

        {
            let mut inner = sched.lock();
            inner
                .poller
                .insert(token, EventSet::RECV | EventSet::SEND)
                .unwrap();
            inner.poller.push_ready(token, EventSet::RECV | EventSet::SEND);
        }

        sched.runloop().unwrap();
        assert_eq!(*recv_seen.lock().unwrap(), Some(EventSet::RECV));
        assert_eq!(*send_seen.lock().unwrap(), Some(EventSet::SEND));
    }

    #[test]
    fn timeout_resumes_with_empty_set() {
        let sched = test_scheduler();
        let result = Arc::new(Mutex::new(None));
        let token = Token(4);

        let r = result.clone();
        sched.co_start(move |s| {
            let got = s.poller_wait(&FakeSock(token), EventSet::RECV, 20).unwrap();
            *r.lock().unwrap() = Some(got);
        }).unwrap();

        sched.runloop().unwrap();
        assert_eq!(*result.lock().unwrap(), Some(EventSet::none()));
    }

    #[test]
    fn error_event_surfaces_and_clears_cache() {
        let sched = test_scheduler();
        let outcome = Arc::new(Mutex::new(None));
        let token = Token(5);

        let o = outcome.clone();
        sched.co_start(move |s| {
            let result = s.poller_wait(&FakeSock(token), EventSet::RECV, 0);
            *o.lock().unwrap() = Some(result.is_err());
        }).unwrap();

        {
            let mut inner = sched.lock();
            inner.poller.insert(token, EventSet::RECV).unwrap();
            inner.poller.push_ready(token, EventSet::RECV | EventSet::ERROR);
        }

        sched.runloop().unwrap();
        assert_eq!(*outcome.lock().unwrap(), Some(true));
    }

    #[test]
    fn stop_during_wait_cancels_suspended_tasks() {
        let sched = test_scheduler();
        let a_done = Arc::new(AtomicUsize::new(0));
        let b_done = Arc::new(AtomicUsize::new(0));

        let a1 = a_done.clone();
        sched.co_start(move |s| {
            let r = s.poller_wait(&FakeSock(Token(10)), EventSet::RECV, 0);
            assert!(r.is_err());
            a1.fetch_add(1, Ordering::SeqCst);
        }).unwrap();
        let b1 = b_done.clone();
        sched.co_start(move |s| {
            let r = s.poller_wait(&FakeSock(Token(11)), EventSet::RECV, 0);
            assert!(r.is_err());
            b1.fetch_add(1, Ordering::SeqCst);
        }).unwrap();
        sched.co_start(|s| {
            s.stop();
        }).unwrap();

        let result = sched.runloop();
        assert!(result.is_ok());
        assert_eq!(a_done.load(Ordering::SeqCst), 1);
        assert_eq!(b_done.load(Ordering::SeqCst), 1);
        assert_eq!(sched.co_count(), 0);
    }

    #[test]
    fn co_start_while_running_propagates_a_sibling_panic() {
        // Spawning while `started` resumes the new task immediately
        // (§4.2): if that immediate resume panics, `co_start` itself must
        // return the error rather than swallow it.
        let sched = test_scheduler();
        let saw_err = Arc::new(AtomicUsize::new(0));

        let s1 = saw_err.clone();
        sched.co_start(move |s| {
            let result = s.co_start(|_s2| panic!("boom from sibling"));
            match result {
                Err(Error::CoroutinePanicked(_)) => {
                    s1.fetch_add(1, Ordering::SeqCst);
                }
                other => panic!("expected CoroutinePanicked, got {:?}", other),
            }
        }).unwrap();

        sched.runloop().unwrap();
        assert_eq!(saw_err.load(Ordering::SeqCst), 1);
        assert_eq!(sched.co_count(), 0);
    }
}
