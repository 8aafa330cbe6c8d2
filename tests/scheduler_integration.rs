//! End-to-end coverage of the run loop against `FakePoller`, exercising the
//! scenarios from the core design's testable-properties section at the
//! public-API level rather than through `scheduler.rs`'s own `#[cfg(test)]`
//! unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cosched::{EventSet, ObjectKind, PollableObject, Poller, Scheduler, SchedulerConfig};
use mio::Token;

struct FakeSock(Token);

impl PollableObject for FakeSock {
    fn otype(&self) -> ObjectKind {
        ObjectKind::Sock
    }

    fn token(&self) -> Token {
        self.0
    }
}

fn scheduler() -> Scheduler<cosched::FakePoller> {
    Scheduler::new(
        cosched::FakePoller::new(),
        SchedulerConfig::new().stack_size(64 * 1024),
    )
}

#[test]
fn sleep_zero_is_a_no_op() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    let ran = Arc::new(AtomicUsize::new(0));
    let r = ran.clone();
    sched.co_start(move |s| {
        s.sleep(0).unwrap();
        r.fetch_add(1, Ordering::SeqCst);
    }).unwrap();
    sched.runloop().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn sleep_resumes_after_timer_fires() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    let ran = Arc::new(AtomicUsize::new(0));
    let r = ran.clone();
    sched.co_start(move |s| {
        s.sleep(5).unwrap();
        r.fetch_add(1, Ordering::SeqCst);
    }).unwrap();
    sched.runloop().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn co_status_and_name_reflect_the_task_table() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    let token = Token(99);

    let id = sched.co_start_named("waiter", move |s| {
        let _ = s.poller_wait(&FakeSock(token), EventSet::RECV, 0);
    }).unwrap();
    assert_eq!(sched.co_name(id), Some("waiter".to_string()));

    inject(&sched, token, EventSet::RECV, EventSet::RECV);
    sched.runloop().unwrap();

    assert_eq!(sched.co_status(id), None);
    assert_eq!(sched.co_name(id), None);
}

#[test]
fn poller_cancel_twice_is_idempotent() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    let token = Token(100);
    let obj = FakeSock(token);
    sched.poller_cancel(&obj).unwrap();
    sched.poller_cancel(&obj).unwrap();
}

#[test]
fn ready_queue_drains_in_insertion_order() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let o = order.clone();
        sched.co_start(move |_s| {
            o.lock().unwrap().push(i);
        }).unwrap();
    }

    sched.runloop().unwrap();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn merged_recv_send_on_one_object_resumes_once() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    let token = Token(1);
    let seen = Arc::new(Mutex::new(None));

    let s1 = seen.clone();
    sched.co_start(move |s| {
        let got = s
            .poller_wait(&FakeSock(token), EventSet::RECV | EventSet::SEND, 0)
            .unwrap();
        *s1.lock().unwrap() = Some(got);
    }).unwrap();

    inject(&sched, token, EventSet::RECV | EventSet::SEND, EventSet::RECV | EventSet::SEND);

    sched.runloop().unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(EventSet::RECV | EventSet::SEND));
}

#[test]
fn split_recv_send_resumes_each_waiter_with_its_own_direction() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    let token = Token(2);
    let recv_seen = Arc::new(Mutex::new(None));
    let send_seen = Arc::new(Mutex::new(None));

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

    inject(&sched, token, EventSet::RECV | EventSet::SEND, EventSet::RECV | EventSet::SEND);

    sched.runloop().unwrap();
    assert_eq!(*recv_seen.lock().unwrap(), Some(EventSet::RECV));
    assert_eq!(*send_seen.lock().unwrap(), Some(EventSet::SEND));
}

#[test]
fn timeout_resumes_with_empty_event_set() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    let token = Token(3);
    let result = Arc::new(Mutex::new(None));

    let r = result.clone();
    sched.co_start(move |s| {
        let got = s.poller_wait(&FakeSock(token), EventSet::RECV, 20).unwrap();
        *r.lock().unwrap() = Some(got);
    }).unwrap();

    sched.runloop().unwrap();
    assert_eq!(*result.lock().unwrap(), Some(EventSet::none()));
}

#[test]
fn error_readiness_surfaces_as_events_error() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    let token = Token(4);
    let failed = Arc::new(AtomicUsize::new(0));

    let f = failed.clone();
    sched.co_start(move |s| {
        if s.poller_wait(&FakeSock(token), EventSet::RECV, 0).is_err() {
            f.fetch_add(1, Ordering::SeqCst);
        }
    }).unwrap();

    inject(&sched, token, EventSet::RECV, EventSet::RECV | EventSet::ERROR);

    sched.runloop().unwrap();
    assert_eq!(failed.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_forces_every_suspended_task_to_unwind() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    let finished = Arc::new(AtomicUsize::new(0));

    for i in 0..3 {
        let f = finished.clone();
        sched.co_start(move |s| {
            let r = s.poller_wait(&FakeSock(Token(50 + i)), EventSet::RECV, 0);
            assert!(r.is_err());
            f.fetch_add(1, Ordering::SeqCst);
        }).unwrap();
    }
    sched.co_start(|s| s.stop()).unwrap();

    sched.runloop().unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 3);
    assert_eq!(sched.co_count(), 0);
}

#[test]
fn a_panicking_task_aborts_the_run_loop_with_an_error() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    sched.co_start(|_s| {
        panic!("boom");
    }).unwrap();

    let result = sched.runloop();
    match result {
        Err(cosched::Error::CoroutinePanicked(msg)) => assert_eq!(msg, "boom"),
        other => panic!("expected CoroutinePanicked, got {:?}", other),
    }
}

#[test]
fn a_panicking_task_still_tears_down_other_suspended_tasks() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    let other_finished = Arc::new(AtomicUsize::new(0));

    let f = other_finished.clone();
    sched.co_start(move |s| {
        let r = s.poller_wait(&FakeSock(Token(60)), EventSet::RECV, 0);
        assert!(r.is_err());
        f.fetch_add(1, Ordering::SeqCst);
    }).unwrap();
    sched.co_start(|s| {
        s.sleep(1).unwrap();
        panic!("boom");
    }).unwrap();

    let result = sched.runloop();
    assert!(result.is_err());
    assert_eq!(other_finished.load(Ordering::SeqCst), 1);
}

#[test]
fn a_nested_spawn_that_panics_immediately_propagates_through_co_start() {
    let _ = env_logger::try_init();
    let sched = scheduler();
    let outer_saw_err = Arc::new(AtomicUsize::new(0));

    let o = outer_saw_err.clone();
    sched.co_start(move |s| {
        // The scheduler is already started by the time this body runs, so
        // the nested co_start below resumes its child immediately instead
        // of queuing it — and that child panics before its first
        // suspension, so the error must come back out of this co_start
        // call rather than being swallowed.
        let result = s.co_start(|_s2| {
            panic!("boom from sibling");
        });
        match result {
            Err(cosched::Error::CoroutinePanicked(_)) => {
                o.fetch_add(1, Ordering::SeqCst);
            }
            other => panic!("expected a propagated CoroutinePanicked, got {:?}", other),
        }
    }).unwrap();

    // The sibling's panic is fully contained: it comes back as an `Err`
    // from the nested `co_start` call, the outer task handles it and
    // returns normally, so the run loop itself sees no unhandled panic.
    sched.runloop().unwrap();
    assert_eq!(outer_saw_err.load(Ordering::SeqCst), 1);
}

/// Register `token`'s interest directly and queue a readiness event for the
/// next `poller.wait()` to return, bypassing `poller_wait`'s own
/// registration path so each scenario's dispatch behavior is deterministic.
fn inject(sched: &Scheduler<cosched::FakePoller>, token: Token, registered: EventSet, ready: EventSet) {
    sched.with_poller(|poller| {
        let _ = poller.insert(token, registered);
        poller.push_ready(token, ready);
    });
}
