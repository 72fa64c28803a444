// RTMCTL SESSION TESTS
// LIFECYCLE TRANSITIONS, WAITERS, PERIODIC WORKERS

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rtmctl::error::SessionError;
use rtmctl::session::{Session, SessionState};

// === TRANSITIONS ===

#[test]
fn full_lifecycle() {
    let s = Session::new();
    assert_eq!(s.state(), SessionState::Created);
    assert!(!s.is_running());

    s.start().unwrap();
    assert!(s.is_running());

    s.stop().unwrap();
    assert_eq!(s.state(), SessionState::Stopped);
}

#[test]
fn each_transition_happens_once() {
    let s = Session::new();
    assert_eq!(
        s.stop(),
        Err(SessionError::InvalidTransition { from: SessionState::Created, to: SessionState::Stopping })
    );
    s.start().unwrap();
    assert_eq!(
        s.start(),
        Err(SessionError::InvalidTransition { from: SessionState::Running, to: SessionState::Running })
    );
    s.stop().unwrap();
    assert!(s.stop().is_err());
    assert!(s.start().is_err());
    assert_eq!(s.state(), SessionState::Stopped);
}

#[test]
fn labels_are_upper_case() {
    for st in [SessionState::Created, SessionState::Running, SessionState::Stopping, SessionState::Stopped] {
        assert_eq!(st.label(), st.label().to_uppercase());
    }
}

// === WAITERS ===

#[test]
fn wait_timeout_expires_while_running() {
    let s = Session::new();
    s.start().unwrap();
    let t0 = Instant::now();
    assert_eq!(s.wait_timeout(Duration::from_millis(30)), SessionState::Running);
    assert!(t0.elapsed() >= Duration::from_millis(30));
    s.stop().unwrap();
}

#[test]
fn waiter_wakes_on_stop() {
    let s = Arc::new(Session::new());
    s.start().unwrap();
    let waiter = {
        let s = Arc::clone(&s);
        std::thread::spawn(move || s.wait_timeout(Duration::from_secs(10)))
    };
    std::thread::sleep(Duration::from_millis(20));
    s.stop().unwrap();
    assert_eq!(waiter.join().unwrap(), SessionState::Stopped);
}

#[test]
fn stop_before_wait_is_not_missed() {
    let s = Session::new();
    s.start().unwrap();
    s.stop().unwrap();
    s.wait();
    assert_eq!(s.wait_timeout(Duration::from_millis(1)), SessionState::Stopped);
}

// === PERIODIC WORKERS ===

#[test]
fn periodic_worker_ticks_until_stop() {
    let s = Session::new();
    s.start().unwrap();
    let ticks = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&ticks);
    s.spawn_periodic("test-tick", Duration::from_millis(2), move || {
        counter.fetch_add(1, Ordering::Relaxed);
    })
    .unwrap();
    assert_eq!(s.worker_count(), 1);

    std::thread::sleep(Duration::from_millis(50));
    s.stop().unwrap();
    let at_stop = ticks.load(Ordering::Relaxed);
    assert!(at_stop > 0);
    assert_eq!(s.worker_count(), 0);

    // JOINED: NO TICK AFTER stop() RETURNS
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(ticks.load(Ordering::Relaxed), at_stop);
}

#[test]
fn spawn_requires_running_session() {
    let s = Session::new();
    assert!(s.spawn_periodic("early", Duration::from_millis(1), || {}).is_err());
    s.start().unwrap();
    s.stop().unwrap();
    assert!(s.spawn_periodic("late", Duration::from_millis(1), || {}).is_err());
    assert_eq!(s.worker_count(), 0);
}

#[test]
fn drop_stops_running_workers() {
    let ticks = Arc::new(AtomicU32::new(0));
    {
        let s = Session::new();
        s.start().unwrap();
        let counter = Arc::clone(&ticks);
        s.spawn_periodic("drop-tick", Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(10));
    }
    let after_drop = ticks.load(Ordering::Relaxed);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(ticks.load(Ordering::Relaxed), after_drop);
}
