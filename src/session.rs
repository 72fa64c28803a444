// RTMCTL SESSION LIFECYCLE
// CREATED -> RUNNING -> STOPPING -> STOPPED. ONE WRITER PER TRANSITION,
// EACH TRANSITION HAPPENS EXACTLY ONCE. WAITERS BLOCK ON A CONDVAR AND
// RE-CHECK THE STATE, SO A STOP THAT LANDS BEFORE THE WAIT IS NOT MISSED.
//
// PERIODIC WORKERS CHECK A SHARED CANCEL FLAG AT EVERY SLEEP BOUNDARY
// AND EXIT WITHIN ONE INTERVAL OF stop().

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::SessionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
        }
    }
}

pub struct Session {
    state: Mutex<SessionState>,
    changed: Condvar,
    cancel: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Created),
            changed: Condvar::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    fn transition(&self, from: SessionState, to: SessionState) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(SessionError::InvalidTransition { from: *state, to });
        }
        *state = to;
        self.changed.notify_all();
        log_info!("SESSION: {} -> {}", from.label(), to.label());
        Ok(())
    }

    pub fn start(&self) -> Result<(), SessionError> {
        self.transition(SessionState::Created, SessionState::Running)
    }

    // RUN `tick` EVERY `interval` ON A NAMED THREAD UNTIL THE SESSION STOPS
    pub fn spawn_periodic<F>(&self, name: &str, interval: Duration, mut tick: F) -> Result<(), SessionError>
    where
        F: FnMut() + Send + 'static,
    {
        // HOLD THE STATE LOCK SO stop() CANNOT SLIP BETWEEN CHECK AND PUSH
        let state = self.state.lock();
        if *state != SessionState::Running {
            return Err(SessionError::InvalidTransition { from: *state, to: SessionState::Running });
        }
        let cancel = Arc::clone(&self.cancel);
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while !cancel.load(Ordering::Relaxed) {
                    tick();
                    std::thread::sleep(interval);
                }
            });
        match spawned {
            Ok(handle) => self.workers.lock().push(handle),
            Err(e) => log_warn!("SESSION: WORKER {} FAILED TO SPAWN: {}", name, e),
        }
        drop(state);
        Ok(())
    }

    // CANCEL AND JOIN EVERY WORKER, THEN MARK THE SESSION STOPPED
    pub fn stop(&self) -> Result<(), SessionError> {
        self.transition(SessionState::Running, SessionState::Stopping)?;
        self.cancel.store(true, Ordering::Relaxed);
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for w in workers {
            if w.join().is_err() {
                log_warn!("SESSION: WORKER PANICKED DURING SHUTDOWN");
            }
        }
        self.transition(SessionState::Stopping, SessionState::Stopped)
    }

    // BLOCK UNTIL THE SESSION REACHES STOPPED
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while *state != SessionState::Stopped {
            self.changed.wait(&mut state);
        }
    }

    // BLOCK UNTIL STOPPED OR THE TIMEOUT PASSES. RETURNS THE STATE SEEN LAST
    pub fn wait_timeout(&self, timeout: Duration) -> SessionState {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state != SessionState::Stopped {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state() == SessionState::Running {
            let _ = self.stop();
        }
    }
}
