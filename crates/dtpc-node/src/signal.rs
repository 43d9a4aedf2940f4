//! Counting semaphore used to wake the delivery driver and subscribers.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Result of waiting on a [`Semaphore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Given,
    TimedOut,
    /// Woken by [`Semaphore::interrupt`] without a pending give.
    Interrupted,
    /// The semaphore was ended; no further gives will arrive.
    Ended,
}

#[derive(Debug, Default)]
struct SemState {
    count: u64,
    interrupted: bool,
    ended: bool,
}

#[derive(Debug, Default)]
pub struct Semaphore {
    state: Mutex<SemState>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn give(&self) {
        let mut state = self.state.lock();
        if state.ended {
            return;
        }
        state.count = state.count.saturating_add(1);
        self.cond.notify_one();
    }

    /// Blocks until a give, an interrupt or the end of the semaphore.
    pub fn take(&self) -> SignalOutcome {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = Self::ready(&mut state) {
                return outcome;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Like [`Semaphore::take`], giving up after `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> SignalOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = Self::ready(&mut state) {
                return outcome;
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return Self::ready(&mut state).unwrap_or(SignalOutcome::TimedOut);
            }
        }
    }

    fn ready(state: &mut SemState) -> Option<SignalOutcome> {
        if state.ended {
            return Some(SignalOutcome::Ended);
        }
        if state.interrupted {
            state.interrupted = false;
            return Some(SignalOutcome::Interrupted);
        }
        if state.count > 0 {
            state.count -= 1;
            return Some(SignalOutcome::Given);
        }
        None
    }

    /// Wakes one waiter with [`SignalOutcome::Interrupted`].
    pub fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.cond.notify_all();
    }

    /// Permanently releases every current and future waiter.
    pub fn end(&self) {
        self.state.lock().ended = true;
        self.cond.notify_all();
    }
}
