//! Phase-parity counting barrier.
//!
//! A [`PhaseCounter`] expects a fixed number of arrivals per phase. When the
//! last expected arrival is signalled the phase completes and the counter
//! starts the next one. Waiters name the parity (`0` or `1`) of the phase they
//! are waiting on, so a slot that is reused every lap of the ring alternates
//! the parity it waits for.

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct PhaseState {
    pending: usize,
    completed: u64,
}

/// Counting barrier with alternating phases.
#[derive(Debug)]
pub struct PhaseCounter {
    expected: usize,
    state: Mutex<PhaseState>,
    cond: Condvar,
}

impl PhaseCounter {
    /// Create a counter completing a phase every `expected` arrivals.
    ///
    /// `expected` must be non-zero; a zero count is clamped to one.
    pub fn new(expected: usize) -> Self {
        let expected = expected.max(1);
        Self {
            expected,
            state: Mutex::new(PhaseState {
                pending: expected,
                completed: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Arrivals needed to complete one phase.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Number of phases completed so far.
    pub fn completed_phases(&self) -> u64 {
        self.state.lock().completed
    }

    /// Signal `amount` arrivals, completing as many phases as they cover.
    pub fn signal(&self, amount: usize) {
        let mut state = self.state.lock();
        let mut remaining = amount;
        while remaining > 0 {
            let step = remaining.min(state.pending);
            state.pending -= step;
            remaining -= step;
            if state.pending == 0 {
                state.completed += 1;
                state.pending = self.expected;
            }
        }
        drop(state);
        self.cond.notify_all();
    }

    /// Block until the phase with parity `phase` has completed.
    ///
    /// The current (incomplete) phase has parity `completed & 1`; waiting on it
    /// blocks until it completes, waiting on the other parity returns
    /// immediately.
    pub fn wait(&self, phase: u32) {
        let parity = u64::from(phase & 1);
        let mut state = self.state.lock();
        while state.completed & 1 == parity {
            self.cond.wait(&mut state);
        }
    }

    /// Non-blocking check: has the phase with parity `phase` completed?
    pub fn try_wait(&self, phase: u32) -> bool {
        self.state.lock().completed & 1 != u64::from(phase & 1)
    }
}
