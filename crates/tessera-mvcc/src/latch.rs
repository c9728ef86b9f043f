//! One-shot waiter latch.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// A single-use signal: one side fires, any number of threads wait.
///
/// Each registry waiter owns one latch; the registry keeps only a shared
/// reference, dropped either when it signals the waiter or when the waiter
/// cleans itself up after a timeout. Firing is sticky: a waiter that checks
/// after the fact still sees the signal.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fire the latch, waking every current and future waiter.
    pub(crate) fn fire(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        self.cond.notify_all();
    }

    /// Whether the latch has fired.
    pub(crate) fn is_fired(&self) -> bool {
        *self.fired.lock()
    }

    /// Block until the latch fires or `deadline` passes (`None` waits
    /// forever). Returns true if the latch fired.
    pub(crate) fn wait_deadline(&self, deadline: Option<Instant>) -> bool {
        let mut fired = self.fired.lock();
        match deadline {
            None => {
                while !*fired {
                    self.cond.wait(&mut fired);
                }
                true
            }
            Some(at) => {
                while !*fired {
                    if self.cond.wait_until(&mut fired, at).timed_out() {
                        return *fired;
                    }
                }
                true
            }
        }
    }
}
