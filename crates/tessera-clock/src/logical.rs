//! A plain Lamport clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tessera_error::{Result, TesseraError};
use tessera_types::Timestamp;

use crate::Clock;

/// A monotonically increasing counter clock.
///
/// On a single node this produces the timestamp sequence 1, 2, 3, ... from
/// a zero seed, and it can be forward-jumped with [`Clock::update`] so a
/// replica mints fresh timestamps after becoming leader. It has the same
/// consistency properties as a hybrid clock except that it does not model
/// real time at all: the wait family is unavailable.
///
/// Thread safe; all operations are single atomic instructions.
#[derive(Debug)]
pub struct LogicalClock {
    now: AtomicU64,
}

impl LogicalClock {
    /// Create a logical clock. The first call to [`Clock::now`] returns
    /// `seed + 1`.
    #[must_use]
    pub fn new(seed: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(seed.value()),
        }
    }

    /// Read the counter without incrementing it. Mostly for tests and
    /// metrics.
    #[must_use]
    pub fn current(&self) -> Timestamp {
        Timestamp::new(self.now.load(Ordering::Relaxed))
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.now.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn now_latest(&self) -> Timestamp {
        // No error bound, so the latest mintable timestamp is just the next
        // one.
        self.now()
    }

    fn update(&self, to: Timestamp) -> Result<()> {
        self.now.fetch_max(to.value(), Ordering::Relaxed);
        Ok(())
    }

    fn wait_until_after(&self, then: Timestamp, _deadline: Option<Instant>) -> Result<()> {
        Err(TesseraError::unavailable(format!(
            "logical clock cannot wait for {then} to pass: it does not track physical time"
        )))
    }

    fn is_after(&self, t: Timestamp) -> bool {
        t.value() <= self.now.load(Ordering::Relaxed)
    }
}
