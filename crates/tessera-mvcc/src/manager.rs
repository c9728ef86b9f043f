//! The MVCC registry: in-flight operations, the clean watermark, waiters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tessera_error::{Result, TesseraError};
use tessera_types::Timestamp;

use crate::latch::Latch;
use crate::snapshot::MvccSnapshot;

/// Log only every Nth attempt to move the new-op lower bound backwards;
/// replay of an out-of-order batch can produce long runs of them.
const BACKWARDS_BOUND_LOG_EVERY: u64 = 10;

/// State of one in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpState {
    /// Registered but not yet applying; may still be aborted.
    Reserved,
    /// Applying its changes to in-memory stores; must commit in a bounded
    /// amount of time and may never be aborted.
    Applying,
}

/// What a registered waiter is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitFor {
    /// Every op at or below the timestamp has committed.
    AllCommitted,
    /// No in-flight op remains at or below the timestamp.
    NoneApplying,
}

/// One blocked caller. The caller's stack owns the `Arc`; the registry
/// keeps a second reference from registration until signal or the caller's
/// own timeout cleanup, and identity (pointer equality) ties the two.
#[derive(Debug)]
struct Waiter {
    timestamp: Timestamp,
    wait_for: WaitFor,
    latch: Latch,
}

/// Registry state guarded by the single registry mutex.
#[derive(Debug)]
struct Inner {
    /// The snapshot of record, mutated in place as ops commit.
    cur_snap: MvccSnapshot,

    /// Timestamps of currently in-flight ops.
    in_flight: HashMap<Timestamp, OpState>,

    /// Exclusive floor for new op timestamps. Ops apply in timestamp
    /// order, so once application at some timestamp has begun, nothing may
    /// start at or below it. Never decreases.
    new_op_exc_lower_bound: Timestamp,

    /// Minimum key of `in_flight`, or `Timestamp::MAX` when it is empty.
    /// Cached so commits do not rescan the map.
    earliest_in_flight: Timestamp,

    waiters: Vec<Arc<Waiter>>,
}

impl Inner {
    /// Insert `timestamp` as `Reserved` if it can legally start. Returns
    /// false when it sits at or below the lower bound or is already in
    /// flight.
    fn init_op(&mut self, timestamp: Timestamp) -> bool {
        if timestamp <= self.new_op_exc_lower_bound {
            return false;
        }
        if self.in_flight.contains_key(&timestamp) {
            return false;
        }
        if timestamp < self.earliest_in_flight {
            self.earliest_in_flight = timestamp;
        }
        self.in_flight.insert(timestamp, OpState::Reserved);
        true
    }

    /// Remove `timestamp` from the in-flight map and return its state.
    ///
    /// # Panics
    ///
    /// Panics if the timestamp is not in flight.
    fn remove_in_flight(&mut self, timestamp: Timestamp) -> OpState {
        match self.in_flight.remove(&timestamp) {
            Some(state) => state,
            None => panic!("removing a timestamp that is not in the in-flight map: {timestamp}"),
        }
    }

    /// Recompute the cached minimum after the previous earliest resolved.
    fn advance_earliest_in_flight(&mut self) {
        self.earliest_in_flight = self
            .in_flight
            .keys()
            .min()
            .copied()
            .unwrap_or(Timestamp::MAX);
    }

    /// Recompute the clean-time watermark and wake satisfied waiters.
    ///
    /// Two cases:
    ///
    /// 1. An in-flight op sits below `new_op_exc_lower_bound`: the
    ///    watermark moves to that op's timestamp.
    /// 2. No in-flight op is below the bound: the watermark moves to the
    ///    bound itself, since nothing can ever start below it again.
    ///    In-flight ops above the bound (commit-wait ops started in the
    ///    future) do not hold the watermark back.
    fn adjust_clean_time(&mut self) {
        let watermark = self.earliest_in_flight.min(self.new_op_exc_lower_bound);
        self.cur_snap.advance_floor(watermark);
        tracing::trace!(%watermark, "adjusted clean time");

        // The move may have satisfied some waiters.
        if !self.waiters.is_empty() {
            let waiters = std::mem::take(&mut self.waiters);
            let (done, pending): (Vec<_>, Vec<_>) = waiters
                .into_iter()
                .partition(|waiter| self.is_done_waiting(waiter));
            for waiter in &done {
                waiter.latch.fire();
            }
            self.waiters = pending;
        }
    }

    fn is_done_waiting(&self, waiter: &Waiter) -> bool {
        match waiter.wait_for {
            WaitFor::AllCommitted => self.all_ops_committed(waiter.timestamp),
            WaitFor::NoneApplying => !self.any_in_flight_at_or_below(waiter.timestamp),
        }
    }

    /// True if every op at or below `ts` has committed. Even when the
    /// clean time has not caught up, `ts` may still sit below every
    /// possible in-flight.
    fn all_ops_committed(&self, ts: Timestamp) -> bool {
        ts < self.cur_snap.all_committed_before || ts < self.earliest_in_flight
    }

    /// True if any in-flight entry sits at or below `ts`.
    ///
    /// This looks at every in-flight op, not only those already applying,
    /// so none-applying waits are conservative: a reserved op below `ts`
    /// holds them back too. TODO: decide whether reserved entries should
    /// really block these waits, or only `Applying` ones.
    fn any_in_flight_at_or_below(&self, ts: Timestamp) -> bool {
        self.in_flight.keys().any(|&t| t <= ts)
    }
}

/// Coordinator of MVCC ops for one tablet.
///
/// Threads wishing to mutate tablet state register a clock-minted
/// timestamp here, usually through the [`ScopedOp`](crate::ScopedOp)
/// handle, and the registry tracks it until it commits or aborts. Readers
/// derive [`MvccSnapshot`] values to operate on committed history only.
///
/// An op has exactly two valid paths:
///
/// 1. [`start_op`](Self::start_op) -> [`start_applying`](Self::start_applying)
///    -> [`commit_op`](Self::commit_op)
/// 2. [`start_op`](Self::start_op) -> [`abort_op`](Self::abort_op)
///
/// In-memory edits cannot be rolled back, so once an op starts applying it
/// must commit.
///
/// A single mutex guards all registry state; every method takes and
/// releases it exactly once and never blocks on anything else. The wait
/// family additionally parks on a per-waiter latch, with the registry
/// mutex released.
#[derive(Debug)]
pub struct MvccManager {
    inner: Mutex<Inner>,
    open: AtomicBool,
}

impl MvccManager {
    /// Create an open registry with the clean time at its initial value.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                cur_snap: MvccSnapshot::new(),
                in_flight: HashMap::new(),
                new_op_exc_lower_bound: Timestamp::MIN,
                earliest_in_flight: Timestamp::MAX,
                waiters: Vec::new(),
            }),
            open: AtomicBool::new(true),
        }
    }

    /// Register a new op at `timestamp` in the reserved state.
    ///
    /// # Panics
    ///
    /// Panics if `timestamp` is already committed in the current snapshot,
    /// already in flight, or at or below the exclusive lower bound for new
    /// ops. All three are caller contract violations.
    pub fn start_op(&self, timestamp: Timestamp) {
        let mut inner = self.inner.lock();
        assert!(
            !inner.cur_snap.is_committed(timestamp),
            "starting a new op at an already committed timestamp: {timestamp}, \
             current snapshot: {}",
            inner.cur_snap
        );
        assert!(
            inner.init_op(timestamp),
            "op timestamp {timestamp} is already in flight, or at or below the exclusive \
             lower bound for new ops ({}); current snapshot: {}",
            inner.new_op_exc_lower_bound,
            inner.cur_snap
        );
        tracing::debug!(%timestamp, "op reserved");
    }

    /// Mark the op at `timestamp` as applying its changes to in-memory
    /// stores. Must precede [`commit_op`](Self::commit_op); after this,
    /// [`abort_op`](Self::abort_op) is no longer legal.
    ///
    /// # Panics
    ///
    /// Panics if the timestamp is not in flight or not in the reserved
    /// state.
    pub fn start_applying(&self, timestamp: Timestamp) {
        let mut inner = self.inner.lock();
        let Some(state) = inner.in_flight.get_mut(&timestamp) else {
            panic!("cannot mark timestamp {timestamp} as applying: not in the in-flight map");
        };
        match *state {
            OpState::Reserved => *state = OpState::Applying,
            other => {
                panic!("cannot mark timestamp {timestamp} as applying: wrong state: {other:?}")
            }
        }
        tracing::debug!(%timestamp, "op applying");
    }

    /// Abort the op at `timestamp`, dropping it from the registry. The
    /// committed set and the watermarks do not move.
    ///
    /// # Panics
    ///
    /// Panics if the timestamp is not in flight, or if the op already
    /// entered the applying state. When the registry has been closed, any
    /// state is tolerated with a warning instead, so teardown paths cannot
    /// crash the process.
    pub fn abort_op(&self, timestamp: Timestamp) {
        let mut inner = self.inner.lock();
        let old_state = inner.remove_in_flight(timestamp);

        // On shutdown the state of the op no longer matters.
        if !self.is_open() {
            tracing::warn!(
                %timestamp,
                state = ?old_state,
                "aborting op while the registry is closed"
            );
            return;
        }

        assert_eq!(
            old_state,
            OpState::Reserved,
            "op with timestamp {timestamp} cannot be aborted in state {old_state:?}"
        );

        if inner.earliest_in_flight == timestamp {
            inner.advance_earliest_in_flight();
        }
        tracing::debug!(%timestamp, "op aborted");
    }

    /// Commit the op at `timestamp`, adding it to the committed set. If it
    /// was the earliest in-flight and the lower bound has already reached
    /// it, the clean time advances as well.
    ///
    /// # Panics
    ///
    /// Panics if the timestamp is not in flight or never entered the
    /// applying state.
    pub fn commit_op(&self, timestamp: Timestamp) {
        let mut inner = self.inner.lock();
        let was_earliest = inner.earliest_in_flight == timestamp;
        let old_state = inner.remove_in_flight(timestamp);
        assert_eq!(
            old_state,
            OpState::Applying,
            "committing an op that never entered the applying state: {timestamp} \
             (state {old_state:?})"
        );

        inner.cur_snap.add_committed(timestamp);

        if was_earliest {
            inner.advance_earliest_in_flight();
            // The lower bound should normally have been pushed past us
            // before commit, but tests may not bother.
            if inner.new_op_exc_lower_bound >= timestamp {
                inner.adjust_clean_time();
            }
        }
        tracing::debug!(%timestamp, "op committed");
    }

    /// Raise the exclusive lower bound for new op timestamps, and with it
    /// possibly the clean time.
    ///
    /// Must only be called once no new op can start at or below
    /// `timestamp`, e.g. because the op carrying it is consensus-committed
    /// and application is beginning.
    pub fn adjust_new_op_lower_bound(&self, timestamp: Timestamp) {
        let mut inner = self.inner.lock();
        if timestamp <= inner.new_op_exc_lower_bound {
            // An op is being applied out of order. This is only safe
            // because callers hold locks that keep concurrent op effects
            // disjoint; the bound itself never moves backwards.
            static BACKWARDS: AtomicU64 = AtomicU64::new(0);
            if BACKWARDS.fetch_add(1, Ordering::Relaxed) % BACKWARDS_BOUND_LOG_EVERY == 0 {
                tracing::info!(
                    current = %inner.new_op_exc_lower_bound,
                    requested = %timestamp,
                    snapshot = %inner.cur_snap,
                    "ignoring attempt to move the new-op lower bound backwards"
                );
            }
            return;
        }
        tracing::trace!(%timestamp, "adjusting new-op lower bound");
        inner.new_op_exc_lower_bound = timestamp;
        inner.adjust_clean_time();
    }

    /// Copy of the current snapshot of record.
    #[must_use]
    pub fn snapshot(&self) -> MvccSnapshot {
        self.inner.lock().cur_snap.clone()
    }

    /// The earliest possible timestamp for an uncommitted op; everything
    /// strictly below it is committed. Compactions use this to bound what
    /// history may be rewritten.
    #[must_use]
    pub fn clean_timestamp(&self) -> Timestamp {
        self.inner.lock().cur_snap.all_committed_before
    }

    /// Timestamps of every op currently in the applying state. Such ops
    /// are guaranteed to eventually commit; ops still in the reserved
    /// state are not reported.
    #[must_use]
    pub fn applying_timestamps(&self) -> Vec<Timestamp> {
        let inner = self.inner.lock();
        inner
            .in_flight
            .iter()
            .filter_map(|(&ts, &state)| (state == OpState::Applying).then_some(ts))
            .collect()
    }

    /// Error while the clean time still sits at its initial value. Until
    /// the first lower-bound adjustment the registry cannot say anything
    /// about already-applied history, so serving reads would be premature.
    pub fn check_clean_time_initialized(&self) -> Result<()> {
        if self.clean_timestamp() == Timestamp::INITIAL {
            return Err(TesseraError::uninitialized(
                "clean time has not yet been initialized",
            ));
        }
        Ok(())
    }

    /// True if every op at or below `timestamp` has committed. When
    /// `timestamp` is not in the past, new ops may still start below it
    /// after this returns.
    #[must_use]
    pub fn are_all_ops_committed(&self, timestamp: Timestamp) -> bool {
        self.inner.lock().all_ops_committed(timestamp)
    }

    /// Number of registered waiters. Mostly for tests that must observe a
    /// waiter's registration before acting on it.
    #[must_use]
    pub fn num_waiters(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Whether the registry is open. Reads the atomic flag without taking
    /// the registry mutex.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Wait until every op at or below `timestamp` has committed, then
    /// return the clean point-in-time snapshot at `timestamp`, not the
    /// live one, which may already contain later out-of-order commits.
    ///
    /// If `timestamp` was marked safe before this call (no new op can
    /// start at or below it), the returned snapshot is repeatable.
    ///
    /// # Errors
    ///
    /// `Aborted` if the registry is or becomes closed, `TimedOut` if the
    /// deadline expires first.
    pub fn wait_for_snapshot_with_all_committed(
        &self,
        timestamp: Timestamp,
        deadline: Option<Instant>,
    ) -> Result<MvccSnapshot> {
        self.wait_until(WaitFor::AllCommitted, timestamp, deadline)?;
        Ok(MvccSnapshot::from(timestamp))
    }

    /// Wait for every op currently in the applying state to commit.
    ///
    /// Ops that enter the applying state after this call are not waited
    /// for; upon return some ops may well be applying, just not those that
    /// were when the call was made.
    ///
    /// # Errors
    ///
    /// `Aborted` if the registry is or becomes closed.
    pub fn wait_for_applying_ops_to_commit(&self) -> Result<()> {
        self.check_open()?;

        // The highest timestamp currently applying bounds everything that
        // was applying at call time.
        let wait_for = {
            let inner = self.inner.lock();
            inner
                .in_flight
                .iter()
                .filter_map(|(&ts, &state)| (state == OpState::Applying).then_some(ts))
                .max()
        };
        match wait_for {
            None => Ok(()),
            Some(ts) => self.wait_until(WaitFor::NoneApplying, ts, None),
        }
    }

    /// Close the registry. New waits fail immediately, registered waiters
    /// wake with `Aborted`, and [`abort_op`](Self::abort_op) becomes
    /// tolerant of any op state so outstanding scoped handles can be
    /// dropped during teardown.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        let mut inner = self.inner.lock();
        for waiter in inner.waiters.drain(..) {
            waiter.latch.fire();
        }
        tracing::debug!("MVCC registry closed");
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TesseraError::aborted("MVCC registry is closed"))
        }
    }

    fn wait_until(
        &self,
        wait_for: WaitFor,
        timestamp: Timestamp,
        deadline: Option<Instant>,
    ) -> Result<()> {
        // No point in queueing once closed.
        self.check_open()?;

        let waiter = Arc::new(Waiter {
            timestamp,
            wait_for,
            latch: Latch::new(),
        });
        {
            let mut inner = self.inner.lock();
            if inner.is_done_waiting(&waiter) {
                return Ok(());
            }
            // Re-check under the lock: close() flips the flag before it
            // drains the waiter list, so a registration racing with it must
            // fail here rather than park on a latch nobody will fire.
            self.check_open()?;
            inner.waiters.push(Arc::clone(&waiter));
        }

        if waiter.latch.wait_deadline(deadline) {
            // Fired: either the predicate came true or the registry closed.
            return self.check_open();
        }

        // Timed out. Remove our entry, unless a signal won the race while
        // we were reacquiring the lock.
        let mut inner = self.inner.lock();
        if waiter.latch.is_fired() {
            return self.check_open();
        }
        inner.waiters.retain(|other| !Arc::ptr_eq(other, &waiter));
        Err(TesseraError::timed_out(format!(
            "timed out waiting for ops at or below {timestamp} to {}",
            match wait_for {
                WaitFor::AllCommitted => "commit",
                WaitFor::NoneApplying => "finish applying",
            }
        )))
    }
}

impl Default for MvccManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MvccManager {
    fn drop(&mut self) {
        // Dropping with waiters still parked would leave threads blocked on
        // latches nobody will fire; callers are expected to close() first.
        let inner = self.inner.get_mut();
        debug_assert!(
            inner.waiters.is_empty(),
            "MVCC registry dropped with {} waiter(s) still registered",
            inner.waiters.len()
        );
    }
}
