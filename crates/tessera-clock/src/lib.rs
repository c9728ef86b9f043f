//! Timestamp clocks.
//!
//! The MVCC layer consumes opaque [`Timestamp`] values; this crate defines
//! the seam through which they are minted. The only implementation shipped
//! here is the [`LogicalClock`]; a hybrid (physical) clock lives with the
//! server runtime, outside this repository.

use std::time::Instant;

use tessera_error::Result;
use tessera_types::Timestamp;

pub mod logical;

pub use logical::LogicalClock;

/// Source of operation timestamps.
///
/// Implementations must guarantee that successive calls to [`Clock::now`]
/// return strictly increasing values, and that [`Clock::update`] advances
/// the clock at least to the observed timestamp.
pub trait Clock: Send + Sync {
    /// Mint a new timestamp, strictly greater than every earlier `now`.
    fn now(&self) -> Timestamp;

    /// The latest timestamp any participant could currently mint. For
    /// clocks with no error bound this is the same as [`Clock::now`].
    fn now_latest(&self) -> Timestamp;

    /// Advance the clock to at least `to`, after observing `to` from a
    /// peer. Timestamps minted afterwards are greater than `to`.
    fn update(&self, to: Timestamp) -> Result<()>;

    /// Block until every participant's `now` has moved past `then`, or the
    /// deadline expires (`None` waits forever).
    fn wait_until_after(&self, then: Timestamp, deadline: Option<Instant>) -> Result<()>;

    /// Whether `t` is in the past of this clock.
    fn is_after(&self, t: Timestamp) -> bool;
}
