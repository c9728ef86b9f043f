//! Tessera tablet engine: MVCC core.
//!
//! This umbrella crate re-exports the public surface of the MVCC core so
//! embedders depend on a single crate. The typical write path:
//!
//! ```
//! use tessera::{Clock, LogicalClock, MvccManager, ScopedOp, Timestamp};
//!
//! let clock = LogicalClock::new(Timestamp::MIN);
//! let mvcc = MvccManager::new();
//!
//! let op = ScopedOp::new(&mvcc, clock.now());
//! op.start_applying();
//! // ... apply the writes to in-memory stores ...
//! op.commit();
//!
//! mvcc.adjust_new_op_lower_bound(clock.current());
//! assert!(mvcc.snapshot().is_committed(Timestamp::new(1)));
//! ```

pub use tessera_clock::{Clock, LogicalClock};
pub use tessera_error::{Result, TesseraError};
pub use tessera_mvcc::{MvccManager, MvccSnapshot, OpState, ScopedOp};
pub use tessera_types::Timestamp;
