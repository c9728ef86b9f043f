//! Multi-version concurrency control for tablet operations.
//!
//! Writers register every mutation with the [`MvccManager`] under a
//! clock-minted [`Timestamp`], normally through the [`ScopedOp`] handle.
//! An op has exactly two valid paths:
//!
//! 1. start -> applying -> committed
//! 2. start -> aborted
//!
//! Once an op enters the applying state it is past the point of no return:
//! in-memory edits cannot be rolled back, so it must commit in a bounded
//! amount of time and must never be aborted.
//!
//! Readers take [`MvccSnapshot`] values, which answer "is this timestamp
//! visible?" from two watermarks plus a short list of out-of-order commits,
//! independently of any later registry mutation. The registry also lets
//! callers block until a timestamp is clean or until the currently applying
//! ops have resolved; compactions consume the clean watermark to decide
//! what history is safe to rewrite.

mod latch;
pub mod manager;
pub mod scoped;
pub mod snapshot;

pub use manager::{MvccManager, OpState};
pub use scoped::ScopedOp;
pub use snapshot::MvccSnapshot;
pub use tessera_types::Timestamp;
