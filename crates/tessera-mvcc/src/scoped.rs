//! Scoped lifetime handle for a single MVCC operation.

use tessera_types::Timestamp;

use crate::manager::MvccManager;

/// A handle to one running op.
///
/// Construction registers the op with the registry; dropping the handle
/// without calling [`commit`](Self::commit) or [`abort`](Self::abort)
/// aborts it, so every exit path resolves the op exactly once. The
/// terminal methods take the handle by value, which makes double
/// termination unrepresentable.
#[derive(Debug)]
pub struct ScopedOp<'a> {
    manager: &'a MvccManager,
    timestamp: Timestamp,
    done: bool,
}

impl<'a> ScopedOp<'a> {
    /// Register a new op at `timestamp`.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as
    /// [`MvccManager::start_op`].
    pub fn new(manager: &'a MvccManager, timestamp: Timestamp) -> Self {
        manager.start_op(timestamp);
        Self {
            manager,
            timestamp,
            done: false,
        }
    }

    /// The timestamp this op runs at.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Mark that this op is about to apply its modifications to in-memory
    /// stores. Must be called before [`commit`](Self::commit); after it,
    /// [`abort`](Self::abort) is no longer legal.
    pub fn start_applying(&self) {
        self.manager.start_applying(self.timestamp);
    }

    /// Commit the op. Requires a prior
    /// [`start_applying`](Self::start_applying).
    pub fn commit(mut self) {
        self.manager.commit_op(self.timestamp);
        self.done = true;
    }

    /// Abort the op. Requires that
    /// [`start_applying`](Self::start_applying) has not been called.
    pub fn abort(mut self) {
        self.manager.abort_op(self.timestamp);
        self.done = true;
    }
}

impl Drop for ScopedOp<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.manager.abort_op(self.timestamp);
        }
    }
}
