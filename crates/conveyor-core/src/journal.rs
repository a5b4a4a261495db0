//! Snapshot journals: transactional state with lazy undo snapshots.
//!
//! A piece of mutable state joins the transaction system by implementing
//! [`SnapshotJournal`] and being wrapped in a [`Journal`]. Before every
//! mutation it calls [`Journal::update_snapshots`]; the first call per
//! transaction level records a snapshot, later calls at the same level are
//! no-ops.
//!
//! When a transaction closes:
//!
//! - **Aborted**: the state is reverted to the snapshot taken at that level.
//! - **Committed, nested**: the snapshot moves up to the parent level unless
//!   the parent already has an older one, in which case the newer snapshot
//!   is released.
//! - **Committed, root**: the snapshot becomes the "original state" and the
//!   journal is queued for [`SnapshotJournal::on_root_commit`].
//!
//! Root-commit callbacks run from a work queue once the root transaction has
//! fully closed, so a callback may open new root transactions. A journal
//! already waiting in the queue is not queued twice; a journal whose callback
//! already ran is queued again and notified again with the state it had
//! before the newer change.

use std::cell::RefCell;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use crate::error::TransferError;
use crate::transaction::{TransactionContext, TransactionManager};

/// State that can be snapshotted, reverted, and notified on root commit.
///
/// All methods take `&self`: implementors keep their state behind `Cell` or
/// `RefCell`. None of these methods are called while the journal's own
/// bookkeeping is borrowed, so they may freely read the state, and
/// `on_root_commit` may open new root transactions that touch this journal.
pub trait SnapshotJournal: 'static {
    type Snapshot: 'static;

    /// Capture the current state.
    fn create_snapshot(&self) -> Self::Snapshot;

    /// Overwrite the current state with a previously captured snapshot.
    fn revert_to_snapshot(&self, snapshot: Self::Snapshot);

    /// Called with snapshots that will not be used again (superseded by an
    /// older snapshot, or discarded after a runaway root-commit loop).
    fn release_snapshot(&self, _snapshot: Self::Snapshot) {}

    /// Called once the outermost transaction that touched this journal has
    /// committed. `original_state` is the state from before the first
    /// modification in that transaction chain.
    fn on_root_commit(&self, _original_state: Self::Snapshot) {}
}

/// Type-erased view of a journal used by the transaction manager.
pub(crate) trait JournalHook {
    fn on_close(&self, manager: &TransactionManager, depth: usize, aborted: bool);
    fn call_on_root_commit(&self);
    fn discard_root_commit(&self);
}

/// Wraps a [`SnapshotJournal`] with per-depth snapshot bookkeeping.
///
/// Always lives in an `Rc`, because open transactions and the root-commit
/// queue hold on to it until they are done with it.
pub struct Journal<J: SnapshotJournal> {
    inner: J,
    /// One slot per transaction depth; `None` means no snapshot at that depth.
    snapshots: RefCell<Vec<Option<J::Snapshot>>>,
    /// Set while a root-commit notification is pending.
    original_state: RefCell<Option<J::Snapshot>>,
    this: Weak<Journal<J>>,
}

impl<J: SnapshotJournal> Journal<J> {
    pub fn new(inner: J) -> Rc<Self> {
        Rc::new_cyclic(|this| Journal {
            inner,
            snapshots: RefCell::new(Vec::new()),
            original_state: RefCell::new(None),
            this: this.clone(),
        })
    }

    /// Record a snapshot for `transaction` if none exists at its depth yet.
    ///
    /// Must be called before every mutation of the journaled state.
    pub fn update_snapshots(&self, transaction: &TransactionContext) -> Result<(), TransferError> {
        transaction.validate_open()?;
        let depth = transaction.depth();

        let has_snapshot = self
            .snapshots
            .borrow()
            .get(depth)
            .is_some_and(Option::is_some);
        if has_snapshot {
            return Ok(());
        }

        let hook = self.hook()?;
        let snapshot = self.inner.create_snapshot();
        transaction.enlist(hook)?;

        let mut snapshots = self.snapshots.borrow_mut();
        if snapshots.len() <= depth {
            snapshots.resize_with(depth + 1, || None);
        }
        snapshots[depth] = Some(snapshot);
        Ok(())
    }

    /// `true` while a root-commit notification for this journal is queued.
    pub fn has_pending_root_commit(&self) -> bool {
        self.original_state.borrow().is_some()
    }

    /// The wrapped state.
    pub fn inner(&self) -> &J {
        &self.inner
    }

    fn hook(&self) -> Result<Rc<dyn JournalHook>, TransferError> {
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| TransferError::handler("journal used while being dropped"))?;
        Ok(this)
    }
}

impl<J: SnapshotJournal> Deref for Journal<J> {
    type Target = J;

    fn deref(&self) -> &J {
        &self.inner
    }
}

impl<J: SnapshotJournal> JournalHook for Journal<J> {
    fn on_close(&self, manager: &TransactionManager, depth: usize, aborted: bool) {
        let snapshot = {
            let mut snapshots = self.snapshots.borrow_mut();
            let snapshot = snapshots.get_mut(depth).and_then(Option::take);
            snapshots.truncate(depth);
            snapshot
        };
        let Some(snapshot) = snapshot else {
            return;
        };

        if aborted {
            self.inner.revert_to_snapshot(snapshot);
            return;
        }

        if depth == 0 {
            let queued = {
                let mut original = self.original_state.borrow_mut();
                if original.is_none() {
                    *original = Some(snapshot);
                    None
                } else {
                    // Already waiting for a callback: keep the older state.
                    Some(snapshot)
                }
            };
            match queued {
                None => {
                    if let Some(this) = self.this.upgrade() {
                        manager.enqueue_root_commit(this);
                    }
                }
                Some(newer) => self.inner.release_snapshot(newer),
            }
            return;
        }

        let parent = depth - 1;
        let parent_has_snapshot = self
            .snapshots
            .borrow()
            .get(parent)
            .is_some_and(Option::is_some);
        if parent_has_snapshot {
            self.inner.release_snapshot(snapshot);
            return;
        }

        {
            let mut snapshots = self.snapshots.borrow_mut();
            if snapshots.len() <= parent {
                snapshots.resize_with(parent + 1, || None);
            }
            snapshots[parent] = Some(snapshot);
        }
        if let Some(this) = self.this.upgrade() {
            manager.enlist_at(parent, this);
        }
    }

    fn call_on_root_commit(&self) {
        // Cleared before the callback so that a root transaction opened from
        // inside it can queue this journal again.
        let original = self.original_state.borrow_mut().take();
        if let Some(original) = original {
            self.inner.on_root_commit(original);
        }
    }

    fn discard_root_commit(&self) {
        let original = self.original_state.borrow_mut().take();
        if let Some(original) = original {
            self.inner.release_snapshot(original);
        }
    }
}
