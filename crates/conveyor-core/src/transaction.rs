//! Thread-confined nested transactions.
//!
//! Each thread owns one transaction stack. A root transaction is opened with
//! [`Transaction::open_root`], children with [`TransactionContext::open_nested`].
//! A transaction is closed by [`Transaction::commit`], by [`Transaction::abort`],
//! or by being dropped, which aborts it.
//!
//! Handlers and journals receive a `&TransactionContext`: a cheap, cloneable
//! handle that names one level of the stack. A context outliving its
//! transaction is detected and reported as [`TransferError::TransactionClosed`].
//!
//! Transactions and contexts hold an `Rc` to the thread's manager, so they are
//! neither `Send` nor `Sync`; using one from another thread does not compile.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe, Location};
use std::rc::Rc;

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::journal::JournalHook;

thread_local! {
    static MANAGER: Rc<TransactionManager> = Rc::new(TransactionManager::new());
}

/// Coarse state of the current thread's transaction stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No transaction is open or closing.
    None,
    /// The innermost transaction is open.
    Open,
    /// The innermost transaction is running its close callbacks.
    Closing,
    /// The outermost transaction has closed and root-commit callbacks are running.
    RootClosing,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct Frame {
    id: u64,
    open: bool,
    opened_at: &'static Location<'static>,
    /// Journals snapshotted at this level, in enlistment order.
    journals: Vec<Rc<dyn JournalHook>>,
}

/// Per-thread transaction stack plus the root-commit work queue.
pub(crate) struct TransactionManager {
    frames: RefCell<Vec<Frame>>,
    next_id: Cell<u64>,
    root_commit_queue: RefCell<VecDeque<Rc<dyn JournalHook>>>,
    processing_root_commits: Cell<bool>,
    config: RefCell<TransferConfig>,
}

impl TransactionManager {
    fn new() -> Self {
        Self {
            frames: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            root_commit_queue: RefCell::new(VecDeque::new()),
            processing_root_commits: Cell::new(false),
            config: RefCell::new(TransferConfig::default()),
        }
    }

    fn current() -> Rc<TransactionManager> {
        MANAGER.with(Rc::clone)
    }

    fn lifecycle(&self) -> Lifecycle {
        match self.frames.borrow().last() {
            Some(frame) if frame.open => Lifecycle::Open,
            Some(_) => Lifecycle::Closing,
            None if self.processing_root_commits.get() => Lifecycle::RootClosing,
            None => Lifecycle::None,
        }
    }

    fn open(
        self: &Rc<Self>,
        parent: Option<&TransactionContext>,
        opened_at: &'static Location<'static>,
    ) -> Result<TransactionContext, TransferError> {
        let mut frames = self.frames.borrow_mut();

        match parent {
            None => {
                if let Some(active) = frames.first() {
                    return Err(TransferError::RootAlreadyOpen {
                        active: active.opened_at,
                        requested: opened_at,
                    });
                }
            }
            Some(parent) => {
                let frame = frames
                    .get(parent.depth)
                    .filter(|frame| frame.id == parent.id)
                    .ok_or(TransferError::TransactionClosed {
                        depth: parent.depth,
                    })?;
                if !frame.open {
                    return Err(TransferError::ClosingTransaction);
                }
                if frames.len() != parent.depth + 1 {
                    return Err(TransferError::ChildAlreadyOpen {
                        depth: parent.depth,
                    });
                }
            }
        }

        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let depth = frames.len();
        frames.push(Frame {
            id,
            open: true,
            opened_at,
            journals: Vec::new(),
        });

        Ok(TransactionContext {
            manager: Rc::clone(self),
            depth,
            id,
        })
    }

    /// Whether the frame `(depth, id)` still exists and is open.
    fn is_open(&self, depth: usize, id: u64) -> bool {
        self.frames
            .borrow()
            .get(depth)
            .is_some_and(|frame| frame.id == id && frame.open)
    }

    fn validate_open(&self, depth: usize, id: u64) -> Result<(), TransferError> {
        let frames = self.frames.borrow();
        match frames.get(depth) {
            Some(frame) if frame.id == id && frame.open => Ok(()),
            Some(frame) if frame.id == id => Err(TransferError::ClosingTransaction),
            _ => Err(TransferError::TransactionClosed { depth }),
        }
    }

    fn enlist(
        &self,
        depth: usize,
        id: u64,
        journal: Rc<dyn JournalHook>,
    ) -> Result<(), TransferError> {
        let mut frames = self.frames.borrow_mut();
        match frames.get_mut(depth) {
            Some(frame) if frame.id == id && frame.open => {
                frame.journals.push(journal);
                Ok(())
            }
            Some(frame) if frame.id == id => Err(TransferError::ClosingTransaction),
            _ => Err(TransferError::TransactionClosed { depth }),
        }
    }

    /// Register a journal with the frame at `depth`, which must be open.
    ///
    /// Used when a committed child hands its snapshot to the parent.
    pub(crate) fn enlist_at(&self, depth: usize, journal: Rc<dyn JournalHook>) {
        if let Some(frame) = self.frames.borrow_mut().get_mut(depth) {
            frame.journals.push(journal);
        }
    }

    pub(crate) fn enqueue_root_commit(&self, journal: Rc<dyn JournalHook>) {
        self.root_commit_queue.borrow_mut().push_back(journal);
    }

    fn close(&self, depth: usize, id: u64, aborted: bool) -> Result<(), TransferError> {
        let journals = {
            let mut frames = self.frames.borrow_mut();
            let current = frames.len().checked_sub(1);
            let frame = frames
                .get_mut(depth)
                .filter(|frame| frame.id == id)
                .ok_or(TransferError::TransactionClosed { depth })?;
            if !frame.open {
                return Err(TransferError::ClosingTransaction);
            }
            if current != Some(depth) {
                return Err(TransferError::NotCurrent { depth, current });
            }
            frame.open = false;
            std::mem::take(&mut frame.journals)
        };

        // Every journal closes even if an earlier one panics; the first panic
        // is re-raised once the frame is gone.
        let mut first_panic = None;
        for journal in &journals {
            let closed =
                panic::catch_unwind(AssertUnwindSafe(|| journal.on_close(self, depth, aborted)));
            first_panic = first_panic.or(closed.err());
        }
        self.frames.borrow_mut().pop();

        if let Some(payload) = first_panic {
            tracing::error!(depth, aborted, "journal callback panicked while closing transaction");
            if depth == 0 && !self.processing_root_commits.get() {
                self.discard_root_commits();
            }
            panic::resume_unwind(payload);
        }

        if depth == 0 {
            self.process_root_commits()
        } else {
            Ok(())
        }
    }

    /// Abort `(depth, id)`, first aborting any deeper transactions that were
    /// opened through cloned contexts and never closed.
    fn abort_with_inner(&self, depth: usize, id: u64) -> Result<(), TransferError> {
        loop {
            let top = {
                let frames = self.frames.borrow();
                frames
                    .last()
                    .map(|frame| (frames.len() - 1, frame.id, frame.opened_at))
            };
            match top {
                Some((inner_depth, inner_id, opened_at)) if inner_depth > depth => {
                    tracing::warn!(
                        depth = inner_depth,
                        %opened_at,
                        "aborting inner transaction left open by its parent"
                    );
                    self.close(inner_depth, inner_id, true)?;
                }
                _ => break,
            }
        }
        self.close(depth, id, true)
    }

    /// Drain the root-commit queue, invoking each journal's callback.
    ///
    /// Callbacks may open root transactions whose commits enqueue more work;
    /// those commits return immediately and this loop picks the work up.
    fn process_root_commits(&self) -> Result<(), TransferError> {
        if self.processing_root_commits.get() {
            return Ok(());
        }
        self.processing_root_commits.set(true);
        let _reset = ResetProcessing { manager: self };

        let limit = self.config.borrow().max_root_commit_callbacks;
        let mut invoked = 0usize;
        loop {
            let next = self.root_commit_queue.borrow_mut().pop_front();
            let Some(journal) = next else {
                break;
            };

            if invoked == limit {
                journal.discard_root_commit();
                let discarded = self.discard_root_commits() + 1;
                tracing::error!(
                    limit,
                    discarded,
                    "root commit callbacks keep re-triggering; discarding pending notifications"
                );
                return Err(TransferError::RootCommitOverflow { limit });
            }

            invoked += 1;
            journal.call_on_root_commit();
        }

        if invoked > 0 {
            tracing::trace!(callbacks = invoked, "root commit queue settled");
        }
        Ok(())
    }

    /// Drop every queued notification, releasing each journal's original state.
    fn discard_root_commits(&self) -> usize {
        let pending: Vec<_> = self.root_commit_queue.borrow_mut().drain(..).collect();
        for journal in &pending {
            journal.discard_root_commit();
        }
        pending.len()
    }
}

/// Ends root-commit processing. The queue is only non-empty here when a
/// callback panicked, and those notifications must not fire on a later root.
struct ResetProcessing<'a> {
    manager: &'a TransactionManager,
}

impl Drop for ResetProcessing<'_> {
    fn drop(&mut self) {
        let discarded = self.manager.discard_root_commits();
        if discarded > 0 {
            tracing::error!(
                discarded,
                "root commit callback panicked; discarding pending notifications"
            );
        }
        self.manager.processing_root_commits.set(false);
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Handle to one level of the current thread's transaction stack.
///
/// Passed by reference to every handler and journal operation. Cloning is
/// cheap; a clone stays valid exactly as long as the transaction it names.
#[derive(Clone)]
pub struct TransactionContext {
    manager: Rc<TransactionManager>,
    depth: usize,
    id: u64,
}

impl TransactionContext {
    /// 0 for a root transaction, parent depth + 1 otherwise.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// `true` while the transaction is open and not closing.
    pub fn is_open(&self) -> bool {
        self.manager.is_open(self.depth, self.id)
    }

    /// Error unless the transaction is open and not closing.
    pub fn validate_open(&self) -> Result<(), TransferError> {
        self.manager.validate_open(self.depth, self.id)
    }

    /// Open a child transaction. Only one child may be open at a time.
    #[track_caller]
    pub fn open_nested(&self) -> Result<Transaction<'_>, TransferError> {
        Transaction::open(Some(self))
    }

    /// Where this transaction was opened, if it is still on the stack.
    pub fn opened_at(&self) -> Option<&'static Location<'static>> {
        self.manager
            .frames
            .borrow()
            .get(self.depth)
            .filter(|frame| frame.id == self.id)
            .map(|frame| frame.opened_at)
    }

    pub(crate) fn enlist(&self, journal: Rc<dyn JournalHook>) -> Result<(), TransferError> {
        self.manager.enlist(self.depth, self.id, journal)
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("depth", &self.depth)
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("opened_at", &self.opened_at())
            .finish()
    }
}

impl fmt::Display for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transaction[depth={}", self.depth)?;
        if let Some(location) = self.opened_at() {
            write!(f, ", opened at {location}")?;
        }
        f.write_str("]")
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// An open transaction. Dropping it without committing aborts it.
///
/// The lifetime ties a child to the context of its parent, so a parent cannot
/// be committed while a child is still in scope.
#[must_use = "dropping a transaction aborts it"]
pub struct Transaction<'p> {
    context: TransactionContext,
    _parent: PhantomData<&'p TransactionContext>,
}

impl Transaction<'static> {
    /// Open the outermost transaction of this thread.
    #[track_caller]
    pub fn open_root() -> Result<Transaction<'static>, TransferError> {
        Transaction::open(None)
    }
}

impl<'p> Transaction<'p> {
    /// Open a root transaction (`parent == None`) or a child of `parent`.
    #[track_caller]
    pub fn open(parent: Option<&'p TransactionContext>) -> Result<Transaction<'p>, TransferError> {
        let opened_at = Location::caller();
        let manager = match parent {
            Some(parent) => Rc::clone(&parent.manager),
            None => TransactionManager::current(),
        };
        let context = manager.open(parent, opened_at)?;
        Ok(Transaction {
            context,
            _parent: PhantomData,
        })
    }

    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    /// Keep every change made under this transaction.
    ///
    /// Changes only become final once the root transaction commits. Committing
    /// the root runs the root-commit callbacks of every journal touched in the
    /// chain before returning.
    pub fn commit(self) -> Result<(), TransferError> {
        self.context
            .manager
            .close(self.context.depth, self.context.id, false)
    }

    /// Revert every change made under this transaction. Equivalent to dropping it.
    pub fn abort(self) -> Result<(), TransferError> {
        self.context
            .manager
            .abort_with_inner(self.context.depth, self.context.id)
    }

    /// State of the current thread's transaction stack.
    pub fn lifecycle() -> Lifecycle {
        TransactionManager::current().lifecycle()
    }

    /// The innermost open transaction of this thread, if any.
    ///
    /// Fails while the innermost transaction is closing.
    pub fn current() -> Result<Option<TransactionContext>, TransferError> {
        let manager = TransactionManager::current();
        let frames = manager.frames.borrow();
        match frames.last() {
            None => Ok(None),
            Some(frame) if !frame.open => Err(TransferError::ClosingTransaction),
            Some(frame) => Ok(Some(TransactionContext {
                manager: Rc::clone(&manager),
                depth: frames.len() - 1,
                id: frame.id,
            })),
        }
    }

    /// Replace this thread's transaction settings.
    ///
    /// Rejected while any transaction is open or closing.
    pub fn configure(config: TransferConfig) -> Result<(), TransferError> {
        config.validate()?;
        let manager = TransactionManager::current();
        if manager.lifecycle() != Lifecycle::None {
            return Err(TransferError::Config {
                detail: "cannot reconfigure while a transaction is active".into(),
            });
        }
        *manager.config.borrow_mut() = config;
        Ok(())
    }

    /// This thread's transaction settings.
    pub fn config() -> TransferConfig {
        TransactionManager::current().config.borrow().clone()
    }
}

impl Deref for Transaction<'_> {
    type Target = TransactionContext;

    fn deref(&self) -> &TransactionContext {
        &self.context
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transaction").field(&self.context).finish()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        let depth = self.context.depth;
        if !self.context.manager.is_open(depth, self.context.id) {
            return;
        }
        if let Err(err) = self.context.manager.abort_with_inner(depth, self.context.id) {
            tracing::error!(depth, error = %err, "failed to abort dropped transaction");
        }
    }
}
