//! Root-commit notifications, including callbacks that open new root
//! transactions of their own.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use conveyor_core::{
    Journal, Lifecycle, SnapshotJournal, Transaction, TransactionContext, TransferConfig,
    TransferError,
};

/// (original state, state at the time of the callback)
type RootCommit = (i32, i32);

/// An integer journal that records its root commits and may run a hook
/// afterwards.
#[derive(Default)]
struct Counter {
    value: Cell<i32>,
    commits: RefCell<Vec<RootCommit>>,
    released: Cell<u32>,
    after_commit: RefCell<Option<Box<dyn Fn()>>>,
}

impl SnapshotJournal for Counter {
    type Snapshot = i32;

    fn create_snapshot(&self) -> i32 {
        self.value.get()
    }

    fn revert_to_snapshot(&self, snapshot: i32) {
        self.value.set(snapshot);
    }

    fn release_snapshot(&self, _snapshot: i32) {
        self.released.set(self.released.get() + 1);
    }

    fn on_root_commit(&self, original_state: i32) {
        self.commits
            .borrow_mut()
            .push((original_state, self.value.get()));
        if let Some(hook) = &*self.after_commit.borrow() {
            hook();
        }
    }
}

fn counter() -> Rc<Journal<Counter>> {
    Journal::new(Counter::default())
}

fn set(counter: &Journal<Counter>, value: i32, tx: &TransactionContext) {
    counter.update_snapshots(tx).unwrap();
    counter.value.set(value);
}

fn commits(counter: &Journal<Counter>) -> Vec<RootCommit> {
    counter.commits.borrow().clone()
}

/// After each root commit of `counter`, bump it by one in a fresh root
/// transaction while it is below `limit`.
fn self_incrementing(counter: &Rc<Journal<Counter>>, limit: i32, commit: bool) {
    let this: Weak<Journal<Counter>> = Rc::downgrade(counter);
    *counter.after_commit.borrow_mut() = Some(Box::new(move || {
        let Some(this) = this.upgrade() else {
            return;
        };
        if this.value.get() < limit {
            let tx = Transaction::open_root().unwrap();
            set(&this, this.value.get() + 1, &tx);
            if commit {
                tx.commit().unwrap();
            }
        }
    }));
}

/// After each root commit of `trigger`, set `target` to `value` in a fresh
/// root transaction.
fn sets_other(trigger: &Journal<Counter>, target: &Rc<Journal<Counter>>, value: i32) {
    let target = Rc::clone(target);
    *trigger.after_commit.borrow_mut() = Some(Box::new(move || {
        let tx = Transaction::open_root().unwrap();
        set(&target, value, &tx);
        tx.commit().unwrap();
    }));
}

#[test]
fn modifying_other_journal_last() {
    let first = counter();
    let second = counter();
    sets_other(&second, &first, 10);

    let tx = Transaction::open_root().unwrap();
    set(&first, 1, &tx);
    set(&second, 2, &tx);
    tx.commit().unwrap();

    assert_eq!(commits(&first), vec![(0, 1), (1, 10)]);
    assert_eq!(commits(&second), vec![(0, 2)]);
}

#[test]
fn modifying_other_journal_first() {
    let first = counter();
    let second = counter();
    sets_other(&second, &first, 10);

    let tx = Transaction::open_root().unwrap();
    set(&second, 2, &tx);
    set(&first, 1, &tx);
    tx.commit().unwrap();

    // `first` was still queued when the callback changed it again, so it is
    // notified once, straight from 0 to 10.
    assert_eq!(commits(&first), vec![(0, 10)]);
    assert_eq!(commits(&second), vec![(0, 2)]);
    assert_eq!(first.released.get(), 1);
}

#[test]
fn modifying_self() {
    let counter = counter();
    self_incrementing(&counter, 5, true);

    let tx = Transaction::open_root().unwrap();
    set(&counter, 1, &tx);
    tx.commit().unwrap();

    assert_eq!(
        commits(&counter),
        vec![(0, 1), (1, 2), (2, 3), (3, 4), (4, 5)]
    );
    assert!(!counter.has_pending_root_commit());
}

#[test]
fn modifying_self_then_abort() {
    let counter = counter();
    self_incrementing(&counter, 5, false);

    let tx = Transaction::open_root().unwrap();
    set(&counter, 1, &tx);
    tx.commit().unwrap();

    assert_eq!(commits(&counter), vec![(0, 1)]);
    assert_eq!(counter.value.get(), 1);
}

#[test]
fn net_unchanged_journal_does_not_fire() {
    let counter = counter();

    let root = Transaction::open_root().unwrap();
    {
        let child = root.open_nested().unwrap();
        set(&counter, 7, &child);
    }
    assert_eq!(counter.value.get(), 0);
    root.commit().unwrap();

    assert!(commits(&counter).is_empty());
}

#[test]
fn one_callback_per_root_however_deeply_touched() {
    let counter = counter();

    let root = Transaction::open_root().unwrap();
    set(&counter, 1, &root);
    {
        let child = root.open_nested().unwrap();
        set(&counter, 2, &child);
        {
            let grandchild = child.open_nested().unwrap();
            set(&counter, 3, &grandchild);
            grandchild.commit().unwrap();
        }
        child.commit().unwrap();
    }
    root.commit().unwrap();

    assert_eq!(commits(&counter), vec![(0, 3)]);
    // The snapshots taken by the child and grandchild were superseded.
    assert_eq!(counter.released.get(), 2);
}

#[test]
fn runaway_callbacks_hit_the_configured_bound() {
    Transaction::configure(TransferConfig {
        max_root_commit_callbacks: 3,
    })
    .unwrap();

    let counter = counter();
    self_incrementing(&counter, i32::MAX, true);

    let tx = Transaction::open_root().unwrap();
    set(&counter, 1, &tx);
    let err = tx.commit().unwrap_err();
    assert!(matches!(err, TransferError::RootCommitOverflow { limit: 3 }));

    assert_eq!(commits(&counter), vec![(0, 1), (1, 2), (2, 3)]);
    // The fourth pending notification was dropped and its state released.
    assert!(!counter.has_pending_root_commit());
    assert_eq!(counter.released.get(), 1);
    assert_eq!(counter.value.get(), 4);

    // The thread is usable again afterwards.
    *counter.after_commit.borrow_mut() = None;
    let tx = Transaction::open_root().unwrap();
    set(&counter, 5, &tx);
    tx.commit().unwrap();
    assert_eq!(commits(&counter).last(), Some(&(4, 5)));
}

#[test]
fn lifecycle_during_callbacks() {
    let counter = counter();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    *counter.after_commit.borrow_mut() = Some(Box::new(move || {
        log.borrow_mut()
            .push((Transaction::lifecycle(), Transaction::current().unwrap().is_none()));
    }));

    let tx = Transaction::open_root().unwrap();
    set(&counter, 1, &tx);
    tx.commit().unwrap();

    assert_eq!(*seen.borrow(), vec![(Lifecycle::RootClosing, true)]);
    assert_eq!(Transaction::lifecycle(), Lifecycle::None);
}
