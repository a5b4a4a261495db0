//! Handlers backed by a fixed-size list of stacks, one per index.
//!
//! [`StackKind`] says how to read a resource and amount out of a stack value
//! and how to build one; [`StacksHandler`] does the rest. Each index has its
//! own journal, so two transactions touching different indices never revert
//! each other's work.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::TransferError;
use crate::handler::{ResourceHandler, check_index};
use crate::journal::{Journal, SnapshotJournal};
use crate::resource::{Resource, ResourceStack, check_non_empty, check_stack, is_empty_stack};
use crate::transaction::TransactionContext;

/// The operations [`StacksHandler`] needs from a stack type.
pub trait StackKind: 'static {
    type Resource: Resource;
    type Stack: Clone + 'static;

    fn resource_of(&self, stack: &Self::Stack) -> Self::Resource;
    fn amount_of(&self, stack: &Self::Stack) -> u64;

    /// Build a stack. Called with a zero amount when an index is drained.
    fn stack_of(&self, resource: &Self::Resource, amount: u64) -> Self::Stack;

    /// The value of an index that holds nothing.
    fn empty_stack(&self) -> Self::Stack;

    /// Copy used for undo snapshots.
    fn copy_of(&self, stack: &Self::Stack) -> Self::Stack {
        stack.clone()
    }

    fn matches(&self, stack: &Self::Stack, resource: &Self::Resource) -> bool {
        self.resource_of(stack) == *resource
    }

    fn is_valid(&self, _index: usize, _resource: &Self::Resource) -> bool {
        true
    }

    /// Maximum amount of `resource` that `index` may hold.
    fn capacity(&self, index: usize, resource: &Self::Resource) -> u64;

    /// Called after the stack at `index` changed for good: at root commit for
    /// transactional changes, immediately for [`StacksHandler::set`].
    fn on_contents_changed(&self, _index: usize, _previous: &Self::Stack) {}
}

type SharedStacks<K> = Rc<RefCell<Vec<<K as StackKind>::Stack>>>;

/// Journal for one index of a [`StacksHandler`].
struct SlotJournal<K: StackKind> {
    index: usize,
    kind: Rc<K>,
    stacks: SharedStacks<K>,
}

impl<K: StackKind> SnapshotJournal for SlotJournal<K> {
    type Snapshot = K::Stack;

    fn create_snapshot(&self) -> K::Stack {
        let stacks = self.stacks.borrow();
        self.kind.copy_of(&stacks[self.index])
    }

    fn revert_to_snapshot(&self, snapshot: K::Stack) {
        self.stacks.borrow_mut()[self.index] = snapshot;
    }

    fn on_root_commit(&self, original_state: K::Stack) {
        self.kind.on_contents_changed(self.index, &original_state);
    }
}

/// A handler storing one `K::Stack` per index.
pub struct StacksHandler<K: StackKind> {
    kind: Rc<K>,
    stacks: SharedStacks<K>,
    journals: Vec<Rc<Journal<SlotJournal<K>>>>,
}

impl<K: StackKind> StacksHandler<K> {
    /// `size` empty indices.
    pub fn new(kind: K, size: usize) -> Self {
        let empty = kind.empty_stack();
        Self::from_stacks(kind, vec![empty; size])
    }

    /// Start from existing contents. The number of indices is fixed from here on.
    pub fn from_stacks(kind: K, stacks: Vec<K::Stack>) -> Self {
        let kind = Rc::new(kind);
        let size = stacks.len();
        let stacks = Rc::new(RefCell::new(stacks));
        let journals = (0..size)
            .map(|index| {
                Journal::new(SlotJournal {
                    index,
                    kind: Rc::clone(&kind),
                    stacks: Rc::clone(&stacks),
                })
            })
            .collect();
        Self {
            kind,
            stacks,
            journals,
        }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// Overwrite an index outside of any transaction.
    ///
    /// Notifies [`StackKind::on_contents_changed`] right away.
    pub fn set(
        &self,
        index: usize,
        resource: &K::Resource,
        amount: u64,
    ) -> Result<(), TransferError> {
        check_index(index, self.journals.len())?;
        check_stack(resource, amount)?;
        let stack = self.kind.stack_of(resource, amount);
        let previous = std::mem::replace(&mut self.stacks.borrow_mut()[index], stack);
        self.kind.on_contents_changed(index, &previous);
        Ok(())
    }

    pub fn stack(&self, index: usize) -> Result<K::Stack, TransferError> {
        check_index(index, self.journals.len())?;
        Ok(self.stacks.borrow()[index].clone())
    }

    pub fn copy_to_vec(&self) -> Vec<K::Stack> {
        self.stacks
            .borrow()
            .iter()
            .map(|stack| self.kind.copy_of(stack))
            .collect()
    }
}

impl<K: StackKind> ResourceHandler<K::Resource> for StacksHandler<K> {
    fn size(&self) -> usize {
        self.journals.len()
    }

    fn resource(&self, index: usize) -> Result<K::Resource, TransferError> {
        check_index(index, self.size())?;
        Ok(self.kind.resource_of(&self.stacks.borrow()[index]))
    }

    fn amount(&self, index: usize) -> Result<u64, TransferError> {
        check_index(index, self.size())?;
        Ok(self.kind.amount_of(&self.stacks.borrow()[index]))
    }

    fn capacity(&self, index: usize, resource: &K::Resource) -> Result<u64, TransferError> {
        check_index(index, self.size())?;
        if resource.is_empty() || self.kind.is_valid(index, resource) {
            Ok(self.kind.capacity(index, resource))
        } else {
            Ok(0)
        }
    }

    fn is_valid(&self, index: usize, resource: &K::Resource) -> Result<bool, TransferError> {
        check_index(index, self.size())?;
        check_non_empty(resource)?;
        Ok(self.kind.is_valid(index, resource))
    }

    fn insert_at(
        &self,
        index: usize,
        resource: &K::Resource,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_index(index, self.size())?;
        check_non_empty(resource)?;

        let (current, accepts) = {
            let stacks = self.stacks.borrow();
            let stack = &stacks[index];
            let current = self.kind.amount_of(stack);
            (current, current == 0 || self.kind.matches(stack, resource))
        };
        if !accepts || !self.kind.is_valid(index, resource) {
            return Ok(0);
        }

        let room = self.kind.capacity(index, resource).saturating_sub(current);
        let inserted = amount.min(room);
        if inserted == 0 {
            return Ok(0);
        }

        self.journals[index].update_snapshots(transaction)?;
        let stack = self.kind.stack_of(resource, current + inserted);
        self.stacks.borrow_mut()[index] = stack;
        Ok(inserted)
    }

    fn extract_at(
        &self,
        index: usize,
        resource: &K::Resource,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_index(index, self.size())?;
        check_non_empty(resource)?;

        let current = {
            let stacks = self.stacks.borrow();
            let stack = &stacks[index];
            if !self.kind.matches(stack, resource) {
                return Ok(0);
            }
            self.kind.amount_of(stack)
        };

        let extracted = amount.min(current);
        if extracted == 0 {
            return Ok(0);
        }

        self.journals[index].update_snapshots(transaction)?;
        let stack = self.kind.stack_of(resource, current - extracted);
        self.stacks.borrow_mut()[index] = stack;
        Ok(extracted)
    }
}

// ---------------------------------------------------------------------------
// ResourceStack-backed kind
// ---------------------------------------------------------------------------

type ChangeListener<R> = Box<dyn Fn(usize, &ResourceStack<R>)>;

/// A [`StackKind`] storing plain [`ResourceStack`]s with one capacity shared
/// by every index and resource.
pub struct ResourceStacks<R: Resource> {
    empty: R,
    capacity: u64,
    listener: Option<ChangeListener<R>>,
}

impl<R: Resource> ResourceStacks<R> {
    /// `empty` must be the empty resource.
    pub fn new(empty: R, capacity: u64) -> Result<Self, TransferError> {
        if !empty.is_empty() {
            return Err(TransferError::ExpectedEmpty {
                resource: format!("{empty:?}"),
            });
        }
        Ok(Self {
            empty,
            capacity,
            listener: None,
        })
    }

    /// Call `listener(index, previous)` whenever an index changes for good.
    pub fn on_change(mut self, listener: impl Fn(usize, &ResourceStack<R>) + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }
}

impl<R: Resource> StackKind for ResourceStacks<R> {
    type Resource = R;
    type Stack = ResourceStack<R>;

    fn resource_of(&self, stack: &ResourceStack<R>) -> R {
        stack.resource.clone()
    }

    fn amount_of(&self, stack: &ResourceStack<R>) -> u64 {
        stack.amount
    }

    fn stack_of(&self, resource: &R, amount: u64) -> ResourceStack<R> {
        if is_empty_stack(resource, amount) {
            return self.empty_stack();
        }
        ResourceStack::new(resource.clone(), amount)
    }

    fn empty_stack(&self) -> ResourceStack<R> {
        ResourceStack::empty(self.empty.clone())
    }

    fn matches(&self, stack: &ResourceStack<R>, resource: &R) -> bool {
        stack.resource == *resource
    }

    fn capacity(&self, _index: usize, _resource: &R) -> u64 {
        self.capacity
    }

    fn on_contents_changed(&self, index: usize, previous: &ResourceStack<R>) {
        if let Some(listener) = &self.listener {
            listener(index, previous);
        }
    }
}

/// Stacks handler holding plain [`ResourceStack`]s.
pub type ResourceStacksHandler<R> = StacksHandler<ResourceStacks<R>>;

impl<R: Resource> StacksHandler<ResourceStacks<R>> {
    /// `size` empty indices, each holding at most `capacity`.
    pub fn with_capacity(size: usize, empty: R, capacity: u64) -> Result<Self, TransferError> {
        Ok(Self::new(ResourceStacks::new(empty, capacity)?, size))
    }
}
