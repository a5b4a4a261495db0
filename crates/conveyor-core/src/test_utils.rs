//! Shared test helpers for unit tests, integration tests, and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::TransferError;
use crate::handler::{ResourceHandler, check_index};
use crate::journal::{Journal, SnapshotJournal};
use crate::resource::{Resource, ResourceStack, check_non_empty};
use crate::transaction::TransactionContext;

// ===========================================================================
// Test resource
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TestResource {
    Empty,
    Some,
    Other1,
    Other2,
    Other3,
    Other4,
}

impl TestResource {
    /// Every non-empty variant, in declaration order.
    pub const NON_EMPTY: [TestResource; 5] = [
        TestResource::Some,
        TestResource::Other1,
        TestResource::Other2,
        TestResource::Other3,
        TestResource::Other4,
    ];
}

impl Resource for TestResource {
    fn is_empty(&self) -> bool {
        *self == TestResource::Empty
    }
}

// ===========================================================================
// Mock handler
// ===========================================================================

/// Contents of a [`MockHandler`], journaled as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockState {
    pub resources: Vec<TestResource>,
    pub amounts: Vec<u64>,
}

pub struct MockContents {
    state: RefCell<MockState>,
}

impl SnapshotJournal for MockContents {
    type Snapshot = MockState;

    fn create_snapshot(&self) -> MockState {
        self.state.borrow().clone()
    }

    fn revert_to_snapshot(&self, snapshot: MockState) {
        *self.state.borrow_mut() = snapshot;
    }
}

/// A configurable in-memory handler.
///
/// Every index starts empty with capacity `u64::MAX` and accepts every
/// resource. Setters take `&self` so a handler shared through `Rc` can still
/// be reconfigured mid-test.
pub struct MockHandler {
    contents: Rc<Journal<MockContents>>,
    capacities: RefCell<Vec<u64>>,
    valid: RefCell<HashMap<usize, HashSet<TestResource>>>,
    extraction_enabled: Cell<bool>,
    failure: RefCell<Option<String>>,
}

impl MockHandler {
    pub fn new(size: usize) -> Self {
        Self {
            contents: Journal::new(MockContents {
                state: RefCell::new(MockState {
                    resources: vec![TestResource::Empty; size],
                    amounts: vec![0; size],
                }),
            }),
            capacities: RefCell::new(vec![u64::MAX; size]),
            valid: RefCell::new(HashMap::new()),
            extraction_enabled: Cell::new(true),
            failure: RefCell::new(None),
        }
    }

    /// Overwrite an index without going through a transaction.
    pub fn set(&self, index: usize, resource: TestResource, amount: u64) {
        let mut state = self.contents.state.borrow_mut();
        state.resources[index] = resource;
        state.amounts[index] = amount;
    }

    pub fn set_capacity(&self, index: usize, capacity: u64) {
        self.capacities.borrow_mut()[index] = capacity;
    }

    pub fn set_all_capacities(&self, capacity: u64) {
        self.capacities.borrow_mut().fill(capacity);
    }

    /// Restrict `index` to exactly `resources` (none at all if empty).
    pub fn set_valid(&self, index: usize, resources: &[TestResource]) {
        self.valid
            .borrow_mut()
            .insert(index, resources.iter().copied().collect());
    }

    pub fn set_all_valid(&self, index: usize) {
        self.valid.borrow_mut().remove(&index);
    }

    /// When disabled, every extraction yields 0 while reads still report
    /// the stored contents.
    pub fn set_extraction_enabled(&self, enabled: bool) {
        self.extraction_enabled.set(enabled);
    }

    /// Make every insertion and extraction fail with a handler error.
    pub fn fail_with(&self, message: &str) {
        *self.failure.borrow_mut() = Some(message.to_string());
    }

    pub fn clear_failure(&self) {
        *self.failure.borrow_mut() = None;
    }

    pub fn state(&self) -> MockState {
        self.contents.state.borrow().clone()
    }

    fn check_failure(&self) -> Result<(), TransferError> {
        match &*self.failure.borrow() {
            Some(message) => Err(TransferError::handler(message.clone())),
            None => Ok(()),
        }
    }

    fn accepts(&self, index: usize, resource: &TestResource) -> bool {
        self.valid
            .borrow()
            .get(&index)
            .is_none_or(|allowed| allowed.contains(resource))
    }
}

impl ResourceHandler<TestResource> for MockHandler {
    fn size(&self) -> usize {
        self.capacities.borrow().len()
    }

    fn resource(&self, index: usize) -> Result<TestResource, TransferError> {
        check_index(index, self.size())?;
        Ok(self.contents.state.borrow().resources[index])
    }

    fn amount(&self, index: usize) -> Result<u64, TransferError> {
        check_index(index, self.size())?;
        Ok(self.contents.state.borrow().amounts[index])
    }

    fn capacity(&self, index: usize, resource: &TestResource) -> Result<u64, TransferError> {
        check_index(index, self.size())?;
        if !resource.is_empty() && !self.accepts(index, resource) {
            return Ok(0);
        }
        Ok(self.capacities.borrow()[index])
    }

    fn is_valid(&self, index: usize, resource: &TestResource) -> Result<bool, TransferError> {
        check_index(index, self.size())?;
        check_non_empty(resource)?;
        Ok(self.accepts(index, resource))
    }

    fn insert_at(
        &self,
        index: usize,
        resource: &TestResource,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_index(index, self.size())?;
        check_non_empty(resource)?;
        self.check_failure()?;
        if !self.accepts(index, resource) {
            return Ok(0);
        }

        let (stored, current) = {
            let state = self.contents.state.borrow();
            (state.resources[index], state.amounts[index])
        };
        if !stored.is_empty() && stored != *resource {
            return Ok(0);
        }

        let capacity = self.capacities.borrow()[index];
        let inserted = amount.min(capacity.saturating_sub(current));
        if inserted > 0 {
            self.contents.update_snapshots(transaction)?;
            let mut state = self.contents.state.borrow_mut();
            state.resources[index] = *resource;
            state.amounts[index] = current + inserted;
        }
        Ok(inserted)
    }

    fn extract_at(
        &self,
        index: usize,
        resource: &TestResource,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_index(index, self.size())?;
        check_non_empty(resource)?;
        self.check_failure()?;
        if !self.extraction_enabled.get() {
            return Ok(0);
        }

        let (stored, current) = {
            let state = self.contents.state.borrow();
            (state.resources[index], state.amounts[index])
        };
        if stored != *resource {
            return Ok(0);
        }

        let extracted = amount.min(current);
        if extracted > 0 {
            self.contents.update_snapshots(transaction)?;
            let mut state = self.contents.state.borrow_mut();
            state.amounts[index] = current - extracted;
            if state.amounts[index] == 0 {
                state.resources[index] = TestResource::Empty;
            }
        }
        Ok(extracted)
    }

    fn describe(&self) -> String {
        format!("MockHandler(size={})", self.size())
    }
}

// ===========================================================================
// Builders and inspectors
// ===========================================================================

/// Contents and capacity of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub resource: TestResource,
    pub amount: u64,
    pub capacity: u64,
}

/// An empty index with unlimited capacity.
pub const EMPTY_SLOT: SlotInfo = SlotInfo {
    resource: TestResource::Empty,
    amount: 0,
    capacity: u64::MAX,
};

pub const EMPTY_STACK: ResourceStack<TestResource> = ResourceStack {
    resource: TestResource::Empty,
    amount: 0,
};

pub fn slot_info(resource: TestResource, amount: u64) -> SlotInfo {
    capped_slot(resource, amount, u64::MAX)
}

pub fn capped_slot(resource: TestResource, amount: u64, capacity: u64) -> SlotInfo {
    SlotInfo {
        resource,
        amount,
        capacity,
    }
}

pub fn stack(resource: TestResource, amount: u64) -> ResourceStack<TestResource> {
    ResourceStack::new(resource, amount)
}

/// A mock with one index per slot, contents and capacities taken from `slots`.
pub fn handler(slots: &[SlotInfo]) -> MockHandler {
    let handler = MockHandler::new(slots.len());
    for (index, slot) in slots.iter().enumerate() {
        handler.set(index, slot.resource, slot.amount);
        handler.set_capacity(index, slot.capacity);
    }
    handler
}

/// A mock with unlimited capacity holding `stacks`.
pub fn handler_for_stacks(stacks: &[ResourceStack<TestResource>]) -> MockHandler {
    let handler = MockHandler::new(stacks.len());
    for (index, stack) in stacks.iter().enumerate() {
        handler.set(index, stack.resource, stack.amount);
    }
    handler
}

/// The stack at every index, with [`EMPTY_STACK`] for anything empty.
pub fn describe_stacks<H>(handler: &H) -> Vec<ResourceStack<TestResource>>
where
    H: ResourceHandler<TestResource> + ?Sized,
{
    (0..handler.size())
        .map(|index| {
            let resource = handler.resource(index).expect("index in range");
            let amount = handler.amount(index).expect("index in range");
            if resource.is_empty() || amount == 0 {
                EMPTY_STACK
            } else {
                stack(resource, amount)
            }
        })
        .collect()
}

/// Contents and capacity at every index, `None` for anything empty.
pub fn describe_slots<H>(handler: &H) -> Vec<Option<SlotInfo>>
where
    H: ResourceHandler<TestResource> + ?Sized,
{
    (0..handler.size())
        .map(|index| {
            let resource = handler.resource(index).expect("index in range");
            let amount = handler.amount(index).expect("index in range");
            if resource.is_empty() || amount == 0 {
                return None;
            }
            let capacity = handler.capacity(index, &resource).expect("index in range");
            Some(capped_slot(resource, amount, capacity))
        })
        .collect()
}

/// Total stored across all indices.
pub fn total_amount<H>(handler: &H) -> u64
where
    H: ResourceHandler<TestResource> + ?Sized,
{
    (0..handler.size())
        .map(|index| handler.amount(index).expect("index in range"))
        .sum()
}
