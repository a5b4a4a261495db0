//! Forwarding to a fixed or lazily looked-up handler.

use std::fmt;
use std::rc::Rc;

use crate::error::TransferError;
use crate::handler::{ResourceHandler, check_index};
use crate::resource::{Resource, check_non_empty};
use crate::transaction::TransactionContext;

/// Where a forwarding handler finds its target.
pub enum Delegate<R: Resource> {
    /// Always the same handler.
    Fixed(Rc<dyn ResourceHandler<R>>),
    /// Looked up on every call, so the target may be swapped at any time.
    Lazy(Box<dyn Fn() -> Rc<dyn ResourceHandler<R>>>),
}

impl<R: Resource> Delegate<R> {
    pub fn lazy(supplier: impl Fn() -> Rc<dyn ResourceHandler<R>> + 'static) -> Self {
        Delegate::Lazy(Box::new(supplier))
    }

    /// The handler calls should go to right now.
    pub fn get(&self) -> Rc<dyn ResourceHandler<R>> {
        match self {
            Delegate::Fixed(handler) => Rc::clone(handler),
            Delegate::Lazy(supplier) => supplier(),
        }
    }
}

impl<R: Resource> From<Rc<dyn ResourceHandler<R>>> for Delegate<R> {
    fn from(handler: Rc<dyn ResourceHandler<R>>) -> Self {
        Delegate::Fixed(handler)
    }
}

impl<R: Resource> fmt::Debug for Delegate<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delegate::Fixed(handler) => f.debug_tuple("Fixed").field(&handler.describe()).finish(),
            Delegate::Lazy(_) => f.write_str("Lazy"),
        }
    }
}

/// Forwards every call to its delegate with the same index.
///
/// The index mapping is the identity. To shift or narrow it, delegate to a
/// [`RangedHandler`](crate::ranged::RangedHandler), which maps index `i` to
/// `start + i` of its own delegate (fixed or looked up per call).
#[derive(Debug)]
pub struct DelegatingHandler<R: Resource> {
    delegate: Delegate<R>,
}

impl<R: Resource> DelegatingHandler<R> {
    pub fn new(delegate: Rc<dyn ResourceHandler<R>>) -> Self {
        Self {
            delegate: Delegate::Fixed(delegate),
        }
    }

    pub fn with_supplier(supplier: impl Fn() -> Rc<dyn ResourceHandler<R>> + 'static) -> Self {
        Self {
            delegate: Delegate::lazy(supplier),
        }
    }

    pub fn delegate(&self) -> Rc<dyn ResourceHandler<R>> {
        self.delegate.get()
    }
}

impl<R: Resource> ResourceHandler<R> for DelegatingHandler<R> {
    fn size(&self) -> usize {
        self.delegate.get().size()
    }

    fn resource(&self, index: usize) -> Result<R, TransferError> {
        let delegate = self.delegate.get();
        check_index(index, delegate.size())?;
        delegate.resource(index)
    }

    fn amount(&self, index: usize) -> Result<u64, TransferError> {
        let delegate = self.delegate.get();
        check_index(index, delegate.size())?;
        delegate.amount(index)
    }

    fn capacity(&self, index: usize, resource: &R) -> Result<u64, TransferError> {
        let delegate = self.delegate.get();
        check_index(index, delegate.size())?;
        delegate.capacity(index, resource)
    }

    fn is_valid(&self, index: usize, resource: &R) -> Result<bool, TransferError> {
        if resource.is_empty() {
            return Ok(true);
        }
        let delegate = self.delegate.get();
        check_index(index, delegate.size())?;
        delegate.is_valid(index, resource)
    }

    fn insert_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        let delegate = self.delegate.get();
        check_index(index, delegate.size())?;
        delegate.insert_at(index, resource, amount, transaction)
    }

    fn extract_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        let delegate = self.delegate.get();
        check_index(index, delegate.size())?;
        delegate.extract_at(index, resource, amount, transaction)
    }

    fn insert(
        &self,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        self.delegate.get().insert(resource, amount, transaction)
    }

    fn extract(
        &self,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        self.delegate.get().extract(resource, amount, transaction)
    }

    fn describe(&self) -> String {
        format!("DelegatingHandler({})", self.delegate.get().describe())
    }
}
