//! A zero-based window onto part of another handler.

use std::rc::Rc;

use crate::delegating::Delegate;
use crate::error::TransferError;
use crate::handler::{ResourceHandler, check_index};
use crate::resource::{Resource, check_non_empty};
use crate::transaction::TransactionContext;

/// Exposes indices `start..end` of a delegate as `0..end - start`.
///
/// Unindexed insertion and extraction only touch indices inside the window.
#[derive(Debug)]
pub struct RangedHandler<R: Resource> {
    delegate: Delegate<R>,
    start: usize,
    end: usize,
}

impl<R: Resource> RangedHandler<R> {
    /// Requires `start < end <= delegate.size()`.
    pub fn new(
        delegate: Rc<dyn ResourceHandler<R>>,
        start: usize,
        end: usize,
    ) -> Result<Self, TransferError> {
        Self::from_delegate(Delegate::Fixed(delegate), start, end)
    }

    /// Like [`RangedHandler::new`], but looks the delegate up on every call.
    /// The range is validated against the delegate supplied at construction.
    pub fn with_supplier(
        supplier: impl Fn() -> Rc<dyn ResourceHandler<R>> + 'static,
        start: usize,
        end: usize,
    ) -> Result<Self, TransferError> {
        Self::from_delegate(Delegate::lazy(supplier), start, end)
    }

    /// A window of exactly one index.
    pub fn single_index(
        delegate: Rc<dyn ResourceHandler<R>>,
        index: usize,
    ) -> Result<Self, TransferError> {
        let size = delegate.size();
        let end = index.checked_add(1).ok_or(TransferError::InvalidRange {
            start: index,
            end: index,
            size,
        })?;
        Self::new(delegate, index, end)
    }

    fn from_delegate(
        delegate: Delegate<R>,
        start: usize,
        end: usize,
    ) -> Result<Self, TransferError> {
        let size = delegate.get().size();
        if start >= end || end > size {
            return Err(TransferError::InvalidRange { start, end, size });
        }
        Ok(Self {
            delegate,
            start,
            end,
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    fn convert_index(&self, index: usize) -> Result<usize, TransferError> {
        check_index(index, self.end - self.start)?;
        Ok(index + self.start)
    }
}

impl<R: Resource> ResourceHandler<R> for RangedHandler<R> {
    fn size(&self) -> usize {
        self.end - self.start
    }

    fn resource(&self, index: usize) -> Result<R, TransferError> {
        let index = self.convert_index(index)?;
        self.delegate.get().resource(index)
    }

    fn amount(&self, index: usize) -> Result<u64, TransferError> {
        let index = self.convert_index(index)?;
        self.delegate.get().amount(index)
    }

    fn capacity(&self, index: usize, resource: &R) -> Result<u64, TransferError> {
        let index = self.convert_index(index)?;
        self.delegate.get().capacity(index, resource)
    }

    fn is_valid(&self, index: usize, resource: &R) -> Result<bool, TransferError> {
        if resource.is_empty() {
            return Ok(true);
        }
        let index = self.convert_index(index)?;
        self.delegate.get().is_valid(index, resource)
    }

    fn insert_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        let index = self.convert_index(index)?;
        self.delegate.get().insert_at(index, resource, amount, transaction)
    }

    fn extract_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        let index = self.convert_index(index)?;
        self.delegate.get().extract_at(index, resource, amount, transaction)
    }

    fn insert(
        &self,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        let handler = self.delegate.get();
        let mut inserted = 0;
        for index in self.start..self.end {
            if inserted == amount {
                break;
            }
            let remaining = amount - inserted;
            let moved = handler.insert_at(index, resource, remaining, transaction)?;
            inserted += moved.min(remaining);
        }
        Ok(inserted)
    }

    fn extract(
        &self,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        let handler = self.delegate.get();
        let mut extracted = 0;
        for index in self.start..self.end {
            if extracted == amount {
                break;
            }
            let remaining = amount - extracted;
            let moved = handler.extract_at(index, resource, remaining, transaction)?;
            extracted += moved.min(remaining);
        }
        Ok(extracted)
    }

    fn describe(&self) -> String {
        format!(
            "RangedHandler[{}..{}]({})",
            self.start,
            self.end,
            self.delegate.get().describe()
        )
    }
}
