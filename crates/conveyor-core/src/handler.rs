//! The indexed resource container contract.

use std::rc::Rc;

use crate::error::TransferError;
use crate::resource::{Resource, check_non_empty};
use crate::transaction::TransactionContext;

/// An indexed container of resources supporting transactional insertion and
/// extraction.
///
/// Indices run over `0..size()`. `size()` may change between calls, so callers
/// re-read it rather than caching indices for long.
///
/// Insertion and extraction report how much was actually moved. Accepting
/// less than requested (or nothing) because of capacity or validity is not an
/// error. Every mutation must go through a journal touched with the given
/// transaction so that aborting the transaction undoes it.
pub trait ResourceHandler<R: Resource> {
    /// Current number of indices.
    fn size(&self) -> usize;

    /// The resource stored at `index`; the empty resource if nothing is stored.
    fn resource(&self, index: usize) -> Result<R, TransferError>;

    /// The amount stored at `index`; 0 whenever the resource is empty.
    fn amount(&self, index: usize) -> Result<u64, TransferError>;

    /// How much of `resource` `index` could hold at most, regardless of what
    /// it holds now. Passing the empty resource yields a general estimate.
    /// Must be 0 for any resource `is_valid` rejects.
    fn capacity(&self, index: usize, resource: &R) -> Result<u64, TransferError>;

    /// Whether `resource` is categorically accepted at `index`, ignoring the
    /// current fill level.
    fn is_valid(&self, index: usize, resource: &R) -> Result<bool, TransferError>;

    /// Insert up to `amount` of `resource` at `index`, returning how much was
    /// accepted.
    fn insert_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError>;

    /// Extract up to `amount` of `resource` from `index`, returning how much
    /// was removed.
    fn extract_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError>;

    /// Insert at handler-chosen indices.
    ///
    /// The default walks indices in ascending order, filling each greedily.
    fn insert(
        &self,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        let mut inserted = 0;
        // An index reporting more than it was offered counts as filling the request.
        for index in 0..self.size() {
            if inserted == amount {
                break;
            }
            let remaining = amount - inserted;
            let moved = self.insert_at(index, resource, remaining, transaction)?;
            inserted += moved.min(remaining);
        }
        Ok(inserted)
    }

    /// Extract from handler-chosen indices.
    ///
    /// The default walks indices in ascending order, draining each greedily.
    fn extract(
        &self,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        let mut extracted = 0;
        for index in 0..self.size() {
            if extracted == amount {
                break;
            }
            let remaining = amount - extracted;
            let moved = self.extract_at(index, resource, remaining, transaction)?;
            extracted += moved.min(remaining);
        }
        Ok(extracted)
    }

    /// Short human-readable name used in diagnostics.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Error unless `index` lies in `0..size`.
pub fn check_index(index: usize, size: usize) -> Result<(), TransferError> {
    if index >= size {
        return Err(TransferError::IndexOutOfBounds { index, size });
    }
    Ok(())
}

impl<R: Resource, H: ResourceHandler<R> + ?Sized> ResourceHandler<R> for Rc<H> {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn resource(&self, index: usize) -> Result<R, TransferError> {
        (**self).resource(index)
    }

    fn amount(&self, index: usize) -> Result<u64, TransferError> {
        (**self).amount(index)
    }

    fn capacity(&self, index: usize, resource: &R) -> Result<u64, TransferError> {
        (**self).capacity(index, resource)
    }

    fn is_valid(&self, index: usize, resource: &R) -> Result<bool, TransferError> {
        (**self).is_valid(index, resource)
    }

    fn insert_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        (**self).insert_at(index, resource, amount, transaction)
    }

    fn extract_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        (**self).extract_at(index, resource, amount, transaction)
    }

    fn insert(
        &self,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        (**self).insert(resource, amount, transaction)
    }

    fn extract(
        &self,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        (**self).extract(resource, amount, transaction)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
