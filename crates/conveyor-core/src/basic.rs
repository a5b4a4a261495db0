//! Trivial handlers: nothing, a sink, and an endless source.

use crate::error::TransferError;
use crate::handler::{ResourceHandler, check_index};
use crate::resource::{Resource, check_non_empty};
use crate::transaction::TransactionContext;

/// A handler with no indices. Every indexed call is an index error.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyHandler;

impl<R: Resource> ResourceHandler<R> for EmptyHandler {
    fn size(&self) -> usize {
        0
    }

    fn resource(&self, index: usize) -> Result<R, TransferError> {
        Err(TransferError::IndexOutOfBounds { index, size: 0 })
    }

    fn amount(&self, index: usize) -> Result<u64, TransferError> {
        Err(TransferError::IndexOutOfBounds { index, size: 0 })
    }

    fn capacity(&self, index: usize, _resource: &R) -> Result<u64, TransferError> {
        Err(TransferError::IndexOutOfBounds { index, size: 0 })
    }

    fn is_valid(&self, index: usize, _resource: &R) -> Result<bool, TransferError> {
        Err(TransferError::IndexOutOfBounds { index, size: 0 })
    }

    fn insert_at(
        &self,
        index: usize,
        resource: &R,
        _amount: u64,
        _transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        Err(TransferError::IndexOutOfBounds { index, size: 0 })
    }

    fn extract_at(
        &self,
        index: usize,
        resource: &R,
        _amount: u64,
        _transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        Err(TransferError::IndexOutOfBounds { index, size: 0 })
    }

    fn describe(&self) -> String {
        "EmptyHandler".into()
    }
}

/// One index that accepts any amount of anything and destroys it.
#[derive(Debug, Clone)]
pub struct VoidingHandler<R> {
    empty: R,
}

impl<R: Resource> VoidingHandler<R> {
    /// `empty` is what [`ResourceHandler::resource`] reports; it must be the
    /// empty resource.
    pub fn new(empty: R) -> Result<Self, TransferError> {
        if !empty.is_empty() {
            return Err(TransferError::ExpectedEmpty {
                resource: format!("{empty:?}"),
            });
        }
        Ok(Self { empty })
    }
}

impl<R: Resource> ResourceHandler<R> for VoidingHandler<R> {
    fn size(&self) -> usize {
        1
    }

    fn resource(&self, index: usize) -> Result<R, TransferError> {
        check_index(index, 1)?;
        Ok(self.empty.clone())
    }

    fn amount(&self, index: usize) -> Result<u64, TransferError> {
        check_index(index, 1)?;
        Ok(0)
    }

    fn capacity(&self, index: usize, _resource: &R) -> Result<u64, TransferError> {
        check_index(index, 1)?;
        Ok(u64::MAX)
    }

    fn is_valid(&self, index: usize, resource: &R) -> Result<bool, TransferError> {
        check_index(index, 1)?;
        check_non_empty(resource)?;
        Ok(true)
    }

    fn insert_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        _transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_index(index, 1)?;
        check_non_empty(resource)?;
        Ok(amount)
    }

    fn extract_at(
        &self,
        index: usize,
        resource: &R,
        _amount: u64,
        _transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_index(index, 1)?;
        check_non_empty(resource)?;
        Ok(0)
    }

    fn describe(&self) -> String {
        "VoidingHandler".into()
    }
}

/// One index holding an endless supply of a single resource.
///
/// Accepts and yields any amount of that resource and nothing else.
#[derive(Debug, Clone)]
pub struct InfiniteHandler<R> {
    resource: R,
}

impl<R: Resource> InfiniteHandler<R> {
    pub fn new(resource: R) -> Result<Self, TransferError> {
        check_non_empty(&resource)?;
        Ok(Self { resource })
    }

    pub fn infinite_resource(&self) -> &R {
        &self.resource
    }
}

impl<R: Resource> ResourceHandler<R> for InfiniteHandler<R> {
    fn size(&self) -> usize {
        1
    }

    fn resource(&self, index: usize) -> Result<R, TransferError> {
        check_index(index, 1)?;
        Ok(self.resource.clone())
    }

    fn amount(&self, index: usize) -> Result<u64, TransferError> {
        check_index(index, 1)?;
        Ok(u64::MAX)
    }

    fn capacity(&self, index: usize, resource: &R) -> Result<u64, TransferError> {
        check_index(index, 1)?;
        if resource.is_empty() || *resource == self.resource {
            Ok(u64::MAX)
        } else {
            Ok(0)
        }
    }

    fn is_valid(&self, index: usize, resource: &R) -> Result<bool, TransferError> {
        check_index(index, 1)?;
        check_non_empty(resource)?;
        Ok(*resource == self.resource)
    }

    fn insert_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        _transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_index(index, 1)?;
        check_non_empty(resource)?;
        Ok(if *resource == self.resource { amount } else { 0 })
    }

    fn extract_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        _transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_index(index, 1)?;
        check_non_empty(resource)?;
        Ok(if *resource == self.resource { amount } else { 0 })
    }

    fn describe(&self) -> String {
        format!("InfiniteHandler({:?})", self.resource)
    }
}
