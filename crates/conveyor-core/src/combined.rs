//! Concatenation of several handlers' index spaces.

use std::rc::Rc;

use crate::error::TransferError;
use crate::handler::{ResourceHandler, check_index};
use crate::resource::{Resource, check_non_empty};
use crate::transaction::TransactionContext;

/// Exposes the indices of several handlers one after another.
///
/// The index table is computed once at construction. If a wrapped handler
/// changes size afterwards, build a new `CombinedHandler`.
pub struct CombinedHandler<R: Resource> {
    handlers: Vec<Rc<dyn ResourceHandler<R>>>,
    /// First combined index of each handler.
    base_index: Vec<usize>,
    size: usize,
}

impl<R: Resource> CombinedHandler<R> {
    pub fn new(handlers: Vec<Rc<dyn ResourceHandler<R>>>) -> Self {
        let mut base_index = Vec::with_capacity(handlers.len());
        let mut size = 0;
        for handler in &handlers {
            base_index.push(size);
            size += handler.size();
        }
        Self {
            handlers,
            base_index,
            size,
        }
    }

    pub fn handlers(&self) -> &[Rc<dyn ResourceHandler<R>>] {
        &self.handlers
    }

    /// Map a combined index to the owning handler and its local index.
    fn locate(&self, index: usize) -> Result<(&dyn ResourceHandler<R>, usize), TransferError> {
        check_index(index, self.size)?;
        // Handlers of size 0 share their base with the next handler, so take
        // the last handler whose base is <= index.
        let slot = self.base_index.partition_point(|&base| base <= index) - 1;
        Ok((&*self.handlers[slot], index - self.base_index[slot]))
    }
}

impl<R: Resource> ResourceHandler<R> for CombinedHandler<R> {
    fn size(&self) -> usize {
        self.size
    }

    fn resource(&self, index: usize) -> Result<R, TransferError> {
        let (handler, local) = self.locate(index)?;
        handler.resource(local)
    }

    fn amount(&self, index: usize) -> Result<u64, TransferError> {
        let (handler, local) = self.locate(index)?;
        handler.amount(local)
    }

    fn capacity(&self, index: usize, resource: &R) -> Result<u64, TransferError> {
        let (handler, local) = self.locate(index)?;
        handler.capacity(local, resource)
    }

    fn is_valid(&self, index: usize, resource: &R) -> Result<bool, TransferError> {
        let (handler, local) = self.locate(index)?;
        if resource.is_empty() {
            return Ok(true);
        }
        handler.is_valid(local, resource)
    }

    fn insert_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        let (handler, local) = self.locate(index)?;
        handler.insert_at(local, resource, amount, transaction)
    }

    fn extract_at(
        &self,
        index: usize,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        let (handler, local) = self.locate(index)?;
        handler.extract_at(local, resource, amount, transaction)
    }

    /// Lets each wrapped handler distribute its share with its own policy.
    fn insert(
        &self,
        resource: &R,
        amount: u64,
        transaction: &TransactionContext,
    ) -> Result<u64, TransferError> {
        check_non_empty(resource)?;
        let mut inserted = 0;
        for handler in &self.handlers {
            if inserted == amount {
                break;
            }
            let remaining = amount - inserted;
            let moved = handler.insert(resource, remaining, transaction)?;
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
        let mut extracted = 0;
        for handler in &self.handlers {
            if extracted == amount {
                break;
            }
            let remaining = amount - extracted;
            let moved = handler.extract(resource, remaining, transaction)?;
            extracted += moved.min(remaining);
        }
        Ok(extracted)
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.handlers.iter().map(|h| h.describe()).collect();
        format!("CombinedHandler[{}]", parts.join(", "))
    }
}
