use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransferError;

/// An immutable, value-compared identifier for "what" is stored.
///
/// Every resource type has a distinguished empty value. The empty resource
/// never carries a positive amount anywhere in a handler.
pub trait Resource: Clone + PartialEq + fmt::Debug + 'static {
    fn is_empty(&self) -> bool;
}

/// A resource paired with an amount.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceStack<R> {
    pub resource: R,
    pub amount: u64,
}

impl<R: Resource> ResourceStack<R> {
    pub fn new(resource: R, amount: u64) -> Self {
        Self { resource, amount }
    }

    /// A stack of `empty_resource` with no amount.
    pub fn empty(empty_resource: R) -> Self {
        Self {
            resource: empty_resource,
            amount: 0,
        }
    }

    /// `true` if either the resource is empty or the amount is zero.
    pub fn is_empty(&self) -> bool {
        is_empty_stack(&self.resource, self.amount)
    }

    /// The same resource with a different amount.
    pub fn with_amount(&self, amount: u64) -> Self {
        Self {
            resource: self.resource.clone(),
            amount,
        }
    }
}

/// `true` if the resource is empty or the amount is zero.
pub fn is_empty_stack<R: Resource>(resource: &R, amount: u64) -> bool {
    amount == 0 || resource.is_empty()
}

/// Reject the empty resource.
///
/// Handlers call this at the top of `insert`/`extract` and anywhere else an
/// empty resource would be a caller bug. Amounts are unsigned, so there is no
/// separate negativity check.
pub fn check_non_empty<R: Resource>(resource: &R) -> Result<(), TransferError> {
    if resource.is_empty() {
        return Err(TransferError::EmptyResource);
    }
    Ok(())
}

/// Reject stacks that would hold a positive amount of the empty resource.
pub fn check_stack<R: Resource>(resource: &R, amount: u64) -> Result<(), TransferError> {
    if resource.is_empty() && amount > 0 {
        return Err(TransferError::InvalidStack { amount });
    }
    Ok(())
}
