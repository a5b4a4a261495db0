//! Crate-wide error type.
//!
//! Every variant except [`TransferError::Move`] and [`TransferError::Handler`]
//! describes a caller bug: bad indices, empty resources, or misuse of the
//! transaction stack. Capacity or validity rejection is never an error; it is
//! reported by returning less than was requested.

use std::fmt;
use std::panic::Location;

/// Errors produced by transactions, journals, and resource handlers.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// An index outside `0..size` was passed to a handler.
    #[error("index {index} is out of bounds for a handler of size {size}")]
    IndexOutOfBounds { index: usize, size: usize },

    /// An empty resource was passed where a non-empty one is required.
    #[error("resource must not be empty")]
    EmptyResource,

    /// The empty resource was required but a non-empty one was given.
    #[error("expected the empty resource, got {resource}")]
    ExpectedEmpty { resource: String },

    /// A stack would hold a positive amount of the empty resource.
    #[error("empty resource cannot hold a positive amount ({amount})")]
    InvalidStack { amount: u64 },

    /// A ranged view was requested over an invalid window.
    #[error("invalid range {start}..{end} for a handler of size {size}")]
    InvalidRange {
        start: usize,
        end: usize,
        size: usize,
    },

    /// A root transaction was opened while another one is active on this thread.
    #[error("a root transaction opened at {active} is already active; {requested} tried to open another")]
    RootAlreadyOpen {
        active: &'static Location<'static>,
        requested: &'static Location<'static>,
    },

    /// A child transaction was opened under a parent that already has one.
    #[error("transaction at depth {depth} already has an open child transaction")]
    ChildAlreadyOpen { depth: usize },

    /// An operation was applied to a transaction that is not the innermost one.
    #[error("transaction at depth {depth} is not the current transaction (current depth is {current:?})")]
    NotCurrent {
        depth: usize,
        current: Option<usize>,
    },

    /// The transaction has already been committed or aborted.
    #[error("transaction at depth {depth} is closed")]
    TransactionClosed { depth: usize },

    /// The innermost transaction is in the middle of closing.
    #[error("operation is not allowed while a transaction is closing")]
    ClosingTransaction,

    /// Root-commit callbacks kept re-triggering each other past the configured bound.
    #[error("root commit callbacks did not settle after {limit} invocations")]
    RootCommitOverflow { limit: usize },

    /// Invalid configuration.
    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    /// A handler implementation reported a failure of its own.
    #[error("handler failure: {message}")]
    Handler { message: String },

    /// A movement algorithm failed; carries enough context to tell which
    /// of the composed handlers was involved.
    #[error("failed to move resources ({context})")]
    Move {
        context: Box<MoveContext>,
        #[source]
        source: Box<TransferError>,
    },
}

impl TransferError {
    /// Shorthand for adapters reporting their own failures.
    pub fn handler(message: impl Into<String>) -> Self {
        TransferError::Handler {
            message: message.into(),
        }
    }

    /// Returns `true` for errors caused by misuse of the transaction stack.
    pub fn is_transaction_state(&self) -> bool {
        matches!(
            self,
            TransferError::RootAlreadyOpen { .. }
                | TransferError::ChildAlreadyOpen { .. }
                | TransferError::NotCurrent { .. }
                | TransferError::TransactionClosed { .. }
                | TransferError::ClosingTransaction
        )
    }

    /// The innermost error, looking through any [`TransferError::Move`] wrappers.
    pub fn root_cause(&self) -> &TransferError {
        let mut current = self;
        while let TransferError::Move { source, .. } = current {
            current = source;
        }
        current
    }
}

/// Diagnostic details attached to a failed move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveContext {
    /// Name of the algorithm that failed.
    pub operation: &'static str,
    pub from: String,
    pub to: String,
    /// Type name of the filter closure.
    pub filter: &'static str,
    pub amount: u64,
    /// Description of the ambient transaction, if one was supplied.
    pub transaction: Option<String>,
}

impl fmt::Display for MoveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: from={}, to={}, filter={}, amount={}, transaction=",
            self.operation, self.from, self.to, self.filter, self.amount
        )?;
        match &self.transaction {
            Some(tx) => f.write_str(tx),
            None => f.write_str("none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_error_display() {
        let err = TransferError::IndexOutOfBounds { index: 4, size: 4 };
        assert_eq!(
            err.to_string(),
            "index 4 is out of bounds for a handler of size 4"
        );
    }

    #[test]
    fn state_errors_are_classified() {
        assert!(TransferError::ChildAlreadyOpen { depth: 0 }.is_transaction_state());
        assert!(TransferError::ClosingTransaction.is_transaction_state());
        assert!(!TransferError::EmptyResource.is_transaction_state());
        assert!(!TransferError::handler("boom").is_transaction_state());
    }

    #[test]
    fn root_cause_unwraps_nested_moves() {
        let context = MoveContext {
            operation: "move_resources",
            from: "a".into(),
            to: "b".into(),
            filter: "closure",
            amount: 3,
            transaction: None,
        };
        let inner = TransferError::Move {
            context: Box::new(context.clone()),
            source: Box::new(TransferError::handler("jammed")),
        };
        let outer = TransferError::Move {
            context: Box::new(context),
            source: Box::new(inner),
        };
        assert!(matches!(
            outer.root_cause(),
            TransferError::Handler { message } if message == "jammed"
        ));
    }

    #[test]
    fn move_context_display_mentions_everything() {
        let context = MoveContext {
            operation: "move_first",
            from: "Chest".into(),
            to: "Furnace".into(),
            filter: "{{closure}}",
            amount: 64,
            transaction: Some("Transaction[depth=0]".into()),
        };
        let text = context.to_string();
        assert!(text.contains("move_first"));
        assert!(text.contains("from=Chest"));
        assert!(text.contains("to=Furnace"));
        assert!(text.contains("amount=64"));
        assert!(text.contains("Transaction[depth=0]"));
    }
}
