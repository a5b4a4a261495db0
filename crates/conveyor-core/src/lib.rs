//! Conveyor Core -- transactional resource transfer between containers.
//!
//! This crate provides nested transactions with lazy snapshot journals, a
//! single indexed container contract for anything that stores resources, a
//! set of composite handlers, and the algorithms that move resources between
//! handlers without ever losing or duplicating any.
//!
//! # Transactions
//!
//! Every mutation happens inside a [`transaction::Transaction`]. Transactions
//! nest; at most one root and one child per level are open on a thread at any
//! time. Dropping a transaction without committing aborts it, which reverts
//! every journal touched at that level:
//!
//! ```rust,ignore
//! let tx = Transaction::open_root()?;
//! let moved = move_resources(&chest, &furnace, |r| *r == coal, 16, Some(tx.context()))?;
//! if moved == 16 {
//!     tx.commit()?;
//! } // otherwise dropped and aborted
//! ```
//!
//! # Key Types
//!
//! - [`transaction::Transaction`] -- Nested, thread-confined transactions.
//! - [`journal::Journal`] -- Wraps a [`journal::SnapshotJournal`] and takes
//!   at most one snapshot per transaction level.
//! - [`handler::ResourceHandler`] -- The indexed container contract.
//! - [`combined::CombinedHandler`], [`ranged::RangedHandler`],
//!   [`delegating::DelegatingHandler`] -- Composition over other handlers.
//! - [`stacks::StacksHandler`] -- Per-slot journaled storage for any
//!   [`stacks::StackKind`].
//! - [`movement`] -- Insert, extract, and move algorithms.
//! - [`rng::TransactionalRng`] -- A PRNG whose aborted draws are replayed.

pub mod basic;
pub mod combined;
pub mod config;
pub mod delegating;
pub mod error;
pub mod handler;
pub mod journal;
pub mod movement;
pub mod ranged;
pub mod resource;
pub mod rng;
pub mod stacks;
pub mod transaction;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::TransferConfig;
pub use error::{MoveContext, TransferError};
pub use handler::ResourceHandler;
pub use journal::{Journal, SnapshotJournal};
pub use resource::{Resource, ResourceStack};
pub use transaction::{Lifecycle, Transaction, TransactionContext};
