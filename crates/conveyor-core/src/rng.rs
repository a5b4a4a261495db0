//! Deterministic PRNG, plain and transactional.
//!
//! Uses the SplitMix64 algorithm: fast, 8 bytes of state, and trivially
//! serializable. [`TransactionalRng`] keeps one inside a journal so that
//! values drawn inside an aborted transaction come out again next time.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::TransferError;
use crate::journal::{Journal, SnapshotJournal};
use crate::transaction::TransactionContext;

/// SplitMix64 pseudo-random number generator.
///
/// Deterministic across platforms.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    /// Create a new RNG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)`, built from the top 53 bits of the next value.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Returns `true` with the given probability.
    ///
    /// - probability <= 0 (or NaN) always returns false
    /// - probability >= 1 always returns true
    pub fn chance(&mut self, probability: f64) -> bool {
        if probability.is_nan() || probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.next_f64() < probability
    }

    /// Get the internal state (for hashing/serialization).
    pub fn state(&self) -> u64 {
        self.state
    }
}

struct RngJournal {
    rng: RefCell<SimRng>,
}

impl SnapshotJournal for RngJournal {
    type Snapshot = SimRng;

    fn create_snapshot(&self) -> SimRng {
        self.rng.borrow().clone()
    }

    fn revert_to_snapshot(&self, snapshot: SimRng) {
        *self.rng.borrow_mut() = snapshot;
    }
}

/// A [`SimRng`] whose draws are undone when the drawing transaction aborts.
///
/// Clones share the same generator.
#[derive(Clone)]
pub struct TransactionalRng {
    journal: Rc<Journal<RngJournal>>,
}

impl TransactionalRng {
    pub fn new(seed: u64) -> Self {
        Self::from_rng(SimRng::new(seed))
    }

    pub fn from_rng(rng: SimRng) -> Self {
        Self {
            journal: Journal::new(RngJournal {
                rng: RefCell::new(rng),
            }),
        }
    }

    /// A copy of the generator as it stands, including uncommitted draws.
    pub fn snapshot(&self) -> SimRng {
        self.journal.rng.borrow().clone()
    }

    pub fn next_u64(&self, transaction: &TransactionContext) -> Result<u64, TransferError> {
        self.journal.update_snapshots(transaction)?;
        Ok(self.journal.rng.borrow_mut().next_u64())
    }

    pub fn next_f64(&self, transaction: &TransactionContext) -> Result<f64, TransferError> {
        self.journal.update_snapshots(transaction)?;
        Ok(self.journal.rng.borrow_mut().next_f64())
    }

    /// See [`SimRng::chance`]. Certain outcomes do not draw.
    pub fn chance(
        &self,
        probability: f64,
        transaction: &TransactionContext,
    ) -> Result<bool, TransferError> {
        self.journal.update_snapshots(transaction)?;
        Ok(self.journal.rng.borrow_mut().chance(probability))
    }
}

impl std::fmt::Debug for TransactionalRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalRng")
            .field("rng", &*self.journal.rng.borrow())
            .finish()
    }
}
