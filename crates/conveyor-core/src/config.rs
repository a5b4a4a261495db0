//! Per-thread tuning for the transaction manager.
//!
//! Configuration is plain data: it can be built in code or parsed from TOML
//! text, then installed on the current thread with
//! [`Transaction::configure`](crate::transaction::Transaction::configure).

use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// Default bound on `on_root_commit` invocations per outermost commit.
pub const DEFAULT_MAX_ROOT_COMMIT_CALLBACKS: usize = 10_000;

/// Settings for the transaction manager of one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// How many root-commit callbacks one outermost commit may trigger
    /// (including those caused by roots opened from callbacks) before the
    /// loop is treated as runaway self-re-triggering.
    pub max_root_commit_callbacks: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_root_commit_callbacks: DEFAULT_MAX_ROOT_COMMIT_CALLBACKS,
        }
    }
}

impl TransferConfig {
    /// Parse and validate a configuration from TOML text.
    ///
    /// Missing keys fall back to their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, TransferError> {
        let config: TransferConfig = toml::from_str(text).map_err(|e| TransferError::Config {
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every field holds a usable value.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.max_root_commit_callbacks == 0 {
            return Err(TransferError::Config {
                detail: "max_root_commit_callbacks must be at least 1".into(),
            });
        }
        Ok(())
    }
}
