//! # Error Taxonomy
//!
//! Every fallible operation in blocktree returns `eyre::Result`. Errors that
//! callers need to branch on carry a [`TreeError`] at the root of the report;
//! everything else (cache I/O, malformed input) is a plain `eyre` report with
//! context attached at each layer.
//!
//! To test for a specific kind, downcast the report:
//!
//! ```ignore
//! match index.lookup(&key) {
//!     Ok(value) => ...,
//!     Err(err) if err.downcast_ref::<TreeError>() == Some(&TreeError::NotFound) => ...,
//!     Err(err) => return Err(err),
//! }
//! ```
//!
//! Internal consistency violations never panic in release builds; they surface
//! as [`TreeError::Insane`] with a message describing the broken structure.

use thiserror::Error;

/// Operational error kinds surfaced by the index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The key is not present in the tree.
    #[error("key not found")]
    NotFound,

    /// Insert was called with a key that is already present.
    #[error("key already present")]
    Conflict,

    /// The free list is exhausted.
    #[error("out of space: free list is empty")]
    OutOfSpace,

    /// A slot index was outside the valid range for its node.
    #[error("slot index {index} out of bounds (limit {limit})")]
    OutOfBounds { index: usize, limit: usize },

    /// The on-disk structure violated an invariant.
    #[error("structural corruption: {0}")]
    Insane(String),

    /// The operation is not implemented.
    #[error("operation not implemented")]
    Unimplemented,
}

impl TreeError {
    /// Builds an [`TreeError::Insane`] report from a formatted message.
    pub fn insane(msg: impl Into<String>) -> eyre::Report {
        TreeError::Insane(msg.into()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        assert_eq!(TreeError::NotFound.to_string(), "key not found");
    }

    #[test]
    fn out_of_bounds_display() {
        let err = TreeError::OutOfBounds { index: 7, limit: 5 };
        assert_eq!(err.to_string(), "slot index 7 out of bounds (limit 5)");
    }

    #[test]
    fn insane_helper_is_downcastable() {
        let report = TreeError::insane("bad block");
        assert_eq!(
            report.downcast_ref::<TreeError>(),
            Some(&TreeError::Insane("bad block".to_string()))
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TreeError>();
    }
}
