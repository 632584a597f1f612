//! Errors raised by entity construction.

use crate::entities::{BranchId, Height};
use thiserror::Error;

/// Entity-level validation errors.
#[derive(Debug, Error)]
pub enum EntityError {
    /// Header and operation set are keyed by different (branch, height).
    #[error(
        "header keyed by {header_branch}@{header_height}, operations by {ops_branch}@{ops_height}"
    )]
    KeyMismatch {
        /// Branch on the header.
        header_branch: BranchId,
        /// Height on the header.
        header_height: Height,
        /// Branch on the operation set.
        ops_branch: BranchId,
        /// Height on the operation set.
        ops_height: Height,
    },

    /// Operations don't hash to the header's commitment.
    #[error("operations do not match header commitment at height {height}")]
    OperationsMismatch {
        /// Height of the offending block.
        height: Height,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{BranchId, ChainId};

    #[test]
    fn test_key_mismatch_display() {
        let err = EntityError::KeyMismatch {
            header_branch: BranchId::new(ChainId(0), 1),
            header_height: 5,
            ops_branch: BranchId::new(ChainId(0), 1),
            ops_height: 6,
        };
        assert!(err.to_string().contains('5'));
        assert!(err.to_string().contains('6'));
    }
}
