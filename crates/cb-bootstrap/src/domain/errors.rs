//! # Domain Errors
//!
//! Error taxonomy for the bootstrap controller. Only `ForkBelowHead` and
//! `ApplyFailed` are relationship/round-fatal; everything else is recoverable
//! by retrying against alternate peers within the round.

use cb_protocol::ProtocolError;
use shared_types::{EntityError, Height, PeerId};
use thiserror::Error;

/// Bootstrap-level errors.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A peer's branch claim contradicts our chain at or below the accepted
    /// head. Fatal for the relationship: disconnect, never retried.
    #[error("peer {peer} forks below the accepted head at height {height}")]
    ForkBelowHead {
        /// The deviating peer.
        peer: PeerId,
        /// Height of the mismatching hash.
        height: Height,
    },

    /// A header arrived from a peer it was never requested from.
    #[error("unrequested header from {peer} at height {height}")]
    UnrequestedHeader {
        /// The peer.
        peer: PeerId,
        /// The claimed height.
        height: Height,
    },

    /// No header entry has reached quorum at this height.
    #[error("no quorum at height {height}")]
    QuorumNotReached {
        /// The height.
        height: Height,
    },

    /// The external validation collaborator rejected a block. Round-level:
    /// the round does not advance past this height until resolved.
    #[error("block application failed at height {height}: {reason}")]
    ApplyFailed {
        /// Height of the rejected block.
        height: Height,
        /// Collaborator-supplied reason.
        reason: String,
    },

    /// The chain store failed to serve or commit.
    #[error("chain store failure: {reason}")]
    StoreFailed {
        /// Store-supplied reason.
        reason: String,
    },

    /// No connected peer can serve a request right now.
    #[error("no peer available to serve height {height}")]
    NoPeerAvailable {
        /// The level we tried to fetch.
        height: Height,
    },

    /// Assembling a block from quorum header plus operations failed.
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// Session/catalog-level failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_below_head_display() {
        let err = BootstrapError::ForkBelowHead {
            peer: PeerId(2),
            height: 4,
        };
        assert!(err.to_string().contains("peer-2"));
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn test_protocol_error_converts() {
        let err: BootstrapError = ProtocolError::UnsolicitedResponse { peer: PeerId(1) }.into();
        assert!(matches!(err, BootstrapError::Protocol(_)));
    }
}
