//! Error types for the bootstrap protocol.

use shared_types::{ChainId, PeerId};
use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message bytes or field combination don't match any valid schema.
    /// Never admitted into any queue.
    #[error("malformed message: {reason}")]
    MalformedMessage {
        /// Why the message was rejected.
        reason: String,
    },

    /// A response arrived with no matching expectation entry - either
    /// unsolicited or a duplicate.
    #[error("unsolicited response from {peer}")]
    UnsolicitedResponse {
        /// Peer that sent the response.
        peer: PeerId,
    },

    /// Send or receive would exceed the session's fixed capacity.
    /// Backpressure - the caller retries or stalls, nothing is dropped.
    #[error("queue full for {peer} (capacity {capacity})")]
    QueueFull {
        /// Peer whose session is full.
        peer: PeerId,
        /// The configured capacity bound.
        capacity: usize,
    },

    /// System messages are locally generated; a peer sent one over the wire.
    #[error("system message received from {peer}")]
    SystemMessageFromPeer {
        /// Offending peer.
        peer: PeerId,
    },

    /// No session is open for this (peer, chain).
    #[error("no open session for {peer} on {chain}")]
    SessionNotFound {
        /// The peer.
        peer: PeerId,
        /// The chain.
        chain: ChainId,
    },
}
