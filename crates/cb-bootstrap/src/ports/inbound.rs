//! # Inbound Ports
//!
//! API trait for driving the bootstrap controller: peer lifecycle, message
//! intake, and the periodic tick.

use crate::domain::{BootstrapError, SyncPhase};
use async_trait::async_trait;
use cb_protocol::Message;
use shared_types::PeerId;

/// Bootstrap controller API - inbound port.
#[async_trait]
pub trait BootstrapApi: Send + Sync {
    /// Register a newly connected peer. Returns `false` when the peer is
    /// blacklisted and the connection must be refused.
    async fn connect_peer(&self, peer: PeerId) -> Result<bool, BootstrapError>;

    /// Tear down a peer's session and expectations.
    async fn disconnect_peer(&self, peer: PeerId) -> Result<(), BootstrapError>;

    /// Feed one wire message received from a peer.
    async fn handle_message(&self, message: Message) -> Result<(), BootstrapError>;

    /// Start a synchronization round by soliciting branch claims.
    async fn start_round(&self) -> Result<(), BootstrapError>;

    /// Advance retry bookkeeping and phase timeouts by one cycle.
    async fn tick(&self) -> Result<(), BootstrapError>;

    /// Current phase of the catch-up cycle.
    fn phase(&self) -> SyncPhase;

    /// Whether the local head is considered fresh.
    fn is_synced(&self) -> bool;
}
