//! # Outbound Ports
//!
//! Traits for what the bootstrap controller needs from the rest of the
//! node: a transport to reach peers, the local chain store, and the block
//! application pipeline.

use crate::domain::BootstrapError;
use async_trait::async_trait;
use cb_protocol::Message;
use shared_types::{Block, BlockHeader, BranchId, ChainId, Hash, Height, OperationSet, PeerId};

/// Transport towards remote peers - outbound port.
///
/// Delivery is fire-and-forget at this layer; acknowledgement tracking is
/// done through session expectations, not transport errors.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Hand a message to the transport for delivery to `to`.
    async fn deliver(&self, to: PeerId, message: Message) -> Result<(), BootstrapError>;
}

/// Local chain storage - outbound port.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Header of the current head of the given chain.
    async fn current_head(&self, chain: ChainId) -> Result<BlockHeader, BootstrapError>;

    /// Hash of the locally stored block at a height, if any.
    async fn hash_at(&self, chain: ChainId, height: Height) -> Result<Option<Hash>, BootstrapError>;

    /// Locally stored header for (branch, height), if any.
    async fn header_at(
        &self,
        branch: BranchId,
        height: Height,
    ) -> Result<Option<BlockHeader>, BootstrapError>;

    /// Locally stored operation set for (branch, height), if any.
    async fn operations_at(
        &self,
        branch: BranchId,
        height: Height,
    ) -> Result<Option<OperationSet>, BootstrapError>;

    /// Persist an applied block and advance the head.
    async fn commit(&self, block: Block) -> Result<(), BootstrapError>;
}

/// Block validation/application pipeline - outbound port.
///
/// `apply` runs the full validity checks for a block on top of the current
/// head; only applied blocks are committed.
#[async_trait]
pub trait BlockImporter: Send + Sync {
    /// Validate and apply one block.
    async fn apply(&self, block: &Block) -> Result<(), BootstrapError>;
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Mock transport capturing delivered messages.
#[derive(Clone, Default)]
pub struct MockPeerLink {
    /// Every message handed to the transport, in order.
    pub delivered: Arc<Mutex<Vec<(PeerId, Message)>>>,
}

impl MockPeerLink {
    /// Drain and return everything delivered so far.
    pub fn take_delivered(&self) -> Vec<(PeerId, Message)> {
        std::mem::take(&mut *self.delivered.lock())
    }

    /// Messages delivered to one peer, leaving the log intact.
    pub fn delivered_to(&self, peer: PeerId) -> Vec<Message> {
        self.delivered
            .lock()
            .iter()
            .filter(|(to, _)| *to == peer)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl PeerLink for MockPeerLink {
    async fn deliver(&self, to: PeerId, message: Message) -> Result<(), BootstrapError> {
        self.delivered.lock().push((to, message));
        Ok(())
    }
}

/// In-memory chain store for tests.
#[derive(Clone)]
pub struct MockChainStore {
    state: Arc<Mutex<MockChainState>>,
}

struct MockChainState {
    headers: BTreeMap<Height, BlockHeader>,
    operations: BTreeMap<Height, OperationSet>,
    committed: Vec<Block>,
}

impl MockChainStore {
    /// Store seeded with an existing chain prefix ending at `headers.last()`.
    pub fn with_chain(headers: Vec<BlockHeader>, operations: Vec<OperationSet>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockChainState {
                headers: headers.into_iter().map(|h| (h.height, h)).collect(),
                operations: operations.into_iter().map(|o| (o.height, o)).collect(),
                committed: Vec::new(),
            })),
        }
    }

    /// Blocks committed through this store, in commit order.
    pub fn committed(&self) -> Vec<Block> {
        self.state.lock().committed.clone()
    }

    /// Height of the highest stored header.
    pub fn head_height(&self) -> Option<Height> {
        self.state.lock().headers.keys().next_back().copied()
    }
}

#[async_trait]
impl ChainStore for MockChainStore {
    async fn current_head(&self, _chain: ChainId) -> Result<BlockHeader, BootstrapError> {
        let state = self.state.lock();
        state
            .headers
            .values()
            .next_back()
            .cloned()
            .ok_or_else(|| BootstrapError::StoreFailed {
                reason: "empty chain".to_string(),
            })
    }

    async fn hash_at(
        &self,
        _chain: ChainId,
        height: Height,
    ) -> Result<Option<Hash>, BootstrapError> {
        Ok(self
            .state
            .lock()
            .headers
            .get(&height)
            .map(|h| h.compute_hash()))
    }

    async fn header_at(
        &self,
        branch: BranchId,
        height: Height,
    ) -> Result<Option<BlockHeader>, BootstrapError> {
        Ok(self
            .state
            .lock()
            .headers
            .get(&height)
            .filter(|h| h.branch == branch)
            .cloned())
    }

    async fn operations_at(
        &self,
        branch: BranchId,
        height: Height,
    ) -> Result<Option<OperationSet>, BootstrapError> {
        Ok(self
            .state
            .lock()
            .operations
            .get(&height)
            .filter(|o| o.branch == branch)
            .cloned())
    }

    async fn commit(&self, block: Block) -> Result<(), BootstrapError> {
        let mut state = self.state.lock();
        state.headers.insert(block.header.height, block.header.clone());
        state
            .operations
            .insert(block.header.height, block.operations.clone());
        state.committed.push(block);
        Ok(())
    }
}

/// Importer that applies everything, or fails from a given height on.
#[derive(Clone, Default)]
pub struct MockImporter {
    /// Heights successfully applied, in order.
    pub applied: Arc<Mutex<Vec<Height>>>,
    /// If set, applying this height (or above) fails.
    pub fail_from: Option<Height>,
}

#[async_trait]
impl BlockImporter for MockImporter {
    async fn apply(&self, block: &Block) -> Result<(), BootstrapError> {
        if let Some(fail_from) = self.fail_from {
            if block.header.height >= fail_from {
                return Err(BootstrapError::ApplyFailed {
                    height: block.header.height,
                    reason: "mock importer failure".to_string(),
                });
            }
        }
        self.applied.lock().push(block.header.height);
        Ok(())
    }
}
