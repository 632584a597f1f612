//! # Domain Entities
//!
//! Core identifiers and payloads exchanged between peers during bootstrap.

use crate::errors::EntityError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// 32-byte SHA-256 hash.
pub type Hash = [u8; 32];

/// Block height within a branch.
pub type Height = u64;

/// Identifier of a chain the node participates in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainId(pub u32);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain-{}", self.0)
    }
}

/// A named reference to a candidate chain head, scoped to its chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchId {
    /// Chain this branch belongs to.
    pub chain: ChainId,
    /// Branch number within the chain.
    pub id: u32,
}

impl BranchId {
    /// Create a branch reference.
    pub fn new(chain: ChainId, id: u32) -> Self {
        Self { chain, id }
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/branch-{}", self.chain, self.id)
    }
}

/// Identifier of a remote peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Unix timestamp in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Wrap a raw seconds value.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self(secs)
    }

    /// Seconds since the epoch.
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Seconds elapsed between `self` and a later timestamp (zero if earlier).
    pub fn age_at(&self, now: Timestamp) -> u64 {
        now.0.saturating_sub(self.0)
    }
}

/// Block header: keyed by (branch, height), carries the predecessor link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Branch this header was advertised on.
    pub branch: BranchId,
    /// Height within the branch.
    pub height: Height,
    /// Hash of the predecessor block.
    pub predecessor: Hash,
    /// Block timestamp.
    pub timestamp: Timestamp,
    /// Fitness of the chain up to this block (higher wins at equal height).
    pub fitness: u64,
    /// Commitment to the block's operation set.
    pub operations_hash: Hash,
}

impl BlockHeader {
    /// Hash of this header. The preimage is the fixed field encoding below;
    /// every component derives header hashes through this method only.
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.branch.chain.0.to_le_bytes());
        hasher.update(self.branch.id.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.predecessor);
        hasher.update(self.timestamp.as_secs().to_le_bytes());
        hasher.update(self.fitness.to_le_bytes());
        hasher.update(self.operations_hash);
        hasher.finalize().into()
    }

    /// (height, fitness) ordering used to compare advertised heads.
    pub fn fitness_key(&self) -> (Height, u64) {
        (self.height, self.fitness)
    }
}

/// A single operation payload (opaque to this subsystem).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Serialized operation bytes.
    pub payload: Vec<u8>,
}

impl Operation {
    /// Hash of the operation payload.
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(&self.payload);
        hasher.finalize().into()
    }
}

/// The operations belonging to one block, keyed by (branch, height).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSet {
    /// Branch the operations were advertised on.
    pub branch: BranchId,
    /// Height of the block they belong to.
    pub height: Height,
    /// The operations themselves.
    pub operations: Vec<Operation>,
}

impl OperationSet {
    /// Commitment over the contained operations, in order.
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        for op in &self.operations {
            hasher.update(op.compute_hash());
        }
        hasher.finalize().into()
    }
}

/// A fully assembled block: quorum header plus its operations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The block header.
    pub header: BlockHeader,
    /// Operations for this block.
    pub operations: OperationSet,
}

impl Block {
    /// Assemble a block from a header and an operation set, checking that
    /// they belong together.
    ///
    /// # Errors
    /// - `EntityError::KeyMismatch` if branch or height differ
    /// - `EntityError::OperationsMismatch` if the operations don't hash to
    ///   the header's commitment
    pub fn assemble(header: BlockHeader, operations: OperationSet) -> Result<Self, EntityError> {
        if header.branch != operations.branch || header.height != operations.height {
            return Err(EntityError::KeyMismatch {
                header_branch: header.branch,
                header_height: header.height,
                ops_branch: operations.branch,
                ops_height: operations.height,
            });
        }
        if header.operations_hash != operations.compute_hash() {
            return Err(EntityError::OperationsMismatch {
                height: header.height,
            });
        }
        Ok(Self { header, operations })
    }

    /// Height of the block.
    pub fn height(&self) -> Height {
        self.header.height
    }

    /// Hash of the block's header.
    pub fn hash(&self) -> Hash {
        self.header.compute_hash()
    }
}

/// Current chain tip as seen by the local node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    /// Tip header hash.
    pub hash: Hash,
    /// Tip height.
    pub height: Height,
}

impl ChainTip {
    /// Create a chain tip reference.
    pub fn new(hash: Hash, height: Height) -> Self {
        Self { hash, height }
    }
}
