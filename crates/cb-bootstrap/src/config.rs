//! Bootstrap controller configuration.

use serde::{Deserialize, Serialize};
use shared_types::ChainId;
use std::time::Duration;

/// Deployment-time constants for the bootstrap controller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// The chain this controller synchronizes.
    pub chain: ChainId,

    /// Minimum number of distinct supporting peers before a header is
    /// accepted at a level.
    pub min_endorsements: usize,

    /// The node is `Synced` when the applied head's timestamp is within
    /// this much of wall-clock time.
    pub freshness_threshold: Duration,

    /// Worker ticks a frontier request may stay unanswered before it is
    /// reissued to a different peer.
    pub retry_cycles: u32,

    /// Minimum concurrent peer connections to make progress.
    pub min_connections: usize,
    /// Maximum concurrent peer connections.
    pub max_connections: usize,

    /// How many trailing (height, hash) pairs we serve in our own branch
    /// claims.
    pub history_length: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            chain: ChainId(0),
            min_endorsements: 2,
            freshness_threshold: Duration::from_secs(600),
            retry_cycles: 3,
            min_connections: 2,
            max_connections: 50,
            history_length: 200,
        }
    }
}

impl BootstrapConfig {
    /// Small constants for deterministic tests.
    pub fn for_testing() -> Self {
        Self {
            chain: ChainId(0),
            min_endorsements: 2,
            freshness_threshold: Duration::from_secs(3600),
            retry_cycles: 2,
            min_connections: 1,
            max_connections: 8,
            history_length: 32,
        }
    }
}
