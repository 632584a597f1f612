//! Protocol configuration.

use serde::{Deserialize, Serialize};

/// Deployment-time protocol constants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Fixed capacity of each per-(peer, chain) sent set and received queue.
    /// Producers stall or fail when a queue is full.
    pub queue_capacity: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self { queue_capacity: 16 }
    }
}

impl ProtocolConfig {
    /// Small bounds so backpressure paths are easy to hit in tests.
    pub fn for_testing() -> Self {
        Self { queue_capacity: 2 }
    }
}
