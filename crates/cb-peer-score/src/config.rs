//! Peer scoring configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Peer scoring configuration. Deployment-time constants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerScoreConfig {
    /// Score every peer starts with (the maximum).
    pub initial_score: f64,

    /// Points removed for a minor violation.
    pub minor_penalty: f64,
    /// Points removed for a major violation.
    pub major_penalty: f64,

    /// Score at or below which the peer is disconnected.
    pub disconnect_threshold: f64,
    /// Score at or below which the peer is blacklisted.
    pub blacklist_threshold: f64,

    /// Polling interval for a peer at maximum score.
    pub min_request_interval: Duration,
    /// Polling interval for a peer at the disconnect threshold.
    pub max_request_interval: Duration,
}

impl Default for PeerScoreConfig {
    fn default() -> Self {
        Self {
            initial_score: 100.0,
            minor_penalty: 5.0,
            major_penalty: 25.0,
            disconnect_threshold: 0.0,
            blacklist_threshold: -50.0,
            min_request_interval: Duration::from_millis(200),
            max_request_interval: Duration::from_secs(5),
        }
    }
}

impl PeerScoreConfig {
    /// Testing config: small scores so escalation is quick to trigger.
    pub fn for_testing() -> Self {
        Self {
            initial_score: 10.0,
            minor_penalty: 2.0,
            major_penalty: 6.0,
            disconnect_threshold: 0.0,
            blacklist_threshold: -10.0,
            min_request_interval: Duration::from_millis(1),
            max_request_interval: Duration::from_millis(10),
        }
    }
}
