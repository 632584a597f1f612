//! Per-peer score state and penalty logic.

use super::config::PeerScoreConfig;
use serde::{Deserialize, Serialize};

/// How bad a protocol violation is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Recoverable misbehavior: losing-branch support, queue abuse.
    Minor,
    /// Clear protocol violation: unrequested responses.
    Major,
    /// Relationship-ending: branch deviation below the accepted head.
    Fatal,
}

/// What the controller should do with the peer after a penalty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Keep the connection.
    Keep,
    /// Disconnect the peer.
    Disconnect,
    /// Disconnect and refuse reconnection.
    Blacklist,
}

/// Score state for a single peer. Starts at the configured maximum and only
/// moves down through penalties.
#[derive(Clone, Debug)]
pub struct PeerScore {
    score: f64,
    violations: u32,
}

impl PeerScore {
    /// New peer at maximum score.
    pub fn new(config: &PeerScoreConfig) -> Self {
        Self {
            score: config.initial_score,
            violations: 0,
        }
    }

    /// Current score.
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Violations recorded so far.
    pub fn violations(&self) -> u32 {
        self.violations
    }

    /// Apply a penalty and return the resulting verdict. A `Fatal` severity
    /// drops straight to the blacklist threshold: the relationship is over
    /// and must not be retried.
    pub fn penalize(&mut self, severity: Severity, config: &PeerScoreConfig) -> Verdict {
        self.violations += 1;
        let weight = match severity {
            Severity::Minor => config.minor_penalty,
            Severity::Major => config.major_penalty,
            Severity::Fatal => self.score - config.blacklist_threshold,
        };
        self.score -= weight;

        if self.score <= config.blacklist_threshold {
            return Verdict::Blacklist;
        }
        if self.score <= config.disconnect_threshold {
            return Verdict::Disconnect;
        }
        Verdict::Keep
    }

    /// Fraction of the initial score remaining, clamped to [0, 1].
    pub fn health(&self, config: &PeerScoreConfig) -> f64 {
        if config.initial_score <= 0.0 {
            return 0.0;
        }
        (self.score / config.initial_score).clamp(0.0, 1.0)
    }
}
