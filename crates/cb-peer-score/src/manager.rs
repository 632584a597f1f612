//! Peer score manager: scores for every connected peer, escalation
//! bookkeeping, and the score-driven request cadence.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use shared_types::PeerId;

use super::config::PeerScoreConfig;
use super::score::{PeerScore, Severity, Verdict};

/// Manages scores for all peers.
#[derive(Debug)]
pub struct PeerScoreManager {
    scores: HashMap<PeerId, PeerScore>,
    blacklist: HashSet<PeerId>,
    config: PeerScoreConfig,
}

impl PeerScoreManager {
    /// Create a new score manager.
    pub fn new(config: PeerScoreConfig) -> Self {
        Self {
            scores: HashMap::new(),
            blacklist: HashSet::new(),
            config,
        }
    }

    /// Register a newly connected peer at maximum score. Returns `false`
    /// for blacklisted peers, which must not be re-admitted.
    pub fn on_peer_connected(&mut self, peer: PeerId) -> bool {
        if self.blacklist.contains(&peer) {
            tracing::warn!(%peer, "refusing blacklisted peer");
            return false;
        }
        self.scores.insert(peer, PeerScore::new(&self.config));
        true
    }

    /// Forget a disconnected peer's score (blacklist status persists).
    pub fn on_peer_disconnected(&mut self, peer: PeerId) {
        self.scores.remove(&peer);
    }

    /// A peer's current score.
    pub fn score(&self, peer: PeerId) -> Option<f64> {
        self.scores.get(&peer).map(PeerScore::score)
    }

    /// Whether the peer is currently tracked (connected and not escalated).
    pub fn is_active(&self, peer: PeerId) -> bool {
        self.scores.contains_key(&peer)
    }

    /// Whether the peer has been blacklisted.
    pub fn is_blacklisted(&self, peer: PeerId) -> bool {
        self.blacklist.contains(&peer)
    }

    /// Penalize a peer and act on the verdict: a `Disconnect` removes the
    /// score entry, a `Blacklist` additionally bars reconnection. The caller
    /// tears down the session when the verdict is not `Keep`.
    pub fn penalize(&mut self, peer: PeerId, severity: Severity) -> Verdict {
        let Some(score) = self.scores.get_mut(&peer) else {
            return Verdict::Keep;
        };
        let verdict = score.penalize(severity, &self.config);
        tracing::debug!(%peer, ?severity, score = score.score(), ?verdict, "peer penalized");
        match verdict {
            Verdict::Keep => {}
            Verdict::Disconnect => {
                self.scores.remove(&peer);
            }
            Verdict::Blacklist => {
                self.scores.remove(&peer);
                self.blacklist.insert(peer);
                tracing::warn!(%peer, "peer blacklisted");
            }
        }
        verdict
    }

    /// How long a worker should wait between polls of this peer. Interpolates
    /// between the configured fast and slow intervals: full health polls at
    /// `min_request_interval`, zero health at `max_request_interval`.
    /// Monotonically decreasing in score.
    pub fn request_cadence(&self, peer: PeerId) -> Duration {
        let health = self
            .scores
            .get(&peer)
            .map_or(0.0, |s| s.health(&self.config));
        let min = self.config.min_request_interval.as_secs_f64();
        let max = self.config.max_request_interval.as_secs_f64();
        Duration::from_secs_f64(max - (max - min) * health)
    }

    /// Active peers, best score first. Used to pick retry targets.
    pub fn peers_by_score(&self) -> Vec<PeerId> {
        let mut peers: Vec<(PeerId, f64)> = self
            .scores
            .iter()
            .map(|(id, s)| (*id, s.score()))
            .collect();
        peers.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        peers.into_iter().map(|(id, _)| id).collect()
    }

    /// Number of active peers.
    pub fn active_count(&self) -> usize {
        self.scores.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PeerScoreManager {
        PeerScoreManager::new(PeerScoreConfig::for_testing())
    }

    #[test]
    fn test_connect_and_score() {
        let mut m = manager();
        assert!(m.on_peer_connected(PeerId(1)));
        assert_eq!(m.score(PeerId(1)), Some(10.0));
        assert_eq!(m.active_count(), 1);
    }

    #[test]
    fn test_penalize_unknown_peer_is_noop() {
        let mut m = manager();
        assert_eq!(m.penalize(PeerId(9), Severity::Major), Verdict::Keep);
    }

    #[test]
    fn test_majors_remove_peer_but_allow_reconnect() {
        let mut m = manager();
        m.on_peer_connected(PeerId(1));
        m.penalize(PeerId(1), Severity::Major);
        assert_eq!(m.penalize(PeerId(1), Severity::Major), Verdict::Disconnect);
        assert!(!m.is_active(PeerId(1)));
        // Disconnected, not blacklisted: may reconnect.
        assert!(m.on_peer_connected(PeerId(1)));
    }

    #[test]
    fn test_blacklisted_peer_cannot_reconnect() {
        let mut m = manager();
        m.on_peer_connected(PeerId(1));
        assert_eq!(m.penalize(PeerId(1), Severity::Fatal), Verdict::Blacklist);
        assert!(m.is_blacklisted(PeerId(1)));
        assert!(!m.on_peer_connected(PeerId(1)));
    }

    #[test]
    fn test_cadence_monotone_in_score() {
        let mut m = manager();
        m.on_peer_connected(PeerId(1));
        m.on_peer_connected(PeerId(2));
        let fast = m.request_cadence(PeerId(1));
        m.penalize(PeerId(2), Severity::Minor);
        let slower = m.request_cadence(PeerId(2));
        assert!(fast < slower);
    }

    #[test]
    fn test_unknown_peer_gets_slowest_cadence() {
        let m = manager();
        assert_eq!(
            m.request_cadence(PeerId(9)),
            PeerScoreConfig::for_testing().max_request_interval
        );
    }

    #[test]
    fn test_peers_by_score_ordering() {
        let mut m = manager();
        m.on_peer_connected(PeerId(1));
        m.on_peer_connected(PeerId(2));
        m.on_peer_connected(PeerId(3));
        m.penalize(PeerId(1), Severity::Minor);
        m.penalize(PeerId(1), Severity::Minor);
        m.penalize(PeerId(2), Severity::Minor);

        assert_eq!(m.peers_by_score(), vec![PeerId(3), PeerId(2), PeerId(1)]);
    }
}
