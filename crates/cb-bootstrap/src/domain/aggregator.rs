//! # Quorum Header Aggregator
//!
//! Accumulates header claims per level across peers, derives implied support
//! from predecessor links, and decides when a level has quorum.
//!
//! Support propagation: a peer endorsing a header implicitly endorses its
//! whole ancestry. Concretely, whenever an entry at height `h` declares an
//! entry at `h - 1` as its predecessor, the parent's supporter set absorbs
//! the child's. The update runs to a fixed point over all pending levels, so
//! chains of links transfer support transitively.
//!
//! The aggregator is pure domain state: it reports quorum decisions and the
//! peers that backed losing candidates through [`ObserveOutcome`]; applying
//! penalties and issuing follow-up requests is the controller's job.

use super::entities::{PendingHeaderEntry, PendingHeaders};
use super::errors::BootstrapError;
use shared_types::{BlockHeader, BranchId, Hash, Height, PeerId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// What one `observe` call changed.
#[derive(Debug, Default)]
pub struct ObserveOutcome {
    /// Heights that reached quorum during this observation, ascending.
    pub newly_decided: Vec<Height>,
    /// Peers that endorsed a candidate discarded by a quorum decision.
    pub losing_supporters: BTreeSet<PeerId>,
}

/// Per-round header aggregation state.
#[derive(Debug)]
pub struct HeaderAggregator {
    pending: PendingHeaders,
    /// Levels already decided: height -> winning entry.
    decided: BTreeMap<Height, PendingHeaderEntry>,
    /// Which (branch, height) pairs were requested from which peer.
    requested: HashMap<PeerId, BTreeSet<(BranchId, Height)>>,
    min_endorsements: usize,
}

impl HeaderAggregator {
    /// Create an aggregator with the given quorum threshold.
    pub fn new(min_endorsements: usize) -> Self {
        Self {
            pending: PendingHeaders::new(),
            decided: BTreeMap::new(),
            requested: HashMap::new(),
            min_endorsements,
        }
    }

    /// Record that a header at (branch, height) was requested from `peer`.
    /// Only recorded requests make the peer's response admissible.
    pub fn note_requested(&mut self, peer: PeerId, branch: BranchId, height: Height) {
        self.requested.entry(peer).or_default().insert((branch, height));
    }

    /// Whether we asked `peer` for a header at (branch, height).
    pub fn was_requested(&self, peer: PeerId, branch: BranchId, height: Height) -> bool {
        self.requested
            .get(&peer)
            .is_some_and(|set| set.contains(&(branch, height)))
    }

    /// Feed one header response from a peer.
    ///
    /// # Errors
    /// - `UnrequestedHeader` if we never asked `peer` for this level; the
    ///   header is discarded and the caller penalizes the peer.
    pub fn observe(
        &mut self,
        peer: PeerId,
        header: BlockHeader,
    ) -> Result<ObserveOutcome, BootstrapError> {
        let height = header.height;
        if !self.was_requested(peer, header.branch, height) {
            return Err(BootstrapError::UnrequestedHeader { peer, height });
        }

        let mut outcome = ObserveOutcome::default();
        let hash = header.compute_hash();

        // A level already decided: late agreement is fine, late dissent is a
        // losing-branch endorsement.
        if let Some(winner) = self.decided.get(&height) {
            if winner.hash != hash {
                outcome.losing_supporters.insert(peer);
            }
            return Ok(outcome);
        }

        self.pending.support(header, hash, peer);

        // An already-decided child vouches for its predecessor.
        if let Some(child) = self.decided.get(&(height + 1)) {
            if child.header.predecessor == hash {
                let supporters: Vec<PeerId> = child.supporters.iter().copied().collect();
                if let Some(entry) = self.pending.entry_mut(height, hash) {
                    entry.supporters.extend(supporters);
                }
            }
        }

        self.propagate();
        self.check_quorum(&mut outcome);
        Ok(outcome)
    }

    /// Run descendant-implies-ancestor support propagation to a fixed point.
    fn propagate(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            let heights = self.pending.heights();
            // Child levels first so long chains converge in one sweep.
            for &h in heights.iter().rev() {
                let Some(parent_height) = h.checked_sub(1) else {
                    continue;
                };
                let links: Vec<(Hash, BTreeSet<PeerId>)> = self
                    .pending
                    .entries_at(h)
                    .iter()
                    .map(|e| (e.header.predecessor, e.supporters.clone()))
                    .collect();
                for (predecessor, supporters) in links {
                    if let Some(parent) = self.pending.entry_mut(parent_height, predecessor) {
                        let before = parent.supporters.len();
                        parent.supporters.extend(supporters);
                        if parent.supporters.len() > before {
                            changed = true;
                        }
                    }
                }
            }
        }
    }

    /// Decide every undecided level whose best entry reached the threshold,
    /// pruning the losers and collecting their endorsers.
    fn check_quorum(&mut self, outcome: &mut ObserveOutcome) {
        for height in self.pending.heights() {
            if self.decided.contains_key(&height) {
                continue;
            }
            // Agnostic tie-break: no hash is preferred until one crosses the
            // threshold on its own.
            let Some(winner_hash) = self
                .pending
                .entries_at(height)
                .iter()
                .find(|e| e.supporters.len() >= self.min_endorsements)
                .map(|e| e.hash)
            else {
                continue;
            };

            let (kept, losers): (Vec<_>, Vec<_>) = self
                .pending
                .take_level(height)
                .into_iter()
                .partition(|e| e.hash == winner_hash);
            let Some(winner) = kept.into_iter().next() else {
                continue;
            };
            for loser in losers {
                for peer in loser.supporters {
                    if !winner.supporters.contains(&peer) {
                        outcome.losing_supporters.insert(peer);
                    }
                }
            }
            tracing::debug!(
                height,
                supporters = winner.supporters.len(),
                "header quorum reached"
            );
            self.decided.insert(height, winner);
            outcome.newly_decided.push(height);
        }
    }

    /// The quorum-winning entry at a height, if decided.
    pub fn decided_entry(&self, height: Height) -> Option<&PendingHeaderEntry> {
        self.decided.get(&height)
    }

    /// Highest decided height, if any.
    pub fn max_decided(&self) -> Option<Height> {
        self.decided.keys().next_back().copied()
    }

    /// Whether every height in `from..=to` has a quorum entry.
    pub fn segment_complete(&self, from: Height, to: Height) -> bool {
        if from > to {
            return true;
        }
        (from..=to).all(|h| self.decided.contains_key(&h))
    }

    /// Candidate count still undecided (for observability).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop all round state (round reset).
    pub fn reset(&mut self) {
        self.pending.clear();
        self.decided.clear();
        self.requested.clear();
    }
}
