//! # Domain Entities
//!
//! Round-scoped bookkeeping state: the synchronization frontier, the
//! per-level candidate header table, fetched operations, and peer branch
//! claims. All of these are created empty at the start of a round and
//! cleared when the round's segment has been fully applied.

use shared_types::{BlockHeader, BranchId, Hash, Height, PeerId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Where the node currently stands in the catch-up cycle.
///
/// Phases advance in order; `Synced` falls back to `Unsynced` when the
/// local head goes stale, and any phase can restart from `Unsynced` on a
/// round reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    /// No round in progress; the local head may be stale.
    Unsynced,
    /// Branch claims solicited, waiting for enough answers.
    RequestingBranches,
    /// Fetching headers along the frontier until the segment is decided.
    RequestingHeaders,
    /// Fetching operation sets for the decided segment.
    RequestingOperations,
    /// Applying assembled blocks in ascending height order.
    Applying,
    /// Local head is fresh; serving peers, watching for staleness.
    Synced,
}

/// One candidate header at a level, with the peers endorsing it.
#[derive(Clone, Debug)]
pub struct PendingHeaderEntry {
    /// The candidate header.
    pub header: BlockHeader,
    /// Its hash (unique key within the level).
    pub hash: Hash,
    /// Peers supporting this candidate, directly or via propagation.
    pub supporters: BTreeSet<PeerId>,
}

/// Height-indexed table of candidate headers. At most one entry per height
/// survives pruning once quorum is reached there.
#[derive(Debug, Default)]
pub struct PendingHeaders {
    levels: BTreeMap<Height, Vec<PendingHeaderEntry>>,
}

impl PendingHeaders {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge a candidate: `peer` is added to the supporters of the
    /// entry keyed by (height, hash). Returns whether the supporter set grew.
    pub fn support(&mut self, header: BlockHeader, hash: Hash, peer: PeerId) -> bool {
        let height = header.height;
        let entries = self.levels.entry(height).or_default();
        if let Some(entry) = entries.iter_mut().find(|e| e.hash == hash) {
            return entry.supporters.insert(peer);
        }
        let mut supporters = BTreeSet::new();
        supporters.insert(peer);
        entries.push(PendingHeaderEntry {
            header,
            hash,
            supporters,
        });
        true
    }

    /// Candidates at a height.
    pub fn entries_at(&self, height: Height) -> &[PendingHeaderEntry] {
        self.levels.get(&height).map_or(&[], Vec::as_slice)
    }

    /// Mutable candidate lookup by (height, hash).
    pub fn entry_mut(&mut self, height: Height, hash: Hash) -> Option<&mut PendingHeaderEntry> {
        self.levels
            .get_mut(&height)?
            .iter_mut()
            .find(|e| e.hash == hash)
    }

    /// Heights with at least one candidate, ascending.
    pub fn heights(&self) -> Vec<Height> {
        self.levels.keys().copied().collect()
    }

    /// Remove and return every candidate at `height` (the level was decided).
    pub fn take_level(&mut self, height: Height) -> Vec<PendingHeaderEntry> {
        self.levels.remove(&height).unwrap_or_default()
    }

    /// Total candidate count.
    pub fn len(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Drop everything (round reset).
    pub fn clear(&mut self) {
        self.levels.clear();
    }
}

/// One hash in the synchronization frontier, with request bookkeeping.
#[derive(Clone, Debug)]
pub struct FrontierEntry {
    /// The branch the hash was claimed on.
    pub branch: BranchId,
    /// The level of the hash.
    pub height: Height,
    /// The hash itself.
    pub hash: Hash,
    asked: BTreeSet<PeerId>,
    age_ticks: u32,
}

impl FrontierEntry {
    /// Peers already asked for this hash.
    pub fn asked(&self) -> &BTreeSet<PeerId> {
        &self.asked
    }
}

/// The shared synchronization frontier: the lowest unresolved hashes above
/// the node's head, across all active branch claims. Within one round the
/// frontier only grows; it is cleared on round reset.
#[derive(Debug, Default)]
pub struct Frontier {
    entries: HashMap<Hash, FrontierEntry>,
}

impl Frontier {
    /// Create an empty frontier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hash. Returns `false` if already present (growth only, no
    /// replacement).
    pub fn insert(&mut self, branch: BranchId, height: Height, hash: Hash) -> bool {
        if self.entries.contains_key(&hash) {
            return false;
        }
        self.entries.insert(
            hash,
            FrontierEntry {
                branch,
                height,
                hash,
                asked: BTreeSet::new(),
                age_ticks: 0,
            },
        );
        true
    }

    /// Entries not yet requested from `peer`; marks them as asked. A worker
    /// that fails to send must `release` the claim.
    pub fn claim_for(&mut self, peer: PeerId) -> Vec<(BranchId, Height, Hash)> {
        let mut claimed = Vec::new();
        for entry in self.entries.values_mut() {
            if entry.asked.insert(peer) {
                claimed.push((entry.branch, entry.height, entry.hash));
            }
        }
        claimed
    }

    /// Undo a claim after a failed send so another tick can retry it.
    pub fn release(&mut self, peer: PeerId, hash: Hash) {
        if let Some(entry) = self.entries.get_mut(&hash) {
            entry.asked.remove(&peer);
        }
    }

    /// Age every entry by one worker tick. Entries unanswered past
    /// `retry_cycles` have their asked set cleared so they can be reissued
    /// to different peers; returns the reopened hashes.
    pub fn tick(&mut self, retry_cycles: u32) -> Vec<Hash> {
        let mut reopened = Vec::new();
        for entry in self.entries.values_mut() {
            entry.age_ticks += 1;
            if entry.age_ticks > retry_cycles && !entry.asked.is_empty() {
                entry.asked.clear();
                entry.age_ticks = 0;
                reopened.push(entry.hash);
            }
        }
        reopened
    }

    /// Whether `hash` is in the frontier.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Drop every entry at a height (the level was decided).
    pub fn remove_height(&mut self, height: Height) {
        self.entries.retain(|_, e| e.height != height);
    }

    /// Number of frontier hashes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the frontier is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the current entries.
    pub fn snapshot(&self) -> Vec<(BranchId, Height, Hash)> {
        self.entries
            .values()
            .map(|e| (e.branch, e.height, e.hash))
            .collect()
    }

    /// Drop everything (round reset).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Operations fetched for quorum-confirmed heights.
#[derive(Debug, Default)]
pub struct PendingOperations {
    by_height: BTreeMap<Height, shared_types::OperationSet>,
}

impl PendingOperations {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the operations received for a height.
    pub fn insert(&mut self, height: Height, ops: shared_types::OperationSet) {
        self.by_height.insert(height, ops);
    }

    /// Remove and return the operations for a height, if fetched.
    pub fn take(&mut self, height: Height) -> Option<shared_types::OperationSet> {
        self.by_height.remove(&height)
    }

    /// Whether operations for a height are already fetched.
    pub fn contains(&self, height: Height) -> bool {
        self.by_height.contains_key(&height)
    }

    /// Drop everything (round reset).
    pub fn clear(&mut self) {
        self.by_height.clear();
    }
}

/// A peer's branch claim: its advertised head and the hash history we keep
/// for frontier seeding and below-head consistency checks.
#[derive(Clone, Debug)]
pub struct BranchClaim {
    /// The claimed branch head.
    pub head: BlockHeader,
    /// Known (height -> hash) samples, ascending, including the head itself.
    pub hashes: BTreeMap<Height, Hash>,
}

impl BranchClaim {
    /// Build a claim from an advertised head and history.
    pub fn new(head: BlockHeader, history: Vec<(Height, Hash)>) -> Self {
        let mut hashes: BTreeMap<Height, Hash> = history.into_iter().collect();
        hashes.insert(head.height, head.compute_hash());
        Self { head, hashes }
    }

    /// Lowest claimed hash strictly above `height`.
    pub fn next_above(&self, height: Height) -> Option<(Height, Hash)> {
        self.hashes
            .range(height + 1..)
            .next()
            .map(|(h, hash)| (*h, *hash))
    }

    /// Claimed hashes at or below `height` (for below-head validation).
    pub fn at_or_below(&self, height: Height) -> Vec<(Height, Hash)> {
        self.hashes
            .range(..=height)
            .map(|(h, hash)| (*h, *hash))
            .collect()
    }
}
