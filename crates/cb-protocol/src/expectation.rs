//! # Expectation Registry
//!
//! Per-(peer, chain) bookkeeping of which response is still awaited for each
//! outstanding request or advertisement. Each entry is consumed by at most
//! one matching reply; a reply with no matching entry is a protocol anomaly
//! reported to the caller, never silently dropped.

use crate::messages::{Expect, Message};
use shared_types::{ChainId, PeerId};
use std::collections::HashMap;

/// Registry of outstanding expectations.
#[derive(Debug, Default)]
pub struct ExpectationRegistry {
    entries: HashMap<(PeerId, ChainId), Vec<Expect>>,
}

impl ExpectationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an expectation owed by `peer` on `chain`.
    pub fn register(&mut self, peer: PeerId, chain: ChainId, expect: Expect) {
        tracing::trace!(%peer, %chain, correlation_id = %expect.correlation_id, "register expectation");
        self.entries.entry((peer, chain)).or_default().push(expect);
    }

    /// Resolve at most one matching entry with `incoming`, removing and
    /// returning it. `None` means no entry matched - an unsolicited or
    /// duplicate response.
    pub fn resolve(&mut self, peer: PeerId, chain: ChainId, incoming: &Message) -> Option<Expect> {
        let pending = self.entries.get_mut(&(peer, chain))?;
        let pos = pending.iter().position(|e| e.matches(incoming))?;
        let resolved = pending.remove(pos);
        if pending.is_empty() {
            self.entries.remove(&(peer, chain));
        }
        Some(resolved)
    }

    /// Outstanding entries for one (peer, chain).
    pub fn pending(&self, peer: PeerId, chain: ChainId) -> usize {
        self.entries.get(&(peer, chain)).map_or(0, Vec::len)
    }

    /// Total outstanding entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry for one (peer, chain), returning the cancelled set.
    pub fn cancel(&mut self, peer: PeerId, chain: ChainId) -> Vec<Expect> {
        self.entries.remove(&(peer, chain)).unwrap_or_default()
    }

    /// Drop every entry in the registry, returning how many were cancelled.
    /// Used on round reset.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.len();
        self.entries.clear();
        cancelled
    }
}
